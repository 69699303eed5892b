//! Trustpoint Client command line
//!
//! Thin front end over [`trustpoint_client::TrustpointClient`]. Results are
//! printed as JSON; exported key material goes to `--out` or stdout.
//!
//! ```bash
//! trustpoint-client provision auto --otp abc123 --device dev-1 --host trustpoint.local
//! trustpoint-client list --verbose
//! trustpoint-client request generic --name mqtt --subject CN:sensor-7
//! trustpoint-client export credential --name mqtt --out mqtt.p12
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use trustpoint_client::configs::AppConfig;
use trustpoint_client::credentials::ProtectedExport;
use trustpoint_client::provision::{CredentialBundle, TrustMaterial};
use trustpoint_client::schema::{PkiProtocol, SignatureSuite};
use trustpoint_client::serializer::{
    CertificateCollectionFormat, CertificateFormat, PrivateKeyFormat, PublicKeyFormat,
};
use trustpoint_client::TrustpointClient;

#[derive(Parser)]
#[command(name = "trustpoint-client")]
#[command(about = "Onboard a device into Trustpoint domains and manage its DevIDs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short = 'v', long = "log-verbose", action = clap::ArgAction::Count)]
    log_verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new domain
    #[command(subcommand)]
    Provision(ProvisionCommand),

    /// List the credentials of a domain
    List {
        #[arg(short, long)]
        domain: Option<String>,

        /// Only this credential
        #[arg(short, long)]
        name: Option<String>,

        /// Include certificate, public key and chain
        #[arg(long)]
        verbose: bool,
    },

    /// Delete a credential
    Delete {
        #[arg(short, long)]
        domain: Option<String>,

        #[arg(short, long)]
        name: String,
    },

    /// Export key or certificate material
    #[command(subcommand)]
    Export(ExportCommand),

    /// Request a new certificate
    #[command(subcommand)]
    Request(RequestCommand),
}

#[derive(Subcommand)]
enum ProvisionCommand {
    /// Onboard with a one-time password
    Auto {
        #[arg(long)]
        otp: String,

        #[arg(long)]
        device: String,

        #[arg(long)]
        host: String,

        /// Defaults to network.default_port
        #[arg(long)]
        port: Option<u16>,

        /// Pre-supplied trust store (PEM), skips the trust-store request
        #[arg(long, requires_all = ["domain", "signature_suite", "pki_protocol"])]
        trust_store: Option<PathBuf>,

        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        signature_suite: Option<SignatureSuite>,

        #[arg(long)]
        pki_protocol: Option<PkiProtocol>,
    },

    /// Import an LDevID issued out of band
    Manual {
        #[arg(long)]
        host: String,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long, default_value = "CMP")]
        pki_protocol: PkiProtocol,

        /// PKCS#12 file with key, certificate and chain
        #[arg(long, conflicts_with_all = ["key", "cert"])]
        pkcs12: Option<PathBuf>,

        /// PEM private key
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// PEM certificate
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// PEM certificate chain
        #[arg(long)]
        chain: Option<PathBuf>,

        /// Password of the PKCS#12 file or the encrypted PEM key
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Args)]
struct Target {
    #[arg(short, long)]
    domain: Option<String>,

    #[arg(short, long)]
    name: String,

    /// Output file, stdout if omitted
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ExportCommand {
    Certificate {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, default_value = "PEM")]
        format: CertificateFormat,
    },

    Chain {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, default_value = "PEM")]
        format: CertificateCollectionFormat,
    },

    PublicKey {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, default_value = "PEM")]
        format: PublicKeyFormat,
    },

    PrivateKey {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, default_value = "PKCS8_PEM")]
        format: PrivateKeyFormat,

        /// At least 12 characters, generated if omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Key, certificate and chain as PKCS#12
    Credential {
        #[command(flatten)]
        target: Target,

        #[arg(short, long)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum RequestCommand {
    /// GENERIC certificate through the domain's PKI protocol
    Generic {
        #[arg(short, long)]
        domain: Option<String>,

        #[arg(short, long)]
        name: String,

        /// Subject attribute as type:value, repeatable
        #[arg(short, long)]
        subject: Vec<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_output(out: Option<&PathBuf>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(path) => fs::write(path, bytes)
            .context(format!("Failed to write {}", path.display()))?,
        None => io::stdout().write_all(bytes)?,
    }
    Ok(())
}

fn write_protected(out: Option<&PathBuf>, export: ProtectedExport, generated: bool) -> Result<()> {
    write_output(out, &export.bytes)?;
    if generated {
        eprintln!("Generated password: {}", export.password.expose_secret());
    }
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>> {
    fs::read(path).context(format!("Failed to read {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    debug!("Configuration: {:?}", config);
    let mut client =
        TrustpointClient::from_config(&config).context("Failed to open Trustpoint client state")?;
    let default_port = config.network.default_port;

    match cli.command {
        Commands::Provision(ProvisionCommand::Auto {
            otp,
            device,
            host,
            port,
            trust_store,
            domain,
            signature_suite,
            pki_protocol,
        }) => {
            let trust = match (trust_store, domain, signature_suite, pki_protocol) {
                (Some(path), Some(domain), Some(signature_suite), Some(pki_protocol)) => {
                    Some(TrustMaterial {
                        trust_store: String::from_utf8(read_file(&path)?)
                            .context("Trust store is not PEM text")?,
                        domain,
                        signature_suite,
                        pki_protocol,
                    })
                }
                _ => None,
            };
            let otp = SecretString::from(otp);
            let result = client.provision_auto(
                &otp,
                &device,
                &host,
                port.unwrap_or(default_port),
                trust,
            )?;
            print_json(&result)?;
        }
        Commands::Provision(ProvisionCommand::Manual {
            host,
            port,
            pki_protocol,
            pkcs12,
            key,
            cert,
            chain,
            password,
        }) => {
            let bundle = match (pkcs12, key, cert) {
                (Some(path), _, _) => {
                    CredentialBundle::from_pkcs12(&read_file(&path)?, password.as_deref().unwrap_or(""))?
                }
                (None, Some(key), Some(cert)) => {
                    let chain = match &chain {
                        Some(path) => read_file(path)?,
                        None => Vec::new(),
                    };
                    CredentialBundle::from_pem(
                        &read_file(&key)?,
                        &read_file(&cert)?,
                        &chain,
                        password.as_deref(),
                    )?
                }
                _ => anyhow::bail!("Either --pkcs12 or --key and --cert are required"),
            };
            let result = client.provision_manual(
                &host,
                port.unwrap_or(default_port),
                pki_protocol,
                &bundle,
            )?;
            print_json(&result)?;
        }
        Commands::List {
            domain,
            name,
            verbose,
        } => {
            let listing = client.list_credential(domain.as_deref(), name.as_deref(), verbose)?;
            print_json(&listing)?;
        }
        Commands::Delete { domain, name } => {
            client.delete_credential(domain.as_deref(), &name)?;
            print_json(&serde_json::json!({ "deleted": name }))?;
        }
        Commands::Export(ExportCommand::Certificate { target, format }) => {
            let bytes =
                client.export_certificate(target.domain.as_deref(), &target.name, format)?;
            write_output(target.out.as_ref(), &bytes)?;
        }
        Commands::Export(ExportCommand::Chain { target, format }) => {
            let bytes =
                client.export_certificate_chain(target.domain.as_deref(), &target.name, format)?;
            write_output(target.out.as_ref(), &bytes)?;
        }
        Commands::Export(ExportCommand::PublicKey { target, format }) => {
            let bytes = client.export_public_key(target.domain.as_deref(), &target.name, format)?;
            write_output(target.out.as_ref(), &bytes)?;
        }
        Commands::Export(ExportCommand::PrivateKey {
            target,
            format,
            password,
        }) => {
            let generated = password.is_none();
            let export = client.export_private_key(
                target.domain.as_deref(),
                &target.name,
                password.map(SecretString::from),
                format,
            )?;
            write_protected(target.out.as_ref(), export, generated)?;
        }
        Commands::Export(ExportCommand::Credential { target, password }) => {
            let generated = password.is_none();
            let export = client.export_credential_as_pkcs12(
                target.domain.as_deref(),
                &target.name,
                password.map(SecretString::from),
            )?;
            write_protected(target.out.as_ref(), export, generated)?;
        }
        Commands::Request(RequestCommand::Generic {
            domain,
            name,
            subject,
        }) => {
            client.request_generic(domain.as_deref(), &name, &subject)?;
            let listing = client.list_credential(domain.as_deref(), Some(&name), false)?;
            print_json(&listing)?;
        }
    }

    Ok(())
}
