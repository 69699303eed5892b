//! Enrollment executor
//!
//! Certificates beyond the LDevID are obtained from the domain's CA through an
//! external CMP client. The executor receives everything it needs as PEM and
//! returns the issued certificate with its chain.

use crate::errors::{ClientResult, EnrollmentError};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Material for one CMP initialization request
#[derive(Clone)]
pub struct EnrollmentRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub domain: &'a str,
    /// Current domain credential, used to protect the request
    pub identity_key_pem: &'a [u8],
    pub identity_certificate_pem: &'a [u8],
    /// Key to be certified
    pub new_key_pem: &'a [u8],
    /// Slash-separated subject, e.g. `/2.5.4.65=x/2.5.4.3=y`
    pub subject: &'a str,
    /// PEM trust store for the CMP server's TLS certificate
    pub tls_trust_store: Option<&'a str>,
}

impl std::fmt::Debug for EnrollmentRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("domain", &self.domain)
            .field("subject", &self.subject)
            .field("tls_trust_store", &self.tls_trust_store.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledCertificate {
    pub certificate_pem: Vec<u8>,
    pub chain_pem: Vec<u8>,
}

pub trait EnrollmentExecutor {
    fn initialization_request(&self, request: &EnrollmentRequest<'_>)
        -> ClientResult<EnrolledCertificate>;
}

/// File locations handed to `openssl cmp`
#[derive(Debug, Clone)]
pub struct CmpPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub new_key: PathBuf,
    pub cert_out: PathBuf,
    pub chain_out: PathBuf,
    pub tls_trusted: Option<PathBuf>,
}

impl CmpPaths {
    fn in_dir(dir: &Path, with_trust_store: bool) -> Self {
        Self {
            key: dir.join("key.pem"),
            cert: dir.join("cert.pem"),
            new_key: dir.join("new_key.pem"),
            cert_out: dir.join("new_cert.pem"),
            chain_out: dir.join("new_cert_chain.pem"),
            tls_trusted: with_trust_store.then(|| dir.join("tls_trust_store.pem")),
        }
    }
}

pub fn cmp_server_url(host: &str, port: u16) -> String {
    format!("https://{host}:{port}")
}

pub fn cmp_initialization_path(domain: &str) -> String {
    format!("/.well-known/cmp/p/{domain}/initialization/")
}

/// Arguments following `openssl cmp`
pub fn cmp_arguments(request: &EnrollmentRequest<'_>, paths: &CmpPaths) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-cmd".into(),
        "ir".into(),
        "-server".into(),
        cmp_server_url(request.host, request.port).into(),
        "-path".into(),
        cmp_initialization_path(request.domain).into(),
        "-newkey".into(),
        paths.new_key.clone().into(),
        "-key".into(),
        paths.key.clone().into(),
        "-cert".into(),
        paths.cert.clone().into(),
        "-certout".into(),
        paths.cert_out.clone().into(),
        "-chainout".into(),
        paths.chain_out.clone().into(),
        "-implicit_confirm".into(),
        "-disable_confirm".into(),
        "-unprotected_errors".into(),
        "-tls_used".into(),
    ];
    if let Some(trusted) = &paths.tls_trusted {
        args.push("-tls_trusted".into());
        args.push(trusted.clone().into());
    }
    args.push("-subject".into());
    args.push(request.subject.into());
    args
}

/// Runs the `openssl cmp` command line client
#[derive(Debug, Clone)]
pub struct OpensslCmpExecutor {
    openssl_binary: PathBuf,
    work_dir: Option<PathBuf>,
}

impl Default for OpensslCmpExecutor {
    fn default() -> Self {
        Self::new("openssl", None)
    }
}

impl OpensslCmpExecutor {
    /// `work_dir` is where the scoped scratch directory is created, system temp if `None`
    pub fn new(openssl_binary: impl Into<PathBuf>, work_dir: Option<PathBuf>) -> Self {
        Self {
            openssl_binary: openssl_binary.into(),
            work_dir,
        }
    }

    fn scratch_dir(&self) -> ClientResult<TempDir> {
        let dir = match &self.work_dir {
            Some(work_dir) => {
                fs::create_dir_all(work_dir)?;
                tempfile::Builder::new().prefix("cmp-").tempdir_in(work_dir)?
            }
            None => tempfile::Builder::new().prefix("cmp-").tempdir()?,
        };
        Ok(dir)
    }
}

impl EnrollmentExecutor for OpensslCmpExecutor {
    fn initialization_request(
        &self,
        request: &EnrollmentRequest<'_>,
    ) -> ClientResult<EnrolledCertificate> {
        let scratch = self.scratch_dir()?;
        let paths = CmpPaths::in_dir(scratch.path(), request.tls_trust_store.is_some());

        fs::write(&paths.key, request.identity_key_pem)?;
        fs::write(&paths.cert, request.identity_certificate_pem)?;
        fs::write(&paths.new_key, request.new_key_pem)?;
        if let (Some(path), Some(trust_store)) = (&paths.tls_trusted, request.tls_trust_store) {
            fs::write(path, trust_store)?;
        }

        info!(
            "Sending CMP initialization request to {} for domain {}",
            cmp_server_url(request.host, request.port),
            request.domain
        );
        let output = Command::new(&self.openssl_binary)
            .arg("cmp")
            .args(cmp_arguments(request, &paths))
            .output()
            .map_err(|e| EnrollmentError::Launch {
                program: self.openssl_binary.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
            diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
            warn!("openssl cmp exited with {}", output.status);
            return Err(EnrollmentError::Failed {
                diagnostic: diagnostic.trim().to_string(),
            }
            .into());
        }

        let certificate_pem = fs::read(&paths.cert_out)?;
        let chain_pem = match fs::read(&paths.chain_out) {
            Ok(chain) => chain,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("CMP response stored, scratch directory removed on return");
        Ok(EnrolledCertificate {
            certificate_pem,
            chain_pem,
        })
    }
}
