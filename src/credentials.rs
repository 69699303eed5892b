//! Credential lifecycle: existence checks, listing, deletion and export
//!
//! Every operation that takes an optional domain falls back to the default
//! domain. The reserved name `domain-credential` addresses the domain's LDevID
//! for listing and export but can never be deleted.

use crate::certificate::load_certificate;
use crate::client::TrustpointClient;
use crate::errors::{ClientResult, ValidationError};
use crate::inventory::{format_duration, CredentialModel, DOMAIN_CREDENTIAL};
use crate::serializer::{
    encode_certificate, encode_certificate_chain, encode_credential_pkcs12, encode_private_key,
    encode_public_key, CertificateCollectionFormat, CertificateFormat, PrivateKeyFormat,
    PublicKeyFormat,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::pkey::PKey;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

pub const MIN_PASSWORD_LENGTH: usize = 12;
const GENERATED_PASSWORD_BYTES: usize = 16;

/// Encrypted export together with the password protecting it
#[derive(Debug)]
pub struct ProtectedExport {
    pub bytes: Vec<u8>,
    pub password: SecretString,
}

/// Random URL-safe password, 22 characters
pub fn generate_password() -> ClientResult<SecretString> {
    let mut random = [0u8; GENERATED_PASSWORD_BYTES];
    openssl::rand::rand_bytes(&mut random)?;
    Ok(SecretString::from(URL_SAFE_NO_PAD.encode(random)))
}

/// Use the supplied password if it is long enough, generate one otherwise
pub fn resolve_password(password: Option<SecretString>) -> ClientResult<SecretString> {
    match password {
        Some(password) if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH => {
            Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            }
            .into())
        }
        Some(password) => Ok(password),
        None => generate_password(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainHeader {
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Serial-Number")]
    pub serial_number: String,
    #[serde(rename = "Is-Default-Domain")]
    pub is_default_domain: bool,
    #[serde(rename = "Signature Suite")]
    pub signature_suite: String,
    #[serde(rename = "PKI Protocol")]
    pub pki_protocol: String,
    #[serde(rename = "# Credentials (excl. LDevID)")]
    pub credential_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialMaterial {
    #[serde(rename = "Credential Certificate")]
    pub certificate: String,
    #[serde(rename = "Credential Public-Key")]
    pub public_key: String,
    #[serde(rename = "Credential Certificate Chain")]
    pub certificate_chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialInfo {
    #[serde(rename = "Certificate Subject")]
    pub subject: String,
    #[serde(rename = "Certificate Certificate-Type")]
    pub certificate_type: String,
    #[serde(rename = "Certificate Not-Valid-Before")]
    pub not_valid_before: String,
    #[serde(rename = "Certificate Not-Valid-After")]
    pub not_valid_after: String,
    #[serde(rename = "Certificate Expires-in")]
    pub expires_in: String,
    /// Present for verbose listings only
    #[serde(flatten)]
    pub material: Option<CredentialMaterial>,
}

impl CredentialInfo {
    fn terse(credential: &CredentialModel) -> Self {
        Self {
            subject: credential.subject.clone(),
            certificate_type: credential.certificate_type.to_string(),
            not_valid_before: credential.not_valid_before.to_string(),
            not_valid_after: credential.not_valid_after.to_string(),
            expires_in: format_duration(credential.expires_in()),
            material: None,
        }
    }
}

/// Listing of one domain, credentials in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialListing {
    pub header: DomainHeader,
    #[serde(serialize_with = "serialize_ordered_map")]
    pub credentials: Vec<(String, CredentialInfo)>,
}

fn serialize_ordered_map<S>(entries: &[(String, CredentialInfo)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(entries.iter().map(|(name, info)| (name, info)))
}

impl TrustpointClient {
    pub fn domain_exists(&self, domain: &str) -> bool {
        self.inventory.domain_exists(domain)
    }

    /// True for `domain-credential` as soon as the domain exists
    pub fn credential_exists(&self, domain: &str, unique_name: &str) -> bool {
        self.inventory.credential_exists(domain, unique_name)
    }

    fn resolve_credential(
        &self,
        domain: Option<&str>,
        unique_name: &str,
    ) -> ClientResult<&CredentialModel> {
        let domain = self.inventory.resolve_domain(domain)?;
        Ok(self.inventory.credential(&domain, unique_name)?)
    }

    fn credential_material(&self, credential: &CredentialModel) -> ClientResult<CredentialMaterial> {
        let certificate = self.store.certificate(credential.certificate_index)?;
        let public_key = self.store.public_key(credential.key_index)?;
        let chain = self.store.certificate_chain(credential.certificate_index)?;
        Ok(CredentialMaterial {
            certificate: String::from_utf8_lossy(&certificate).into_owned(),
            public_key: String::from_utf8_lossy(&public_key).into_owned(),
            certificate_chain: chain
                .iter()
                .map(|pem| String::from_utf8_lossy(pem))
                .collect(),
        })
    }

    fn credential_info(&self, credential: &CredentialModel, verbose: bool) -> ClientResult<CredentialInfo> {
        let mut info = CredentialInfo::terse(credential);
        if verbose {
            info.material = Some(self.credential_material(credential)?);
        }
        Ok(info)
    }

    /// List one credential or all of them, the domain credential first
    pub fn list_credential(
        &self,
        domain: Option<&str>,
        unique_name: Option<&str>,
        verbose: bool,
    ) -> ClientResult<CredentialListing> {
        let domain = self.inventory.resolve_domain(domain)?;
        let model = self.inventory.domain(&domain)?;
        let config = &model.domain_config;

        let header = DomainHeader {
            domain: domain.clone(),
            device: config.device.clone(),
            serial_number: config.serial_number.clone(),
            is_default_domain: self.inventory.default_domain() == Some(domain.as_str()),
            signature_suite: config.signature_suite.to_string(),
            pki_protocol: config.pki_protocol.to_string(),
            credential_count: model.credentials.len(),
        };

        let mut credentials = Vec::new();
        match unique_name {
            Some(unique_name) => {
                let credential = self.inventory.credential(&domain, unique_name)?;
                credentials.push((unique_name.to_string(), self.credential_info(credential, verbose)?));
            }
            None => {
                credentials.push((
                    DOMAIN_CREDENTIAL.to_string(),
                    self.credential_info(&model.ldevid_credential, verbose)?,
                ));
                for (name, credential) in &model.credentials {
                    credentials.push((name.clone(), self.credential_info(credential, verbose)?));
                }
            }
        }

        Ok(CredentialListing {
            header,
            credentials,
        })
    }

    /// Remove a credential from the DevID store and the inventory
    ///
    /// The store is updated first; if that fails the inventory is untouched.
    pub fn delete_credential(&mut self, domain: Option<&str>, unique_name: &str) -> ClientResult<()> {
        if unique_name == DOMAIN_CREDENTIAL {
            return Err(ValidationError::DomainCredentialNotDeletable.into());
        }
        let domain = self.inventory.resolve_domain(domain)?;
        let key_index = self.inventory.credential(&domain, unique_name)?.key_index;

        self.store.delete_key(key_index)?;
        self.inventory.remove_credential(&domain, unique_name)?;
        self.store_inventory()?;
        info!("Deleted credential {} of domain {}", unique_name, domain);
        Ok(())
    }

    pub fn export_certificate(
        &self,
        domain: Option<&str>,
        unique_name: &str,
        format: CertificateFormat,
    ) -> ClientResult<Vec<u8>> {
        let credential = self.resolve_credential(domain, unique_name)?;
        let certificate = load_certificate(&self.store.certificate(credential.certificate_index)?)?;
        debug!("Exporting certificate of {} as {}", unique_name, format);
        encode_certificate(&certificate, format)
    }

    pub fn export_certificate_chain(
        &self,
        domain: Option<&str>,
        unique_name: &str,
        format: CertificateCollectionFormat,
    ) -> ClientResult<Vec<u8>> {
        let credential = self.resolve_credential(domain, unique_name)?;
        let chain = self.stored_chain(credential)?;
        debug!("Exporting certificate chain of {} as {}", unique_name, format);
        encode_certificate_chain(&chain, format)
    }

    pub fn export_public_key(
        &self,
        domain: Option<&str>,
        unique_name: &str,
        format: PublicKeyFormat,
    ) -> ClientResult<Vec<u8>> {
        let credential = self.resolve_credential(domain, unique_name)?;
        encode_public_key(&self.store.public_key(credential.key_index)?, format)
    }

    /// Export the private key encrypted under `password` or a generated one
    pub fn export_private_key(
        &self,
        domain: Option<&str>,
        unique_name: &str,
        password: Option<SecretString>,
        format: PrivateKeyFormat,
    ) -> ClientResult<ProtectedExport> {
        let credential = self.resolve_credential(domain, unique_name)?;
        let password = resolve_password(password)?;
        let key = PKey::private_key_from_pem(&self.store.private_key(credential.key_index)?)?;
        let bytes = encode_private_key(&key, format, password.expose_secret())?;
        info!("Exported private key of {} as {}", unique_name, format);
        Ok(ProtectedExport { bytes, password })
    }

    /// Export key, certificate and chain as one PKCS#12 file
    pub fn export_credential_as_pkcs12(
        &self,
        domain: Option<&str>,
        unique_name: &str,
        password: Option<SecretString>,
    ) -> ClientResult<ProtectedExport> {
        let credential = self.resolve_credential(domain, unique_name)?;
        let password = resolve_password(password)?;
        let key = PKey::private_key_from_pem(&self.store.private_key(credential.key_index)?)?;
        let certificate = load_certificate(&self.store.certificate(credential.certificate_index)?)?;
        let chain = self.stored_chain(credential)?;
        let bytes = encode_credential_pkcs12(&key, &certificate, &chain, password.expose_secret())?;
        info!("Exported credential {} as PKCS#12", unique_name);
        Ok(ProtectedExport { bytes, password })
    }

    fn stored_chain(&self, credential: &CredentialModel) -> ClientResult<Vec<X509>> {
        self.store
            .certificate_chain(credential.certificate_index)?
            .iter()
            .map(|pem| load_certificate(pem))
            .collect()
    }
}
