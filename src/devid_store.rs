//! DevID Store Module
//!
//! The DevID store holds the raw key and certificate material of the device.
//! The rest of the client only ever sees opaque indices into it.
//!
//! Material enters the store disabled. A key or certificate has to be enabled
//! before any read accessor hands it out again, which keeps half-installed
//! credentials from being used.
//!
//! Two implementations are provided:
//!
//! - [`FileDevIdStore`]: JSON file on disk, rewritten atomically after every
//!   mutation with owner-only permissions.
//! - [`MemoryDevIdStore`]: process-local store used by tests and dry runs.
//!
//! Indices are never reused within one store, so a stale index can never
//! point at someone else's key.

use crate::errors::{ClientError, ClientResult, StoreError};
use openssl::pkey::PKey;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Secure key/certificate store addressed by opaque index
pub trait DevIdStore {
    /// Store a PEM private key, returning its index (disabled)
    fn insert_key(&mut self, private_key_pem: &[u8]) -> ClientResult<usize>;

    fn enable_key(&mut self, index: usize) -> ClientResult<()>;

    /// Store a PEM certificate, returning its index (disabled)
    ///
    /// The certificate is linked to the stored key with the same public key.
    fn insert_certificate(&mut self, certificate_pem: &[u8]) -> ClientResult<usize>;

    fn enable_certificate(&mut self, index: usize) -> ClientResult<()>;

    /// Attach a PEM chain bundle to a certificate, replacing any previous chain
    fn insert_certificate_chain(&mut self, certificate_index: usize, chain_pem: &[u8])
        -> ClientResult<()>;

    /// Delete a key together with every certificate linked to it
    fn delete_key(&mut self, index: usize) -> ClientResult<()>;

    /// PKCS#8 PEM private key
    fn private_key(&self, index: usize) -> ClientResult<Vec<u8>>;

    /// SubjectPublicKeyInfo PEM public key
    fn public_key(&self, index: usize) -> ClientResult<Vec<u8>>;

    fn certificate(&self, index: usize) -> ClientResult<Vec<u8>>;

    /// PEM certificates of the chain, leaf-adjacent first
    fn certificate_chain(&self, index: usize) -> ClientResult<Vec<Vec<u8>>>;

    fn contains_key(&self, index: usize) -> bool;
}

/// Indices of a credential installed into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredCredential {
    pub key_index: usize,
    pub certificate_index: usize,
}

/// Insert and enable a key, its certificate and the certificate chain
pub fn install_credential(
    store: &mut dyn DevIdStore,
    private_key_pem: &[u8],
    certificate_pem: &[u8],
    chain_pem: &[u8],
) -> ClientResult<StoredCredential> {
    let key_index = store.insert_key(private_key_pem)?;
    store.enable_key(key_index)?;
    let certificate_index = store.insert_certificate(certificate_pem)?;
    store.enable_certificate(certificate_index)?;
    store.insert_certificate_chain(certificate_index, chain_pem)?;
    debug!(
        "Installed credential: key index {}, certificate index {}",
        key_index, certificate_index
    );
    Ok(StoredCredential {
        key_index,
        certificate_index,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    private_key: String,
    public_key: String,
    enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CertificateRecord {
    certificate: String,
    key_index: Option<usize>,
    enabled: bool,
    #[serde(default)]
    chain: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    next_key_index: usize,
    next_certificate_index: usize,
    keys: BTreeMap<usize, KeyRecord>,
    certificates: BTreeMap<usize, CertificateRecord>,
}

fn malformed(material: &'static str, reason: impl ToString) -> ClientError {
    StoreError::Malformed {
        material,
        reason: reason.to_string(),
    }
    .into()
}

fn pem_to_string(material: &'static str, pem: Vec<u8>) -> ClientResult<String> {
    String::from_utf8(pem).map_err(|e| malformed(material, e))
}

impl StoreState {
    fn insert_key(&mut self, private_key_pem: &[u8]) -> ClientResult<usize> {
        let key = PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| malformed("private key", e))?;
        let record = KeyRecord {
            private_key: pem_to_string("private key", key.private_key_to_pem_pkcs8()?)?,
            public_key: pem_to_string("public key", key.public_key_to_pem()?)?,
            enabled: false,
        };
        let index = self.next_key_index;
        self.next_key_index += 1;
        self.keys.insert(index, record);
        Ok(index)
    }

    fn enable_key(&mut self, index: usize) -> ClientResult<()> {
        let record = self
            .keys
            .get_mut(&index)
            .ok_or(StoreError::KeyNotFound { index })?;
        record.enabled = true;
        Ok(())
    }

    fn insert_certificate(&mut self, certificate_pem: &[u8]) -> ClientResult<usize> {
        let certificate =
            X509::from_pem(certificate_pem).map_err(|e| malformed("certificate", e))?;
        let certificate_key = certificate.public_key()?;

        let mut key_index = None;
        for (index, record) in &self.keys {
            let public_key = PKey::public_key_from_pem(record.public_key.as_bytes())?;
            if certificate_key.public_eq(&public_key) {
                key_index = Some(*index);
                break;
            }
        }

        let record = CertificateRecord {
            certificate: pem_to_string("certificate", certificate.to_pem()?)?,
            key_index,
            enabled: false,
            chain: Vec::new(),
        };
        let index = self.next_certificate_index;
        self.next_certificate_index += 1;
        self.certificates.insert(index, record);
        Ok(index)
    }

    fn enable_certificate(&mut self, index: usize) -> ClientResult<()> {
        let record = self
            .certificates
            .get_mut(&index)
            .ok_or(StoreError::CertificateNotFound { index })?;
        record.enabled = true;
        Ok(())
    }

    fn insert_certificate_chain(
        &mut self,
        certificate_index: usize,
        chain_pem: &[u8],
    ) -> ClientResult<()> {
        let chain = if chain_pem.iter().all(|b| b.is_ascii_whitespace()) {
            Vec::new()
        } else {
            X509::stack_from_pem(chain_pem)
                .map_err(|e| malformed("certificate chain", e))?
                .iter()
                .map(|certificate| pem_to_string("certificate chain", certificate.to_pem()?))
                .collect::<ClientResult<Vec<_>>>()?
        };
        let record = self
            .certificates
            .get_mut(&certificate_index)
            .ok_or(StoreError::CertificateNotFound {
                index: certificate_index,
            })?;
        record.chain = chain;
        Ok(())
    }

    fn delete_key(&mut self, index: usize) -> ClientResult<()> {
        self.keys
            .remove(&index)
            .ok_or(StoreError::KeyNotFound { index })?;
        self.certificates
            .retain(|_, record| record.key_index != Some(index));
        Ok(())
    }

    fn key_record(&self, index: usize) -> ClientResult<&KeyRecord> {
        let record = self
            .keys
            .get(&index)
            .ok_or(StoreError::KeyNotFound { index })?;
        if !record.enabled {
            return Err(StoreError::KeyDisabled { index }.into());
        }
        Ok(record)
    }

    fn certificate_record(&self, index: usize) -> ClientResult<&CertificateRecord> {
        let record = self
            .certificates
            .get(&index)
            .ok_or(StoreError::CertificateNotFound { index })?;
        if !record.enabled {
            return Err(StoreError::CertificateDisabled { index }.into());
        }
        Ok(record)
    }
}

/// File-backed DevID store
pub struct FileDevIdStore {
    path: PathBuf,
    state: StoreState,
}

impl FileDevIdStore {
    /// Open the store at `path`, creating an empty one if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            StoreState::default()
        };
        info!("Opened DevID store at {}", path.display());
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // NamedTempFile is created with mode 0600 on unix.
    fn persist(&self, state: &StoreState) -> ClientResult<()> {
        let to_error = |reason: String| StoreError::Persist {
            path: self.path.display().to_string(),
            reason,
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| to_error(e.to_string()))?;
        let mut staged = NamedTempFile::new_in(parent).map_err(|e| to_error(e.to_string()))?;
        serde_json::to_writer(&mut staged, state).map_err(|e| to_error(e.to_string()))?;
        staged.flush().map_err(|e| to_error(e.to_string()))?;
        staged
            .persist(&self.path)
            .map_err(|e| to_error(e.error.to_string()))?;
        Ok(())
    }

    /// Apply a mutation and keep it only once it is on disk
    fn mutate<R>(
        &mut self,
        change: impl FnOnce(&mut StoreState) -> ClientResult<R>,
    ) -> ClientResult<R> {
        let mut next = self.state.clone();
        let result = change(&mut next)?;
        self.persist(&next)?;
        self.state = next;
        Ok(result)
    }
}

impl DevIdStore for FileDevIdStore {
    fn insert_key(&mut self, private_key_pem: &[u8]) -> ClientResult<usize> {
        self.mutate(|state| state.insert_key(private_key_pem))
    }

    fn enable_key(&mut self, index: usize) -> ClientResult<()> {
        self.mutate(|state| state.enable_key(index))
    }

    fn insert_certificate(&mut self, certificate_pem: &[u8]) -> ClientResult<usize> {
        self.mutate(|state| state.insert_certificate(certificate_pem))
    }

    fn enable_certificate(&mut self, index: usize) -> ClientResult<()> {
        self.mutate(|state| state.enable_certificate(index))
    }

    fn insert_certificate_chain(
        &mut self,
        certificate_index: usize,
        chain_pem: &[u8],
    ) -> ClientResult<()> {
        self.mutate(|state| state.insert_certificate_chain(certificate_index, chain_pem))
    }

    fn delete_key(&mut self, index: usize) -> ClientResult<()> {
        self.mutate(|state| state.delete_key(index))
    }

    fn private_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self.state.key_record(index)?.private_key.clone().into_bytes())
    }

    fn public_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self.state.key_record(index)?.public_key.clone().into_bytes())
    }

    fn certificate(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self
            .state
            .certificate_record(index)?
            .certificate
            .clone()
            .into_bytes())
    }

    fn certificate_chain(&self, index: usize) -> ClientResult<Vec<Vec<u8>>> {
        Ok(self
            .state
            .certificate_record(index)?
            .chain
            .iter()
            .map(|pem| pem.clone().into_bytes())
            .collect())
    }

    fn contains_key(&self, index: usize) -> bool {
        self.state.keys.contains_key(&index)
    }
}

/// In-memory DevID store
#[derive(Debug, Default)]
pub struct MemoryDevIdStore {
    state: StoreState,
}

impl MemoryDevIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.state.keys.len()
    }

    pub fn certificate_count(&self) -> usize {
        self.state.certificates.len()
    }
}

impl DevIdStore for MemoryDevIdStore {
    fn insert_key(&mut self, private_key_pem: &[u8]) -> ClientResult<usize> {
        self.state.insert_key(private_key_pem)
    }

    fn enable_key(&mut self, index: usize) -> ClientResult<()> {
        self.state.enable_key(index)
    }

    fn insert_certificate(&mut self, certificate_pem: &[u8]) -> ClientResult<usize> {
        self.state.insert_certificate(certificate_pem)
    }

    fn enable_certificate(&mut self, index: usize) -> ClientResult<()> {
        self.state.enable_certificate(index)
    }

    fn insert_certificate_chain(
        &mut self,
        certificate_index: usize,
        chain_pem: &[u8],
    ) -> ClientResult<()> {
        self.state
            .insert_certificate_chain(certificate_index, chain_pem)
    }

    fn delete_key(&mut self, index: usize) -> ClientResult<()> {
        self.state.delete_key(index)
    }

    fn private_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self.state.key_record(index)?.private_key.clone().into_bytes())
    }

    fn public_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self.state.key_record(index)?.public_key.clone().into_bytes())
    }

    fn certificate(&self, index: usize) -> ClientResult<Vec<u8>> {
        Ok(self
            .state
            .certificate_record(index)?
            .certificate
            .clone()
            .into_bytes())
    }

    fn certificate_chain(&self, index: usize) -> ClientResult<Vec<Vec<u8>>> {
        Ok(self
            .state
            .certificate_record(index)?
            .chain
            .iter()
            .map(|pem| pem.clone().into_bytes())
            .collect())
    }

    fn contains_key(&self, index: usize) -> bool {
        self.state.keys.contains_key(&index)
    }
}
