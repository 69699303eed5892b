//! Client Facade
//!
//! [`TrustpointClient`] owns the inventory and the three collaborators the
//! onboarding and lifecycle operations talk to. The operations themselves are
//! implemented next to their protocol logic:
//!
//! - [`crate::provision`]: auto provisioning and manual LDevID import
//! - [`crate::credentials`]: listing, deletion and export
//! - [`crate::request`]: generic certificate requests
//!
//! Every mutating operation takes `&mut self` and persists the inventory as
//! its last step.

use crate::configs::AppConfig;
use crate::devid_store::{DevIdStore, FileDevIdStore};
use crate::enrollment::{EnrollmentExecutor, OpensslCmpExecutor};
use crate::errors::ClientResult;
use crate::inventory::Inventory;
use crate::transport::{HttpsTransport, OnboardingTransport};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct TrustpointClient {
    pub(crate) inventory_path: PathBuf,
    pub(crate) inventory: Inventory,
    pub(crate) store: Box<dyn DevIdStore>,
    pub(crate) transport: Box<dyn OnboardingTransport>,
    pub(crate) executor: Box<dyn EnrollmentExecutor>,
}

impl TrustpointClient {
    /// Load the inventory at `inventory_path` and wire the collaborators
    ///
    /// Credentials whose key has disappeared from the store are dropped from
    /// the inventory, which then is written back. The cleanup only runs when
    /// the store holds every domain credential key; otherwise the store is
    /// assumed to be the wrong one and the inventory is left untouched.
    pub fn new(
        inventory_path: impl Into<PathBuf>,
        store: Box<dyn DevIdStore>,
        transport: Box<dyn OnboardingTransport>,
        executor: Box<dyn EnrollmentExecutor>,
    ) -> ClientResult<Self> {
        let inventory_path = inventory_path.into();
        let mut inventory = Inventory::load(&inventory_path)?;

        let store_matches = inventory
            .domains
            .values()
            .all(|domain| store.contains_key(domain.ldevid_credential.key_index));
        if !store_matches {
            warn!("DevID store lacks domain credential keys of the inventory, skipping orphan cleanup");
        } else {
            let pruned = inventory.prune_orphaned_credentials(|index| store.contains_key(index));
            if !pruned.is_empty() {
                warn!(
                    "Removed {} credential(s) without key material from the inventory",
                    pruned.len()
                );
                inventory.store(&inventory_path)?;
            }
        }

        Ok(Self {
            inventory_path,
            inventory,
            store,
            transport,
            executor,
        })
    }

    /// Production wiring: file store, HTTPS transport, `openssl cmp`
    pub fn from_config(config: &AppConfig) -> ClientResult<Self> {
        info!(
            "Using inventory {} and DevID store {}",
            config.storage.inventory_path.display(),
            config.storage.devid_store_path.display()
        );
        let store = FileDevIdStore::open(&config.storage.devid_store_path)?;
        let transport = HttpsTransport::new(config.network.timeout());
        let executor = OpensslCmpExecutor::new(
            config.cmp.openssl_binary.clone(),
            config.storage.work_dir.clone(),
        );
        Self::new(
            &config.storage.inventory_path,
            Box::new(store),
            Box::new(transport),
            Box::new(executor),
        )
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn inventory_path(&self) -> &Path {
        &self.inventory_path
    }

    pub fn store(&self) -> &dyn DevIdStore {
        self.store.as_ref()
    }

    pub fn default_domain(&self) -> Option<&str> {
        self.inventory.default_domain()
    }

    pub(crate) fn store_inventory(&self) -> ClientResult<()> {
        self.inventory.store(&self.inventory_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devid_store::MemoryDevIdStore;
    use crate::enrollment::{EnrolledCertificate, EnrollmentRequest};
    use crate::errors::ClientError;
    use crate::inventory::{CredentialModel, DomainConfig, DomainModel, DOMAIN_CREDENTIAL};
    use crate::keys::generate_new_key;
    use crate::schema::{CertificateType, PkiProtocol, SignatureSuite};
    use crate::transport::TrustStoreResponse;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use tempfile::TempDir;

    struct Offline;

    impl OnboardingTransport for Offline {
        fn fetch_trust_store(&self, _: &str, _: u16, _: &str) -> ClientResult<TrustStoreResponse> {
            Err(ClientError::Certificate("offline".to_string()))
        }

        fn request_ldevid(
            &self,
            _: &str,
            _: u16,
            _: &str,
            _: &SecretString,
            _: &[u8],
            _: &Path,
        ) -> ClientResult<Vec<u8>> {
            Err(ClientError::Certificate("offline".to_string()))
        }

        fn fetch_ldevid_chain(&self, _: &str, _: u16, _: &str, _: &Path) -> ClientResult<Vec<u8>> {
            Err(ClientError::Certificate("offline".to_string()))
        }
    }

    impl EnrollmentExecutor for Offline {
        fn initialization_request(
            &self,
            _: &EnrollmentRequest<'_>,
        ) -> ClientResult<EnrolledCertificate> {
            Err(ClientError::Certificate("offline".to_string()))
        }
    }

    fn credential(name: &str, key_index: usize, kind: CertificateType) -> CredentialModel {
        CredentialModel {
            unique_name: name.to_string(),
            certificate_index: key_index,
            key_index,
            subject: "CN=x".to_string(),
            certificate_type: kind,
            not_valid_before: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            not_valid_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn inventory_with_ghost(path: &Path) {
        let mut inventory = Inventory::default();
        inventory
            .insert_domain(DomainModel::new(
                DomainConfig {
                    device: "dev-1".to_string(),
                    serial_number: "SN".to_string(),
                    domain: "factory".to_string(),
                    trustpoint_host: "127.0.0.1".to_string(),
                    trustpoint_port: 443,
                    signature_suite: SignatureSuite::Secp256r1,
                    pki_protocol: PkiProtocol::Cmp,
                    tls_trust_store: None,
                },
                credential(DOMAIN_CREDENTIAL, 0, CertificateType::Ldevid),
            ))
            .unwrap();
        inventory
            .insert_credential("factory", credential("ghost", 41, CertificateType::Generic))
            .unwrap();
        inventory.store(path).unwrap();
    }

    #[test]
    fn test_open_prunes_orphaned_credentials() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.json");
        inventory_with_ghost(&path);

        let mut store = MemoryDevIdStore::new();
        let key = generate_new_key(SignatureSuite::Secp256r1).unwrap();
        let index = store
            .insert_key(&key.private_key_to_pem_pkcs8().unwrap())
            .unwrap();
        assert_eq!(index, 0);

        let client =
            TrustpointClient::new(&path, Box::new(store), Box::new(Offline), Box::new(Offline))
                .unwrap();
        assert!(!client.inventory().credential_exists("factory", "ghost"));
        assert!(client.inventory().credential_exists("factory", DOMAIN_CREDENTIAL));

        let reloaded = Inventory::load(&path).unwrap();
        assert!(!reloaded.credential_exists("factory", "ghost"));
    }

    #[test]
    fn test_open_with_foreign_store_keeps_inventory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.json");
        inventory_with_ghost(&path);
        let before = std::fs::read(&path).unwrap();

        let client = TrustpointClient::new(
            &path,
            Box::new(MemoryDevIdStore::new()),
            Box::new(Offline),
            Box::new(Offline),
        )
        .unwrap();
        assert!(client.inventory().credential_exists("factory", "ghost"));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_open_without_inventory_is_empty() {
        let dir = TempDir::new().unwrap();
        let client = TrustpointClient::new(
            dir.path().join("inventory.json"),
            Box::new(MemoryDevIdStore::new()),
            Box::new(Offline),
            Box::new(Offline),
        )
        .unwrap();
        assert!(client.inventory().domains.is_empty());
        assert_eq!(client.default_domain(), None);
        assert!(!dir.path().join("inventory.json").exists());
    }
}
