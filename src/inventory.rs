//! Inventory Module
//!
//! The inventory is the client's single durable record of which domains the
//! device belongs to and which credentials it holds in each of them. Key and
//! certificate bytes never live here; credentials only carry opaque indices
//! into the DevID store.
//!
//! # Invariants
//!
//! - Domain names are unique; inserting an existing name is rejected.
//! - Each domain owns exactly one LDevID credential, addressed by the reserved
//!   name [`DOMAIN_CREDENTIAL`]. It is never part of the general credential
//!   mapping.
//! - The default domain is only ever set by [`Inventory::adopt_default_domain`]
//!   while it is unset.
//!
//! The inventory is persisted as JSON. Writes go to a temporary file in the
//! target directory which is then renamed over the old inventory.

use crate::errors::{ClientResult, ValidationError};
use crate::schema::{CertificateType, PkiProtocol, SignatureSuite};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Reserved unique name of a domain's LDevID credential
pub const DOMAIN_CREDENTIAL: &str = "domain-credential";

/// Rewrite `localhost` to the loopback address
pub fn normalize_host(host: &str) -> String {
    if host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}

/// Check a credential unique name against `^[A-Za-z][A-Za-z0-9_-]+$`
pub fn validate_unique_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest: Vec<char> = chars.collect();
    let rest_valid = !rest.is_empty()
        && rest
            .iter()
            .all(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-');

    if starts_with_letter && rest_valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidUniqueName {
            name: name.to_string(),
        })
    }
}

/// Render a duration the way the CLI reports certificate lifetimes
pub fn format_duration(duration: TimeDelta) -> String {
    let days = duration.num_days();
    let remainder = duration - TimeDelta::days(days);
    let secs = remainder.num_seconds();
    format!(
        "{} days, {}:{:02}:{:02}",
        days,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Per-domain configuration, fixed once the domain is provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub device: String,
    pub serial_number: String,
    pub domain: String,
    pub trustpoint_host: String,
    pub trustpoint_port: u16,
    pub signature_suite: SignatureSuite,
    pub pki_protocol: PkiProtocol,
    /// PEM bundle used as TLS anchor, absent for manually imported domains
    pub tls_trust_store: Option<String>,
}

/// A certificate/key pair owned by a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialModel {
    pub unique_name: String,
    pub certificate_index: usize,
    pub key_index: usize,
    pub subject: String,
    pub certificate_type: CertificateType,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
}

impl CredentialModel {
    pub fn expires_in(&self) -> TimeDelta {
        self.not_valid_after - self.not_valid_before
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainModel {
    pub domain_config: DomainConfig,
    pub ldevid_credential: CredentialModel,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialModel>,
    #[serde(default)]
    pub trust_stores: BTreeMap<String, String>,
}

impl DomainModel {
    pub fn new(domain_config: DomainConfig, ldevid_credential: CredentialModel) -> Self {
        Self {
            domain_config,
            ldevid_credential,
            credentials: BTreeMap::new(),
            trust_stores: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.domain_config.domain
    }

    /// Resolve a unique name, mapping the reserved name to the LDevID credential
    pub fn credential(&self, unique_name: &str) -> Option<&CredentialModel> {
        if unique_name == DOMAIN_CREDENTIAL {
            Some(&self.ldevid_credential)
        } else {
            self.credentials.get(unique_name)
        }
    }

    pub fn contains_credential(&self, unique_name: &str) -> bool {
        self.credential(unique_name).is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub domains: BTreeMap<String, DomainModel>,
    #[serde(default)]
    default_domain: Option<String>,
}

impl Inventory {
    /// Load the inventory, starting empty when the file does not exist yet
    pub fn load(path: &Path) -> ClientResult<Self> {
        if !path.exists() {
            debug!("No inventory at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let data = fs::read(path)?;
        let inventory: Inventory = serde_json::from_slice(&data)?;
        debug!(
            "Loaded inventory with {} domain(s) from {}",
            inventory.domains.len(),
            path.display()
        );
        Ok(inventory)
    }

    /// Atomically replace the inventory file
    pub fn store(&self, path: &Path) -> ClientResult<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut staged, self)?;
        staged.flush()?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| e.error)?;
        debug!("Inventory written to {}", path.display());
        Ok(())
    }

    pub fn default_domain(&self) -> Option<&str> {
        self.default_domain.as_deref()
    }

    pub fn domain_exists(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    pub fn domain(&self, domain: &str) -> Result<&DomainModel, ValidationError> {
        self.domains
            .get(domain)
            .ok_or_else(|| ValidationError::UnknownDomain {
                domain: domain.to_string(),
            })
    }

    pub fn domain_mut(&mut self, domain: &str) -> Result<&mut DomainModel, ValidationError> {
        self.domains
            .get_mut(domain)
            .ok_or_else(|| ValidationError::UnknownDomain {
                domain: domain.to_string(),
            })
    }

    /// Pick the explicit domain or fall back to the default one
    pub fn resolve_domain(&self, domain: Option<&str>) -> Result<String, ValidationError> {
        match domain {
            Some(domain) => Ok(domain.to_string()),
            None => self
                .default_domain
                .clone()
                .ok_or(ValidationError::NoDefaultDomain),
        }
    }

    pub fn credential_exists(&self, domain: &str, unique_name: &str) -> bool {
        self.domains
            .get(domain)
            .is_some_and(|model| model.contains_credential(unique_name))
    }

    /// Look up a credential, failing if the domain or the name is unknown
    pub fn credential(
        &self,
        domain: &str,
        unique_name: &str,
    ) -> Result<&CredentialModel, ValidationError> {
        self.domain(domain)?
            .credential(unique_name)
            .ok_or_else(|| ValidationError::UnknownCredential {
                domain: domain.to_string(),
                unique_name: unique_name.to_string(),
            })
    }

    /// Fail if a domain with this name already exists
    pub fn ensure_domain_available(&self, domain: &str) -> Result<(), ValidationError> {
        if self.domain_exists(domain) {
            return Err(ValidationError::DuplicateDomain {
                domain: domain.to_string(),
            });
        }
        Ok(())
    }

    pub fn insert_domain(&mut self, model: DomainModel) -> Result<(), ValidationError> {
        let name = model.name().to_string();
        self.ensure_domain_available(&name)?;
        self.domains.insert(name, model);
        Ok(())
    }

    /// Make `domain` the default if no default is configured yet
    ///
    /// Returns whether the default changed.
    pub fn adopt_default_domain(&mut self, domain: &str) -> bool {
        if self.default_domain.is_some() || !self.domain_exists(domain) {
            return false;
        }
        self.default_domain = Some(domain.to_string());
        true
    }

    pub fn insert_credential(
        &mut self,
        domain: &str,
        credential: CredentialModel,
    ) -> Result<(), ValidationError> {
        let model = self.domain_mut(domain)?;
        if model.contains_credential(&credential.unique_name) {
            return Err(ValidationError::DuplicateCredential {
                domain: domain.to_string(),
                unique_name: credential.unique_name,
            });
        }
        model
            .credentials
            .insert(credential.unique_name.clone(), credential);
        Ok(())
    }

    pub fn remove_credential(
        &mut self,
        domain: &str,
        unique_name: &str,
    ) -> Result<CredentialModel, ValidationError> {
        if unique_name == DOMAIN_CREDENTIAL {
            return Err(ValidationError::DomainCredentialNotDeletable);
        }
        self.domain_mut(domain)?
            .credentials
            .remove(unique_name)
            .ok_or_else(|| ValidationError::UnknownCredential {
                domain: domain.to_string(),
                unique_name: unique_name.to_string(),
            })
    }

    /// Drop credentials whose key no longer exists in the DevID store
    ///
    /// Returns `(domain, unique_name)` for every pruned entry. The domain
    /// credential is never pruned.
    pub fn prune_orphaned_credentials<F>(&mut self, key_exists: F) -> Vec<(String, String)>
    where
        F: Fn(usize) -> bool,
    {
        let mut pruned = Vec::new();
        for (domain, model) in self.domains.iter_mut() {
            model.credentials.retain(|name, credential| {
                let keep = key_exists(credential.key_index);
                if !keep {
                    warn!(
                        "Pruning credential {} of domain {}: key index {} is gone",
                        name, domain, credential.key_index
                    );
                    pruned.push((domain.clone(), name.clone()));
                }
                keep
            });
        }
        pruned
    }
}
