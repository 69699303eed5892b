//! Generic certificate requests
//!
//! A domain that speaks CMP can issue further certificates to the device. The
//! request is protected with the domain credential; the new key never leaves
//! the device except through the executor's scratch directory.

use crate::certificate::{load_certificate, CertificateDetails};
use crate::client::TrustpointClient;
use crate::devid_store::install_credential;
use crate::enrollment::EnrollmentRequest;
use crate::errors::{ClientResult, ValidationError};
use crate::inventory::{validate_unique_name, CredentialModel};
use crate::keys::generate_new_key;
use crate::schema::{CertificateType, PkiProtocol};
use crate::subject::{generic_cert_subject, parse_subject_entries};
use tracing::info;

impl TrustpointClient {
    /// Request a GENERIC certificate named `unique_name`
    ///
    /// `subject` entries have the form `type:value`, where type is a known
    /// attribute name or a dotted OID. Nothing is generated or sent unless
    /// every argument is valid.
    pub fn request_generic(
        &mut self,
        domain: Option<&str>,
        unique_name: &str,
        subject: &[String],
    ) -> ClientResult<()> {
        let domain = self.inventory.resolve_domain(domain)?;
        let model = self.inventory.domain(&domain)?;
        if model.contains_credential(unique_name) {
            return Err(ValidationError::DuplicateCredential {
                domain,
                unique_name: unique_name.to_string(),
            }
            .into());
        }
        validate_unique_name(unique_name)?;
        let pki_protocol = model.domain_config.pki_protocol;
        if pki_protocol != PkiProtocol::Cmp {
            return Err(ValidationError::UnsupportedPkiProtocol {
                value: pki_protocol.to_string(),
            }
            .into());
        }
        let attributes = parse_subject_entries(subject)?;
        let subject = generic_cert_subject(&domain, unique_name, &attributes);

        let config = model.domain_config.clone();
        let identity = model.ldevid_credential.clone();
        let identity_key_pem = self.store.private_key(identity.key_index)?;
        let identity_certificate_pem = self.store.certificate(identity.certificate_index)?;

        let new_key = generate_new_key(config.signature_suite)?;
        let new_key_pem = new_key.private_key_to_pem_pkcs8()?;

        info!(
            "Requesting generic certificate {} in domain {} via CMP",
            unique_name, domain
        );
        let enrolled = self.executor.initialization_request(&EnrollmentRequest {
            host: &config.trustpoint_host,
            port: config.trustpoint_port,
            domain: &domain,
            identity_key_pem: &identity_key_pem,
            identity_certificate_pem: &identity_certificate_pem,
            new_key_pem: &new_key_pem,
            subject: &subject,
            tls_trust_store: config.tls_trust_store.as_deref(),
        })?;

        let certificate = load_certificate(&enrolled.certificate_pem)?;
        let details = CertificateDetails::from_x509(&certificate)?;
        let stored = install_credential(
            self.store.as_mut(),
            &new_key_pem,
            &enrolled.certificate_pem,
            &enrolled.chain_pem,
        )?;

        self.inventory.insert_credential(
            &domain,
            CredentialModel {
                unique_name: unique_name.to_string(),
                certificate_index: stored.certificate_index,
                key_index: stored.key_index,
                subject: details.subject,
                certificate_type: CertificateType::Generic,
                not_valid_before: details.not_valid_before,
                not_valid_after: details.not_valid_after,
            },
        )?;
        self.store_inventory()?;
        info!("Credential {} added to domain {}", unique_name, domain);
        Ok(())
    }
}
