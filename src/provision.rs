//! Provisioning Module
//!
//! Creates a domain and its LDevID credential, either by running the
//! OTP-authenticated onboarding handshake against a Trustpoint or by
//! importing an LDevID that was issued out of band.
//!
//! # Auto provisioning
//!
//! ```text
//! GET  /api/onboarding/trust-store/{device}      (server unchecked)
//!      verify hmac-signature with PBKDF2(OTP, device)
//! POST /api/onboarding/ldevid/{device}           (anchored to trust store)
//! GET  /api/onboarding/ldevid/cert-chain/{device}
//! ```
//!
//! The trust store only leaves memory as a temporary file for the duration of
//! the two anchored calls.

use crate::certificate::{chain_to_pem, load_certificate, subject_attribute, CertificateDetails};
use crate::client::TrustpointClient;
use crate::devid_store::install_credential;
use crate::errors::{ClientError, ClientResult, TrustError, ValidationError};
use crate::inventory::{
    format_duration, normalize_host, CredentialModel, DomainConfig, DomainModel, DOMAIN_CREDENTIAL,
};
use crate::keys::{build_ldevid_csr, generate_new_key, signature_suite_from_key};
use crate::schema::{CertificateType, PkiProtocol, SignatureSuite};
use crate::transport::TrustStoreResponse;
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

pub const HMAC_SIGNATURE_HEADER: &str = "hmac-signature";
pub const DOMAIN_HEADER: &str = "domain";
pub const SIGNATURE_SUITE_HEADER: &str = "signature-suite";
pub const PKI_PROTOCOL_HEADER: &str = "pki-protocol";

pub const PBKDF2_ITERATIONS: usize = 1_000_000;
const DERIVED_KEY_LENGTH: usize = 32;

/// Trust store and domain parameters a device onboards with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustMaterial {
    pub trust_store: String,
    pub domain: String,
    pub signature_suite: SignatureSuite,
    pub pki_protocol: PkiProtocol,
}

/// Summary of a freshly provisioned domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Serial-Number")]
    pub serial_number: String,
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "PKI-Protocol")]
    pub pki_protocol: PkiProtocol,
    #[serde(rename = "Signature-Suite")]
    pub signature_suite: SignatureSuite,
    #[serde(rename = "LDevID Subject")]
    pub ldevid_subject: String,
    #[serde(rename = "LDevID Certificate Type")]
    pub ldevid_certificate_type: CertificateType,
    #[serde(rename = "LDevID Not-Valid-Before")]
    pub ldevid_not_valid_before: DateTime<Utc>,
    #[serde(rename = "LDevID Not-Valid-After")]
    pub ldevid_not_valid_after: DateTime<Utc>,
    #[serde(rename = "LDevID Expires-In")]
    pub ldevid_expires_in: String,
}

/// HMAC key shared with the Trustpoint: PBKDF2-HMAC-SHA256(OTP, device)
pub fn derive_hmac_key(otp: &SecretString, device: &str) -> ClientResult<[u8; DERIVED_KEY_LENGTH]> {
    let mut key = [0u8; DERIVED_KEY_LENGTH];
    openssl::pkcs5::pbkdf2_hmac(
        otp.expose_secret().as_bytes(),
        device.as_bytes(),
        PBKDF2_ITERATIONS,
        MessageDigest::sha256(),
        &mut key,
    )?;
    Ok(key)
}

/// Lowercase hex HMAC-SHA256 of `body`
pub fn trust_store_signature(otp: &SecretString, device: &str, body: &[u8]) -> ClientResult<String> {
    let key = PKey::hmac(&derive_hmac_key(otp, device)?)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(body)?;
    Ok(hex::encode(signer.sign_to_vec()?))
}

fn required_header<'a>(response: &'a TrustStoreResponse, header: &str) -> ClientResult<&'a str> {
    response.header(header).ok_or_else(|| {
        TrustError::MissingHeader {
            header: header.to_string(),
        }
        .into()
    })
}

/// Authenticate a trust-store response and extract the domain parameters
pub fn verify_trust_store(
    otp: &SecretString,
    device: &str,
    response: &TrustStoreResponse,
) -> ClientResult<TrustMaterial> {
    let received = response
        .header(HMAC_SIGNATURE_HEADER)
        .ok_or(TrustError::MissingSignature)?;

    let domain = required_header(response, DOMAIN_HEADER)?.to_string();
    let signature_suite: SignatureSuite = required_header(response, SIGNATURE_SUITE_HEADER)?.parse()?;
    let pki_protocol: PkiProtocol = required_header(response, PKI_PROTOCOL_HEADER)?.parse()?;

    let calculated = trust_store_signature(otp, device, &response.body)?;
    let matches = calculated.len() == received.len()
        && openssl::memcmp::eq(calculated.as_bytes(), received.as_bytes());
    if !matches {
        return Err(TrustError::SignatureMismatch.into());
    }

    let trust_store = String::from_utf8(response.body.clone())
        .map_err(|e| ClientError::Certificate(format!("trust store is not UTF-8 PEM: {e}")))?;
    debug!("Trust store for domain {} verified", domain);
    Ok(TrustMaterial {
        trust_store,
        domain,
        signature_suite,
        pki_protocol,
    })
}

/// Identity fields a Trustpoint writes into every LDevID subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdevidIdentity {
    pub serial_number: String,
    pub device: String,
    pub domain: String,
}

/// Read serialNumber, pseudonym and `trustpoint.<...>.<domain>` dnQualifier
pub fn ldevid_identity(certificate: &X509Ref) -> Result<LdevidIdentity, ValidationError> {
    let subject = certificate.subject_name();
    let serial_number =
        subject_attribute(subject, Nid::SERIALNUMBER).ok_or(ValidationError::NotAnLdevid)?;
    let device = subject_attribute(subject, Nid::PSEUDONYM).ok_or(ValidationError::NotAnLdevid)?;
    let qualifier =
        subject_attribute(subject, Nid::DNQUALIFIER).ok_or(ValidationError::NotAnLdevid)?;

    let components: Vec<&str> = qualifier.split('.').collect();
    let issued_by_trustpoint = components
        .first()
        .is_some_and(|first| first.eq_ignore_ascii_case("trustpoint"));
    let domain = match components.last() {
        Some(domain) if issued_by_trustpoint => domain.to_string(),
        _ => return Err(ValidationError::NotAnLdevid),
    };

    Ok(LdevidIdentity {
        serial_number,
        device,
        domain,
    })
}

/// Private key, certificate and chain of an externally issued LDevID
pub struct CredentialBundle {
    pub private_key: PKey<Private>,
    pub certificate: X509,
    pub chain: Vec<X509>,
}

impl CredentialBundle {
    pub fn from_pkcs12(der: &[u8], password: &str) -> ClientResult<Self> {
        let parsed = Pkcs12::from_der(der)?.parse2(password)?;
        let private_key = parsed
            .pkey
            .ok_or_else(|| ClientError::Certificate("PKCS#12 file holds no private key".to_string()))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| ClientError::Certificate("PKCS#12 file holds no certificate".to_string()))?;
        let chain = parsed.ca.map(|ca| ca.into_iter().collect()).unwrap_or_default();
        Ok(Self {
            private_key,
            certificate,
            chain,
        })
    }

    /// Build from PEM parts; `password` decrypts an encrypted key
    pub fn from_pem(
        private_key_pem: &[u8],
        certificate_pem: &[u8],
        chain_pem: &[u8],
        password: Option<&str>,
    ) -> ClientResult<Self> {
        let private_key = match password {
            Some(password) => PKey::private_key_from_pem_passphrase(private_key_pem, password.as_bytes())?,
            None => PKey::private_key_from_pem(private_key_pem)?,
        };
        Ok(Self {
            private_key,
            certificate: load_certificate(certificate_pem)?,
            chain: crate::certificate::load_certificate_chain(chain_pem)?,
        })
    }
}

impl TrustpointClient {
    /// Onboard the device into a domain with a one-time password
    ///
    /// Without `trust`, the trust store and domain parameters are fetched and
    /// authenticated first. A pre-supplied `trust` skips that request.
    pub fn provision_auto(
        &mut self,
        otp: &SecretString,
        device: &str,
        host: &str,
        port: u16,
        trust: Option<TrustMaterial>,
    ) -> ClientResult<ProvisioningResult> {
        let host = normalize_host(host);
        let trust = match trust {
            Some(trust) => trust,
            None => {
                let response = self.transport.fetch_trust_store(&host, port, device)?;
                verify_trust_store(otp, device, &response)?
            }
        };
        self.inventory.ensure_domain_available(&trust.domain)?;
        info!(
            "Provisioning device {} into domain {} ({}, {})",
            device, trust.domain, trust.signature_suite, trust.pki_protocol
        );

        let mut anchor = tempfile::Builder::new()
            .prefix("tls-trust-store-")
            .suffix(".pem")
            .tempfile()?;
        anchor.write_all(trust.trust_store.as_bytes())?;
        anchor.flush()?;

        let key = generate_new_key(trust.signature_suite)?;
        let csr = build_ldevid_csr(&key, trust.signature_suite)?;
        let certificate_pem =
            self.transport
                .request_ldevid(&host, port, device, otp, &csr, anchor.path())?;
        let chain_pem = self
            .transport
            .fetch_ldevid_chain(&host, port, device, anchor.path())?;
        drop(anchor);

        let certificate = load_certificate(&certificate_pem)?;
        let serial_number = subject_attribute(certificate.subject_name(), Nid::SERIALNUMBER)
            .ok_or_else(|| {
                ClientError::Certificate("LDevID subject has no serial number".to_string())
            })?;

        let config = DomainConfig {
            device: device.to_string(),
            serial_number,
            domain: trust.domain,
            trustpoint_host: host,
            trustpoint_port: port,
            signature_suite: trust.signature_suite,
            pki_protocol: trust.pki_protocol,
            tls_trust_store: Some(trust.trust_store),
        };
        self.install_domain(config, &key, &certificate, &chain_pem)
    }

    /// Import an LDevID issued by a Trustpoint out of band
    pub fn provision_manual(
        &mut self,
        host: &str,
        port: u16,
        pki_protocol: PkiProtocol,
        bundle: &CredentialBundle,
    ) -> ClientResult<ProvisioningResult> {
        let identity = ldevid_identity(&bundle.certificate)?;
        self.inventory.ensure_domain_available(&identity.domain)?;

        let public_key = bundle.certificate.public_key()?;
        if !public_key.public_eq(&bundle.private_key) {
            return Err(ValidationError::KeyCertificateMismatch.into());
        }
        let signature_suite = signature_suite_from_key(&public_key)?;
        info!(
            "Importing LDevID of device {} for domain {}",
            identity.device, identity.domain
        );

        let config = DomainConfig {
            device: identity.device,
            serial_number: identity.serial_number,
            domain: identity.domain,
            trustpoint_host: normalize_host(host),
            trustpoint_port: port,
            signature_suite,
            pki_protocol,
            tls_trust_store: None,
        };
        let chain_pem = chain_to_pem(&bundle.chain)?;
        self.install_domain(config, &bundle.private_key, &bundle.certificate, &chain_pem)
    }

    fn install_domain(
        &mut self,
        config: DomainConfig,
        key: &PKey<Private>,
        certificate: &X509,
        chain_pem: &[u8],
    ) -> ClientResult<ProvisioningResult> {
        let details = CertificateDetails::from_x509(certificate)?;
        let stored = install_credential(
            self.store.as_mut(),
            &key.private_key_to_pem_pkcs8()?,
            &certificate.to_pem()?,
            chain_pem,
        )?;

        let ldevid_credential = CredentialModel {
            unique_name: DOMAIN_CREDENTIAL.to_string(),
            certificate_index: stored.certificate_index,
            key_index: stored.key_index,
            subject: details.subject,
            certificate_type: CertificateType::Ldevid,
            not_valid_before: details.not_valid_before,
            not_valid_after: details.not_valid_after,
        };
        let result = ProvisioningResult {
            device: config.device.clone(),
            serial_number: config.serial_number.clone(),
            host: config.trustpoint_host.clone(),
            port: config.trustpoint_port,
            pki_protocol: config.pki_protocol,
            signature_suite: config.signature_suite,
            ldevid_subject: ldevid_credential.subject.clone(),
            ldevid_certificate_type: ldevid_credential.certificate_type,
            ldevid_not_valid_before: ldevid_credential.not_valid_before,
            ldevid_not_valid_after: ldevid_credential.not_valid_after,
            ldevid_expires_in: format_duration(ldevid_credential.expires_in()),
        };

        let domain = config.domain.clone();
        self.inventory
            .insert_domain(DomainModel::new(config, ldevid_credential))?;
        if self.inventory.adopt_default_domain(&domain) {
            info!("Domain {} is now the default domain", domain);
        }
        self.store_inventory()?;
        info!("Domain {} provisioned", domain);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::x509::X509Name;

    const TRUST_STORE: &[u8] = b"-----BEGIN CERTIFICATE-----\n";
    // PBKDF2-HMAC-SHA256("abc123", "dev-1", 1e6) keyed HMAC-SHA256 of TRUST_STORE
    const TRUST_STORE_HMAC: &str =
        "52193fa5a6b23a88217259108aecddbc4ec83aebf1532bbecb13193233bbd7d3";

    fn otp() -> SecretString {
        SecretString::from("abc123".to_string())
    }

    fn response(signature: Option<&str>) -> TrustStoreResponse {
        let mut response = TrustStoreResponse {
            body: TRUST_STORE.to_vec(),
            ..Default::default()
        };
        for (name, value) in [
            (DOMAIN_HEADER, "factory"),
            (SIGNATURE_SUITE_HEADER, "SECP256R1"),
            (PKI_PROTOCOL_HEADER, "CMP"),
        ] {
            response.headers.insert(name.to_string(), value.to_string());
        }
        if let Some(signature) = signature {
            response
                .headers
                .insert(HMAC_SIGNATURE_HEADER.to_string(), signature.to_string());
        }
        response
    }

    fn certificate(entries: &[(Nid, &str)]) -> X509 {
        certificate_with_key(entries).1
    }

    fn certificate_with_key(entries: &[(Nid, &str)]) -> (PKey<Private>, X509) {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let mut name = X509Name::builder().unwrap();
        for (nid, value) in entries {
            name.append_entry_by_nid(*nid, value).unwrap();
        }
        let name = name.build();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (key, builder.build())
    }

    #[test]
    fn test_signature_matches_known_value() {
        let signature = trust_store_signature(&otp(), "dev-1", TRUST_STORE).unwrap();
        assert_eq!(signature, TRUST_STORE_HMAC);
    }

    #[test]
    fn test_verified_trust_material() {
        let trust = verify_trust_store(&otp(), "dev-1", &response(Some(TRUST_STORE_HMAC))).unwrap();
        assert_eq!(trust.domain, "factory");
        assert_eq!(trust.signature_suite, SignatureSuite::Secp256r1);
        assert_eq!(trust.pki_protocol, PkiProtocol::Cmp);
        assert_eq!(trust.trust_store.as_bytes(), TRUST_STORE);
    }

    #[test]
    fn test_missing_signature_rejected() {
        let err = verify_trust_store(&otp(), "dev-1", &response(None)).unwrap_err();
        assert!(matches!(err, ClientError::Trust(TrustError::MissingSignature)));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let err = verify_trust_store(&otp(), "dev-1", &response(Some(&TRUST_STORE_HMAC[..10])))
            .unwrap_err();
        assert!(matches!(err, ClientError::Trust(TrustError::SignatureMismatch)));
    }

    #[test]
    fn test_unknown_suite_header_rejected() {
        let mut response = response(Some(TRUST_STORE_HMAC));
        response
            .headers
            .insert(SIGNATURE_SUITE_HEADER.to_string(), "ED25519".to_string());
        let err = verify_trust_store(&otp(), "dev-1", &response).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::UnsupportedSignatureSuite { .. })
        ));
    }

    #[test]
    fn test_ldevid_identity() {
        let cert = certificate(&[
            (Nid::SERIALNUMBER, "SN-42"),
            (Nid::PSEUDONYM, "dev-1"),
            (Nid::DNQUALIFIER, "Trustpoint.devid.factory"),
        ]);
        let identity = ldevid_identity(&cert).unwrap();
        assert_eq!(
            identity,
            LdevidIdentity {
                serial_number: "SN-42".to_string(),
                device: "dev-1".to_string(),
                domain: "factory".to_string(),
            }
        );
    }

    #[test]
    fn test_foreign_certificate_is_not_an_ldevid() {
        let missing_pseudonym = certificate(&[
            (Nid::SERIALNUMBER, "SN-42"),
            (Nid::DNQUALIFIER, "trustpoint.factory"),
        ]);
        assert_eq!(
            ldevid_identity(&missing_pseudonym).unwrap_err(),
            ValidationError::NotAnLdevid
        );

        let other_issuer = certificate(&[
            (Nid::SERIALNUMBER, "SN-42"),
            (Nid::PSEUDONYM, "dev-1"),
            (Nid::DNQUALIFIER, "acme.factory"),
        ]);
        assert_eq!(
            ldevid_identity(&other_issuer).unwrap_err().to_string(),
            "Certificate does not seem to be an LDevID issued by a Trustpoint."
        );
    }

    #[test]
    fn test_bundle_from_pkcs12() {
        let (key, cert) = certificate_with_key(&[(Nid::COMMONNAME, "x")]);
        let mut builder = Pkcs12::builder();
        builder.pkey(&key);
        builder.cert(&cert);
        let der = builder.build2("bundle-password").unwrap().to_der().unwrap();

        let bundle = CredentialBundle::from_pkcs12(&der, "bundle-password").unwrap();
        assert!(bundle.private_key.public_eq(&key));
        assert!(bundle.chain.is_empty());
        assert!(CredentialBundle::from_pkcs12(&der, "wrong-password").is_err());
    }
}
