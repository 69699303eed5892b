//! Test doubles: a throwaway CA, a fake Trustpoint onboarding server and a
//! fake CMP executor. Both fakes record what they were asked to do.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::x509::{X509Name, X509Req, X509};
use secrecy::{ExposeSecret, SecretString};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use trustpoint_client::devid_store::{DevIdStore, MemoryDevIdStore};
use trustpoint_client::enrollment::{EnrolledCertificate, EnrollmentExecutor, EnrollmentRequest};
use trustpoint_client::errors::{ClientResult, EnrollmentError, StoreError, TransportError};
use trustpoint_client::keys::LDEVID_CSR_COMMON_NAME;
use trustpoint_client::provision::{
    trust_store_signature, TrustMaterial, DOMAIN_HEADER, HMAC_SIGNATURE_HEADER,
    PKI_PROTOCOL_HEADER, SIGNATURE_SUITE_HEADER,
};
use trustpoint_client::schema::{PkiProtocol, SignatureSuite};
use trustpoint_client::transport::{OnboardingTransport, TrustStoreResponse};
use trustpoint_client::TrustpointClient;

pub const OTP: &str = "abc123";
pub const DEVICE: &str = "dev-1";
pub const DOMAIN: &str = "factory";
pub const SERIAL_NUMBER: &str = "SN-0001";

pub fn otp() -> SecretString {
    SecretString::from(OTP.to_string())
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Self-signed issuing CA
pub struct TestCa {
    pub key: PKey<Private>,
    pub certificate: X509,
    serial: Cell<u32>,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let key = ec_key();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
            .unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            certificate: builder.build(),
            serial: Cell::new(2),
        }
    }

    pub fn pem(&self) -> Vec<u8> {
        self.certificate.to_pem().unwrap()
    }

    pub fn issue<T: HasPublic>(&self, public_key: &PKeyRef<T>, entries: &[(Nid, &str)]) -> X509 {
        let mut name = X509Name::builder().unwrap();
        for (nid, value) in entries {
            name.append_entry_by_nid(*nid, value).unwrap();
        }
        let name = name.build();

        let serial = self.serial.get();
        self.serial.set(serial + 1);

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder
            .set_issuer_name(self.certificate.subject_name())
            .unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.set_pubkey(public_key).unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    /// LDevID subject the way a Trustpoint issues it
    pub fn issue_ldevid<T: HasPublic>(&self, public_key: &PKeyRef<T>, device: &str, domain: &str) -> X509 {
        let qualifier = format!("trustpoint.devid.{domain}");
        self.issue(
            public_key,
            &[
                (Nid::SERIALNUMBER, SERIAL_NUMBER),
                (Nid::PSEUDONYM, device),
                (Nid::DNQUALIFIER, qualifier.as_str()),
                (Nid::COMMONNAME, LDEVID_CSR_COMMON_NAME),
            ],
        )
    }
}

pub struct ServerState {
    pub ca: TestCa,
    pub domain: String,
    pub signature_suite: SignatureSuite,
    pub pki_protocol: PkiProtocol,
    pub tamper_trust_store: Cell<bool>,
    pub calls: RefCell<Vec<&'static str>>,
    pub anchor_paths: RefCell<Vec<PathBuf>>,
}

/// Onboarding endpoints of a Trustpoint that knows OTP [`OTP`] for [`DEVICE`]
#[derive(Clone)]
pub struct FakeTrustpoint(pub Rc<ServerState>);

impl FakeTrustpoint {
    pub fn new(domain: &str, signature_suite: SignatureSuite, pki_protocol: PkiProtocol) -> Self {
        Self(Rc::new(ServerState {
            ca: TestCa::new("Trustpoint Issuing CA"),
            domain: domain.to_string(),
            signature_suite,
            pki_protocol,
            tamper_trust_store: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            anchor_paths: RefCell::new(Vec::new()),
        }))
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.calls.borrow().clone()
    }

    pub fn tamper_trust_store(&self) {
        self.0.tamper_trust_store.set(true);
    }

    pub fn anchor_paths(&self) -> Vec<PathBuf> {
        self.0.anchor_paths.borrow().clone()
    }

    /// Trust material as a zero-touch setup would hand it over
    pub fn trust_material(&self) -> TrustMaterial {
        TrustMaterial {
            trust_store: String::from_utf8(self.0.ca.pem()).unwrap(),
            domain: self.0.domain.clone(),
            signature_suite: self.0.signature_suite,
            pki_protocol: self.0.pki_protocol,
        }
    }

    fn check_anchor(&self, trust_anchor: &Path) -> ClientResult<()> {
        self.0.anchor_paths.borrow_mut().push(trust_anchor.to_path_buf());
        if fs::read(trust_anchor)? != self.0.ca.pem() {
            return Err(TransportError::Status { status: 495 }.into());
        }
        Ok(())
    }
}

impl OnboardingTransport for FakeTrustpoint {
    fn fetch_trust_store(&self, _host: &str, _port: u16, device: &str) -> ClientResult<TrustStoreResponse> {
        self.0.calls.borrow_mut().push("trust-store");
        let body = self.0.ca.pem();
        let signature = trust_store_signature(&otp(), device, &body)?;

        let mut response = TrustStoreResponse {
            body,
            ..Default::default()
        };
        if self.0.tamper_trust_store.get() {
            response.body[30] ^= 0x01;
        }
        for (name, value) in [
            (DOMAIN_HEADER, self.0.domain.clone()),
            (SIGNATURE_SUITE_HEADER, self.0.signature_suite.to_string()),
            (PKI_PROTOCOL_HEADER, self.0.pki_protocol.to_string()),
            (HMAC_SIGNATURE_HEADER, signature),
        ] {
            response.headers.insert(name.to_string(), value);
        }
        Ok(response)
    }

    fn request_ldevid(
        &self,
        _host: &str,
        _port: u16,
        device: &str,
        otp: &SecretString,
        csr_pem: &[u8],
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>> {
        self.0.calls.borrow_mut().push("ldevid");
        self.check_anchor(trust_anchor)?;
        if device != DEVICE || otp.expose_secret() != OTP {
            return Err(TransportError::Status { status: 401 }.into());
        }
        let csr = X509Req::from_pem(csr_pem)?;
        let public_key = csr.public_key()?;
        if !csr.verify(&public_key)? {
            return Err(TransportError::Status { status: 400 }.into());
        }
        let certificate = self.0.ca.issue_ldevid(&public_key, device, &self.0.domain);
        Ok(certificate.to_pem()?)
    }

    fn fetch_ldevid_chain(
        &self,
        _host: &str,
        _port: u16,
        _device: &str,
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>> {
        self.0.calls.borrow_mut().push("cert-chain");
        self.check_anchor(trust_anchor)?;
        Ok(self.0.ca.pem())
    }
}

pub struct CmpState {
    pub ca: TestCa,
    pub subjects: RefCell<Vec<String>>,
    pub trust_stores: RefCell<Vec<Option<String>>>,
    pub fail: Cell<bool>,
}

/// CMP executor that certifies the new key directly
#[derive(Clone)]
pub struct FakeCmp(pub Rc<CmpState>);

impl FakeCmp {
    pub fn new() -> Self {
        Self(Rc::new(CmpState {
            ca: TestCa::new("Domain Issuing CA"),
            subjects: RefCell::new(Vec::new()),
            trust_stores: RefCell::new(Vec::new()),
            fail: Cell::new(false),
        }))
    }

    pub fn subjects(&self) -> Vec<String> {
        self.0.subjects.borrow().clone()
    }

    pub fn fail_requests(&self) {
        self.0.fail.set(true);
    }
}

impl EnrollmentExecutor for FakeCmp {
    fn initialization_request(&self, request: &EnrollmentRequest<'_>) -> ClientResult<EnrolledCertificate> {
        self.0.subjects.borrow_mut().push(request.subject.to_string());
        self.0
            .trust_stores
            .borrow_mut()
            .push(request.tls_trust_store.map(str::to_string));
        if self.0.fail.get() {
            return Err(EnrollmentError::Failed {
                diagnostic: "CMP error: rejected by test".to_string(),
            }
            .into());
        }

        let identity = X509::from_pem(request.identity_certificate_pem)?;
        let identity_key = PKey::private_key_from_pem(request.identity_key_pem)?;
        assert!(identity.public_key()?.public_eq(&identity_key));

        let pseudonym = request
            .subject
            .split('/')
            .nth(1)
            .and_then(|rdn| rdn.strip_prefix("2.5.4.65="))
            .unwrap_or("unknown");
        let new_key = PKey::private_key_from_pem(request.new_key_pem)?;
        let certificate = self.0.ca.issue(
            &new_key,
            &[(Nid::PSEUDONYM, pseudonym), (Nid::COMMONNAME, "generic")],
        );
        Ok(EnrolledCertificate {
            certificate_pem: certificate.to_pem()?,
            chain_pem: self.0.ca.pem(),
        })
    }
}

/// Memory store whose deletes can be made to fail
pub struct FlakyStore {
    pub inner: MemoryDevIdStore,
    pub fail_deletes: Rc<Cell<bool>>,
}

impl DevIdStore for FlakyStore {
    fn insert_key(&mut self, private_key_pem: &[u8]) -> ClientResult<usize> {
        self.inner.insert_key(private_key_pem)
    }

    fn enable_key(&mut self, index: usize) -> ClientResult<()> {
        self.inner.enable_key(index)
    }

    fn insert_certificate(&mut self, certificate_pem: &[u8]) -> ClientResult<usize> {
        self.inner.insert_certificate(certificate_pem)
    }

    fn enable_certificate(&mut self, index: usize) -> ClientResult<()> {
        self.inner.enable_certificate(index)
    }

    fn insert_certificate_chain(&mut self, certificate_index: usize, chain_pem: &[u8]) -> ClientResult<()> {
        self.inner.insert_certificate_chain(certificate_index, chain_pem)
    }

    fn delete_key(&mut self, index: usize) -> ClientResult<()> {
        if self.fail_deletes.get() {
            return Err(StoreError::Persist {
                path: "flaky".to_string(),
                reason: "disk full".to_string(),
            }
            .into());
        }
        self.inner.delete_key(index)
    }

    fn private_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        self.inner.private_key(index)
    }

    fn public_key(&self, index: usize) -> ClientResult<Vec<u8>> {
        self.inner.public_key(index)
    }

    fn certificate(&self, index: usize) -> ClientResult<Vec<u8>> {
        self.inner.certificate(index)
    }

    fn certificate_chain(&self, index: usize) -> ClientResult<Vec<Vec<u8>>> {
        self.inner.certificate_chain(index)
    }

    fn contains_key(&self, index: usize) -> bool {
        self.inner.contains_key(index)
    }
}

pub fn inventory_path(dir: &TempDir) -> PathBuf {
    dir.path().join("inventory.json")
}

pub fn client_with_store(
    dir: &TempDir,
    store: Box<dyn DevIdStore>,
    server: &FakeTrustpoint,
    cmp: &FakeCmp,
) -> TrustpointClient {
    TrustpointClient::new(
        inventory_path(dir),
        store,
        Box::new(server.clone()),
        Box::new(cmp.clone()),
    )
    .unwrap()
}

pub fn client(dir: &TempDir, server: &FakeTrustpoint, cmp: &FakeCmp) -> TrustpointClient {
    client_with_store(dir, Box::new(MemoryDevIdStore::new()), server, cmp)
}

/// Client already onboarded into [`DOMAIN`] via pre-supplied trust material
pub fn provisioned_client(dir: &TempDir, server: &FakeTrustpoint, cmp: &FakeCmp) -> TrustpointClient {
    let mut client = client(dir, server, cmp);
    client
        .provision_auto(&otp(), DEVICE, "127.0.0.1", 443, Some(server.trust_material()))
        .unwrap();
    client
}
