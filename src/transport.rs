//! Onboarding HTTPS endpoints of a Trustpoint
//!
//! The trust-store endpoint is fetched without certificate validation; its
//! body is authenticated afterwards with the OTP-derived HMAC. Every later
//! call validates the server against that verified trust store.

use crate::errors::{ClientResult, TransportError};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::{Certificate, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Multipart field (and file name) carrying the LDevID CSR
pub const LDEVID_CSR_FIELD: &str = "ldevid.csr";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw trust-store response, headers keyed by lowercase name
#[derive(Debug, Clone, Default)]
pub struct TrustStoreResponse {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TrustStoreResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// The three onboarding calls a device makes during auto provisioning
pub trait OnboardingTransport {
    /// `GET /api/onboarding/trust-store/{device}`, server certificate unchecked
    fn fetch_trust_store(&self, host: &str, port: u16, device: &str)
        -> ClientResult<TrustStoreResponse>;

    /// `POST /api/onboarding/ldevid/{device}`, returns the PEM certificate
    fn request_ldevid(
        &self,
        host: &str,
        port: u16,
        device: &str,
        otp: &SecretString,
        csr_pem: &[u8],
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>>;

    /// `GET /api/onboarding/ldevid/cert-chain/{device}`, returns a PEM bundle
    fn fetch_ldevid_chain(
        &self,
        host: &str,
        port: u16,
        device: &str,
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>>;
}

pub fn onboarding_url(host: &str, port: u16, path: &str) -> String {
    format!("https://{host}:{port}/api/onboarding/{path}")
}

/// `reqwest` based transport
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    timeout: Duration,
}

impl Default for HttpsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpsTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn builder(&self) -> ClientBuilder {
        Client::builder().timeout(self.timeout)
    }

    fn insecure_client(&self, url: &str) -> ClientResult<Client> {
        Ok(self
            .builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|source| request_error(url, source))?)
    }

    /// Client that only trusts the certificates in `trust_anchor`
    fn anchored_client(&self, url: &str, trust_anchor: &Path) -> ClientResult<Client> {
        let pem = fs::read(trust_anchor)?;
        let roots = Certificate::from_pem_bundle(&pem).map_err(|source| request_error(url, source))?;
        let mut builder = self.builder().tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
        Ok(builder.build().map_err(|source| request_error(url, source))?)
    }
}

fn request_error(url: &str, source: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        source,
    }
}

fn expect_ok(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(TransportError::Status {
            status: status.as_u16(),
        }
        .into());
    }
    Ok(response)
}

fn body_bytes(url: &str, response: Response) -> ClientResult<Vec<u8>> {
    Ok(response
        .bytes()
        .map_err(|source| request_error(url, source))?
        .to_vec())
}

impl OnboardingTransport for HttpsTransport {
    fn fetch_trust_store(
        &self,
        host: &str,
        port: u16,
        device: &str,
    ) -> ClientResult<TrustStoreResponse> {
        let url = onboarding_url(host, port, &format!("trust-store/{device}"));
        info!("Fetching trust store from {}", url);
        let response = self
            .insecure_client(&url)?
            .get(&url)
            .send()
            .map_err(|source| request_error(&url, source))?;
        let response = expect_ok(response)?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = body_bytes(&url, response)?;
        debug!("Trust store response carries {} bytes", body.len());
        Ok(TrustStoreResponse { headers, body })
    }

    fn request_ldevid(
        &self,
        host: &str,
        port: u16,
        device: &str,
        otp: &SecretString,
        csr_pem: &[u8],
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>> {
        let url = onboarding_url(host, port, &format!("ldevid/{device}"));
        info!("Requesting LDevID from {}", url);
        let part = Part::bytes(csr_pem.to_vec()).file_name(LDEVID_CSR_FIELD);
        let form = Form::new().part(LDEVID_CSR_FIELD, part);
        let response = self
            .anchored_client(&url, trust_anchor)?
            .post(&url)
            .basic_auth(device, Some(otp.expose_secret()))
            .multipart(form)
            .send()
            .map_err(|source| request_error(&url, source))?;
        body_bytes(&url, expect_ok(response)?)
    }

    fn fetch_ldevid_chain(
        &self,
        host: &str,
        port: u16,
        device: &str,
        trust_anchor: &Path,
    ) -> ClientResult<Vec<u8>> {
        let url = onboarding_url(host, port, &format!("ldevid/cert-chain/{device}"));
        info!("Fetching LDevID certificate chain from {}", url);
        let response = self
            .anchored_client(&url, trust_anchor)?
            .get(&url)
            .send()
            .map_err(|source| request_error(&url, source))?;
        body_bytes(&url, expect_ok(response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboarding_url() {
        assert_eq!(
            onboarding_url("127.0.0.1", 8443, "trust-store/dev-1"),
            "https://127.0.0.1:8443/api/onboarding/trust-store/dev-1"
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = TrustStoreResponse::default();
        response
            .headers
            .insert("hmac-signature".to_string(), "ab".to_string());
        assert_eq!(response.header("HMAC-Signature"), Some("ab"));
        assert_eq!(response.header("domain"), None);
    }

    #[test]
    fn test_anchored_client_rejects_missing_anchor() {
        let transport = HttpsTransport::default();
        let result = transport.anchored_client("https://x", Path::new("/nonexistent/anchor.pem"));
        assert!(result.is_err());
    }
}
