//! Error types for the Trustpoint client
//!
//! Errors are grouped by the part of the protocol that produced them so callers
//! can tell a rejected request apart from a failed handshake or a broken store.
//! Every variant renders as user-facing text.

use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Top-level error type for all client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request rejected before any state was touched
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Trust material could not be authenticated
    #[error("Trust error: {0}")]
    Trust(#[from] TrustError),

    /// HTTP exchange with the Trustpoint failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// External enrollment executor failed
    #[error("{0}")]
    Enrollment(#[from] EnrollmentError),

    /// Secure DevID store failure
    #[error("DevID store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying OpenSSL failure
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// Malformed certificate or key material
    #[error("Invalid certificate material: {0}")]
    Certificate(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inventory (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation errors, always reported synchronously with no state change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "The unique name must start with a letter and must only contain letters, digits, underscores and hyphens: {name}"
    )]
    InvalidUniqueName { name: String },

    #[error("Domain {domain} does not exist.")]
    UnknownDomain { domain: String },

    #[error("Domain with unique name {domain} already exists.")]
    DuplicateDomain { domain: String },

    #[error("Credential {unique_name} does not exist for domain {domain}.")]
    UnknownCredential { domain: String, unique_name: String },

    #[error("Credentials with unique name {unique_name} already exists for domain {domain}.")]
    DuplicateCredential { domain: String, unique_name: String },

    #[error("The Domain Credential cannot be deleted unless the domain itself is removed.")]
    DomainCredentialNotDeletable,

    #[error("No default domain is configured.")]
    NoDefaultDomain,

    #[error("{kind} format {value} is not supported.")]
    UnsupportedFormat { kind: &'static str, value: String },

    #[error("Signature suite {value} is not supported.")]
    UnsupportedSignatureSuite { value: String },

    #[error("PKI protocol {value} is not supported.")]
    UnsupportedPkiProtocol { value: String },

    #[error("Found an invalid subject attribute type: {attribute_type}.")]
    InvalidSubjectAttribute { attribute_type: String },

    #[error("Subject attribute must have the form type:value, got: {entry}")]
    MalformedSubjectEntry { entry: String },

    #[error("Password must be at least {min} characters.")]
    PasswordTooShort { min: usize },

    #[error("Certificate does not seem to be an LDevID issued by a Trustpoint.")]
    NotAnLdevid,

    #[error("Private key does not match the certificate public key.")]
    KeyCertificateMismatch,
}

/// Trust bootstrap failures, never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    #[error("HMAC missing in HTTP header.")]
    MissingSignature,

    #[error("Header {header} missing in trust-store response.")]
    MissingHeader { header: String },

    #[error("HMACs do not match.")]
    SignatureMismatch,
}

/// Transport failures, terminal for the current operation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Server returned HTTP code {status}")]
    Status { status: u16 },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Enrollment executor failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error("CMP request failed: {diagnostic}")]
    Failed { diagnostic: String },

    #[error("Failed to launch enrollment executor {program}: {reason}")]
    Launch { program: String, reason: String },
}

/// DevID store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("No key stored at index {index}")]
    KeyNotFound { index: usize },

    #[error("No certificate stored at index {index}")]
    CertificateNotFound { index: usize },

    #[error("Key at index {index} is not enabled")]
    KeyDisabled { index: usize },

    #[error("Certificate at index {index} is not enabled")]
    CertificateDisabled { index: usize },

    #[error("Rejected malformed {material}: {reason}")]
    Malformed { material: &'static str, reason: String },

    #[error("Failed to persist DevID store to {path}: {reason}")]
    Persist { path: String, reason: String },
}
