//! Enumerations shared by the inventory, the provisioning flows and the CLI.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Algorithm and key size used for all keys of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureSuite {
    #[serde(rename = "RSA2048")]
    Rsa2048,
    #[serde(rename = "RSA3072")]
    Rsa3072,
    #[serde(rename = "RSA4096")]
    Rsa4096,
    #[serde(rename = "SECP256R1")]
    Secp256r1,
    #[serde(rename = "SECP384R1")]
    Secp384r1,
}

impl SignatureSuite {
    pub const ALL: [SignatureSuite; 5] = [
        SignatureSuite::Rsa2048,
        SignatureSuite::Rsa3072,
        SignatureSuite::Rsa4096,
        SignatureSuite::Secp256r1,
        SignatureSuite::Secp384r1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignatureSuite::Rsa2048 => "RSA2048",
            SignatureSuite::Rsa3072 => "RSA3072",
            SignatureSuite::Rsa4096 => "RSA4096",
            SignatureSuite::Secp256r1 => "SECP256R1",
            SignatureSuite::Secp384r1 => "SECP384R1",
        }
    }
}

impl fmt::Display for SignatureSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureSuite {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|suite| suite.as_str() == s)
            .ok_or_else(|| ValidationError::UnsupportedSignatureSuite {
                value: s.to_string(),
            })
    }
}

/// Enrollment protocol a domain uses after onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkiProtocol {
    #[serde(rename = "CMP")]
    Cmp,
    #[serde(rename = "EST")]
    Est,
    #[serde(rename = "REST")]
    Rest,
    #[serde(rename = "SCEP")]
    Scep,
}

impl PkiProtocol {
    pub const ALL: [PkiProtocol; 4] = [
        PkiProtocol::Cmp,
        PkiProtocol::Est,
        PkiProtocol::Rest,
        PkiProtocol::Scep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PkiProtocol::Cmp => "CMP",
            PkiProtocol::Est => "EST",
            PkiProtocol::Rest => "REST",
            PkiProtocol::Scep => "SCEP",
        }
    }
}

impl fmt::Display for PkiProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PkiProtocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnsupportedPkiProtocol {
                value: s.to_string(),
            })
    }
}

/// Role of a certificate within a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateType {
    Ldevid,
    Generic,
    TlsClient,
    TlsServer,
}

impl CertificateType {
    pub fn as_str(self) -> &'static str {
        match self {
            CertificateType::Ldevid => "LDEVID",
            CertificateType::Generic => "GENERIC",
            CertificateType::TlsClient => "TLS_CLIENT",
            CertificateType::TlsServer => "TLS_SERVER",
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
