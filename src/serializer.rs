//! Encoders for exported keys and certificates
//!
//! Each export kind has its own closed format enum. Format names are parsed
//! from user input with `FromStr`; an unknown name is reported back verbatim.

use crate::errors::{ClientResult, ValidationError};
use crate::pkcs7;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;
use std::fmt;
use std::str::FromStr;

macro_rules! export_format {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.replace('-', "_");
                Self::ALL
                    .iter()
                    .copied()
                    .find(|format| format.as_str().eq_ignore_ascii_case(&wanted))
                    .ok_or_else(|| ValidationError::UnsupportedFormat {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

export_format!(
    /// Encoding of a single certificate
    CertificateFormat, "Certificate" {
        Pem => "PEM",
        Der => "DER",
        Pkcs7Pem => "PKCS7_PEM",
        Pkcs7Der => "PKCS7_DER",
    }
);

export_format!(
    /// Encoding of a certificate chain
    CertificateCollectionFormat, "Certificate chain" {
        Pem => "PEM",
        Pkcs7Pem => "PKCS7_PEM",
        Pkcs7Der => "PKCS7_DER",
    }
);

export_format!(
    PublicKeyFormat, "Public key" {
        Pem => "PEM",
        Der => "DER",
    }
);

export_format!(
    /// Encoding of a private key; every variant is password protected
    PrivateKeyFormat, "Private key" {
        Pkcs1Pem => "PKCS1_PEM",
        Pkcs8Pem => "PKCS8_PEM",
        Pkcs8Der => "PKCS8_DER",
        Pkcs12 => "PKCS12",
    }
);

fn key_cipher() -> Cipher {
    Cipher::aes_256_cbc()
}

pub fn encode_certificate(certificate: &X509, format: CertificateFormat) -> ClientResult<Vec<u8>> {
    let encoded = match format {
        CertificateFormat::Pem => certificate.to_pem()?,
        CertificateFormat::Der => certificate.to_der()?,
        CertificateFormat::Pkcs7Pem => pkcs7::certs_only_pem(std::slice::from_ref(certificate))?,
        CertificateFormat::Pkcs7Der => pkcs7::certs_only_der(std::slice::from_ref(certificate))?,
    };
    Ok(encoded)
}

pub fn encode_certificate_chain(
    chain: &[X509],
    format: CertificateCollectionFormat,
) -> ClientResult<Vec<u8>> {
    let encoded = match format {
        CertificateCollectionFormat::Pem => crate::certificate::chain_to_pem(chain)?,
        CertificateCollectionFormat::Pkcs7Pem => pkcs7::certs_only_pem(chain)?,
        CertificateCollectionFormat::Pkcs7Der => pkcs7::certs_only_der(chain)?,
    };
    Ok(encoded)
}

pub fn encode_public_key(public_key_pem: &[u8], format: PublicKeyFormat) -> ClientResult<Vec<u8>> {
    let key = PKey::public_key_from_pem(public_key_pem)?;
    let encoded = match format {
        PublicKeyFormat::Pem => key.public_key_to_pem()?,
        PublicKeyFormat::Der => key.public_key_to_der()?,
    };
    Ok(encoded)
}

/// Encrypt a private key under `password`
///
/// PKCS#1 PEM uses the traditional OpenSSL encoding, which for EC keys is the
/// SEC1 `EC PRIVATE KEY` block.
pub fn encode_private_key(
    key: &PKey<Private>,
    format: PrivateKeyFormat,
    password: &str,
) -> ClientResult<Vec<u8>> {
    let encoded = match format {
        PrivateKeyFormat::Pkcs1Pem => match key.id() {
            Id::EC => key
                .ec_key()?
                .private_key_to_pem_passphrase(key_cipher(), password.as_bytes())?,
            _ => key
                .rsa()?
                .private_key_to_pem_passphrase(key_cipher(), password.as_bytes())?,
        },
        PrivateKeyFormat::Pkcs8Pem => {
            key.private_key_to_pem_pkcs8_passphrase(key_cipher(), password.as_bytes())?
        }
        PrivateKeyFormat::Pkcs8Der => {
            key.private_key_to_pkcs8_passphrase(key_cipher(), password.as_bytes())?
        }
        PrivateKeyFormat::Pkcs12 => {
            let mut builder = Pkcs12::builder();
            builder.pkey(key);
            builder.build2(password)?.to_der()?
        }
    };
    Ok(encoded)
}

/// PKCS#12 bundle of key, certificate and chain
pub fn encode_credential_pkcs12(
    key: &PKey<Private>,
    certificate: &X509,
    chain: &[X509],
    password: &str,
) -> ClientResult<Vec<u8>> {
    let mut ca = Stack::new()?;
    for certificate in chain {
        ca.push(certificate.clone())?;
    }
    let mut builder = Pkcs12::builder();
    builder.pkey(key);
    builder.cert(certificate);
    builder.ca(ca);
    Ok(builder.build2(password)?.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_new_key;
    use crate::schema::SignatureSuite;

    const PASSWORD: &str = "correct-horse-battery";

    #[test]
    fn test_format_parsing() {
        assert_eq!(
            "pkcs7-pem".parse::<CertificateFormat>().unwrap(),
            CertificateFormat::Pkcs7Pem
        );
        assert_eq!(
            "PKCS8_DER".parse::<PrivateKeyFormat>().unwrap(),
            PrivateKeyFormat::Pkcs8Der
        );
        assert_eq!(
            "DER".parse::<CertificateCollectionFormat>().unwrap_err(),
            ValidationError::UnsupportedFormat {
                kind: "Certificate chain",
                value: "DER".to_string()
            }
        );
    }

    #[test]
    fn test_private_key_formats_decrypt() {
        for suite in [SignatureSuite::Rsa2048, SignatureSuite::Secp256r1] {
            let key = generate_new_key(suite).unwrap();

            let pkcs1 = encode_private_key(&key, PrivateKeyFormat::Pkcs1Pem, PASSWORD).unwrap();
            let decoded = PKey::private_key_from_pem_passphrase(&pkcs1, PASSWORD.as_bytes()).unwrap();
            assert!(decoded.public_eq(&key));

            let pkcs8 = encode_private_key(&key, PrivateKeyFormat::Pkcs8Pem, PASSWORD).unwrap();
            assert!(String::from_utf8_lossy(&pkcs8).contains("ENCRYPTED PRIVATE KEY"));
            let decoded = PKey::private_key_from_pem_passphrase(&pkcs8, PASSWORD.as_bytes()).unwrap();
            assert!(decoded.public_eq(&key));

            let der = encode_private_key(&key, PrivateKeyFormat::Pkcs8Der, PASSWORD).unwrap();
            let decoded = PKey::private_key_from_pkcs8_passphrase(&der, PASSWORD.as_bytes()).unwrap();
            assert!(decoded.public_eq(&key));

            let p12 = encode_private_key(&key, PrivateKeyFormat::Pkcs12, PASSWORD).unwrap();
            let parsed = Pkcs12::from_der(&p12).unwrap().parse2(PASSWORD).unwrap();
            assert!(parsed.pkey.unwrap().public_eq(&key));
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let key = generate_new_key(SignatureSuite::Secp256r1).unwrap();
        let pkcs8 = encode_private_key(&key, PrivateKeyFormat::Pkcs8Pem, PASSWORD).unwrap();
        assert!(PKey::private_key_from_pem_passphrase(&pkcs8, b"not-the-password").is_err());
    }

    #[test]
    fn test_public_key_der() {
        let key = generate_new_key(SignatureSuite::Secp256r1).unwrap();
        let pem = key.public_key_to_pem().unwrap();
        let der = encode_public_key(&pem, PublicKeyFormat::Der).unwrap();
        let decoded = PKey::public_key_from_der(&der).unwrap();
        assert!(decoded.public_eq(&key));
    }
}
