//! Key generation and certificate signing requests
//!
//! Every domain fixes one signature suite at onboarding time; all keys the
//! client creates for that domain follow it.
//!
//! | Suite      | Key                     | CSR digest |
//! |------------|-------------------------|------------|
//! | RSA2048    | RSA 2048, e = 65537     | SHA-256    |
//! | RSA3072    | RSA 3072, e = 65537     | SHA-256    |
//! | RSA4096    | RSA 4096, e = 65537     | SHA-256    |
//! | SECP256R1  | EC P-256                | SHA-256    |
//! | SECP384R1  | EC P-384                | SHA-384    |

use crate::errors::{ClientResult, ValidationError};
use crate::schema::SignatureSuite;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Name, X509Req};
use tracing::debug;

const RSA_PUBLIC_EXPONENT: u32 = 65537;
const X509_REQ_VERSION_1: i32 = 0;

/// Common name placed in the onboarding CSR; the Trustpoint sets the real subject
pub const LDEVID_CSR_COMMON_NAME: &str = "Trustpoint LDevID";

pub fn generate_new_key(signature_suite: SignatureSuite) -> ClientResult<PKey<Private>> {
    debug!("Generating {} key", signature_suite);
    let key = match signature_suite {
        SignatureSuite::Rsa2048 => generate_rsa(2048)?,
        SignatureSuite::Rsa3072 => generate_rsa(3072)?,
        SignatureSuite::Rsa4096 => generate_rsa(4096)?,
        SignatureSuite::Secp256r1 => generate_ec(Nid::X9_62_PRIME256V1)?,
        SignatureSuite::Secp384r1 => generate_ec(Nid::SECP384R1)?,
    };
    Ok(key)
}

fn generate_rsa(bits: u32) -> ClientResult<PKey<Private>> {
    let exponent = BigNum::from_u32(RSA_PUBLIC_EXPONENT)?;
    let rsa = Rsa::generate_with_e(bits, &exponent)?;
    Ok(PKey::from_rsa(rsa)?)
}

fn generate_ec(curve: Nid) -> ClientResult<PKey<Private>> {
    let group = EcGroup::from_curve_name(curve)?;
    let ec = EcKey::generate(&group)?;
    Ok(PKey::from_ec_key(ec)?)
}

pub fn message_digest(signature_suite: SignatureSuite) -> MessageDigest {
    match signature_suite {
        SignatureSuite::Secp384r1 => MessageDigest::sha384(),
        _ => MessageDigest::sha256(),
    }
}

/// Infer the signature suite from a key's algorithm and size
pub fn signature_suite_from_key<T: HasPublic>(key: &PKeyRef<T>) -> ClientResult<SignatureSuite> {
    let unsupported = |detail: String| ValidationError::UnsupportedSignatureSuite { value: detail };
    let suite = match key.id() {
        Id::RSA => match key.bits() {
            2048 => SignatureSuite::Rsa2048,
            3072 => SignatureSuite::Rsa3072,
            4096 => SignatureSuite::Rsa4096,
            bits => return Err(unsupported(format!("RSA-{bits}")).into()),
        },
        Id::EC => {
            let ec = key.ec_key()?;
            match ec.group().curve_name() {
                Some(Nid::X9_62_PRIME256V1) => SignatureSuite::Secp256r1,
                Some(Nid::SECP384R1) => SignatureSuite::Secp384r1,
                other => return Err(unsupported(format!("EC curve {other:?}")).into()),
            }
        }
        other => return Err(unsupported(format!("{other:?}")).into()),
    };
    Ok(suite)
}

/// Build the PEM CSR sent to the onboarding endpoint
pub fn build_ldevid_csr(
    key: &PKeyRef<Private>,
    signature_suite: SignatureSuite,
) -> ClientResult<Vec<u8>> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, LDEVID_CSR_COMMON_NAME)?;
    let name = name.build();

    let mut builder = X509Req::builder()?;
    builder.set_version(X509_REQ_VERSION_1)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;
    builder.sign(key, message_digest(signature_suite))?;
    Ok(builder.build().to_pem()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ec_keys_match_suite() {
        for suite in [SignatureSuite::Secp256r1, SignatureSuite::Secp384r1] {
            let key = generate_new_key(suite).unwrap();
            assert_eq!(signature_suite_from_key(&key).unwrap(), suite);
        }
    }

    #[test]
    fn test_generated_rsa_key_uses_f4() {
        let key = generate_new_key(SignatureSuite::Rsa2048).unwrap();
        let rsa = key.rsa().unwrap();
        assert_eq!(rsa.e().to_dec_str().unwrap().to_string(), "65537");
        assert_eq!(
            signature_suite_from_key(&key).unwrap(),
            SignatureSuite::Rsa2048
        );
    }

    #[test]
    fn test_unsupported_rsa_size() {
        let key = PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap();
        assert!(signature_suite_from_key(&key).is_err());
    }

    #[test]
    fn test_csr_is_signed_and_named() {
        let key = generate_new_key(SignatureSuite::Secp384r1).unwrap();
        let pem = build_ldevid_csr(&key, SignatureSuite::Secp384r1).unwrap();
        let req = X509Req::from_pem(&pem).unwrap();
        assert!(req.verify(&key).unwrap());
        let cn = req
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, LDEVID_CSR_COMMON_NAME);
    }
}
