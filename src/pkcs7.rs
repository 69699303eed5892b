//! Certificates-only PKCS#7 (degenerate SignedData) encoding
//!
//! OpenSSL can parse such bundles but the Rust bindings offer no way to build
//! one without a signer, so the DER is assembled here. PEM armor is left to
//! `openssl::pkcs7`.

use openssl::pkcs7::Pkcs7;
use openssl::x509::X509;

use crate::errors::ClientResult;

/// 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];
/// 1.2.840.113549.1.7.1
const OID_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];

const TAG_INTEGER: u8 = 0x02;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_0: u8 = 0xa0;

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    let mut encoded = Vec::with_capacity(bytes.len() + 1);
    encoded.push(0x80 | bytes.len() as u8);
    encoded.extend_from_slice(&bytes);
    encoded
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut encoded = vec![tag];
    encoded.extend_from_slice(&der_length(content.len()));
    encoded.extend_from_slice(content);
    encoded
}

/// DER encoding of a SignedData with no signers carrying `certificates`
pub fn certs_only_der(certificates: &[X509]) -> ClientResult<Vec<u8>> {
    let mut certs = Vec::new();
    for certificate in certificates {
        certs.extend_from_slice(&certificate.to_der()?);
    }

    let mut signed_data = tlv(TAG_INTEGER, &[0x01]);
    signed_data.extend_from_slice(&tlv(TAG_SET, &[]));
    signed_data.extend_from_slice(&tlv(TAG_SEQUENCE, OID_DATA));
    signed_data.extend_from_slice(&tlv(TAG_CONTEXT_0, &certs));
    signed_data.extend_from_slice(&tlv(TAG_SET, &[]));
    let signed_data = tlv(TAG_SEQUENCE, &signed_data);

    let mut content_info = OID_SIGNED_DATA.to_vec();
    content_info.extend_from_slice(&tlv(TAG_CONTEXT_0, &signed_data));
    Ok(tlv(TAG_SEQUENCE, &content_info))
}

pub fn certs_only_pem(certificates: &[X509]) -> ClientResult<Vec<u8>> {
    Ok(Pkcs7::from_der(&certs_only_der(certificates)?)?.to_pem()?)
}
