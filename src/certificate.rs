//! Certificate inspection helpers
//!
//! Reads the parts of an issued certificate the inventory records: the
//! subject as an RFC 4514 string, the validity window in UTC, and single
//! subject attributes used to recognise LDevIDs.

use crate::errors::{ClientError, ClientResult};
use crate::subject::NameOid;
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::x509::{X509, X509NameRef, X509Ref};

/// Subject and validity of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetails {
    pub subject: String,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
}

impl CertificateDetails {
    pub fn from_x509(certificate: &X509Ref) -> ClientResult<Self> {
        Ok(Self {
            subject: rfc4514_subject(certificate.subject_name())?,
            not_valid_before: asn1_time_to_utc(certificate.not_before())?,
            not_valid_after: asn1_time_to_utc(certificate.not_after())?,
        })
    }
}

pub fn load_certificate(pem: &[u8]) -> ClientResult<X509> {
    X509::from_pem(pem).map_err(|e| ClientError::Certificate(format!("not a PEM certificate: {e}")))
}

/// Parse a PEM bundle; an empty bundle yields an empty chain
pub fn load_certificate_chain(pem: &[u8]) -> ClientResult<Vec<X509>> {
    if pem.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    X509::stack_from_pem(pem)
        .map_err(|e| ClientError::Certificate(format!("not a PEM certificate chain: {e}")))
}

/// Concatenate certificates into one PEM bundle
pub fn chain_to_pem(chain: &[X509]) -> ClientResult<Vec<u8>> {
    let mut pem = Vec::new();
    for certificate in chain {
        pem.extend_from_slice(&certificate.to_pem()?);
    }
    Ok(pem)
}

pub fn asn1_time_to_utc(time: &Asn1TimeRef) -> ClientResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| ClientError::Certificate(format!("validity time {time} out of range")))
}

/// First value of a subject attribute, if present
pub fn subject_attribute(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|value| value.to_string())
}

/// Render a distinguished name as RFC 4514 (most significant RDN last)
///
/// Attributes sharing one RDN are joined with `+`.
pub fn rfc4514_subject(name: &X509NameRef) -> ClientResult<String> {
    let mut attributes = Vec::new();
    for entry in name.entries() {
        let label = match NameOid::get_by_nid(entry.object().nid()) {
            Some(oid) => oid.rfc4514_label().to_string(),
            None => entry.object().to_string(),
        };
        let value = entry.data().as_utf8()?;
        attributes.push(format!("{}={}", label, escape_rfc4514_value(&value)));
    }

    let sizes = rdn_sizes(name)?;
    if sizes.iter().sum::<usize>() != attributes.len() {
        return Err(malformed_name());
    }
    let mut attributes = attributes.into_iter();
    let mut rdns: Vec<String> = sizes
        .iter()
        .map(|&size| attributes.by_ref().take(size).collect::<Vec<_>>().join("+"))
        .collect();
    rdns.reverse();
    Ok(rdns.join(","))
}

fn malformed_name() -> ClientError {
    ClientError::Certificate("malformed distinguished name".to_string())
}

/// Split one DER TLV off the front of `input` into (content, rest)
fn der_split(input: &[u8]) -> ClientResult<(&[u8], &[u8])> {
    let (_tag, rest) = input.split_first().ok_or_else(malformed_name)?;
    let (&first, rest) = rest.split_first().ok_or_else(malformed_name)?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let octets = usize::from(first & 0x7f);
        if octets == 0 || octets > std::mem::size_of::<usize>() || rest.len() < octets {
            return Err(malformed_name());
        }
        let len = rest[..octets]
            .iter()
            .fold(0usize, |len, b| (len << 8) | usize::from(*b));
        (len, &rest[octets..])
    };
    if rest.len() < len {
        return Err(malformed_name());
    }
    Ok(rest.split_at(len))
}

/// Number of attributes in each RDN, in encoding order
fn rdn_sizes(name: &X509NameRef) -> ClientResult<Vec<usize>> {
    let der = name.to_der()?;
    let (mut rdns, _) = der_split(&der)?;
    let mut sizes = Vec::new();
    while !rdns.is_empty() {
        let (mut set, rest) = der_split(rdns)?;
        let mut size = 0;
        while !set.is_empty() {
            set = der_split(set)?.1;
            size += 1;
        }
        sizes.push(size);
        rdns = rest;
    }
    Ok(sizes)
}

fn escape_rfc4514_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '"' | '+' | ',' | ';' | '<' | '>' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    let leading = value.starts_with('#') || value.starts_with(' ');
    // a lone space is already covered by the leading escape
    let trailing = value.ends_with(' ') && !(leading && value.len() == 1);
    if leading {
        escaped.insert(0, '\\');
    }
    if trailing {
        escaped.insert(escaped.len() - 1, '\\');
    }
    escaped
}
