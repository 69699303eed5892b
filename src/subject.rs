//! Subject attribute handling for certificate requests
//!
//! Attribute types given as `type:value` are resolved either by a well-known
//! name (case-insensitive, long or short form) or accepted verbatim when they
//! already are a dotted-numeric OID.

use crate::errors::ValidationError;
use openssl::nid::Nid;

/// A well-known X.520 / PKCS#9 name attribute
#[derive(Debug, Clone, Copy)]
pub struct NameOid {
    pub name: &'static str,
    pub short_name: Option<&'static str>,
    pub dotted_string: &'static str,
    pub nid: Nid,
}

pub const NAME_OIDS: &[NameOid] = &[
    NameOid { name: "commonName", short_name: Some("CN"), dotted_string: "2.5.4.3", nid: Nid::COMMONNAME },
    NameOid { name: "surname", short_name: Some("SN"), dotted_string: "2.5.4.4", nid: Nid::SURNAME },
    NameOid { name: "serialNumber", short_name: None, dotted_string: "2.5.4.5", nid: Nid::SERIALNUMBER },
    NameOid { name: "countryName", short_name: Some("C"), dotted_string: "2.5.4.6", nid: Nid::COUNTRYNAME },
    NameOid { name: "localityName", short_name: Some("L"), dotted_string: "2.5.4.7", nid: Nid::LOCALITYNAME },
    NameOid { name: "stateOrProvinceName", short_name: Some("ST"), dotted_string: "2.5.4.8", nid: Nid::STATEORPROVINCENAME },
    NameOid { name: "streetAddress", short_name: Some("STREET"), dotted_string: "2.5.4.9", nid: Nid::STREETADDRESS },
    NameOid { name: "organizationName", short_name: Some("O"), dotted_string: "2.5.4.10", nid: Nid::ORGANIZATIONNAME },
    NameOid { name: "organizationalUnitName", short_name: Some("OU"), dotted_string: "2.5.4.11", nid: Nid::ORGANIZATIONALUNITNAME },
    NameOid { name: "title", short_name: None, dotted_string: "2.5.4.12", nid: Nid::TITLE },
    NameOid { name: "givenName", short_name: Some("GN"), dotted_string: "2.5.4.42", nid: Nid::GIVENNAME },
    NameOid { name: "initials", short_name: None, dotted_string: "2.5.4.43", nid: Nid::INITIALS },
    NameOid { name: "generationQualifier", short_name: None, dotted_string: "2.5.4.44", nid: Nid::GENERATIONQUALIFIER },
    NameOid { name: "dnQualifier", short_name: None, dotted_string: "2.5.4.46", nid: Nid::DNQUALIFIER },
    NameOid { name: "pseudonym", short_name: None, dotted_string: "2.5.4.65", nid: Nid::PSEUDONYM },
    NameOid { name: "domainComponent", short_name: Some("DC"), dotted_string: "0.9.2342.19200300.100.1.25", nid: Nid::DOMAINCOMPONENT },
    NameOid { name: "userId", short_name: Some("UID"), dotted_string: "0.9.2342.19200300.100.1.1", nid: Nid::USERID },
    NameOid { name: "emailAddress", short_name: None, dotted_string: "1.2.840.113549.1.9.1", nid: Nid::PKCS9_EMAILADDRESS },
];

/// Attribute types RFC 4514 renders by short name, everything else is dotted
const RFC4514_SHORT_NAMES: &[&str] = &["CN", "L", "ST", "O", "OU", "C", "STREET", "DC", "UID"];

impl NameOid {
    pub fn get_by_name(name: &str) -> Option<&'static NameOid> {
        NAME_OIDS.iter().find(|oid| {
            oid.name.eq_ignore_ascii_case(name)
                || oid
                    .short_name
                    .is_some_and(|short| short.eq_ignore_ascii_case(name))
        })
    }

    pub fn get_by_nid(nid: Nid) -> Option<&'static NameOid> {
        NAME_OIDS.iter().find(|oid| oid.nid == nid)
    }

    /// Attribute type label as RFC 4514 prints it
    pub fn rfc4514_label(&self) -> &'static str {
        match self.short_name {
            Some(short) if RFC4514_SHORT_NAMES.contains(&short) => short,
            _ => self.dotted_string,
        }
    }
}

/// Match `^([0-2])((\.0)|(\.[1-9][0-9]*))*$`
pub fn is_dotted_oid(value: &str) -> bool {
    let mut arcs = value.split('.');
    let first_valid = arcs
        .next()
        .is_some_and(|first| matches!(first, "0" | "1" | "2"));
    first_valid
        && arcs.all(|arc| {
            !arc.is_empty()
                && arc.chars().all(|c| c.is_ascii_digit())
                && (arc == "0" || !arc.starts_with('0'))
        })
}

/// Resolve an attribute type to its dotted OID
pub fn resolve_attribute_type(attribute_type: &str) -> Result<String, ValidationError> {
    if let Some(oid) = NameOid::get_by_name(attribute_type) {
        return Ok(oid.dotted_string.to_string());
    }
    if is_dotted_oid(attribute_type) {
        return Ok(attribute_type.to_string());
    }
    Err(ValidationError::InvalidSubjectAttribute {
        attribute_type: attribute_type.to_string(),
    })
}

/// A resolved `oid=value` subject attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttribute {
    pub oid: String,
    pub value: String,
}

impl SubjectAttribute {
    /// Parse `type:value`, splitting on the first colon
    pub fn parse(entry: &str) -> Result<Self, ValidationError> {
        let (attribute_type, value) =
            entry
                .split_once(':')
                .ok_or_else(|| ValidationError::MalformedSubjectEntry {
                    entry: entry.to_string(),
                })?;
        Ok(Self {
            oid: resolve_attribute_type(attribute_type)?,
            value: value.to_string(),
        })
    }
}

/// Parse all entries; a repeated attribute type keeps its first position and last value
pub fn parse_subject_entries(entries: &[String]) -> Result<Vec<SubjectAttribute>, ValidationError> {
    let mut attributes: Vec<SubjectAttribute> = Vec::with_capacity(entries.len());
    for entry in entries {
        let attribute = SubjectAttribute::parse(entry)?;
        match attributes.iter_mut().find(|known| known.oid == attribute.oid) {
            Some(known) => known.value = attribute.value,
            None => attributes.push(attribute),
        }
    }
    Ok(attributes)
}

/// Subject in the slash-separated form `openssl cmp -subject` expects
///
/// The pseudonym identifies the credential; the device serial number is left
/// out on purpose.
pub fn generic_cert_subject(
    domain: &str,
    unique_name: &str,
    attributes: &[SubjectAttribute],
) -> String {
    let mut subject = format!(
        "/2.5.4.65={}",
        escape_slash_value(&format!("trustpoint.generic-cert.{domain}.{unique_name}"))
    );
    for attribute in attributes {
        subject.push_str(&format!(
            "/{}={}",
            attribute.oid,
            escape_slash_value(&attribute.value)
        ));
    }
    subject
}

fn escape_slash_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '/' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
