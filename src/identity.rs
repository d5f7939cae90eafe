//! Codesigning identities: a keychain certificate plus its private key
//!
//! Derived facts (serial, subject fields, validity, role) are computed once
//! when the identity is built from its certificate and never change afterwards.
//! Two identities are equal when their serials are equal.

use crate::error::{CollectorError, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use x509_certificate::X509Certificate;
use x509_certificate::rfc3280::AttributeTypeAndValue;
use zeroize::Zeroizing;

/// Common name marker of iOS development certificates
pub const IPHONE_DEVELOPER: &str = "iPhone Developer";

/// Common name marker of iOS distribution certificates
pub const IPHONE_DISTRIBUTION: &str = "iPhone Distribution";

/// Certificate serial number
///
/// Stored as the big-endian magnitude without leading zero bytes, so the
/// DER sign padding of the encoded integer does not affect equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(Vec<u8>);

impl Serial {
    #[must_use]
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    /// Serial of a parsed certificate
    pub fn of(cert: &X509Certificate) -> Self {
        Self::from_be_bytes(cert.serial_number_asn1().as_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<u64> for Serial {
    fn from(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }
}

/// Decimal rendering, matching how certificate tools print serials
impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }

        // Repeated long division of the big-endian magnitude by 10
        let mut digits = Vec::new();
        let mut number = self.0.clone();
        while !number.is_empty() {
            let mut remainder = 0u32;
            let mut quotient = Vec::with_capacity(number.len());
            for &byte in &number {
                let acc = (remainder << 8) | u32::from(byte);
                let q = acc / 10;
                remainder = acc % 10;
                if !(quotient.is_empty() && q == 0) {
                    quotient.push(q as u8);
                }
            }
            digits.push(char::from(b'0' + remainder as u8));
            number = quotient;
        }

        let rendered: String = digits.iter().rev().collect();
        f.write_str(&rendered)
    }
}

impl Serialize for Serial {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Codesigning role recognised from a certificate's common name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningRole {
    Developer,
    Distribution,
}

impl SigningRole {
    /// Substring test against the two iOS role names
    pub fn classify(common_name: &str) -> Option<Self> {
        if common_name.contains(IPHONE_DEVELOPER) {
            Some(Self::Developer)
        } else if common_name.contains(IPHONE_DISTRIBUTION) {
            Some(Self::Distribution)
        } else {
            None
        }
    }
}

/// Subject fields of a codesigning certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    /// Full distinguished name, e.g. `CN=iPhone Developer: Jane Doe (ABCDE12345), OU=TEAM123456, O=Acme Inc, C=US`
    pub distinguished_name: String,
    pub common_name: String,
    /// Organizational unit
    pub team_id: Option<String>,
    /// Organization
    pub team_name: Option<String>,
}

impl Subject {
    pub fn from_certificate(cert: &X509Certificate) -> Self {
        let name = cert.subject_name();

        Self {
            distinguished_name: name.user_friendly_str().unwrap_or_default(),
            common_name: first_value(name.iter_common_name()).unwrap_or_default(),
            team_id: first_value(name.iter_organizational_unit()),
            team_name: first_value(name.iter_organization()),
        }
    }

    /// Distinguished name, or the common name when the former is unavailable
    pub fn label(&self) -> &str {
        if self.distinguished_name.is_empty() {
            &self.common_name
        } else {
            &self.distinguished_name
        }
    }
}

fn first_value<'a>(mut values: impl Iterator<Item = &'a AttributeTypeAndValue>) -> Option<String> {
    values.find_map(|atav| atav.to_string().ok())
}

/// Certificate validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Validity {
    /// `not_before <= at < not_after`
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at < self.not_after
    }
}

/// Where an identity lives in the secure store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityHandle {
    /// Uppercase hex SHA-1 of the certificate
    pub fingerprint: String,
    pub keychain: String,
}

#[derive(Debug, Clone)]
pub struct Identity {
    handle: IdentityHandle,
    serial: Serial,
    subject: Subject,
    validity: Validity,
    role: Option<SigningRole>,
}

impl Identity {
    pub fn new(handle: IdentityHandle, serial: Serial, subject: Subject, validity: Validity) -> Self {
        let role = SigningRole::classify(&subject.common_name);
        Self {
            handle,
            serial,
            subject,
            validity,
            role,
        }
    }

    pub fn from_certificate_der(handle: IdentityHandle, der: &[u8]) -> Result<Self> {
        let cert = X509Certificate::from_der(der).map_err(|e| {
            CollectorError::Certificate(format!("{}: {e}", handle.fingerprint))
        })?;
        Ok(Self::from_certificate(handle, &cert))
    }

    pub fn from_certificate_pem(handle: IdentityHandle, pem: &[u8]) -> Result<Self> {
        let cert = X509Certificate::from_pem(pem).map_err(|e| {
            CollectorError::Certificate(format!("{}: {e}", handle.fingerprint))
        })?;
        Ok(Self::from_certificate(handle, &cert))
    }

    fn from_certificate(handle: IdentityHandle, cert: &X509Certificate) -> Self {
        let validity = Validity {
            not_before: cert.validity_not_before(),
            not_after: cert.validity_not_after(),
        };
        Self::new(handle, Serial::of(cert), Subject::from_certificate(cert), validity)
    }

    pub fn handle(&self) -> &IdentityHandle {
        &self.handle
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn role(&self) -> Option<SigningRole> {
        self.role
    }

    /// Developer or distribution certificate for iOS
    pub fn is_platform_suitable(&self) -> bool {
        self.role.is_some()
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.validity.contains(at)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject.label())
    }
}

/// Exported certificate and private key (PKCS#12 DER), wiped on drop.
#[derive(Clone)]
pub struct KeyBundle(Zeroizing<Vec<u8>>);

impl KeyBundle {
    pub fn new(der: Vec<u8>) -> Self {
        Self(Zeroizing::new(der))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64, no line wrapping
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.as_bytes())
    }

    /// Short SHA-256 digest, safe to write to the diagnostic log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyBundle({} bytes, sha256:{})", self.0.len(), self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestCertificate, handle};
    use chrono::{Duration, TimeZone};

    fn subject(common_name: &str) -> Subject {
        Subject {
            distinguished_name: String::new(),
            common_name: common_name.to_string(),
            team_id: Some("TEAM123456".to_string()),
            team_name: Some("Acme Inc".to_string()),
        }
    }

    fn validity() -> Validity {
        Validity {
            not_before: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_serial_decimal_rendering() {
        assert_eq!(Serial::from(0u64).to_string(), "0");
        assert_eq!(Serial::from(161u64).to_string(), "161");
        assert_eq!(Serial::from(u64::MAX).to_string(), "18446744073709551615");
        // 2^64, wider than any primitive conversion
        assert_eq!(
            Serial::from_be_bytes(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0]).to_string(),
            "18446744073709551616"
        );
    }

    #[test]
    fn test_serial_ignores_sign_padding() {
        assert_eq!(Serial::from_be_bytes(&[0x00, 0x80, 0x01]), Serial::from_be_bytes(&[0x80, 0x01]));
        assert_eq!(serde_json::to_string(&Serial::from(42u64)).unwrap(), "\"42\"");
    }

    #[test]
    fn test_role_classification() {
        assert_eq!(
            SigningRole::classify("iPhone Developer: Jane Doe (ABCDE12345)"),
            Some(SigningRole::Developer)
        );
        assert_eq!(
            SigningRole::classify("iPhone Distribution: Acme Inc (TEAM123456)"),
            Some(SigningRole::Distribution)
        );
        assert_eq!(SigningRole::classify("Developer ID Application: Acme Inc"), None);
        assert_eq!(SigningRole::classify("iphone developer: lowercase"), None);
    }

    #[test]
    fn test_validity_is_half_open() {
        let v = validity();
        assert!(v.contains(v.not_before));
        assert!(v.contains(v.not_after - Duration::seconds(1)));
        assert!(!v.contains(v.not_after));
        assert!(!v.contains(v.not_before - Duration::seconds(1)));
    }

    #[test]
    fn test_identity_equality_is_by_serial() {
        let a = Identity::new(handle("AA"), Serial::from(7u64), subject("iPhone Developer: A"), validity());
        let b = Identity::new(handle("BB"), Serial::from(7u64), subject("Something else"), validity());
        let c = Identity::new(handle("AA"), Serial::from(8u64), subject("iPhone Developer: A"), validity());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: std::collections::HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_identity_from_certificate() {
        let cert = TestCertificate::builder(0x00A1)
            .common_name("iPhone Distribution: Acme Inc (TEAM123456)")
            .build();

        let identity = Identity::from_certificate_der(handle("A1"), &cert.der).unwrap();
        assert_eq!(identity.serial(), &Serial::from(0xA1u64));
        assert_eq!(
            identity.subject().common_name,
            "iPhone Distribution: Acme Inc (TEAM123456)"
        );
        assert_eq!(identity.subject().team_id.as_deref(), Some("TEAM123456"));
        assert_eq!(identity.subject().team_name.as_deref(), Some("Acme Inc"));
        assert_eq!(identity.role(), Some(SigningRole::Distribution));
        assert!(identity.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_identity_from_garbage_fails() {
        let result = Identity::from_certificate_der(handle("00"), b"not a certificate");
        assert!(matches!(result, Err(CollectorError::Certificate(_))));
    }

    #[test]
    fn test_key_bundle_encoding() {
        let bundle = KeyBundle::new(vec![0xFB, 0xFF, 0x00]);
        assert_eq!(bundle.to_base64(), "+/8A");
        assert_eq!(bundle.fingerprint().len(), 16);
        assert!(!format!("{bundle:?}").contains("+/8A"));
    }
}
