//! Certificate and profile fixtures for unit tests

use crate::identity::IdentityHandle;
use plist::{Dictionary, Value};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use std::time::{Duration, UNIX_EPOCH};

pub fn handle(fingerprint: &str) -> IdentityHandle {
    IdentityHandle {
        fingerprint: fingerprint.to_string(),
        keychain: "test.keychain-db".to_string(),
    }
}

/// Self-signed certificate and its PKCS#8 private key
pub struct TestCertificate {
    pub der: Vec<u8>,
    pub key_der: Vec<u8>,
}

pub struct TestCertificateBuilder {
    serial: u64,
    common_name: String,
    not_before: (i32, u8, u8),
    not_after: (i32, u8, u8),
}

impl TestCertificate {
    pub fn builder(serial: u64) -> TestCertificateBuilder {
        TestCertificateBuilder {
            serial,
            common_name: "iPhone Developer: Jane Doe (ABCDE12345)".to_string(),
            not_before: (2020, 1, 1),
            not_after: (2099, 1, 1),
        }
    }
}

impl TestCertificateBuilder {
    pub fn common_name(mut self, common_name: &str) -> Self {
        self.common_name = common_name.to_string();
        self
    }

    pub fn expired(mut self) -> Self {
        self.not_before = (2015, 1, 1);
        self.not_after = (2016, 1, 1);
        self
    }

    pub fn build(self) -> TestCertificate {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name);
        dn.push(DnType::OrganizationalUnitName, "TEAM123456");
        dn.push(DnType::OrganizationName, "Acme Inc");
        dn.push(DnType::CountryName, "US");
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(self.serial));
        let (y, m, d) = self.not_before;
        params.not_before = rcgen::date_time_ymd(y, m, d);
        let (y, m, d) = self.not_after;
        params.not_after = rcgen::date_time_ymd(y, m, d);

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        TestCertificate {
            der: cert.der().to_vec(),
            key_der: key.serialize_der(),
        }
    }
}

/// 2024-01-02 03:04:05 UTC
pub const CREATED_AT: u64 = 1_704_164_645;

/// 2025-01-02 03:04:05 UTC
pub const EXPIRES_AT: u64 = 1_735_787_045;

fn date(unix_secs: u64) -> plist::Date {
    plist::Date::from(UNIX_EPOCH + Duration::from_secs(unix_secs))
}

/// XML plist of a provisioning profile embedding `certificates`
pub fn profile_plist(name: &str, uuid: &str, certificates: &[&[u8]]) -> Vec<u8> {
    let mut entitlements = Dictionary::new();
    entitlements.insert(
        "application-identifier".to_string(),
        Value::String("TEAM123456.com.acme.*".to_string()),
    );
    entitlements.insert("beta-reports-active".to_string(), Value::Boolean(true));
    entitlements.insert("get-task-allow".to_string(), Value::Boolean(false));

    let mut dict = Dictionary::new();
    dict.insert("Name".to_string(), Value::String(name.to_string()));
    dict.insert("UUID".to_string(), Value::String(uuid.to_string()));
    dict.insert(
        "TeamIdentifier".to_string(),
        Value::Array(vec![Value::String("TEAM123456".to_string())]),
    );
    dict.insert("TeamName".to_string(), Value::String("Acme Inc".to_string()));
    dict.insert(
        "CreationDate".to_string(),
        Value::Date(date(CREATED_AT)),
    );
    dict.insert(
        "ExpirationDate".to_string(),
        Value::Date(date(EXPIRES_AT)),
    );
    dict.insert("Entitlements".to_string(), Value::Dictionary(entitlements));
    dict.insert(
        "DeveloperCertificates".to_string(),
        Value::Array(certificates.iter().map(|der| Value::Data(der.to_vec())).collect()),
    );
    dict.insert(
        "ProvisionedDevices".to_string(),
        Value::Array(vec![Value::String("00008030-000A1B2C3D4E5F60".to_string())]),
    );

    let mut xml = Vec::new();
    plist::to_writer_xml(&mut xml, &Value::Dictionary(dict)).unwrap();
    xml
}

/// Wrap a plist in bytes that stand in for the CMS signature envelope
pub fn mobileprovision(xml: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x30, 0x80, 0x06, 0x09, 0x2a, 0x86, 0x48];
    bytes.extend_from_slice(xml);
    bytes.extend_from_slice(&[0xa0, 0x82, 0x03, 0x00, 0x00]);
    bytes
}
