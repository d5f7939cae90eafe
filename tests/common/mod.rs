#![allow(dead_code)]

use kodegen_bundler_collect::identity::{Identity, IdentityHandle, KeyBundle};
use kodegen_bundler_collect::source::{IdentitySource, KeyExporter};
use kodegen_bundler_collect::{CollectorConfig, EndpointConfig, Result, RunLog};
use plist::{Dictionary, Value};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const UPLOAD_KEY: &str = "test-upload-key";

/// Self-signed iOS development certificate valid until 2099
pub fn certificate(serial: u64) -> Vec<u8> {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        format!("iPhone Developer: Jane Doe ({serial:X})"),
    );
    dn.push(DnType::OrganizationalUnitName, "TEAM123456");
    dn.push(DnType::OrganizationName, "Acme Inc");
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(serial));
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2099, 1, 1);

    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

/// Write a `.mobileprovision` embedding `certificates` under `dir`
pub fn write_profile(dir: &Path, name: &str, certificates: &[&[u8]]) {
    let mut entitlements = Dictionary::new();
    entitlements.insert(
        "application-identifier".to_string(),
        Value::String("TEAM123456.com.acme.app".to_string()),
    );

    let mut dict = Dictionary::new();
    dict.insert("Name".to_string(), Value::String(name.to_string()));
    dict.insert("UUID".to_string(), Value::String(format!("{name}-uuid")));
    dict.insert(
        "TeamIdentifier".to_string(),
        Value::Array(vec![Value::String("TEAM123456".to_string())]),
    );
    dict.insert("TeamName".to_string(), Value::String("Acme Inc".to_string()));
    dict.insert(
        "CreationDate".to_string(),
        Value::Date(std::time::SystemTime::UNIX_EPOCH.into()),
    );
    dict.insert(
        "ExpirationDate".to_string(),
        Value::Date(std::time::SystemTime::now().into()),
    );
    dict.insert("Entitlements".to_string(), Value::Dictionary(entitlements));
    dict.insert(
        "DeveloperCertificates".to_string(),
        Value::Array(certificates.iter().map(|der| Value::Data(der.to_vec())).collect()),
    );

    let mut container = vec![0x30, 0x80, 0x06, 0x09];
    plist::to_writer_xml(&mut container, &Value::Dictionary(dict)).unwrap();
    container.extend_from_slice(&[0xa0, 0x00]);

    std::fs::write(dir.join(format!("{name}.mobileprovision")), container).unwrap();
}

/// In-memory keychain: hands out identities and fake key bundles, counting exports
pub struct FakeKeychain {
    certificates: Vec<Vec<u8>>,
    pub exports: AtomicUsize,
}

impl FakeKeychain {
    pub fn new(certificates: Vec<Vec<u8>>) -> Self {
        Self {
            certificates,
            exports: AtomicUsize::new(0),
        }
    }
}

impl IdentitySource for FakeKeychain {
    async fn identities(&self, _log: &RunLog) -> Result<Vec<Identity>> {
        self.certificates
            .iter()
            .enumerate()
            .map(|(index, der)| {
                let handle = IdentityHandle {
                    fingerprint: format!("{index:040X}"),
                    keychain: "fake.keychain-db".to_string(),
                };
                Identity::from_certificate_der(handle, der)
            })
            .collect()
    }
}

impl KeyExporter for FakeKeychain {
    async fn export_key_bundle(&self, identity: &Identity, _log: &RunLog) -> Result<KeyBundle> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let mut der = b"p12:".to_vec();
        der.extend_from_slice(identity.serial().as_bytes());
        Ok(KeyBundle::new(der))
    }
}

pub fn fixed_config(server_uri: &str, working_dir: &Path, profiles_dir: &Path) -> CollectorConfig {
    let mut config = CollectorConfig::new(
        EndpointConfig::Fixed {
            files_url: format!("{server_uri}/files/"),
            log_url: format!("{server_uri}/logs/"),
        },
        UPLOAD_KEY,
    );
    config.working_dir = working_dir.to_path_buf();
    config.profiles_dir = Some(profiles_dir.to_path_buf());
    config.request_timeout_secs = 5;
    config
}
