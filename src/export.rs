//! Conversion of matched identities and profiles into upload records
//!
//! Binary material (PKCS#12 bundles, profile containers) is embedded as
//! standard base64 without line wrapping. Timestamps use
//! [`TIMESTAMP_FORMAT`] in UTC.

use crate::error::{CollectorError, Result};
use crate::identity::{Identity, KeyBundle, Serial};
use crate::log::RunLog;
use crate::profile::Profile;
use crate::source::KeyExporter;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub serial: String,
    pub subject: String,
    pub common_name: String,
    pub team_id: String,
    pub team_name: String,
    pub not_before: String,
    pub not_after: String,
    /// Base64 PKCS#12 with certificate and private key
    pub p12: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub uuid: String,
    pub serials: Vec<String>,
    pub creation_date: String,
    pub expiration_date: String,
    pub team_id: String,
    pub team_name: String,
    pub beta_reports_active: bool,
    pub devices: Vec<String>,
    pub provisions_all_devices: bool,
    pub application_identifier: String,
    pub is_wildcard: bool,
    /// Base64 of the raw `.mobileprovision` file
    pub file: String,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Exports records, asking the key exporter at most once per identity serial.
pub struct Exporter<'a, K> {
    keys: &'a K,
    log: &'a RunLog,
    bundles: HashMap<Serial, KeyBundle>,
}

impl<'a, K: KeyExporter> Exporter<'a, K> {
    pub fn new(keys: &'a K, log: &'a RunLog) -> Self {
        Self {
            keys,
            log,
            bundles: HashMap::new(),
        }
    }

    pub async fn export_identity(&mut self, identity: &Identity) -> Result<IdentityRecord> {
        let bundle = match self.bundles.get(identity.serial()) {
            Some(bundle) => bundle.clone(),
            None => {
                let bundle = self.keys.export_key_bundle(identity, self.log).await?;
                if bundle.as_bytes().is_empty() {
                    return Err(CollectorError::export(identity, "key material"));
                }
                let handle = identity.handle();
                self.log.debug(format!(
                    "Exported key material for '{identity}' from {} in {} ({} bytes, sha256:{})",
                    handle.fingerprint,
                    handle.keychain,
                    bundle.as_bytes().len(),
                    bundle.fingerprint()
                ));
                self.bundles.insert(identity.serial().clone(), bundle.clone());
                bundle
            }
        };

        let subject = identity.subject();
        let validity = identity.validity();

        Ok(IdentityRecord {
            serial: identity.serial().to_string(),
            subject: subject.label().to_string(),
            common_name: subject.common_name.clone(),
            team_id: subject.team_id.clone().unwrap_or_default(),
            team_name: subject.team_name.clone().unwrap_or_default(),
            not_before: timestamp(validity.not_before),
            not_after: timestamp(validity.not_after),
            p12: bundle.to_base64(),
        })
    }

    pub async fn export_profile(&self, profile: &Profile) -> Result<ProfileRecord> {
        let data = profile.data();
        let entity = profile.to_string();

        let name = data
            .name
            .clone()
            .ok_or_else(|| CollectorError::export(&entity, "Name"))?;
        let uuid = data
            .uuid
            .clone()
            .ok_or_else(|| CollectorError::export(&entity, "UUID"))?;
        let creation_date = data
            .created_at()
            .ok_or_else(|| CollectorError::export(&entity, "CreationDate"))?;
        let expiration_date = data
            .expires_at()
            .ok_or_else(|| CollectorError::export(&entity, "ExpirationDate"))?;

        let file = profile.file_bytes().await.map_err(|e| {
            self.log
                .error(format!("Failed to read {}: {e}", profile.path().display()));
            CollectorError::export(&entity, "file contents")
        })?;

        Ok(ProfileRecord {
            name,
            uuid,
            serials: profile.serials().iter().map(ToString::to_string).collect(),
            creation_date: timestamp(creation_date),
            expiration_date: timestamp(expiration_date),
            team_id: data.team_id().to_string(),
            team_name: data.team_name().to_string(),
            beta_reports_active: data.entitlements.beta_reports_active,
            devices: data.provisioned_devices.clone(),
            provisions_all_devices: data.provisions_all_devices,
            application_identifier: data
                .entitlements
                .application_identifier
                .clone()
                .unwrap_or_default(),
            is_wildcard: data.entitlements.is_wildcard(),
            file: base64::engine::general_purpose::STANDARD.encode(file),
        })
    }
}
