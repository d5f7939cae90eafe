//! Provisioning profiles
//!
//! A profile is decoded once, when it is loaded: the signed container is turned
//! into its XML plist by a [`ProfileDecoder`], parsed into [`ProfileData`], and
//! the serials of the embedded developer certificates are extracted. A profile
//! that cannot be decoded is an error, never a partially filled profile.

use crate::error::{CollectorError, Result};
use crate::identity::Serial;
use crate::source::ProfileDecoder;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use x509_certificate::X509Certificate;

/// Structured contents of a provisioning profile.
///
/// Absent optional fields fall back to empty values; `name`, `uuid` and the
/// dates are checked when the profile is exported.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProfileData {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "UUID", default)]
    pub uuid: Option<String>,

    /// Usually a list with a single entry
    #[serde(default)]
    pub team_identifier: Option<OneOrMany>,

    #[serde(default)]
    pub team_name: Option<String>,

    #[serde(default)]
    pub creation_date: Option<plist::Date>,

    #[serde(default)]
    pub expiration_date: Option<plist::Date>,

    #[serde(default)]
    pub entitlements: Entitlements,

    /// DER certificates allowed to sign with this profile
    #[serde(default)]
    pub developer_certificates: Vec<plist::Data>,

    #[serde(default)]
    pub provisioned_devices: Vec<String>,

    #[serde(default)]
    pub provisions_all_devices: bool,
}

/// A plist value given either as a string or as an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entitlements {
    #[serde(rename = "application-identifier", default)]
    pub application_identifier: Option<String>,

    /// TestFlight distribution
    #[serde(rename = "beta-reports-active", default)]
    pub beta_reports_active: bool,
}

impl Entitlements {
    /// `TEAMID.com.acme.*` style identifiers
    pub fn is_wildcard(&self) -> bool {
        self.application_identifier
            .as_deref()
            .is_some_and(|id| id.ends_with('*'))
    }
}

impl ProfileData {
    pub fn from_plist(xml: &[u8]) -> Result<Self> {
        Ok(plist::from_bytes(xml)?)
    }

    /// First team identifier, empty when absent
    pub fn team_id(&self) -> &str {
        self.team_identifier
            .as_ref()
            .and_then(OneOrMany::first)
            .unwrap_or_default()
    }

    pub fn team_name(&self) -> &str {
        self.team_name.as_deref().unwrap_or_default()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.creation_date.map(to_utc)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiration_date.map(to_utc)
    }

    /// Serials of every embedded developer certificate
    pub fn certificate_serials(&self) -> std::result::Result<BTreeSet<Serial>, String> {
        self.developer_certificates
            .iter()
            .enumerate()
            .map(|(index, der)| {
                let der: &[u8] = der.as_ref();
                X509Certificate::from_der(der)
                    .map(|cert| Serial::of(&cert))
                    .map_err(|e| format!("DeveloperCertificates[{index}]: {e}"))
            })
            .collect()
    }
}

fn to_utc(date: plist::Date) -> DateTime<Utc> {
    DateTime::<Utc>::from(SystemTime::from(date))
}

#[derive(Debug, Clone)]
pub struct Profile {
    path: PathBuf,
    data: ProfileData,
    serials: BTreeSet<Serial>,
}

impl Profile {
    /// Decode the profile at `path`
    pub async fn load<D: ProfileDecoder>(path: &Path, decoder: &D) -> Result<Self> {
        let xml = decoder.decode(path).await?;
        Self::from_plist(path, &xml)
    }

    /// Build from an already decoded XML plist
    pub fn from_plist(path: &Path, xml: &[u8]) -> Result<Self> {
        let data = ProfileData::from_plist(xml).map_err(|e| CollectorError::decode(path, e))?;
        let serials = data
            .certificate_serials()
            .map_err(|reason| CollectorError::decode(path, reason))?;

        Ok(Self::from_parts(path.to_path_buf(), data, serials))
    }

    pub fn from_parts(path: PathBuf, data: ProfileData, serials: BTreeSet<Serial>) -> Self {
        Self {
            path,
            data,
            serials,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &ProfileData {
        &self.data
    }

    pub fn serials(&self) -> &BTreeSet<Serial> {
        &self.serials
    }

    pub fn references(&self, serial: &Serial) -> bool {
        self.serials.contains(serial)
    }

    /// Profile name, or the file name when the profile has none
    pub fn label(&self) -> String {
        match &self.data.name {
            Some(name) => name.clone(),
            None => self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Raw container bytes, read on demand
    pub async fn file_bytes(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Profile {}

impl Hash for Profile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.path.display())
    }
}
