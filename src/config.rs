//! Configuration for a signing files collection run.

use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default keychain searched for codesigning identities
pub const DEFAULT_KEYCHAIN: &str = "login.keychain-db";

/// Payloads at or above this many bytes are gzip-compressed before upload
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1_000_000;

/// Provisioning profile location, relative to the home directory
pub const PROVISIONING_PROFILES_DIR: &str = "Library/MobileDevice/Provisioning Profiles";

/// Settings for one collection run.
///
/// Loaded from a TOML file or assembled from command line flags. Endpoints are
/// given either as a single `collection_url` (a session is opened and the files
/// and log endpoints derived from its id) or as explicit `files_url` and
/// `log_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub collection_url: Option<String>,

    #[serde(default)]
    pub files_url: Option<String>,

    #[serde(default)]
    pub log_url: Option<String>,

    /// Sent verbatim in the `Authorization` header
    #[serde(default)]
    pub upload_key: String,

    /// Directory for the diagnostic log
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_keychain")]
    pub keychain: String,

    /// Defaults to `~/Library/MobileDevice/Provisioning Profiles`
    #[serde(default)]
    pub profiles_dir: Option<PathBuf>,

    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Keep identities that are expired or not iOS signing certificates
    #[serde(default)]
    pub include_unsuitable: bool,

    #[serde(default)]
    pub decoder: DecoderKind,
}

/// How provisioning profile containers are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// `security cms -D -i <profile>`
    #[default]
    Security,
    /// Slice the XML plist out of the CMS container without verification
    Embedded,
}

impl FromStr for DecoderKind {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "security" => Ok(Self::Security),
            "embedded" => Ok(Self::Embedded),
            other => Err(CollectorError::InvalidConfig(format!(
                "Unknown profile decoder '{other}' (expected 'security' or 'embedded')"
            ))),
        }
    }
}

/// Where signing files and the diagnostic log are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointConfig {
    /// Open a collection first, then derive `{url}/{id}/files/` and `{url}/{id}/logs/`
    Session { collection_url: String },
    Fixed { files_url: String, log_url: String },
}

/// No endpoints and no upload key; `validate` rejects it until both are set
impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collection_url: None,
            files_url: None,
            log_url: None,
            upload_key: String::new(),
            working_dir: default_working_dir(),
            keychain: default_keychain(),
            profiles_dir: None,
            compression_threshold: default_compression_threshold(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            include_unsuitable: false,
            decoder: DecoderKind::default(),
        }
    }
}

impl CollectorConfig {
    /// Config with explicit endpoints and defaults for everything else
    #[must_use]
    pub fn new(endpoints: EndpointConfig, upload_key: impl Into<String>) -> Self {
        let (collection_url, files_url, log_url) = match endpoints {
            EndpointConfig::Session { collection_url } => (Some(collection_url), None, None),
            EndpointConfig::Fixed { files_url, log_url } => (None, Some(files_url), Some(log_url)),
        };

        Self {
            collection_url,
            files_url,
            log_url,
            upload_key: upload_key.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CollectorError::InvalidConfig(format!("Malformed config file: {e}")))
    }

    /// Check required fields and resolve the endpoint mode
    pub fn validate(&self) -> Result<EndpointConfig> {
        if self.upload_key.trim().is_empty() {
            return Err(CollectorError::MissingConfig("upload key".to_string()));
        }
        if self.compression_threshold == 0 {
            return Err(CollectorError::InvalidConfig(
                "compression_threshold must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(CollectorError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        let endpoints = match (&self.files_url, &self.log_url, &self.collection_url) {
            (Some(files_url), Some(log_url), _) => EndpointConfig::Fixed {
                files_url: files_url.clone(),
                log_url: log_url.clone(),
            },
            (None, None, Some(collection_url)) => EndpointConfig::Session {
                collection_url: collection_url.trim_end_matches('/').to_string(),
            },
            (Some(_), None, _) | (None, Some(_), _) => {
                return Err(CollectorError::InvalidConfig(
                    "files_url and log_url must be given together".to_string(),
                ));
            }
            (None, None, None) => {
                return Err(CollectorError::MissingConfig(
                    "collection_url, or files_url and log_url".to_string(),
                ));
            }
        };

        match &endpoints {
            EndpointConfig::Session { collection_url } => check_url("collection_url", collection_url)?,
            EndpointConfig::Fixed { files_url, log_url } => {
                check_url("files_url", files_url)?;
                check_url("log_url", log_url)?;
            }
        }

        Ok(endpoints)
    }

    /// Provisioning profile search root
    pub fn profiles_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.profiles_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(PROVISIONING_PROFILES_DIR))
            .ok_or_else(|| CollectorError::MissingConfig("HOME not set".to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn check_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| CollectorError::InvalidConfig(format!("{field} '{value}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CollectorError::InvalidConfig(format!(
            "{field} must be an http(s) URL: '{value}'"
        )));
    }
    Ok(())
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_keychain() -> String {
    DEFAULT_KEYCHAIN.to_string()
}

fn default_compression_threshold() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}
