//! Codesigning identities in a macOS keychain
//!
//! Identities are listed with `security find-identity` and their certificates
//! fetched with `security find-certificate`. Key material is exported once per
//! run into a scoped temporary directory and cut into one PKCS#12 per identity.

mod bundle;
mod listing;

use super::security;
use crate::error::{CollectorError, Result};
use crate::identity::{Identity, IdentityHandle, KeyBundle};
use crate::log::RunLog;
use crate::prompts::banner;
use crate::source::{IdentitySource, KeyExporter};
use listing::{checked_stdout, parse_find_certificate, parse_find_identity};
use rand::distr::{Alphanumeric, SampleString};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

/// Every identity of the keychain as one password protected PKCS#12
struct ExportedIdentities {
    der: Zeroizing<Vec<u8>>,
    password: Zeroizing<String>,
}

pub struct Keychain {
    name: String,
    exported: OnceCell<ExportedIdentities>,
}

impl Keychain {
    /// Keychain by name (`login.keychain-db`) or path
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exported: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prompt for the keychain password on the terminal if it is locked
    async fn unlock(&self, log: &RunLog) -> Result<()> {
        let info = security()?
            .args(["show-keychain-info", &self.name])
            .output()
            .await
            .map_err(|e| CollectorError::CommandExecution(format!("Failed to query keychain: {e}")))?;

        if info.status.success() {
            log.debug(format!("Keychain {} is unlocked", self.name));
            return Ok(());
        }

        log.info(format!("Keychain {} is locked", self.name));
        banner(&format!("Please enter the password to unlock {}", self.name));

        let status = security()?
            .args(["unlock-keychain", &self.name])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| CollectorError::CommandExecution(format!("Failed to unlock keychain: {e}")))?;

        if !status.success() {
            log.error(format!("Failed to unlock {}", self.name));
            return Err(CollectorError::AccessDenied(format!(
                "{} could not be unlocked",
                self.name
            )));
        }

        Ok(())
    }

    async fn export_all(&self, log: &RunLog) -> Result<ExportedIdentities> {
        log.info(format!("Exporting codesigning identities from {}", self.name));

        // Directory is created 0700 and removed on every return path
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("identities.p12");
        let password = Zeroizing::new(Alphanumeric.sample_string(&mut rand::rng(), 32));

        let output = security()?
            .args(["export", "-k", &self.name, "-t", "identities", "-f", "pkcs12"])
            .args(["-P", password.as_str()])
            .arg("-o")
            .arg(&path)
            .output()
            .await
            .map_err(|e| {
                CollectorError::CommandExecution(format!("Failed to execute security export: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log.error(format!("security export failed: {}", stderr.trim()));
            if stderr.to_lowercase().contains("cancel") {
                return Err(CollectorError::AccessDenied(
                    "Keychain export was cancelled".to_string(),
                ));
            }
            return Err(CollectorError::CommandExecution(format!(
                "security export failed: {}",
                stderr.trim()
            )));
        }

        let der = Zeroizing::new(tokio::fs::read(&path).await?);
        drop(temp_dir);

        Ok(ExportedIdentities { der, password })
    }
}

impl IdentitySource for Keychain {
    async fn identities(&self, log: &RunLog) -> Result<Vec<Identity>> {
        log.info("Collecting codesigning identities");
        self.unlock(log).await?;

        let output = security()?
            .args(["find-identity", "-v", "-p", "codesigning", &self.name])
            .output()
            .await
            .map_err(|e| CollectorError::CommandExecution(format!("Failed to list identities: {e}")))?;
        let listed = parse_find_identity(&checked_stdout("find-identity", &output)?);
        log.info(format!(
            "Found {} codesigning identities in {}",
            listed.len(),
            self.name
        ));
        if listed.is_empty() {
            return Err(CollectorError::NotFound(format!(
                "codesigning identities in {}",
                self.name
            )));
        }

        let output = security()?
            .args(["find-certificate", "-a", "-Z", "-p", &self.name])
            .output()
            .await
            .map_err(|e| {
                CollectorError::CommandExecution(format!("Failed to list certificates: {e}"))
            })?;
        let certificates = parse_find_certificate(&checked_stdout("find-certificate", &output)?);

        let mut identities = Vec::with_capacity(listed.len());
        for entry in listed {
            let Some(pem) = certificates.get(&entry.sha1) else {
                log.warn(format!("No certificate found for '{}' ({})", entry.name, entry.sha1));
                continue;
            };

            let handle = IdentityHandle {
                fingerprint: entry.sha1,
                keychain: self.name.clone(),
            };
            match Identity::from_certificate_pem(handle, pem.as_bytes()) {
                Ok(identity) => {
                    log.debug(format!("Processing certificate with subject {identity}"));
                    identities.push(identity);
                }
                Err(e) => log.warn(format!("Skipping '{}': {e}", entry.name)),
            }
        }

        if identities.is_empty() {
            return Err(CollectorError::NotFound(format!(
                "readable codesigning certificates in {}",
                self.name
            )));
        }

        Ok(identities)
    }
}

impl KeyExporter for Keychain {
    async fn export_key_bundle(&self, identity: &Identity, log: &RunLog) -> Result<KeyBundle> {
        let exported = self
            .exported
            .get_or_try_init(|| self.export_all(log))
            .await?;

        bundle::single_identity(&exported.der, &exported.password, identity)
    }
}
