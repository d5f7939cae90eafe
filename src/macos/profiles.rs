//! Provisioning profile discovery and container decoding

use super::security;
use crate::error::{CollectorError, Result};
use crate::log::RunLog;
use crate::source::{ProfileDecoder, ProfileSource};
use std::path::{Path, PathBuf};

const PROFILE_EXTENSION: &str = "mobileprovision";

/// Every `*.mobileprovision` file below a root directory
#[derive(Debug, Clone)]
pub struct ProfileDirectory {
    root: PathBuf,
}

impl ProfileDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProfileSource for ProfileDirectory {
    async fn profile_paths(&self, log: &RunLog) -> Result<Vec<PathBuf>> {
        log.info(format!(
            "Searching for provisioning profiles in {}",
            self.root.display()
        ));

        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == self.root => break,
                Err(e) => {
                    log.error(format!("Failed to find provisioning profiles: {e}"));
                    return Err(e.into());
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION) {
                    found.push(path);
                }
            }
        }

        if found.is_empty() {
            log.error("No provisioning profiles could be found on this machine. Aborting");
            return Err(CollectorError::NotFound(format!(
                "provisioning profiles in {}",
                self.root.display()
            )));
        }

        found.sort();
        log.info(format!("Found {} provisioning profiles", found.len()));
        Ok(found)
    }
}

/// Verifies and decodes the CMS container with `security cms -D -i`
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityCmsDecoder;

impl ProfileDecoder for SecurityCmsDecoder {
    async fn decode(&self, path: &Path) -> Result<Vec<u8>> {
        let output = security()?
            .args(["cms", "-D", "-i"])
            .arg(path)
            .output()
            .await
            .map_err(|e| CollectorError::decode(path, format!("Failed to execute security cms: {e}")))?;

        if !output.status.success() {
            return Err(CollectorError::decode(
                path,
                format!(
                    "security cms failed with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        if output.stdout.is_empty() {
            return Err(CollectorError::decode(path, "security cms produced no output"));
        }

        Ok(output.stdout)
    }
}

/// Reads the XML plist straight out of the container, skipping signature checks
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedPlistDecoder;

impl EmbeddedPlistDecoder {
    /// The `<?xml` ... `</plist>` span of a signed container
    #[must_use]
    pub fn extract(container: &[u8]) -> Option<&[u8]> {
        const START: &[u8] = b"<?xml";
        const END: &[u8] = b"</plist>";

        let start = container.windows(START.len()).position(|w| w == START)?;
        let end = container[start..]
            .windows(END.len())
            .rposition(|w| w == END)
            .map(|p| start + p + END.len())?;

        Some(&container[start..end])
    }
}

impl ProfileDecoder for EmbeddedPlistDecoder {
    async fn decode(&self, path: &Path) -> Result<Vec<u8>> {
        let container = tokio::fs::read(path)
            .await
            .map_err(|e| CollectorError::decode(path, e))?;

        Self::extract(&container)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CollectorError::decode(path, "no XML plist in container"))
    }
}
