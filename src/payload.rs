//! Assembly of the upload document

use crate::error::{CollectorError, Result};
use crate::export::{Exporter, IdentityRecord, ProfileRecord};
use crate::log::RunLog;
use crate::matcher::Matched;
use crate::prompts::banner;
use crate::source::KeyExporter;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Shown before key export. The keychain is exported in one pass, so macOS may
/// ask about identities that did not match any profile as well.
pub const KEYCHAIN_ACCESS_NOTICE: &str = "Please allow access to your keychain when prompted. \
     macOS may ask once for every codesigning identity in the keychain, not only the matched ones";

/// Everything sent for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub certificates: Vec<IdentityRecord>,
    pub provisioning_profiles: Vec<ProfileRecord>,
}

impl Document {
    /// Total number of records
    pub fn len(&self) -> usize {
        self.certificates.len() + self.provisioning_profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity subjects followed by profile names
    pub fn labels(&self) -> Vec<&str> {
        self.certificates
            .iter()
            .map(|record| record.subject.as_str())
            .chain(
                self.provisioning_profiles
                    .iter()
                    .map(|record| record.name.as_str()),
            )
            .collect()
    }
}

/// A serialized document ready for transport.
///
/// The JSON carries private keys. This buffer is wiped when dropped; the
/// request body built from it is handed to the HTTP client, which does not
/// wipe its copy.
pub struct Payload {
    document: Document,
    bytes: Zeroizing<Vec<u8>>,
}

impl Payload {
    pub fn from_document(document: Document) -> Result<Self> {
        let bytes = Zeroizing::new(serde_json::to_vec(&document)?);
        Ok(Self { document, bytes })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Serialized length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("records", &self.document.len())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Export every matched identity and profile into one payload.
///
/// Identities are exported first, behind the keychain access banner, then
/// profiles. Key material comes through `exporter`, which asks the store at
/// most once per serial.
///
/// # Arguments
/// * `matched` - Identities and profiles that survived matching
/// * `exporter` - Record exporter wrapping the key store
/// * `log` - Diagnostic log; record labels are written at debug level
///
/// # Returns
/// * `Ok(Payload)` - The serialized document and its length
/// * `Err(CollectorError::Export)` - An entity lacked a required field; there
///   are no partial payloads
/// * `Err(CollectorError::EmptyPayload)` - Nothing was left to send
pub async fn build<K: KeyExporter>(
    matched: &Matched,
    exporter: &mut Exporter<'_, K>,
    log: &RunLog,
) -> Result<Payload> {
    log.info("Preparing upload object");

    let mut document = Document::default();

    if !matched.identities.is_empty() {
        if log.is_console() {
            banner(KEYCHAIN_ACCESS_NOTICE);
        }
        for identity in &matched.identities {
            document
                .certificates
                .push(exporter.export_identity(identity).await?);
        }
        if log.is_console() {
            banner("Thank you!");
        }
    }

    for profile in &matched.profiles {
        document
            .provisioning_profiles
            .push(exporter.export_profile(profile).await?);
    }

    if document.is_empty() {
        log.error("No signing files left to upload, aborting");
        return Err(CollectorError::EmptyPayload);
    }

    log.debug("Preparing the following signing files:");
    for label in document.labels() {
        log.debug(format!("  {label}"));
    }

    let payload = Payload::from_document(document)?;
    log.info(format!(
        "Upload object holds {} certificates and {} provisioning profiles ({} bytes)",
        payload.document().certificates.len(),
        payload.document().provisioning_profiles.len(),
        payload.len()
    ));

    Ok(payload)
}
