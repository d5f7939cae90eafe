//! HTTP delivery of signing files and the diagnostic log
//!
//! Every request carries the upload key verbatim in the `Authorization`
//! header and is attempted exactly once.

use crate::config::CollectorConfig;
use crate::error::{CollectorError, Result};
use crate::log::RunLog;
use crate::payload::Payload;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use zeroize::Zeroizing;

/// File name of the gzip attachment used for large documents
pub const COMPRESSED_FILE_NAME: &str = "compressed-json-object.gz";

/// Multipart field carrying the compressed document
const ARCHIVE_FIELD: &str = "archive";

/// Multipart field carrying the diagnostic log
const LOG_FIELD: &str = "logfile";

/// Upload targets for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub files_url: String,
    pub log_url: String,
}

impl Endpoints {
    /// `{collection_url}/{id}/files/` and `{collection_url}/{id}/logs/`
    #[must_use]
    pub fn for_collection(collection_url: &str, id: &str) -> Self {
        let base = collection_url.trim_end_matches('/');
        Self {
            files_url: format!("{base}/{id}/files/"),
            log_url: format!("{base}/{id}/logs/"),
        }
    }
}

/// Request body chosen by size.
///
/// Both forms hold the document, private keys included, and are wiped on drop
/// until [`UploadBody::take`] hands the buffer to the HTTP client.
#[derive(Debug, PartialEq, Eq)]
pub enum UploadBody {
    /// Sent as-is with `application/json`
    Json(Zeroizing<Vec<u8>>),
    /// Gzip of the document, sent as a multipart attachment
    Compressed(Zeroizing<Vec<u8>>),
}

impl UploadBody {
    /// Documents of `threshold` bytes or more are compressed
    pub fn for_document(document: &[u8], threshold: usize) -> Result<Self> {
        if document.len() < threshold {
            return Ok(Self::Json(Zeroizing::new(document.to_vec())));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(document)?;
        Ok(Self::Compressed(Zeroizing::new(encoder.finish()?)))
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// Move the buffer out for sending, leaving an empty one behind.
    ///
    /// reqwest owns the returned bytes from here on and does not wipe them.
    pub fn take(&mut self) -> Vec<u8> {
        match self {
            Self::Json(bytes) | Self::Compressed(bytes) => std::mem::take(&mut **bytes),
        }
    }
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: serde_json::Value,
}

pub struct Transport {
    client: Client,
    upload_key: Zeroizing<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl Transport {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let request_timeout = config.request_timeout();
        let connect_timeout = config.connect_timeout();

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CollectorError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            upload_key: Zeroizing::new(config.upload_key.clone()),
            request_timeout,
            connect_timeout,
        })
    }

    /// Open a signing files collection and derive its upload endpoints
    pub async fn start_collection(&self, collection_url: &str, log: &RunLog) -> Result<Endpoints> {
        log.debug(format!("Create signing files collection {collection_url}"));

        let response = self
            .authorized(self.client.post(collection_url))
            .send()
            .await
            .map_err(|e| CollectorError::Collection(self.describe(&e)))?;
        let response = check_status(response, log)
            .await
            .map_err(CollectorError::Collection)?;

        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::Collection(self.describe(&e)))?;
        log.debug(&body);

        let collection: CollectionResponse = serde_json::from_str(&body).map_err(|e| {
            CollectorError::Collection(format!("Malformed collection response: {e}"))
        })?;
        let id = match collection.id {
            serde_json::Value::String(id) if !id.is_empty() => id,
            serde_json::Value::Number(id) => id.to_string(),
            other => {
                return Err(CollectorError::Collection(format!(
                    "Collection response has no usable id: {other}"
                )));
            }
        };

        log.debug(format!("Opened signing files collection {id}"));
        Ok(Endpoints::for_collection(collection_url, &id))
    }

    /// Send the payload to the files endpoint in a single attempt
    ///
    /// Payloads shorter than `threshold` bytes go out unchanged as
    /// `application/json`. Anything larger is gzip-compressed and attached as
    /// `compressed-json-object.gz` in the multipart field `archive`.
    ///
    /// # Arguments
    /// * `url` - Files endpoint, fixed or derived from the collection id
    /// * `payload` - Serialized document built for this run
    /// * `threshold` - Size in bytes at which compression starts
    /// * `log` - Diagnostic log of the run
    ///
    /// # Returns
    /// * `Ok(())` - The server answered with a 2xx status
    /// * `Err(CollectorError::Upload)` - Timeout, connection failure or any
    ///   other status; the message names the cause
    pub async fn upload(&self, url: &str, payload: &Payload, threshold: usize, log: &RunLog) -> Result<()> {
        log.debug(format!("Sending signing files to {url}"));

        let mut body = UploadBody::for_document(payload.as_bytes(), threshold)?;
        let request = if body.is_compressed() {
            log.info(format!(
                "JSON object is too big: {}. Compressing",
                payload.len()
            ));
            let bytes = body.take();
            log.info(format!("Compressed size: {}", bytes.len()));

            let part = Part::bytes(bytes)
                .file_name(COMPRESSED_FILE_NAME)
                .mime_str("application/gzip")
                .map_err(|e| CollectorError::Upload(e.to_string()))?;
            self.client
                .post(url)
                .multipart(Form::new().part(ARCHIVE_FIELD, part))
        } else {
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.take())
        };

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| CollectorError::Upload(self.describe(&e)))?;
        check_status(response, log)
            .await
            .map_err(CollectorError::Upload)?;

        Ok(())
    }

    /// Send the diagnostic log as a multipart file named after the log file
    pub async fn upload_log(&self, url: &str, log: &RunLog) -> Result<()> {
        log.debug(format!("Sending logs to {url}"));

        let contents = log.contents().await?;
        let file_name = log
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = Part::bytes(contents)
            .file_name(file_name)
            .mime_str("text/plain")
            .map_err(|e| CollectorError::Upload(e.to_string()))?;

        let response = self
            .authorized(self.client.post(url).multipart(Form::new().part(LOG_FIELD, part)))
            .send()
            .await
            .map_err(|e| CollectorError::Upload(self.describe(&e)))?;
        check_status(response, log)
            .await
            .map_err(CollectorError::Upload)?;

        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, self.upload_key.as_str())
    }

    fn describe(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() {
            format!(
                "Request timed out after {} seconds. Check your network connection.",
                if e.is_connect() {
                    self.connect_timeout.as_secs()
                } else {
                    self.request_timeout.as_secs()
                }
            )
        } else if e.is_connect() {
            "Could not connect to the server. Check network/firewall settings.".to_string()
        } else {
            format!("Network error: {e}")
        }
    }
}

/// Pass 2xx responses through, turn anything else into a message
async fn check_status(response: Response, log: &RunLog) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    log.debug(format!("Server error ({status}): {body}"));
    Err(format!("{url} responded with {status}"))
}
