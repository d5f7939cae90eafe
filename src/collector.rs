//! One collection run: collect, match, export, upload, then ship the log
//!
//! The main flow stops at the first error. The diagnostic log is uploaded
//! afterwards whatever the outcome, and a failed log upload is only recorded.

use crate::config::{CollectorConfig, EndpointConfig};
use crate::error::Result;
use crate::export::Exporter;
use crate::identity::Identity;
use crate::log::RunLog;
use crate::matcher::{Matched, discard_unreferenced};
use crate::payload::{self, Payload};
use crate::profile::Profile;
use crate::source::{IdentitySource, KeyExporter, ProfileDecoder, ProfileSource};
use crate::transport::{Endpoints, Transport};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;

/// Stages of a run, in the order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Collecting,
    Matching,
    Exporting,
    Uploading,
    Succeeded,
    Failed,
    LogUploading,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Collecting => "collecting",
            Self::Matching => "matching",
            Self::Exporting => "exporting",
            Self::Uploading => "uploading",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::LogUploading => "log uploading",
        };
        f.write_str(name)
    }
}

/// What happened during a run
#[derive(Debug)]
pub struct RunReport {
    /// Outcome of the main flow; log upload never changes it
    pub outcome: Result<()>,
    pub states: Vec<RunState>,
    pub log_uploaded: bool,
    pub log_path: PathBuf,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Drives a run against a secure store, a profile source and a profile decoder.
///
/// `store` supplies identities and exports their key material.
pub struct Collector<I, S, D> {
    config: CollectorConfig,
    store: I,
    profiles: S,
    decoder: D,
    log: RunLog,
}

impl<I, S, D> Collector<I, S, D>
where
    I: IdentitySource + KeyExporter,
    S: ProfileSource,
    D: ProfileDecoder,
{
    pub fn new(config: CollectorConfig, store: I, profiles: S, decoder: D, log: RunLog) -> Self {
        Self {
            config,
            store,
            profiles,
            decoder,
            log,
        }
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Run the main flow, then upload the diagnostic log
    ///
    /// The main flow resolves the upload endpoints (opening a collection when
    /// only `collection_url` is configured), collects profiles and suitable
    /// identities, drops everything unreferenced, exports the rest and uploads
    /// it. The first error ends it and moves the run to `Failed`.
    ///
    /// The log upload that follows is attempted whenever an endpoint for it is
    /// known. Its failure is written to the log and reported in
    /// `log_uploaded`, never in `outcome`.
    ///
    /// # Returns
    /// * `RunReport` - Outcome of the main flow, every state visited, whether
    ///   the log reached the server, and the local log path
    ///
    /// # Example
    /// ```no_run
    /// # async fn demo(config: kodegen_bundler_collect::CollectorConfig) -> kodegen_bundler_collect::Result<()> {
    /// use kodegen_bundler_collect::macos::{Keychain, ProfileDirectory, SecurityCmsDecoder};
    /// use kodegen_bundler_collect::{Collector, RunLog};
    ///
    /// let log = RunLog::create_in(&config.working_dir)?;
    /// let keychain = Keychain::new(config.keychain.clone());
    /// let profiles = ProfileDirectory::new(config.profiles_dir()?);
    /// let report = Collector::new(config, keychain, profiles, SecurityCmsDecoder, log)
    ///     .run()
    ///     .await;
    /// if !report.is_success() {
    ///     eprintln!("see {}", report.log_path.display());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self) -> RunReport {
        let mut states = vec![RunState::Init];
        let mut endpoints = None;

        let (transport, outcome) = match Transport::new(&self.config) {
            Ok(transport) => {
                let outcome = self.main_flow(&transport, &mut states, &mut endpoints).await;
                (Some(transport), outcome)
            }
            Err(e) => (None, Err(e)),
        };
        self.finish(&outcome, &mut states);

        states.push(RunState::LogUploading);
        let log_uploaded = match (&transport, &endpoints) {
            (Some(transport), Some(endpoints)) => self.ship_log(transport, endpoints).await,
            _ => {
                self.log.warn("No log endpoint available, skipping log upload");
                if self.log.is_console() {
                    warn!("Diagnostic log was not uploaded");
                }
                false
            }
        };

        RunReport {
            outcome,
            states,
            log_uploaded,
            log_path: self.log.path().to_path_buf(),
        }
    }

    async fn main_flow(
        &self,
        transport: &Transport,
        states: &mut Vec<RunState>,
        endpoints: &mut Option<Endpoints>,
    ) -> Result<()> {
        let resolved = match self.config.validate()? {
            EndpointConfig::Session { collection_url } => {
                transport.start_collection(&collection_url, &self.log).await?
            }
            EndpointConfig::Fixed { files_url, log_url } => Endpoints { files_url, log_url },
        };
        let files_url = resolved.files_url.clone();
        *endpoints = Some(resolved);

        self.log.announce("Preparing to collect iOS signing files");
        states.push(RunState::Collecting);
        let (identities, profiles) = self.collect().await?;

        states.push(RunState::Matching);
        self.log.announce("Discarding unreferenced signing files");
        let matched = discard_unreferenced(identities, profiles, &self.log);

        states.push(RunState::Exporting);
        self.log.announce("Preparing signing files for upload");
        let payload = self.build_payload(&matched).await?;
        self.log.announce("iOS signing file collection complete");

        states.push(RunState::Uploading);
        self.log.announce("Starting to upload signing files");
        self.upload(transport, &files_url, &payload).await
    }

    fn finish(&self, outcome: &Result<()>, states: &mut Vec<RunState>) {
        match outcome {
            Ok(()) => {
                states.push(RunState::Succeeded);
                self.log.info("Signing files uploaded");
                if self.log.is_console() {
                    success!("Please return to the build service UI to continue");
                }
            }
            Err(e) => {
                states.push(RunState::Failed);
                self.log.announce("Signing file collection failed. Aborting");
                self.log.error(e.to_string());
                if self.log.is_console() {
                    error!("{e}");
                    error!("You can find the debug log at {}", self.log.path().display());
                    error!("Please attach it when opening a support ticket");
                }
            }
        }
    }

    /// Returns whether the log reached the server
    async fn ship_log(&self, transport: &Transport, endpoints: &Endpoints) -> bool {
        self.log.announce("Uploading logs");
        match transport.upload_log(&endpoints.log_url, &self.log).await {
            Ok(()) => true,
            Err(e) => {
                self.log
                    .error(format!("Failed to upload collector log to server: {e}"));
                false
            }
        }
    }

    /// Collect profiles and suitable identities, then keep the linked ones
    pub async fn collect_and_match(&self) -> Result<Matched> {
        let (identities, profiles) = self.collect().await?;
        Ok(discard_unreferenced(identities, profiles, &self.log))
    }

    async fn collect(&self) -> Result<(Vec<Identity>, Vec<Profile>)> {
        let profiles = self.load_profiles().await?;
        let identities = self.store.identities(&self.log).await?;
        self.log
            .info(format!("Found {} codesigning identities", identities.len()));
        Ok((self.suitable(identities), profiles))
    }

    async fn load_profiles(&self) -> Result<Vec<Profile>> {
        let paths = self.profiles.profile_paths(&self.log).await?;

        let mut profiles = Vec::with_capacity(paths.len());
        for path in &paths {
            self.log
                .debug(format!("Reading provisioning profile {}", path.display()));
            let profile = Profile::load(path, &self.decoder).await.inspect_err(|e| {
                self.log.error(format!(
                    "Failed to read provisioning profile {}: {e}",
                    path.display()
                ));
            })?;
            profiles.push(profile);
        }

        Ok(profiles)
    }

    /// Drop identities that are not iOS signing certificates or not valid now
    fn suitable(&self, identities: Vec<Identity>) -> Vec<Identity> {
        if self.config.include_unsuitable {
            return identities;
        }

        let now = Utc::now();
        identities
            .into_iter()
            .filter(|identity| {
                let platform = identity.is_platform_suitable();
                let valid = identity.is_valid_at(now);
                self.log.debug(format!(
                    "{identity} is{} suitable for iOS codesigning",
                    if platform { "" } else { " not" }
                ));
                self.log.debug(format!(
                    "{identity} is{} valid now",
                    if valid { "" } else { " not" }
                ));
                platform && valid
            })
            .collect()
    }

    /// Export the matched entities into one payload
    pub async fn build_payload(&self, matched: &Matched) -> Result<Payload> {
        let mut exporter = Exporter::new(&self.store, &self.log);
        payload::build(matched, &mut exporter, &self.log).await
    }

    async fn upload(&self, transport: &Transport, files_url: &str, payload: &Payload) -> Result<()> {
        transport
            .upload(files_url, payload, self.config.compression_threshold, &self.log)
            .await
    }
}
