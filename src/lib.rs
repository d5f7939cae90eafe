//! Collection of iOS signing files for remote builds
//!
//! Codesigning identities from the keychain and provisioning profiles from disk
//! are cross-referenced by certificate serial. The linked ones are exported into
//! a single JSON document and uploaded, followed by the run's diagnostic log.

#[macro_use]
pub mod prompts;

pub mod collector;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod log;
pub mod macos;
pub mod matcher;
pub mod payload;
pub mod profile;
pub mod source;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export common types
pub use collector::{Collector, RunReport, RunState};
pub use config::{CollectorConfig, DecoderKind, EndpointConfig};
pub use error::{CollectorError, Result};
pub use identity::{Identity, KeyBundle, Serial};
pub use log::RunLog;
pub use profile::Profile;
