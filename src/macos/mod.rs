//! macOS backends built on the `security` command line tool
//!
//! - [`Keychain`]: codesigning identities and their key material
//! - [`ProfileDirectory`]: `.mobileprovision` files on disk
//! - [`SecurityCmsDecoder`] and [`EmbeddedPlistDecoder`]: profile containers to XML plists

mod keychain;
mod profiles;

pub use keychain::Keychain;
pub use profiles::{EmbeddedPlistDecoder, ProfileDirectory, SecurityCmsDecoder};

use crate::error::{CollectorError, Result};
use tokio::process::Command;

/// A `security` invocation, or `MissingDependency` when the tool is absent
pub(crate) fn security() -> Result<Command> {
    which::which("security")
        .map(Command::new)
        .map_err(|_| {
            CollectorError::MissingDependency(
                "security command not found. Collecting signing files requires macOS.".to_string(),
            )
        })
}
