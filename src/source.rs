//! Collaborators that supply identities, profiles and key material
//!
//! The macOS implementations live in [`crate::macos`]; tests substitute their
//! own.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::identity::{Identity, KeyBundle};
use crate::log::RunLog;
use std::path::{Path, PathBuf};

/// Codesigning identities held in a secure store.
pub trait IdentitySource {
    /// Unlock the store if needed and list its identities.
    ///
    /// Fails with `AccessDenied` when the user declines to unlock and with
    /// `NotFound` when the store holds no identities.
    async fn identities(&self, log: &RunLog) -> Result<Vec<Identity>>;
}

/// Export of an identity's certificate and private key.
pub trait KeyExporter {
    /// PKCS#12 bundle for `identity`; may prompt the user for authorization
    async fn export_key_bundle(&self, identity: &Identity, log: &RunLog) -> Result<KeyBundle>;
}

/// Provisioning profile files on disk.
pub trait ProfileSource {
    /// Fails with `NotFound` when there are none
    async fn profile_paths(&self, log: &RunLog) -> Result<Vec<PathBuf>>;
}

/// Turns a signed profile container into its XML plist.
pub trait ProfileDecoder {
    async fn decode(&self, path: &Path) -> Result<Vec<u8>>;
}

impl<T: IdentitySource> IdentitySource for &T {
    async fn identities(&self, log: &RunLog) -> Result<Vec<Identity>> {
        (**self).identities(log).await
    }
}

impl<T: KeyExporter> KeyExporter for &T {
    async fn export_key_bundle(&self, identity: &Identity, log: &RunLog) -> Result<KeyBundle> {
        (**self).export_key_bundle(identity, log).await
    }
}
