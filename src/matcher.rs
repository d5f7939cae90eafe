//! Cross-referencing identities against provisioning profiles
//!
//! An identity and a profile are linked when the identity's serial is among the
//! profile's embedded certificate serials. Only entities with at least one
//! direct link survive; the rest are logged and dropped.

use crate::identity::{Identity, Serial};
use crate::log::RunLog;
use crate::profile::Profile;
use std::collections::HashMap;

/// Identities and profiles that reference each other
#[derive(Debug, Default)]
pub struct Matched {
    pub identities: Vec<Identity>,
    pub profiles: Vec<Profile>,
}

impl Matched {
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.profiles.is_empty()
    }
}

/// Keep the identities and profiles that are linked to at least one of the other.
///
/// Identities are deduplicated by serial (first occurrence wins) and profiles
/// by path. Survivors keep their input order.
pub fn discard_unreferenced(identities: Vec<Identity>, profiles: Vec<Profile>, log: &RunLog) -> Matched {
    log.info("Matching provisioning profiles & codesigning identities");

    let mut by_serial: HashMap<Serial, usize> = HashMap::with_capacity(identities.len());
    for (index, identity) in identities.iter().enumerate() {
        by_serial.entry(identity.serial().clone()).or_insert(index);
    }

    let mut identity_kept = vec![false; identities.len()];
    let mut kept_profiles: Vec<Profile> = Vec::new();

    for profile in profiles {
        if kept_profiles.contains(&profile) {
            continue;
        }

        let mut profile_matched = false;
        for serial in profile.serials() {
            if let Some(&index) = by_serial.get(serial) {
                profile_matched = true;
                identity_kept[index] = true;
                log.debug(format!(
                    "Codesigning identity '{}' matches '{profile}'",
                    identities[index]
                ));
            }
        }

        if profile_matched {
            kept_profiles.push(profile);
        } else {
            log.debug(format!(
                "Provisioning profile '{profile}' did not match any codesigning identity"
            ));
        }
    }

    let mut kept_identities = Vec::new();
    for (index, identity) in identities.into_iter().enumerate() {
        if identity_kept[index] {
            kept_identities.push(identity);
        } else if by_serial.get(identity.serial()) == Some(&index) {
            log.debug(format!(
                "Codesigning identity '{identity}' did not match any provisioning profile"
            ));
        }
    }

    log.info(format!(
        "Kept {} codesigning identities and {} provisioning profiles",
        kept_identities.len(),
        kept_profiles.len()
    ));

    Matched {
        identities: kept_identities,
        profiles: kept_profiles,
    }
}
