//! In-memory scan profile registry.

use crate::definition::ScanProfile;
use crate::error::{ProfileError, Result};
use netsweep_core::{ProgressConfig, ScanProfileId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Immutable mapping from profile identifiers to their definitions.
///
/// Built once at process start; pure lookups, no I/O. The six profiles
/// are hardcoded argument templates; only the expected durations vary
/// with configuration.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<ScanProfileId, ScanProfile>,
}

impl ProfileRegistry {
    /// Build the registry with default expected durations.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&ProgressConfig::default())
    }

    /// Build the registry, taking expected durations from configuration.
    #[must_use]
    pub fn with_config(progress: &ProgressConfig) -> Self {
        let secs = Duration::from_secs;
        let definitions = [
            ScanProfile::new(
                ScanProfileId::Quick,
                "Quick",
                &["-T4", "-F"],
                false,
                secs(progress.quick_secs),
            ),
            ScanProfile::new(
                ScanProfileId::Full,
                "Full",
                &["-T4", "-p-"],
                false,
                secs(progress.full_secs),
            ),
            ScanProfile::new(
                ScanProfileId::Ping,
                "Ping",
                &["-sn"],
                false,
                secs(progress.ping_secs),
            ),
            ScanProfile::new(
                ScanProfileId::Service,
                "Service",
                &["-sV"],
                false,
                secs(progress.service_secs),
            ),
            ScanProfile::new(
                ScanProfileId::OsDetection,
                "OS Detection",
                &["-O"],
                true,
                secs(progress.os_detection_secs),
            ),
            ScanProfile::new(
                ScanProfileId::Comprehensive,
                "Comprehensive",
                &["-T4", "-A", "-v"],
                true,
                secs(progress.comprehensive_secs),
            ),
        ];

        let profiles: HashMap<_, _> = definitions.into_iter().map(|p| (p.id, p)).collect();
        debug!(count = profiles.len(), "built scan profile registry");
        Self { profiles }
    }

    /// Resolve a profile by identifier.
    ///
    /// Infallible for the closed [`ScanProfileId`] space; every variant
    /// has a definition.
    #[must_use]
    pub fn resolve(&self, id: ScanProfileId) -> &ScanProfile {
        self.profiles
            .get(&id)
            .expect("registry contains every profile id")
    }

    /// Resolve a profile from its machine-readable name.
    ///
    /// This is the string boundary where unknown profiles are rejected.
    pub fn resolve_name(&self, name: &str) -> Result<&ScanProfile> {
        let id: ScanProfileId = name.parse().map_err(|_| ProfileError::Unknown {
            name: name.to_string(),
        })?;
        Ok(self.resolve(id))
    }

    /// All profiles, in display order.
    #[must_use]
    pub fn all(&self) -> Vec<&ScanProfile> {
        ScanProfileId::ALL.iter().map(|id| self.resolve(*id)).collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
