//! The scan profile definition.

use netsweep_core::ScanProfileId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named preset of scan-tool arguments and privilege requirement.
///
/// Profiles are immutable once the registry is built. Invariant:
/// `tool_arguments` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProfile {
    /// Stable identifier.
    pub id: ScanProfileId,
    /// Human-readable name for UI surfaces.
    pub display_name: String,
    /// Argument template passed to the tool, in order, before the
    /// output-mode flag and the target.
    pub tool_arguments: Vec<String>,
    /// Whether the tool needs root/administrator context for this profile.
    pub requires_privileges: bool,
    /// Expected wall-clock duration for a single-host scan, used by
    /// progress heuristics.
    pub expected_duration: Duration,
}

impl ScanProfile {
    pub(crate) fn new(
        id: ScanProfileId,
        display_name: &str,
        arguments: &[&str],
        requires_privileges: bool,
        expected_duration: Duration,
    ) -> Self {
        debug_assert!(!arguments.is_empty(), "profile argument template is empty");
        Self {
            id,
            display_name: display_name.to_string(),
            tool_arguments: arguments.iter().map(|s| (*s).to_string()).collect(),
            requires_privileges,
            expected_duration,
        }
    }
}
