//! Job states and the per-job event stream.

use netsweep_core::{JobId, ScanFailure, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a scan job.
///
/// `Pending → Running → {Succeeded, Failed, Cancelled, PermissionDenied}`.
/// Terminal states are final; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a concurrency slot.
    Pending,
    /// Tool subprocess is running.
    Running,
    /// Tool exited 0 and the output parsed cleanly.
    Succeeded,
    /// Tool failed or its output was unusable.
    Failed,
    /// Cancelled by the caller before completion.
    Cancelled,
    /// Refused before spawning: profile needs elevation the process lacks.
    PermissionDenied,
}

impl JobState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::PermissionDenied => "permission_denied",
        };
        f.write_str(s)
    }
}

/// One coarse-grained progress observation for a job.
///
/// Per job, `percent` is monotonically non-decreasing across the event
/// sequence and reaches 100 only at a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Job this update belongs to.
    pub job_id: JobId,
    /// Heuristic completion percent, 0-100.
    pub percent: u8,
    /// Short human-readable status line.
    pub status_text: String,
}

/// An event published on a job's subscription channel.
///
/// Per job, state changes arrive in strict causal order and exactly one
/// terminal payload (`Completed` or `Failed`) is ever published.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// The job moved to a new lifecycle state.
    StateChanged {
        /// Job that transitioned.
        job_id: JobId,
        /// The new state.
        state: JobState,
    },
    /// Heuristic progress moved forward.
    Progress(ProgressUpdate),
    /// Terminal: the scan completed and parsed.
    Completed(Arc<ScanResult>),
    /// Terminal: the scan failed, was refused, or was cancelled.
    Failed(Arc<ScanFailure>),
}

/// The terminal outcome of one job, as returned by the executor to the
/// coordinator for persistence routing.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Scan completed; result parsed.
    Completed(Arc<ScanResult>),
    /// Scan failed, was refused, or was cancelled.
    Failed(Arc<ScanFailure>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::PermissionDenied.is_terminal());
    }
}
