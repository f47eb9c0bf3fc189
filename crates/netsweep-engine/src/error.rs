//! Error types for the scan engine.

use netsweep_core::{FailureKind, ScanProfileId};
use netsweep_profiles::ProfileError;
use thiserror::Error;

/// A malformed or truncated tool-output error, with the byte offset of
/// the offending input in the overall output stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed tool output at byte {offset}: {message}")]
pub struct ParseError {
    /// Absolute byte offset into the tool's output stream.
    pub offset: u64,
    /// What went wrong.
    pub message: String,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tool binary could not be resolved on the search path.
    #[error("scan tool '{binary}' not found on the search path")]
    ToolNotFound {
        /// Binary name that was searched for.
        binary: String,
    },

    /// The tool is older than the configured minimum version.
    #[error("scan tool version {found} is older than the required {minimum}")]
    ToolVersionUnsupported {
        /// Version reported by the tool.
        found: String,
        /// Configured minimum version.
        minimum: String,
    },

    /// Requested profile does not exist.
    #[error(transparent)]
    UnknownProfile(#[from] ProfileError),

    /// The target string failed validation.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The profile requires elevation and the process lacks it.
    #[error("profile '{profile}' requires elevated privileges")]
    PermissionDenied {
        /// The profile that was refused.
        profile: ScanProfileId,
    },

    /// The tool's output could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The tool ran and exited non-zero.
    #[error("scan tool exited with {}: {stderr}", exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Process {
        /// Exit code, when the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr text.
        stderr: String,
    },

    /// I/O error talking to the subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The terminal-event classification for this error.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ToolNotFound { .. } | Self::ToolVersionUnsupported { .. } => {
                FailureKind::ToolNotFound
            }
            Self::UnknownProfile(_) => FailureKind::UnknownProfile,
            Self::InvalidTarget(_) => FailureKind::InvalidTarget,
            Self::PermissionDenied { .. } => FailureKind::PermissionDenied,
            Self::Parse(_) => FailureKind::Parse,
            Self::Process { .. } | Self::Io(_) => FailureKind::Process,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
