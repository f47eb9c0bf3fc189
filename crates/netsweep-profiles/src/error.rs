//! Error types for the profile subsystem.

use thiserror::Error;

/// Errors that can occur in profile operations.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// No profile with the given name exists in the registry.
    #[error("unknown scan profile: '{name}'")]
    Unknown {
        /// The profile name that failed to resolve.
        name: String,
    },
}

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;
