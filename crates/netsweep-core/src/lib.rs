//! Netsweep Core - Foundation crate for the netsweep scan engine.
//!
//! This crate provides the shared domain types, error handling, and
//! configuration management that the other netsweep crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Identifiers and the target grammar (`JobId`, `Target`, `ScanProfileId`)
//! - [`model`] - Normalized scan output records (`ScanResult`, `HostRecord`, ...)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod model;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, DatabaseConfig, ProgressConfig, ScanningConfig, ToolConfig};
pub use error::{ConfigError, ConfigResult, NetsweepError, Result};
pub use model::{
    FailureKind, HostRecord, HostStatus, OsGuess, PortProtocol, PortRecord, PortState,
    ScanFailure, ScanResult,
};
pub use types::{JobId, ScanProfileId, ScanRequest, Target};
