//! Netsweep Profiles - The immutable scan profile registry.
//!
//! A profile is a named preset of tool arguments plus a privilege
//! requirement and an expected-duration estimate. The set of profiles is
//! fixed and loaded once at startup into an immutable mapping: new
//! profiles are data, not code.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod definition;
pub mod error;
pub mod registry;

// Re-export commonly used types
pub use definition::ScanProfile;
pub use error::{ProfileError, Result};
pub use registry::ProfileRegistry;
