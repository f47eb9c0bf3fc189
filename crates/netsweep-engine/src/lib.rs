//! Netsweep Engine - Scan orchestration over an external tool.
//!
//! This crate drives nmap as a child process and turns its XML output into
//! normalized scan records. It owns the whole job lifecycle: profile
//! resolution, privilege checks, subprocess spawning under a concurrency
//! cap, incremental output parsing, heuristic progress tracking,
//! cancellation with a bounded grace period, and exactly-once delivery of
//! terminal outcomes to subscribers and the persistence sink.
//!
//! # Architecture
//!
//! - [`locator`] - finds the tool binary on the search path and probes its version
//! - [`spawn`] - the subprocess seam (`ToolSpawner`), real and test-double friendly
//! - [`job`] - per-job handle: state, cancellation token, event channel
//! - [`parser`] - streaming XML consumption into `ScanResult`
//! - [`progress`] - monotonic percent heuristics per job
//! - [`executor`] - the per-job worker and its state machine
//! - [`coordinator`] - the facade: validation, dedup, terminal routing
//!
//! # Example
//!
//! ```rust,ignore
//! use netsweep_engine::{ProcessSpawner, ScanCoordinator};
//! use netsweep_core::{AppConfig, ScanRequest};
//! use netsweep_profiles::ProfileRegistry;
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_with_env()?;
//! let coordinator = ScanCoordinator::connect(
//!     &config,
//!     Arc::new(ProfileRegistry::with_config(&config.progress)),
//!     Arc::new(ProcessSpawner),
//!     None,
//! )
//! .await?;
//!
//! let job_id = coordinator.submit(ScanRequest::parse("192.168.1.0/24", "quick")?);
//! let mut events = coordinator.subscribe(job_id).expect("job exists");
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod locator;
pub mod parser;
pub mod progress;
pub mod sink;
pub mod spawn;

// Re-export commonly used types
pub use coordinator::ScanCoordinator;
pub use error::{EngineError, ParseError, Result};
pub use events::{JobOutcome, JobState, ProgressUpdate, ScanEvent};
pub use executor::{ExecutorOptions, ScanExecutor};
pub use job::{JobHandle, JobSubscription};
pub use locator::{ToolHandle, ToolLocator};
pub use parser::{ParseObservation, ResultParser};
pub use progress::ProgressAggregator;
pub use sink::ResultSink;
pub use spawn::{ProcessSpawner, RunningTool, ToolExit, ToolSpawner};
