//! The persistence collaborator seam.

use async_trait::async_trait;
use netsweep_core::{ScanFailure, ScanRequest, ScanResult};

/// Write-mostly sink for terminal scan outcomes.
///
/// The engine delivers each job's terminal outcome here exactly once,
/// along with the request that produced it. Implementations own schema
/// and query details; the engine only requires durable acceptance.
/// Errors are logged by the coordinator, never propagated back into the
/// job lifecycle.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist a completed scan result.
    async fn store_result(&self, request: &ScanRequest, result: &ScanResult)
        -> anyhow::Result<()>;

    /// Persist a terminal scan failure (including any salvaged partial
    /// result it carries).
    async fn store_failure(
        &self,
        request: &ScanRequest,
        failure: &ScanFailure,
    ) -> anyhow::Result<()>;
}
