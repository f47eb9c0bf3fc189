//! The engine facade: request validation, duplicate suppression, and
//! terminal-outcome routing.

use crate::error::{EngineError, Result};
use crate::events::{JobOutcome, JobState};
use crate::executor::{ExecutorOptions, ScanExecutor};
use crate::job::{JobHandle, JobSubscription};
use crate::locator::{ToolHandle, ToolLocator};
use crate::sink::ResultSink;
use crate::spawn::ToolSpawner;
use netsweep_core::{AppConfig, JobId, NetsweepError, ScanProfileId, ScanRequest};
use netsweep_profiles::ProfileRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Key for duplicate suppression: one live job per (target, profile).
type Fingerprint = (String, ScanProfileId);

/// How many finished job handles stay queryable. Once a terminal job's
/// outcome has been delivered and persisted, its handle only serves
/// state queries; the oldest ones are evicted past this bound.
const MAX_FINISHED_JOBS: usize = 64;

/// Accepts scan requests and tracks every job it has created.
///
/// `submit` returns immediately with a job ID; the scan itself runs on a
/// background task. A request whose (target, profile) pair already has a
/// non-terminal job returns that job's ID instead of starting another.
/// Once a job reaches a terminal state its outcome is handed to the
/// persistence sink (when one is attached) exactly once, and the pair
/// becomes submittable again.
pub struct ScanCoordinator {
    executor: ScanExecutor,
    registry: Arc<ProfileRegistry>,
    sink: Option<Arc<dyn ResultSink>>,
    jobs: Mutex<HashMap<JobId, Arc<JobHandle>>>,
    active: Mutex<HashMap<Fingerprint, JobId>>,
}

impl ScanCoordinator {
    /// Locate the scan tool and build a ready coordinator.
    ///
    /// Fails up front when the tool binary cannot be found or its version
    /// is below the configured minimum, so callers learn about a broken
    /// installation before any scan is requested.
    pub async fn connect(
        config: &AppConfig,
        registry: Arc<ProfileRegistry>,
        spawner: Arc<dyn ToolSpawner>,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Result<Arc<Self>> {
        let tool = ToolLocator::from_config(&config.tool).locate().await?;
        info!(path = %tool.path.display(), version = %tool.version, "scan tool located");
        let options = ExecutorOptions::from_config(&config.scanning);
        Ok(Self::with_tool(tool, registry, spawner, sink, options))
    }

    /// Build a coordinator for an already-located tool.
    #[must_use]
    pub fn with_tool(
        tool: ToolHandle,
        registry: Arc<ProfileRegistry>,
        spawner: Arc<dyn ToolSpawner>,
        sink: Option<Arc<dyn ResultSink>>,
        options: ExecutorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor: ScanExecutor::new(tool, spawner, options),
            registry,
            sink,
            jobs: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// The tool this coordinator drives.
    #[must_use]
    pub fn tool(&self) -> &ToolHandle {
        self.executor.tool()
    }

    /// Submit a validated request, returning the job ID immediately.
    ///
    /// Returns the existing job's ID when an identical (target, profile)
    /// pair is already pending or running.
    pub fn submit(self: &Arc<Self>, request: ScanRequest) -> JobId {
        let fingerprint = request.fingerprint();

        let job = {
            let mut active = self.active.lock().expect("active lock");
            if let Some(existing) = active.get(&fingerprint) {
                info!(job_id = %existing, target = %fingerprint.0, profile = %fingerprint.1,
                    "duplicate scan request coalesced");
                return *existing;
            }
            let job = Arc::new(JobHandle::new(request));
            active.insert(fingerprint.clone(), job.id());
            job
        };

        self.jobs
            .lock()
            .expect("jobs lock")
            .insert(job.id(), Arc::clone(&job));

        info!(job_id = %job.id(), target = %fingerprint.0, profile = %fingerprint.1,
            "scan job accepted");

        let coordinator = Arc::clone(self);
        let worker = Arc::clone(&job);
        tokio::spawn(async move {
            let profile = coordinator.registry.resolve(worker.request().profile);
            let outcome = coordinator.executor.run_job(&worker, profile).await;
            coordinator.settle(&fingerprint, &worker, outcome).await;
        });

        job.id()
    }

    /// Validate raw target and profile strings and submit them.
    pub fn submit_str(self: &Arc<Self>, target: &str, profile: &str) -> Result<JobId> {
        let profile = self.registry.resolve_name(profile)?.id;
        let target = netsweep_core::Target::parse(target).map_err(|err| match err {
            NetsweepError::Validation(message) => EngineError::InvalidTarget(message),
            other => EngineError::InvalidTarget(other.to_string()),
        })?;
        Ok(self.submit(ScanRequest { target, profile }))
    }

    /// Request cancellation of a job.
    ///
    /// Returns `false` when the job is unknown or already terminal.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.job(job_id) {
            Some(job) => job.request_cancel(),
            None => false,
        }
    }

    /// Subscribe to a job's event stream.
    ///
    /// The job's current state is replayed first; a job that already
    /// finished replays its terminal payload too, so late subscribers
    /// still observe the outcome.
    #[must_use]
    pub fn subscribe(&self, job_id: JobId) -> Option<JobSubscription> {
        self.job(job_id).map(|job| job.subscribe())
    }

    /// Current state of a job, if known.
    #[must_use]
    pub fn job_state(&self, job_id: JobId) -> Option<JobState> {
        self.job(job_id).map(|job| job.state())
    }

    /// Look up a job handle.
    #[must_use]
    pub fn job(&self, job_id: JobId) -> Option<Arc<JobHandle>> {
        self.jobs.lock().expect("jobs lock").get(&job_id).cloned()
    }

    /// All jobs this coordinator has accepted, newest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<Arc<JobHandle>> {
        let mut jobs: Vec<_> = self.jobs.lock().expect("jobs lock").values().cloned().collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.started_at()));
        jobs
    }

    /// Persist the terminal outcome and release the duplicate-suppression
    /// slot for this (target, profile) pair.
    async fn settle(&self, fingerprint: &Fingerprint, job: &JobHandle, outcome: JobOutcome) {
        let job_id = job.id();
        if let Some(sink) = &self.sink {
            let stored = match &outcome {
                JobOutcome::Completed(result) => sink.store_result(job.request(), result).await,
                JobOutcome::Failed(failure) => sink.store_failure(job.request(), failure).await,
            };
            if let Err(err) = stored {
                // Persistence problems never disturb the job outcome
                // already delivered to subscribers.
                error!(job_id = %job_id, error = %err, "failed to persist scan outcome");
            }
        }

        {
            let mut active = self.active.lock().expect("active lock");
            // A newer job may already own this slot if the map was somehow
            // repopulated; only remove our own entry.
            if active.get(fingerprint) == Some(&job_id) {
                active.remove(fingerprint);
            } else {
                warn!(job_id = %job_id, "duplicate-suppression slot already reassigned");
            }
        }

        self.prune_finished();
    }

    /// Evict the oldest finished job handles past [`MAX_FINISHED_JOBS`].
    /// Pending and running jobs are never evicted.
    fn prune_finished(&self) {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let mut finished: Vec<_> = jobs
            .values()
            .filter_map(|job| job.finished_at().map(|at| (at, job.id())))
            .collect();
        if finished.len() <= MAX_FINISHED_JOBS {
            return;
        }
        finished.sort_by_key(|(at, _)| *at);
        let excess = finished.len() - MAX_FINISHED_JOBS;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(job_id = %id, "evicting finished job handle");
            jobs.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{RunningTool, ToolExit};
    use async_trait::async_trait;
    use std::io;
    use std::path::{Path, PathBuf};

    struct IdleTool;

    #[async_trait]
    impl RunningTool for IdleTool {
        async fn read_stdout(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            // Never produces output and never ends.
            std::future::pending().await
        }

        async fn wait(&mut self) -> io::Result<ToolExit> {
            Ok(ToolExit {
                code: Some(0),
                stderr: String::new(),
            })
        }

        async fn terminate(&mut self) {}

        async fn kill(&mut self) {}
    }

    struct IdleSpawner;

    #[async_trait]
    impl ToolSpawner for IdleSpawner {
        async fn spawn(&self, _program: &Path, _args: &[String]) -> io::Result<Box<dyn RunningTool>> {
            Ok(Box::new(IdleTool))
        }
    }

    fn test_coordinator() -> Arc<ScanCoordinator> {
        let tool = ToolHandle {
            path: PathBuf::from("/usr/bin/nmap"),
            version: "7.94".to_string(),
        };
        let options = ExecutorOptions {
            max_concurrent_scans: 4,
            cancel_grace: std::time::Duration::from_millis(50),
            min_os_confidence: 70,
            elevated: false,
        };
        ScanCoordinator::with_tool(
            tool,
            Arc::new(ProfileRegistry::new()),
            Arc::new(IdleSpawner),
            None,
            options,
        )
    }

    #[tokio::test]
    async fn test_duplicate_requests_coalesce() {
        let coordinator = test_coordinator();
        let first = coordinator
            .submit_str("192.168.1.1", "quick")
            .expect("valid request");
        let second = coordinator
            .submit_str("192.168.1.1", "quick")
            .expect("valid request");
        assert_eq!(first, second);

        // Different profile on the same target is a different job.
        let third = coordinator
            .submit_str("192.168.1.1", "ping")
            .expect("valid request");
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_submit_str_rejects_garbage() {
        let coordinator = test_coordinator();
        assert!(matches!(
            coordinator.submit_str("192.168.1.1", "warp"),
            Err(EngineError::UnknownProfile(_))
        ));
        assert!(matches!(
            coordinator.submit_str("10.0.0.0/33", "quick"),
            Err(EngineError::InvalidTarget(_))
        ));
        // Neither rejection created a job.
        assert!(coordinator.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let coordinator = test_coordinator();
        assert!(!coordinator.cancel(JobId::generate()));
    }
}
