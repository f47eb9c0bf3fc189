//! The per-job worker: subprocess lifecycle and the job state machine.

use crate::events::{JobOutcome, JobState, ScanEvent};
use crate::job::JobHandle;
use crate::locator::ToolHandle;
use crate::parser::ResultParser;
use crate::progress::ProgressAggregator;
use crate::spawn::{RunningTool, ToolExit, ToolSpawner};
use netsweep_core::{FailureKind, ScanFailure, ScanResult, ScanningConfig};
use netsweep_profiles::ScanProfile;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Interval between time-based progress re-estimates.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// How much stderr tail to carry into failure messages.
const STDERR_TAIL: usize = 600;

/// Stderr fragments the tool emits when a scan type needed elevation it
/// did not have. Detected late, after a non-zero exit, as a fallback to
/// the pre-spawn check.
const PRIVILEGE_STDERR_MARKERS: [&str; 2] =
    ["requires root privileges", "requires privileged access"];

/// Executor tuning, snapshot of the scanning config plus the ambient
/// privilege probe.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum concurrently running tool invocations.
    pub max_concurrent_scans: usize,
    /// Grace period between the graceful stop and the forced kill.
    pub cancel_grace: Duration,
    /// Minimum confidence for the primary OS guess list.
    pub min_os_confidence: u8,
    /// Whether this process runs with elevated privileges.
    pub elevated: bool,
}

impl ExecutorOptions {
    /// Options from configuration, probing the real privilege state.
    #[must_use]
    pub fn from_config(config: &ScanningConfig) -> Self {
        Self {
            max_concurrent_scans: config.max_concurrent_scans.max(1),
            cancel_grace: config.cancel_grace(),
            min_os_confidence: config.min_os_confidence,
            elevated: is_root::is_root(),
        }
    }

    /// Override the detected privilege state (tests).
    #[must_use]
    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }
}

/// Launches scan jobs and owns their subprocess lifecycle.
///
/// Each job runs as an independent worker holding one semaphore permit;
/// jobs share no mutable state with each other.
pub struct ScanExecutor {
    tool: ToolHandle,
    spawner: Arc<dyn ToolSpawner>,
    semaphore: Arc<Semaphore>,
    options: ExecutorOptions,
}

impl ScanExecutor {
    /// New executor for a located tool.
    #[must_use]
    pub fn new(tool: ToolHandle, spawner: Arc<dyn ToolSpawner>, options: ExecutorOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_scans));
        Self {
            tool,
            spawner,
            semaphore,
            options,
        }
    }

    /// The located tool this executor invokes.
    #[must_use]
    pub fn tool(&self) -> &ToolHandle {
        &self.tool
    }

    /// Run one job to its terminal state.
    ///
    /// Emits state transitions plus progress on the job's channel, and
    /// exactly one terminal payload event; the initial `Pending` state
    /// reaches subscribers through subscription replay. The returned
    /// outcome mirrors the payload for persistence routing.
    pub async fn run_job(&self, job: &Arc<JobHandle>, profile: &ScanProfile) -> JobOutcome {
        // Refuse before spawning: a profile that needs elevation cannot
        // produce anything but an ambiguous tool error without it.
        if profile.requires_privileges && !self.options.elevated {
            info!(job_id = %job.id(), profile = %profile.id, "refusing scan: requires elevation");
            job.set_state(JobState::PermissionDenied);
            return deliver_failure(
                job,
                FailureKind::PermissionDenied,
                format!(
                    "profile '{}' requires elevated privileges; run as root/administrator",
                    profile.id
                ),
                None,
                None,
            );
        }

        let cancel = job.cancel_token();

        // Wait for a concurrency slot; cancellation applies while queued.
        let _permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                permit.expect("scan semaphore never closed")
            }
            () = cancel.cancelled() => {
                job.set_state(JobState::Cancelled);
                return deliver_failure(
                    job,
                    FailureKind::Cancelled,
                    "scan cancelled before it started".to_string(),
                    None,
                    None,
                );
            }
        };

        job.set_state(JobState::Running);

        let request = job.request();
        let args = build_arguments(profile, &request.target.to_string());
        let mut tool = match self.spawner.spawn(&self.tool.path, &args).await {
            Ok(tool) => tool,
            Err(err) => {
                warn!(job_id = %job.id(), error = %err, "failed to spawn scan tool");
                let (kind, message) = if err.kind() == io::ErrorKind::NotFound {
                    (
                        FailureKind::ToolNotFound,
                        format!("scan tool vanished from {}", self.tool.path.display()),
                    )
                } else {
                    (FailureKind::Process, format!("failed to spawn scan tool: {err}"))
                };
                job.set_state(JobState::Failed);
                return deliver_failure(job, kind, message, None, None);
            }
        };

        let mut parser = ResultParser::new(self.options.min_os_confidence);
        let mut progress = ProgressAggregator::new(
            job.id(),
            profile.expected_duration,
            request.target.cardinality(),
        );
        let mut tick = tokio::time::interval(PROGRESS_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let started = Instant::now();
        let mut read_buf = vec![0u8; 8192];
        let mut cancelled = false;

        loop {
            tokio::select! {
                read = tool.read_stdout(&mut read_buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        parser.feed(&read_buf[..n]);
                        for observation in parser.take_observations() {
                            progress.observe(&observation);
                        }
                        if let Some(update) = progress.update() {
                            job.emit(ScanEvent::Progress(update));
                        }
                    }
                    Err(err) => {
                        debug!(job_id = %job.id(), error = %err, "stdout read failed");
                        break;
                    }
                },
                _ = tick.tick() => {
                    if let Some(update) = progress.update() {
                        job.emit(ScanEvent::Progress(update));
                    }
                }
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }

        let exit = if cancelled {
            self.stop_tool(tool.as_mut()).await
        } else {
            tool.wait().await.unwrap_or_else(|err| ToolExit {
                code: None,
                stderr: format!("failed to reap scan tool: {err}"),
            })
        };

        let (result, parse_error) = parser.finalize(job.id(), started.elapsed());

        if cancelled {
            info!(job_id = %job.id(), hosts = result.hosts.len(), "scan cancelled");
            job.set_state(JobState::Cancelled);
            let partial = (!result.hosts.is_empty()).then_some(result);
            return deliver_failure(
                job,
                FailureKind::Cancelled,
                "scan cancelled".to_string(),
                exit.code,
                partial,
            );
        }

        match exit.code {
            Some(0) => {
                if let Some(error) = parse_error {
                    warn!(job_id = %job.id(), error = %error, "tool output unusable");
                    job.set_state(JobState::Failed);
                    let partial = (!result.hosts.is_empty()).then_some(result);
                    return deliver_failure(
                        job,
                        FailureKind::Parse,
                        error.to_string(),
                        Some(0),
                        partial,
                    );
                }
                info!(
                    job_id = %job.id(),
                    hosts_up = result.hosts_up(),
                    duration_ms = result.duration_ms,
                    "scan complete"
                );
                job.emit(ScanEvent::Progress(progress.finish()));
                job.set_state(JobState::Succeeded);
                let result = Arc::new(result);
                job.emit_terminal(ScanEvent::Completed(Arc::clone(&result)));
                JobOutcome::Completed(result)
            }
            code => {
                let stderr_tail = tail(&exit.stderr, STDERR_TAIL);
                let denied = PRIVILEGE_STDERR_MARKERS
                    .iter()
                    .any(|marker| exit.stderr.contains(marker));
                let partial = (!result.hosts.is_empty()).then_some(result);
                if denied {
                    info!(job_id = %job.id(), "tool refused scan: requires elevation");
                    job.set_state(JobState::PermissionDenied);
                    deliver_failure(
                        job,
                        FailureKind::PermissionDenied,
                        "this scan type requires elevated privileges; run as root/administrator"
                            .to_string(),
                        code,
                        partial,
                    )
                } else {
                    warn!(job_id = %job.id(), exit_code = ?code, "scan tool failed");
                    job.set_state(JobState::Failed);
                    deliver_failure(
                        job,
                        FailureKind::Process,
                        match code {
                            Some(c) => format!("scan tool exited with code {c}: {stderr_tail}"),
                            None => format!("scan tool killed by signal: {stderr_tail}"),
                        },
                        code,
                        partial,
                    )
                }
            }
        }
    }

    /// Graceful stop, bounded grace period, then forced kill.
    async fn stop_tool(&self, tool: &mut dyn RunningTool) -> ToolExit {
        tool.terminate().await;
        match timeout(self.options.cancel_grace, tool.wait()).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(err)) => ToolExit {
                code: None,
                stderr: format!("failed to reap scan tool: {err}"),
            },
            Err(_) => {
                warn!("scan tool ignored graceful stop; killing");
                tool.kill().await;
                tool.wait().await.unwrap_or_else(|err| ToolExit {
                    code: None,
                    stderr: format!("failed to reap scan tool: {err}"),
                })
            }
        }
    }

}

/// Build `ScanFailure`, publish it as the terminal payload event, and
/// hand it back for persistence routing.
fn deliver_failure(
    job: &JobHandle,
    kind: FailureKind,
    message: String,
    tool_exit_code: Option<i32>,
    partial: Option<ScanResult>,
) -> JobOutcome {
    let failure = Arc::new(ScanFailure {
        job_id: job.id(),
        kind,
        message,
        tool_exit_code,
        partial,
    });
    job.emit_terminal(ScanEvent::Failed(Arc::clone(&failure)));
    JobOutcome::Failed(failure)
}

/// Profile argument template + machine-readable output flags + periodic
/// task-progress reports, target last.
fn build_arguments(profile: &ScanProfile, target: &str) -> Vec<String> {
    let mut args = profile.tool_arguments.clone();
    args.push("-oX".to_string());
    args.push("-".to_string());
    args.push("--stats-every".to_string());
    args.push("2s".to_string());
    args.push(target.to_string());
    args
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max;
    // Avoid splitting a UTF-8 sequence.
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(0);
    format!("...{}", &trimmed[start..])
}
