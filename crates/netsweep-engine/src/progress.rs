//! Heuristic per-job progress derivation.
//!
//! Percent is coarse and heuristic: the best of the tool's own task
//! estimate, an elapsed-time estimate against the profile's expected
//! duration, and a hosts-completed ratio when the target cardinality is
//! known up front. Published values never decrease for a job; a new
//! estimate below the last published one is discarded. 100 is reserved
//! for terminal states.

use crate::events::ProgressUpdate;
use crate::parser::ParseObservation;
use netsweep_core::JobId;
use std::time::{Duration, Instant};

/// Elapsed-time estimates never claim more than this; only real signals
/// (tool estimate, host ratio) can push higher, and 100 is terminal-only.
const ELAPSED_CAP: f64 = 95.0;
const RUNNING_CAP: f64 = 99.0;

/// Derives monotonically non-decreasing progress for one job.
pub struct ProgressAggregator {
    job_id: JobId,
    started: Instant,
    expected: Duration,
    cardinality: u64,
    hosts_completed: u64,
    tool_percent: f64,
    current_task: Option<String>,
    last_published: Option<u8>,
}

impl ProgressAggregator {
    /// New aggregator for a job.
    ///
    /// `expected` is the profile's expected duration; `cardinality` the
    /// number of addresses the target expands to (1 for a single host).
    #[must_use]
    pub fn new(job_id: JobId, expected: Duration, cardinality: u64) -> Self {
        Self {
            job_id,
            started: Instant::now(),
            expected,
            cardinality: cardinality.max(1),
            hosts_completed: 0,
            tool_percent: 0.0,
            current_task: None,
            last_published: None,
        }
    }

    /// Fold in a partial-structure observation from the parser.
    pub fn observe(&mut self, observation: &ParseObservation) {
        match observation {
            ParseObservation::HostCompleted { .. } => self.hosts_completed += 1,
            ParseObservation::TaskProgress { percent, task } => {
                // The tool restarts its estimate per task phase; only a
                // higher figure moves ours.
                self.tool_percent = self.tool_percent.max(f64::from(*percent));
                if !task.is_empty() {
                    self.current_task = Some(task.clone());
                }
            }
            ParseObservation::HostDiscovered => {}
        }
    }

    /// Current estimate, ignoring monotonicity.
    fn estimate(&self) -> u8 {
        let elapsed = self.started.elapsed().as_secs_f64();
        let expected = self.expected.as_secs_f64().max(f64::EPSILON);
        let by_time = (elapsed / expected * 100.0).min(ELAPSED_CAP);

        #[allow(clippy::cast_precision_loss)]
        let by_hosts = if self.cardinality > 1 {
            self.hosts_completed as f64 / self.cardinality as f64 * 100.0
        } else {
            0.0
        };

        let percent = self.tool_percent.max(by_time).max(by_hosts).min(RUNNING_CAP);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            percent.max(0.0) as u8
        }
    }

    /// Produce the next update if the estimate moved forward.
    ///
    /// Returns `None` when the new estimate does not exceed the last
    /// published value (the monotonic clamp).
    pub fn update(&mut self) -> Option<ProgressUpdate> {
        let percent = self.estimate();
        if let Some(last) = self.last_published {
            if percent <= last {
                return None;
            }
        }
        self.last_published = Some(percent);
        Some(ProgressUpdate {
            job_id: self.job_id,
            percent,
            status_text: self.status_text(percent),
        })
    }

    /// The terminal 100% update.
    #[must_use]
    pub fn finish(&mut self) -> ProgressUpdate {
        self.last_published = Some(100);
        ProgressUpdate {
            job_id: self.job_id,
            percent: 100,
            status_text: "scan complete".to_string(),
        }
    }

    fn status_text(&self, percent: u8) -> String {
        if let Some(task) = &self.current_task {
            return format!("{task} ({percent}%)");
        }
        if self.cardinality > 1 {
            return format!(
                "scanned {} of {} addresses",
                self.hosts_completed, self.cardinality
            );
        }
        format!("scanning ({percent}%)")
    }
}
