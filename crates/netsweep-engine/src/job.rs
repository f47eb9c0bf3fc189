//! Per-job handle: state, cancellation token, event channel.

use crate::events::{JobState, ScanEvent};
use chrono::{DateTime, Utc};
use netsweep_core::{JobId, ScanRequest};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Channel depth per job. Slow subscribers that lag past this many
/// buffered events observe a `Lagged` error, not engine backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable lifecycle record, guarded as one unit so state transitions,
/// terminal-payload retention, and subscription snapshots serialize
/// against each other.
#[derive(Debug)]
struct Lifecycle {
    state: JobState,
    finished_at: Option<DateTime<Utc>>,
    terminal_payload: Option<ScanEvent>,
}

/// One in-flight or completed scan invocation.
///
/// The handle is shared between the coordinator (cancel, subscribe,
/// state queries) and the executor worker, which is the only writer of
/// the lifecycle state. Terminal states are final.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    request: ScanRequest,
    started_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
    events: broadcast::Sender<ScanEvent>,
}

impl JobHandle {
    /// Create a new job in the `Pending` state.
    #[must_use]
    pub fn new(request: ScanRequest) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: JobId::generate(),
            request,
            started_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: JobState::Pending,
                finished_at: None,
                terminal_payload: None,
            }),
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// The job's unique identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The request this job was created for.
    #[must_use]
    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// When the job was accepted.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the job reached a terminal state, if it has.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().expect("lifecycle lock").finished_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.lifecycle.lock().expect("lifecycle lock").state
    }

    /// A clone of the job's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to this job's event stream.
    ///
    /// The job's current state is replayed first, and a job that already
    /// finished replays its terminal payload too, so a late subscriber
    /// observes the outcome instead of waiting on a channel that will
    /// never fire again. Snapshot and live delivery are serialized
    /// against state transitions, so no event is duplicated or lost at
    /// the boundary.
    #[must_use]
    pub fn subscribe(&self) -> JobSubscription {
        let lifecycle = self.lifecycle.lock().expect("lifecycle lock");
        let rx = self.events.subscribe();
        let mut replay = VecDeque::new();
        replay.push_back(ScanEvent::StateChanged {
            job_id: self.id,
            state: lifecycle.state,
        });
        if let Some(payload) = &lifecycle.terminal_payload {
            replay.push_back(payload.clone());
        }
        JobSubscription { replay, rx }
    }

    /// Request cancellation.
    ///
    /// Idempotent on terminal jobs: returns `false` without effect when
    /// the job has already finished, `true` when a cancellation was
    /// actually signalled.
    pub fn request_cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Move the job to a new state and publish the transition.
    ///
    /// Transitions out of a terminal state are ignored.
    pub(crate) fn set_state(&self, new: JobState) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock");
        if lifecycle.state.is_terminal() || lifecycle.state == new {
            return;
        }
        lifecycle.state = new;
        if new.is_terminal() {
            lifecycle.finished_at = Some(Utc::now());
        }
        let _ = self.events.send(ScanEvent::StateChanged {
            job_id: self.id,
            state: new,
        });
    }

    /// Publish the terminal payload and retain it for late subscribers.
    ///
    /// Exactly one payload is ever published; a second call is ignored.
    pub(crate) fn emit_terminal(&self, event: ScanEvent) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock");
        if lifecycle.terminal_payload.is_some() {
            return;
        }
        lifecycle.terminal_payload = Some(event.clone());
        let _ = self.events.send(event);
    }

    /// Publish a non-terminal event; a send error just means nobody is
    /// listening.
    pub(crate) fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }
}

/// A per-job event subscription.
///
/// Yields the snapshot taken at subscription time first, then live
/// events from the job's channel.
#[derive(Debug)]
pub struct JobSubscription {
    replay: VecDeque<ScanEvent>,
    rx: broadcast::Receiver<ScanEvent>,
}

impl JobSubscription {
    /// Receive the next event, waiting if none is ready.
    pub async fn recv(&mut self) -> Result<ScanEvent, broadcast::error::RecvError> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(event);
        }
        self.rx.recv().await
    }

    /// Receive the next event without waiting.
    pub fn try_recv(&mut self) -> Result<ScanEvent, broadcast::error::TryRecvError> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(event);
        }
        self.rx.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsweep_core::ScanResult;
    use std::sync::Arc;

    fn request() -> ScanRequest {
        ScanRequest::parse("192.168.1.1", "quick").unwrap()
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = JobHandle::new(request());
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.finished_at().is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let job = JobHandle::new(request());
        job.set_state(JobState::Running);
        job.set_state(JobState::Succeeded);
        assert_eq!(job.state(), JobState::Succeeded);
        job.set_state(JobState::Failed);
        assert_eq!(job.state(), JobState::Succeeded);
        assert!(job.finished_at().is_some());
    }

    #[test]
    fn test_cancel_of_terminal_job_is_noop() {
        let job = JobHandle::new(request());
        assert!(job.request_cancel());
        job.set_state(JobState::Cancelled);
        assert!(!job.request_cancel());
    }

    #[tokio::test]
    async fn test_state_events_in_order() {
        let job = JobHandle::new(request());
        let mut rx = job.subscribe();
        job.set_state(JobState::Running);
        job.set_state(JobState::Succeeded);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ScanEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![JobState::Pending, JobState::Running, JobState::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_terminal_outcome() {
        let job = JobHandle::new(request());
        job.set_state(JobState::Running);
        job.set_state(JobState::Succeeded);
        let result = Arc::new(ScanResult {
            job_id: job.id(),
            hosts: Vec::new(),
            duration_ms: 10,
            summary: None,
            truncated: false,
        });
        job.emit_terminal(ScanEvent::Completed(Arc::clone(&result)));

        // A subscriber arriving after the fact still sees the outcome.
        let mut rx = job.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Ok(ScanEvent::StateChanged {
                state: JobState::Succeeded,
                ..
            })
        ));
        match rx.try_recv() {
            Ok(ScanEvent::Completed(replayed)) => assert_eq!(replayed.job_id, result.job_id),
            other => panic!("expected Completed replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_payload_published_once() {
        let job = JobHandle::new(request());
        let mut rx = job.subscribe();
        job.set_state(JobState::Succeeded);
        let result = Arc::new(ScanResult {
            job_id: job.id(),
            hosts: Vec::new(),
            duration_ms: 10,
            summary: None,
            truncated: false,
        });
        job.emit_terminal(ScanEvent::Completed(Arc::clone(&result)));
        job.emit_terminal(ScanEvent::Completed(result));

        let mut payloads = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ScanEvent::Completed(_)) {
                payloads += 1;
            }
        }
        assert_eq!(payloads, 1);
    }
}
