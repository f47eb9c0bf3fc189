//! End-to-end engine tests against a scripted tool double.
//!
//! No real subprocess is spawned; `FakeSpawner` plays back canned XML
//! chunks with optional delays, exit codes, and stderr, exercising the
//! full coordinator → executor → parser → events pipeline.

use async_trait::async_trait;
use netsweep_core::{FailureKind, HostStatus, PortProtocol, PortState, ScanRequest};
use netsweep_engine::{
    ExecutorOptions, JobState, JobSubscription, ResultSink, RunningTool, ScanCoordinator,
    ScanEvent, ToolExit, ToolHandle, ToolSpawner,
};
use netsweep_profiles::ProfileRegistry;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FULL_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -T4 -F 192.168.1.1" start="1700000000" version="7.94">
<taskprogress task="SYN Stealth Scan" time="1700000001" percent="48.50" remaining="2"/>
<host starttime="1700000000" endtime="1700000002">
<status state="up" reason="syn-ack"/>
<address addr="192.168.1.1" addrtype="ipv4"/>
<hostnames>
<hostname name="gateway.lan" type="PTR"/>
</hostnames>
<ports>
<port protocol="tcp" portid="80">
<state state="open" reason="syn-ack" reason_ttl="64"/>
<service name="http" product="nginx" version="1.24.0" method="probed"/>
</port>
<port protocol="tcp" portid="22">
<state state="closed" reason="reset"/>
<service name="ssh"/>
</port>
</ports>
</host>
<runstats>
<finished time="1700000003" timestr="now" summary="1 IP address (1 host up) scanned in 1.52 seconds" elapsed="1.52"/>
<hosts up="1" down="0" total="1"/>
</runstats>
</nmaprun>
"#;

/// One scripted playback of the tool for one spawn.
#[derive(Clone)]
struct Script {
    /// (delay, bytes) pairs returned by successive stdout reads.
    chunks: Vec<(Duration, Vec<u8>)>,
    /// After the chunks: hold stdout open until terminated, or close it.
    hang_after_chunks: bool,
    exit_code: Option<i32>,
    stderr: String,
}

impl Script {
    fn success(xml: &str) -> Self {
        Self {
            chunks: vec![(Duration::ZERO, xml.as_bytes().to_vec())],
            hang_after_chunks: false,
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            chunks: Vec::new(),
            hang_after_chunks: false,
            exit_code: Some(exit_code),
            stderr: stderr.to_string(),
        }
    }

    fn hanging(prefix: &str) -> Self {
        Self {
            chunks: vec![(Duration::ZERO, prefix.as_bytes().to_vec())],
            hang_after_chunks: true,
            exit_code: Some(1),
            stderr: String::new(),
        }
    }
}

struct FakeTool {
    script: Script,
    next_chunk: usize,
    stopped: CancellationToken,
}

#[async_trait]
impl RunningTool for FakeTool {
    async fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some((delay, bytes)) = self.script.chunks.get(self.next_chunk) {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            self.next_chunk += 1;
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            return Ok(n);
        }
        if self.script.hang_after_chunks {
            // Stdout stays open until the process is stopped.
            self.stopped.cancelled().await;
        }
        Ok(0)
    }

    async fn wait(&mut self) -> io::Result<ToolExit> {
        Ok(ToolExit {
            code: self.script.exit_code,
            stderr: self.script.stderr.clone(),
        })
    }

    async fn terminate(&mut self) {
        self.stopped.cancel();
    }

    async fn kill(&mut self) {
        self.stopped.cancel();
    }
}

/// Hands out one scripted tool per spawn, in order, and counts spawns.
struct FakeSpawner {
    scripts: Mutex<Vec<Script>>,
    spawned: AtomicUsize,
    seen_args: Mutex<Vec<Vec<String>>>,
}

impl FakeSpawner {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts),
            spawned: AtomicUsize::new(0),
            seen_args: Mutex::new(Vec::new()),
        })
    }

    fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSpawner for FakeSpawner {
    async fn spawn(&self, _program: &Path, args: &[String]) -> io::Result<Box<dyn RunningTool>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.seen_args.lock().unwrap().push(args.to_vec());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "no script left"));
        }
        let script = scripts.remove(0);
        Ok(Box::new(FakeTool {
            script,
            next_chunk: 0,
            stopped: CancellationToken::new(),
        }))
    }
}

/// Records how often each sink method was hit.
#[derive(Default)]
struct CountingSink {
    results: AtomicUsize,
    failures: AtomicUsize,
}

#[async_trait]
impl ResultSink for CountingSink {
    async fn store_result(
        &self,
        _request: &ScanRequest,
        _result: &netsweep_core::ScanResult,
    ) -> anyhow::Result<()> {
        self.results.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn store_failure(
        &self,
        _request: &ScanRequest,
        _failure: &netsweep_core::ScanFailure,
    ) -> anyhow::Result<()> {
        self.failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opt-in tracing for debugging test failures (`RUST_LOG=debug`).
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn test_options() -> ExecutorOptions {
    ExecutorOptions {
        max_concurrent_scans: 4,
        cancel_grace: Duration::from_millis(100),
        min_os_confidence: 70,
        elevated: false,
    }
}

fn coordinator_with(
    spawner: Arc<FakeSpawner>,
    sink: Option<Arc<dyn ResultSink>>,
    options: ExecutorOptions,
) -> Arc<ScanCoordinator> {
    let tool = ToolHandle {
        path: PathBuf::from("/usr/bin/nmap"),
        version: "7.94".to_string(),
    };
    ScanCoordinator::with_tool(tool, Arc::new(ProfileRegistry::new()), spawner, sink, options)
}

/// Collect every event up to and including the terminal payload.
async fn collect_events(mut rx: JobSubscription) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for job events")
            .expect("event channel closed before terminal event");
        let terminal = matches!(event, ScanEvent::Completed(_) | ScanEvent::Failed(_));
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn states(events: &[ScanEvent]) -> Vec<JobState> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_connect_fails_when_tool_absent() {
    init_tracing();
    let mut config = netsweep_core::AppConfig::default();
    config.tool.binary = "definitely-not-a-real-scanner".to_string();
    config.tool.path = None;

    let spawner = FakeSpawner::new(Vec::new());
    let result = ScanCoordinator::connect(
        &config,
        Arc::new(ProfileRegistry::new()),
        spawner,
        None,
    )
    .await;
    assert!(matches!(
        result,
        Err(netsweep_engine::EngineError::ToolNotFound { .. })
    ));
}

#[tokio::test]
async fn test_successful_quick_scan() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC)]);
    let coordinator = coordinator_with(Arc::clone(&spawner), None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    assert_eq!(
        states(&events),
        vec![JobState::Pending, JobState::Running, JobState::Succeeded]
    );
    assert_eq!(coordinator.job_state(job_id), Some(JobState::Succeeded));
    assert_eq!(spawner.spawn_count(), 1);

    let result = match events.last().expect("terminal event") {
        ScanEvent::Completed(result) => Arc::clone(result),
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(result.job_id, job_id);
    assert!(!result.truncated);
    assert_eq!(result.hosts.len(), 1);
    assert_eq!(
        result.summary.as_deref(),
        Some("1 IP address (1 host up) scanned in 1.52 seconds")
    );

    let host = &result.hosts[0];
    assert_eq!(host.address, "192.168.1.1");
    assert_eq!(host.status, HostStatus::Up);
    assert!(host.hostnames.contains("gateway.lan"));
    assert_eq!(host.ports.len(), 2);
    let http = &host.ports[0];
    assert_eq!(http.number, 80);
    assert_eq!(http.protocol, PortProtocol::Tcp);
    assert_eq!(http.state, PortState::Open);
    assert_eq!(http.service_name.as_deref(), Some("http"));
    assert_eq!(http.service_version.as_deref(), Some("nginx 1.24.0"));

    // The tool was invoked with the profile's arguments, target last.
    let args = spawner.seen_args.lock().unwrap()[0].clone();
    assert_eq!(args[0], "-T4");
    assert_eq!(args[1], "-F");
    assert!(args.contains(&"-oX".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("192.168.1.1"));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_caps_at_terminal() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC)]);
    let coordinator = coordinator_with(spawner, None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress(update) => Some(update.percent),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
    assert_eq!(*percents.last().expect("progress"), 100);
    // 100 appears only once, at the end.
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
}

#[tokio::test]
async fn test_privileged_profile_refused_before_spawn() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC)]);
    let coordinator = coordinator_with(Arc::clone(&spawner), None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "os_detection")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    assert_eq!(
        states(&events),
        vec![JobState::Pending, JobState::PermissionDenied]
    );
    assert_eq!(spawner.spawn_count(), 0, "tool must not be spawned");

    let failure = match events.last().expect("terminal event") {
        ScanEvent::Failed(failure) => Arc::clone(failure),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert_eq!(failure.kind, FailureKind::PermissionDenied);
    assert!(failure.partial.is_none());
}

#[tokio::test]
async fn test_privileged_profile_allowed_when_elevated() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC)]);
    let options = test_options().with_elevated(true);
    let coordinator = coordinator_with(Arc::clone(&spawner), None, options);

    let job_id = coordinator
        .submit_str("192.168.1.1", "os_detection")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    assert_eq!(coordinator.job_state(job_id), Some(JobState::Succeeded));
    assert_eq!(spawner.spawn_count(), 1);
    assert!(matches!(events.last(), Some(ScanEvent::Completed(_))));
}

#[tokio::test]
async fn test_late_privilege_refusal_from_stderr() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::failure(
        1,
        "You requested a scan type which requires root privileges.\nQUITTING!",
    )]);
    let coordinator = coordinator_with(spawner, None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    assert_eq!(
        coordinator.job_state(job_id),
        Some(JobState::PermissionDenied)
    );
    let failure = match events.last().expect("terminal event") {
        ScanEvent::Failed(failure) => Arc::clone(failure),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert_eq!(failure.kind, FailureKind::PermissionDenied);
    assert_eq!(failure.tool_exit_code, Some(1));
}

#[tokio::test]
async fn test_tool_failure_carries_stderr() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::failure(
        1,
        "Failed to resolve \"nosuchhost.invalid\".",
    )]);
    let coordinator = coordinator_with(spawner, None, test_options());

    let job_id = coordinator
        .submit_str("10.1.2.3", "ping")
        .expect("valid request");
    let events = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;

    assert_eq!(coordinator.job_state(job_id), Some(JobState::Failed));
    let failure = match events.last().expect("terminal event") {
        ScanEvent::Failed(failure) => Arc::clone(failure),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert_eq!(failure.kind, FailureKind::Process);
    assert!(failure.message.contains("Failed to resolve"));
    assert_eq!(failure.tool_exit_code, Some(1));
}

#[tokio::test]
async fn test_duplicate_submission_returns_running_job() {
    init_tracing();
    // First script never finishes on its own; second serves the resubmit.
    let spawner = FakeSpawner::new(vec![
        Script::hanging("<?xml version=\"1.0\"?>\n<nmaprun scanner=\"nmap\">\n"),
        Script::success(FULL_DOC),
    ]);
    let coordinator = coordinator_with(Arc::clone(&spawner), None, test_options());
    let request = ScanRequest::parse("192.168.1.1", "quick").expect("valid request");

    let first = coordinator.submit(request.clone());
    let second = coordinator.submit(request.clone());
    assert_eq!(first, second, "live duplicate must coalesce");

    let rx = coordinator.subscribe(first).expect("job exists");
    // Let the job spawn its (hanging) tool before cancelling, so the
    // resubmit gets the second script.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.cancel(first));
    let _ = collect_events(rx).await;
    assert_eq!(coordinator.job_state(first), Some(JobState::Cancelled));

    // The pair is submittable again once the first job is terminal.
    let third = coordinator.submit(request);
    assert_ne!(first, third);
    let _ = collect_events(coordinator.subscribe(third).expect("job exists")).await;
    assert_eq!(coordinator.job_state(third), Some(JobState::Succeeded));
    assert_eq!(spawner.spawn_count(), 2);
}

#[tokio::test]
async fn test_cancel_preserves_partial_results() {
    init_tracing();
    // One complete host, then the stream stalls.
    let cut = FULL_DOC.find("<runstats>").expect("fixture has runstats");
    let spawner = FakeSpawner::new(vec![Script::hanging(&FULL_DOC[..cut])]);
    let coordinator = coordinator_with(spawner, None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let rx = coordinator.subscribe(job_id).expect("job exists");

    // Let the job pick up the first chunk before cancelling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.cancel(job_id));
    let events = collect_events(rx).await;

    assert_eq!(coordinator.job_state(job_id), Some(JobState::Cancelled));
    let failure = match events.last().expect("terminal event") {
        ScanEvent::Failed(failure) => Arc::clone(failure),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert_eq!(failure.kind, FailureKind::Cancelled);
    let partial = failure.partial.as_ref().expect("salvaged partial result");
    assert!(partial.truncated);
    assert_eq!(partial.hosts.len(), 1);
    assert_eq!(partial.hosts[0].address, "192.168.1.1");

    // Cancelling a terminal job is a no-op.
    assert!(!coordinator.cancel(job_id));
}

#[tokio::test]
async fn test_terminal_outcome_reaches_sink_exactly_once() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![
        Script::success(FULL_DOC),
        Script::failure(1, "boom"),
    ]);
    let sink = Arc::new(CountingSink::default());
    let coordinator = coordinator_with(
        spawner,
        Some(Arc::clone(&sink) as Arc<dyn ResultSink>),
        test_options(),
    );

    let ok_job = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let _ = collect_events(coordinator.subscribe(ok_job).expect("job exists")).await;

    let bad_job = coordinator
        .submit_str("192.168.1.2", "quick")
        .expect("valid request");
    let _ = collect_events(coordinator.subscribe(bad_job).expect("job exists")).await;

    // The sink runs on the job's background task after the terminal
    // event; yield until it settles.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(sink.results.load(Ordering::SeqCst), 1);
    assert_eq!(sink.failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrency_cap_queues_excess_jobs() {
    init_tracing();
    let mut scripts = Vec::new();
    for _ in 0..3 {
        scripts.push(Script {
            chunks: vec![(Duration::from_millis(30), FULL_DOC.as_bytes().to_vec())],
            hang_after_chunks: false,
            exit_code: Some(0),
            stderr: String::new(),
        });
    }
    let spawner = FakeSpawner::new(scripts);
    let options = ExecutorOptions {
        max_concurrent_scans: 1,
        ..test_options()
    };
    let coordinator = coordinator_with(Arc::clone(&spawner), None, options);

    let jobs: Vec<_> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        .iter()
        .map(|target| coordinator.submit_str(target, "quick").expect("valid request"))
        .collect();
    let receivers: Vec<_> = jobs
        .iter()
        .map(|id| coordinator.subscribe(*id).expect("job exists"))
        .collect();

    for rx in receivers {
        let _ = collect_events(rx).await;
    }
    for id in jobs {
        assert_eq!(coordinator.job_state(id), Some(JobState::Succeeded));
    }
    assert_eq!(spawner.spawn_count(), 3);
}

#[tokio::test]
async fn test_cancel_while_queued_never_spawns() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![
        Script::hanging("<?xml version=\"1.0\"?>\n"),
        Script::success(FULL_DOC),
    ]);
    let options = ExecutorOptions {
        max_concurrent_scans: 1,
        ..test_options()
    };
    let coordinator = coordinator_with(Arc::clone(&spawner), None, options);

    let running = coordinator
        .submit_str("10.0.0.1", "quick")
        .expect("valid request");
    let running_rx = coordinator.subscribe(running).expect("job exists");
    // Let the first job take the only permit before the second arrives.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let queued = coordinator
        .submit_str("10.0.0.2", "quick")
        .expect("valid request");
    let queued_rx = coordinator.subscribe(queued).expect("job exists");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.cancel(queued));
    let events = collect_events(queued_rx).await;
    assert_eq!(coordinator.job_state(queued), Some(JobState::Cancelled));
    let failure = match events.last().expect("terminal event") {
        ScanEvent::Failed(failure) => Arc::clone(failure),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert!(failure.partial.is_none());

    assert!(coordinator.cancel(running));
    let _ = collect_events(running_rx).await;

    // Only the first job ever reached the spawner.
    assert_eq!(spawner.spawn_count(), 1);
}

#[tokio::test]
async fn test_subscription_after_completion_replays_outcome() {
    init_tracing();
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC)]);
    let coordinator = coordinator_with(spawner, None, test_options());

    let job_id = coordinator
        .submit_str("192.168.1.1", "quick")
        .expect("valid request");
    let _ = collect_events(coordinator.subscribe(job_id).expect("job exists")).await;
    assert_eq!(coordinator.job_state(job_id), Some(JobState::Succeeded));

    // A subscription opened after the job finished must not block: the
    // current state and the terminal payload are replayed.
    let late = coordinator.subscribe(job_id).expect("job exists");
    let events = tokio::time::timeout(Duration::from_secs(1), collect_events(late))
        .await
        .expect("late subscriber must not block");
    assert_eq!(states(&events), vec![JobState::Succeeded]);
    match events.last().expect("terminal event") {
        ScanEvent::Completed(result) => assert_eq!(result.hosts.len(), 1),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_finished_job_handles_are_bounded() {
    init_tracing();
    let total = 70;
    let spawner = FakeSpawner::new(vec![Script::success(FULL_DOC); total]);
    let coordinator = coordinator_with(Arc::clone(&spawner), None, test_options());

    let mut receivers = Vec::new();
    for i in 0..total {
        let target = format!("10.1.0.{}", i + 1);
        let job_id = coordinator
            .submit_str(&target, "ping")
            .expect("valid request");
        receivers.push(coordinator.subscribe(job_id).expect("job exists"));
    }
    for rx in receivers {
        let _ = collect_events(rx).await;
    }

    // Finished handles are evicted oldest-first past the retention
    // bound; everything left is terminal.
    let retained = coordinator.jobs();
    assert_eq!(retained.len(), 64);
    assert!(retained.iter().all(|job| job.state().is_terminal()));
    assert_eq!(spawner.spawn_count(), total);
}
