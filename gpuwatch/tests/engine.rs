use gpuwatch::config::RemoteConf;
use gpuwatch::render::PlainRenderer;
use gpuwatch::{ConfigFile, HostStatus, Scheduler};
use gpuwatch_devkit::{gpu, smi_output, Gate, RecordingRenderer, Step, TestHarness};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(30);

/// Sleep in small steps until `cond` holds (virtual time under a paused clock)
async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {WAIT:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_host_starts_connecting() {
    let mut harness = TestHarness::new(&["server2", "server3", "server4"]);
    let gate = Gate::new();
    for host in ["server2", "server3", "server4"] {
        harness.executor.script(host, [Step::output("").gated(&gate)]);
    }
    harness.start();

    let state = harness.read_all().unwrap();
    let hosts: Vec<&str> = state.hosts.iter().map(|s| s.host.as_str()).collect();
    assert_eq!(hosts, vec!["server2", "server3", "server4"]);
    assert!(state.hosts.iter().all(|s| s.status == HostStatus::Connecting));
    assert!(state.hosts.iter().all(|s| s.gpus.is_empty()));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_uses_initial_timeout() {
    let mut harness = TestHarness::new(&["node1"]);
    harness
        .executor
        .script("node1", [Step::output(smi_output(&[gpu(0, 5, 10, 100, 35)]))]);
    harness.start();

    let executor = harness.executor.clone();
    eventually(|| executor.calls_for("node1").len() >= 2).await;
    let calls = harness.executor.calls_for("node1");
    assert_eq!(calls[0].timeout, Duration::from_secs(4));
    assert_eq!(calls[1].timeout, Duration::from_secs(2));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_output_is_failed_without_records() {
    let mut harness = TestHarness::new(&["node1"]);
    harness
        .executor
        .script("node1", [Step::output("0, 45, 2048\nNVIDIA-SMI has failed")]);
    harness.start();

    let snapshot = harness
        .wait_for_status("node1", HostStatus::Failed, WAIT)
        .await
        .unwrap();
    assert!(snapshot.gpus.is_empty());
    assert!(snapshot.reason.as_deref().unwrap().starts_with("malformed output"));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_backoff_before_retry() {
    let mut harness = TestHarness::new(&["node1"]);
    harness.executor.script(
        "node1",
        [Step::Timeout, Step::output(smi_output(&[gpu(0, 45, 2048, 8192, 63)]))],
    );
    harness.start();

    let snapshot = harness
        .wait_for_status("node1", HostStatus::Timeout, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.reason.as_deref(), Some("SSH timed out after 4s (network/firewall?)"));
    assert!(snapshot.gpus.is_empty());

    harness
        .wait_for_status("node1", HostStatus::Ok, WAIT)
        .await
        .unwrap();

    let calls = harness.executor.calls_for("node1");
    let first_done = calls[0].finished.unwrap();
    assert_eq!(first_done - calls[0].started, Duration::from_secs(4));
    // retry waits longer than a plain refresh, still with the initial timeout
    assert!(calls[1].started - first_done > harness.config.refresh_interval);
    assert_eq!(calls[1].timeout, Duration::from_secs(4));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_backoff() {
    let mut harness = TestHarness::new(&["node1"]);
    let records = vec![gpu(0, 45, 2048, 8192, 63), gpu(1, 0, 0, 8192, 30)];
    harness.executor.script(
        "node1",
        [
            Step::fail("ssh: connect to host node1 port 22: Connection refused"),
            Step::fail("ssh: connect to host node1 port 22: Connection refused"),
            Step::output(smi_output(&records)),
        ],
    );
    harness.start();

    let failed = harness
        .wait_for_status("node1", HostStatus::Failed, WAIT)
        .await
        .unwrap();
    assert!(failed.reason.as_deref().unwrap().contains("Connection refused"));

    let ok = harness
        .wait_for_status("node1", HostStatus::Ok, WAIT)
        .await
        .unwrap();
    assert_eq!(ok.gpus, records);
    assert!(ok.reason.is_none());

    let executor = harness.executor.clone();
    eventually(|| executor.calls_for("node1").len() >= 4).await;
    let calls = harness.executor.calls_for("node1");
    let gap = |i: usize| calls[i + 1].started - calls[i].finished.unwrap();

    let ms = |d: Duration| d.as_millis();
    assert!((2000..2050).contains(&ms(gap(0))), "first backoff {:?}", gap(0));
    assert!((4000..4050).contains(&ms(gap(1))), "second backoff {:?}", gap(1));
    assert!((1000..1050).contains(&ms(gap(2))), "after recovery {:?}", gap(2));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_render_does_not_wait_for_inflight_poll() {
    let mut harness = TestHarness::new(&["node1"]);
    let gate = Gate::new();
    let before = smi_output(&[gpu(0, 10, 1024, 8192, 40)]);
    let after = smi_output(&[gpu(0, 90, 7000, 8192, 75)]);
    harness
        .executor
        .script("node1", [Step::output(before), Step::output(after).gated(&gate)]);
    harness.start();

    harness
        .wait_for_status("node1", HostStatus::Ok, WAIT)
        .await
        .unwrap();
    let executor = harness.executor.clone();
    eventually(|| executor.calls_for("node1").len() >= 2).await;

    // second query is parked on the gate; frames keep coming with the old data
    let cancel = CancellationToken::new();
    let mut renderer = RecordingRenderer::new(cancel.clone()).stop_after(3);
    let aggregator = harness.aggregator().unwrap().clone();
    let scheduler = Scheduler::new(aggregator, Duration::from_millis(200));
    let frames = scheduler.run(&mut renderer, &cancel).await.unwrap();

    assert_eq!(frames, 3);
    for frame in &renderer.frames {
        let snapshot = frame.get("node1").unwrap();
        assert_eq!(snapshot.status, HostStatus::Ok);
        assert_eq!(snapshot.gpus[0].utilization, 10);
    }

    gate.open();
    let aggregator = harness.aggregator().unwrap().clone();
    let utilization = || {
        aggregator
            .get("node1")
            .and_then(|s| s.gpus.first().map(|g| g.utilization))
    };
    eventually(|| utilization() == Some(90)).await;

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_plain_frames_follow_host_states() {
    let mut harness = TestHarness::new(&["server2", "server3"]);
    harness
        .executor
        .script("server2", [Step::output(smi_output(&[gpu(0, 45, 2048, 8192, 63)]))]);
    harness.executor.script("server3", [Step::Timeout]);
    harness.start();

    harness
        .wait_for_status("server3", HostStatus::Timeout, WAIT)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(harness.aggregator().unwrap().clone(), Duration::from_secs(1));
    let mut renderer = PlainRenderer::new(Vec::new());
    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        })
    };
    let frames = scheduler.run(&mut renderer, &cancel).await.unwrap();
    stopper.await.unwrap();

    assert_eq!(frames, 2);
    let text = String::from_utf8(renderer.into_inner()).unwrap();
    assert!(text.contains("1/2 hosts OK"));
    assert!(text.contains("server3  TIMEOUT  SSH timed out after 4s"));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_bounded_by_grace() {
    let mut harness = TestHarness::new(&["stuck", "sleeping"]);
    // never released, so the query can only end by timeout or cancellation
    let gate = Gate::new();
    harness.executor.script("stuck", [Step::output("").gated(&gate)]);
    harness
        .executor
        .script("sleeping", [Step::output(smi_output(&[gpu(0, 1, 1, 2, 30)]))]);
    harness.start();

    harness
        .wait_for_status("sleeping", HostStatus::Ok, WAIT)
        .await
        .unwrap();

    let started = Instant::now();
    harness.shutdown().await;
    let took = started.elapsed();
    let bound = Duration::from_millis(100) + Duration::from_millis(250);
    assert!(took <= bound, "shutdown took {took:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pollers_never_tear_snapshots() {
    let hosts: Vec<String> = (0..8).map(|i| format!("node{i}")).collect();
    let config = ConfigFile {
        hosts: hosts.clone(),
        refresh_interval_secs: Some(0.005),
        initial_timeout_secs: Some(2),
        steady_timeout_secs: Some(1),
        shutdown_grace_ms: Some(100),
        remote: RemoteConf {
            program: Some("true".to_string()),
            ..RemoteConf::default()
        },
        ..ConfigFile::default()
    }
    .validate()
    .unwrap();

    let mut harness = TestHarness::with_config(config);
    // every GPU of one answer carries the same value, so a mixed table is a torn read
    for host in &hosts {
        let steps = (0..50u8).map(|v| {
            let records: Vec<_> = (0..4).map(|i| gpu(i, v, v as u64, 100, 40)).collect();
            Step::output(smi_output(&records)).delayed(Duration::from_millis(1))
        });
        harness.executor.script(host, steps);
    }
    harness.start();

    let aggregator = harness.aggregator().unwrap().clone();
    let deadline = std::time::Instant::now() + Duration::from_millis(400);
    let mut reads = 0;
    while std::time::Instant::now() < deadline {
        let state = aggregator.read_all();
        assert_eq!(state.len(), hosts.len());
        for (snapshot, host) in state.hosts.iter().zip(&hosts) {
            assert_eq!(&snapshot.host, host);
            if let Some(first) = snapshot.gpus.first() {
                assert_eq!(snapshot.gpus.len(), 4);
                assert!(snapshot.gpus.iter().all(|g| {
                    g.utilization == first.utilization && g.memory_used_mib == first.memory_used_mib
                }));
            }
        }
        reads += 1;
        tokio::task::yield_now().await;
    }
    assert!(reads > 0);
    assert!(aggregator.read_all().hosts.iter().all(|s| s.status == HostStatus::Ok));

    harness.shutdown().await;
}
