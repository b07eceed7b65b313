//! End-to-end monitor flow tests.
//!
//! These drive the scheduler and test cycle against the simulated daemon:
//! 1. Generate configuration for each server
//! 2. Start the daemon, load, bring the tunnel up
//! 3. Classify the daemon's status output
//! 4. Tear down, stop, and record the outcome

use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use vpnmon::{ReachabilityProbe, Scheduler, SchedulerReport, TestCycle};
use vpnmon_daemon::{
    ConfigGenerator, DaemonController, DaemonState, RetryPolicy, ServerTarget, SimCall, SimHandle,
    SimulatedDaemon, TunnelMonitor,
};
use vpnmon_store::{ErrorKind, MemoryStore, MonitorIdentity, ResultStore, SqliteStore};

// ============================================================================
// Harness
// ============================================================================

const SRV1: &str = "srv1:198.51.100.10:alice:pw:key123";

/// charon's log line once the IPsec data channel is installed.
const CHILD_UP: &str = "CHILD_SA vpnmon-srv1{1} established with SPIs c1a2b3c4_i c5d6e7f8_o";

struct FixedProbe(bool);

impl ReachabilityProbe for FixedProbe {
    async fn is_reachable(&self, _host: &str, _timeout: Duration) -> bool {
        self.0
    }
}

fn identity() -> MonitorIdentity {
    MonitorIdentity {
        computer_identifier: "probe-1".to_string(),
        system_username: "vpnmon".to_string(),
        operating_system: "Linux 6.1.0".to_string(),
        monitor_version: vpnmon::VERSION.to_string(),
    }
}

fn target(record: &str) -> ServerTarget {
    ServerTarget::parse(record).expect("valid server record")
}

/// A scheduler with a 15s deadline, the given poll interval, and fast retries.
fn scheduler(
    config_dir: &Path,
    sim: SimulatedDaemon,
    poll: Duration,
) -> Scheduler<SimulatedDaemon, FixedProbe> {
    let controller = DaemonController::new(sim).with_retry_policy(RetryPolicy {
        initial_delay: Duration::from_millis(10),
        ..RetryPolicy::default()
    });
    let cycle = TestCycle::new(
        ConfigGenerator::new(config_dir),
        TunnelMonitor::new(poll),
        Duration::from_secs(15),
        identity(),
        FixedProbe(true),
    )
    .with_public_ip(Some("203.0.113.7".to_string()));
    Scheduler::new(controller, cycle)
}

async fn single_pass(
    config_dir: &Path,
    sim: SimulatedDaemon,
    targets: &[ServerTarget],
    store: &dyn ResultStore,
) -> SchedulerReport {
    scheduler(config_dir, sim, Duration::from_millis(100))
        .run(targets, Duration::ZERO, store, &CancellationToken::new())
        .await
}

fn no_generated_files(config_dir: &Path) -> bool {
    std::fs::read_dir(config_dir)
        .map(|entries| entries.count() == 0)
        .unwrap_or(true)
}

/// The daemon is never launched while a previous launch is still running.
fn assert_exclusive(handle: &SimHandle) {
    let mut running = false;
    for call in handle.calls() {
        match call {
            SimCall::Launch => {
                assert!(!running, "daemon launched while already running");
                running = true;
            }
            SimCall::Shutdown => running = false,
            _ => {}
        }
    }
    assert!(!running, "daemon left running");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn established_tunnel_records_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new()
        .emit_after(Duration::from_millis(400), "initiating Main Mode IKE_SA vpnmon-srv1[1]")
        .emit_after(Duration::from_millis(1200), CHILD_UP);
    let handle = sim.handle();
    let store = MemoryStore::new();

    let report = single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

    assert_eq!(report.successes, 1);
    let results = store.results();
    assert_eq!(results.len(), 1);
    let outcome = &results[0];
    assert!(outcome.success);
    assert_eq!(outcome.connection_time_ms, Some(1200));
    assert_eq!(outcome.error_message, None);
    assert_eq!(outcome.server_name, "srv1");
    assert_eq!(outcome.server_host, "198.51.100.10");
    assert_eq!(outcome.public_ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(handle.shutdowns(), 1);
    assert!(no_generated_files(dir.path()));
}


#[tokio::test(start_paused = true)]
async fn phase_one_without_child_sa_is_not_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new()
        .emit_after(
            Duration::from_millis(500),
            "IKE_SA vpnmon-srv1[1] established between 10.0.0.2[10.0.0.2]...198.51.100.10[198.51.100.10]",
        )
        .emit_after(Duration::from_millis(550), "initiating Quick Mode CHILD_SA vpnmon-srv1{1}")
        .emit_after(Duration::from_millis(750), "received NO_PROPOSAL_CHOSEN error notify")
        .emit_after(Duration::from_millis(760), "establishing connection 'vpnmon-srv1' failed");
    let store = MemoryStore::new();

    let report = single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

    assert_eq!(report.failures, 1);
    let results = store.results();
    assert_eq!(results[0].error_kind, Some(ErrorKind::ProposalMismatch));
}

#[tokio::test(start_paused = true)]
async fn connection_missing_from_daemon_is_config_error_not_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new()
        .emit_after(Duration::from_millis(50), "no config named 'vpnmon-srv1'");
    let store = MemoryStore::new();

    let begin = Instant::now();
    let report = single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

    assert_eq!(report.failures, 1);
    let results = store.results();
    assert_eq!(results[0].error_kind, Some(ErrorKind::ConfigError));
    assert!(begin.elapsed() < Duration::from_secs(1));
}
#[tokio::test(start_paused = true)]
async fn authentication_failure_is_classified_and_cleaned_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new()
        .emit_after(Duration::from_millis(300), "authentication failed for peer");
    let handle = sim.handle();
    let store = MemoryStore::new();

    let report = single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

    assert_eq!(report.failures, 1);
    let outcome = &store.results()[0];
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::AuthFailed));
    assert_eq!(outcome.connection_time_ms, Some(300));
    assert!(!handle.is_running());
    assert_eq!(handle.shutdowns(), 1);
    assert!(no_generated_files(dir.path()));
}

#[tokio::test(start_paused = true)]
async fn silent_daemon_times_out_at_the_deadline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_secs(20), CHILD_UP);
    let store = MemoryStore::new();
    let begin = Instant::now();

    scheduler(dir.path(), sim, Duration::from_secs(1))
        .run(&[target(SRV1)], Duration::ZERO, &store, &CancellationToken::new())
        .await;

    let outcome = &store.results()[0];
    assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
    let elapsed = outcome.connection_time_ms.expect("elapsed recorded");
    assert!((15_000..=16_000).contains(&elapsed), "elapsed {elapsed}ms");
    assert!(begin.elapsed() < Duration::from_secs(17));
}

#[tokio::test(start_paused = true)]
async fn auth_failure_beats_later_retransmit_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new()
        .emit_after(Duration::from_millis(200), "received AUTHENTICATION_FAILED notify error")
        .emit_after(Duration::from_millis(250), "giving up after 5 retransmits");
    let store = MemoryStore::new();

    single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

    assert_eq!(store.results()[0].error_kind, Some(ErrorKind::AuthFailed));
}

// ============================================================================
// Cleanup guarantees
// ============================================================================

#[tokio::test(start_paused = true)]
async fn daemon_stopped_once_whichever_step_fails() {
    let cases: Vec<(&str, SimulatedDaemon, ErrorKind)> = vec![
        ("launch", SimulatedDaemon::new().fail_launches(5), ErrorKind::DaemonError),
        ("load", SimulatedDaemon::new().reject_config(), ErrorKind::ConfigError),
        ("connect", SimulatedDaemon::new().fail_connect(), ErrorKind::DaemonError),
        ("status", SimulatedDaemon::new().fail_status(), ErrorKind::Timeout),
        (
            "disconnect",
            SimulatedDaemon::new()
                .fail_disconnect()
                .emit_after(Duration::from_millis(100), "no proposal chosen"),
            ErrorKind::ProposalMismatch,
        ),
    ];

    for (step, sim, expected) in cases {
        let dir = tempfile::tempdir().expect("tempdir");
        let handle = sim.handle();
        let store = MemoryStore::new();

        let report = single_pass(dir.path(), sim, &[target(SRV1)], &store).await;

        assert_eq!(report.cycles, 1, "{step}");
        assert_eq!(store.results()[0].error_kind, Some(expected), "{step}");
        assert_eq!(handle.shutdowns(), 1, "{step}: stop must run exactly once");
        assert!(no_generated_files(dir.path()), "{step}: stale files");
    }
}

#[tokio::test(start_paused = true)]
async fn config_write_failure_stops_daemon_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let not_a_dir = dir.path().join("ipsec.d");
    std::fs::write(&not_a_dir, b"").expect("write");
    let sim = SimulatedDaemon::new();
    let handle = sim.handle();
    let store = MemoryStore::new();

    single_pass(&not_a_dir, sim, &[target(SRV1)], &store).await;

    assert_eq!(store.results()[0].error_kind, Some(ErrorKind::ConfigError));
    assert_eq!(handle.launches(), 0);
    assert_eq!(handle.shutdowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn servers_are_tested_one_at_a_time_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_millis(500), CHILD_UP);
    let handle = sim.handle();
    let store = MemoryStore::new();
    let targets = [
        target("srv1:198.51.100.10:alice:pw:key123"),
        target("srv2:198.51.100.11:bob:pw2:key456"),
        target("edge:198.51.100.20"),
        target("srv3:198.51.100.12:carol:pw3:key789"),
    ];

    let report = single_pass(dir.path(), sim, &targets, &store).await;

    assert_eq!(report.cycles, 4);
    assert_eq!(report.successes, 4);
    assert_eq!(handle.launches(), 3);
    assert_exclusive(&handle);

    let recorded: Vec<_> = store
        .recent_results(10)
        .expect("read")
        .into_iter()
        .rev()
        .map(|o| o.server_name)
        .collect();
    assert_eq!(recorded, ["srv1", "srv2", "edge", "srv3"]);
}

// ============================================================================
// Scheduling and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn zero_interval_runs_each_target_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_millis(100), CHILD_UP);
    let store = MemoryStore::new();
    let targets = [target(SRV1), target("edge:198.51.100.20")];

    let report = single_pass(dir.path(), sim, &targets, &store).await;

    assert_eq!(report.passes, 1);
    assert_eq!(report.cycles, 2);
    assert!(!report.cancelled);
    assert_eq!(store.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_sleep_is_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_millis(100), CHILD_UP);
    let handle = sim.handle();
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let mut scheduler = scheduler(dir.path(), sim, Duration::from_secs(1));

    let trigger = cancel.clone();
    let cancelled_at = tokio::spawn(async move {
        sleep(Duration::from_secs(30)).await;
        trigger.cancel();
        Instant::now()
    });

    let report = scheduler
        .run(&[target(SRV1)], Duration::from_secs(300), &store, &cancel)
        .await;
    let finished_at = Instant::now();
    let cancelled_at = cancelled_at.await.expect("trigger task");

    assert!(report.cancelled);
    assert_eq!(report.passes, 1);
    assert!(finished_at - cancelled_at < Duration::from_secs(2));
    assert!(!handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_cycle_cleans_up_without_recording() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_secs(20), CHILD_UP);
    let handle = sim.handle();
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let mut scheduler = scheduler(dir.path(), sim, Duration::from_secs(1));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let report = scheduler
        .run(&[target(SRV1)], Duration::from_secs(300), &store, &cancel)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.cycles, 0);
    assert!(store.is_empty());
    assert_eq!(handle.shutdowns(), 1);
    assert_eq!(scheduler.controller().state(), DaemonState::Stopped);
    assert!(no_generated_files(dir.path()));
}

// ============================================================================
// Recording
// ============================================================================

#[tokio::test(start_paused = true)]
async fn store_write_failure_does_not_stop_the_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_millis(100), CHILD_UP);
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let targets = [target(SRV1), target("edge:198.51.100.20")];

    let report = single_pass(dir.path(), sim, &targets, &store).await;

    assert_eq!(report.cycles, 2);
    assert_eq!(report.recording_errors, 2);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sqlite_heartbeat_counts_every_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_dir = dir.path().join("ipsec.d");
    std::fs::create_dir_all(&config_dir).expect("mkdir");
    let store = SqliteStore::open(dir.path().join("db/results.db")).expect("open");
    let sim = SimulatedDaemon::new().emit_after(Duration::from_millis(100), CHILD_UP);
    let targets = [target(SRV1), target("edge:198.51.100.20")];

    single_pass(&config_dir, sim, &targets, &store).await;

    let instance = store
        .monitor_instance("probe-1", "vpnmon")
        .expect("query")
        .expect("heartbeat row");
    assert_eq!(instance.total_tests_run, 2);
    assert_eq!(instance.monitor_version, vpnmon::VERSION);

    let results = store.recent_results(10).expect("query");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].server_name, "edge");
    assert_eq!(results[1].server_name, "srv1");
    assert!(results.iter().all(|o| o.success));
}
