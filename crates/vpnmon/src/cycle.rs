//! One complete test of one server.
//!
//! For a tunnel target the sequence is: generate configuration, start the
//! daemon, load the configuration, bring the connection up, and wait for a
//! definitive status. Whatever happens, the cycle then tears the connection
//! down, stops the daemon exactly once and removes the generated files
//! before the outcome is recorded.
//!
//! Connectivity-only targets skip the daemon and are probed instead.

use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vpnmon_daemon::{
    ConfigGenerator, DaemonBackend, DaemonController, DaemonError, ServerTarget, TunnelMonitor,
    TunnelResult, TunnelState,
};
use vpnmon_store::{ErrorKind, MonitorIdentity, ResultStore, StoreError, TestOutcome};

use crate::probe::ReachabilityProbe;

/// What happened to one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The outcome was measured and stored.
    Recorded(TestOutcome),
    /// The outcome was measured but could not be stored.
    RecordFailed {
        /// The measured outcome.
        outcome: TestOutcome,
        /// Why the store rejected it.
        error: StoreError,
    },
    /// Shutdown interrupted the cycle; nothing was recorded.
    Cancelled,
}

impl CycleOutcome {
    /// The measured outcome, if the cycle ran to completion.
    #[must_use]
    pub fn outcome(&self) -> Option<&TestOutcome> {
        match self {
            Self::Recorded(outcome) | Self::RecordFailed { outcome, .. } => Some(outcome),
            Self::Cancelled => None,
        }
    }
}

enum Attempt {
    Settled(TunnelResult),
    Failed(ErrorKind, DaemonError),
    Cancelled,
}

/// Runs test cycles with fixed settings.
pub struct TestCycle<P> {
    generator: ConfigGenerator,
    monitor: TunnelMonitor,
    timeout: Duration,
    identity: MonitorIdentity,
    public_ip: Option<String>,
    probe: P,
}

impl<P: ReachabilityProbe> TestCycle<P> {
    /// Create a cycle runner.
    #[must_use]
    pub fn new(
        generator: ConfigGenerator,
        monitor: TunnelMonitor,
        timeout: Duration,
        identity: MonitorIdentity,
        probe: P,
    ) -> Self {
        Self {
            generator,
            monitor,
            timeout,
            identity,
            public_ip: None,
            probe,
        }
    }

    /// Tag outcomes with the monitor's public address.
    #[must_use]
    pub fn with_public_ip(mut self, public_ip: Option<String>) -> Self {
        self.public_ip = public_ip;
        self
    }

    /// Per-attempt deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Test `target` and record the outcome.
    ///
    /// Store failures are logged and reported, never propagated.
    pub async fn run<B: DaemonBackend>(
        &self,
        controller: &mut DaemonController<B>,
        target: &ServerTarget,
        store: &dyn ResultStore,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let Some(outcome) = self.execute(controller, target, cancel).await else {
            info!(server = %target.name, "cycle interrupted by shutdown, not recorded");
            return CycleOutcome::Cancelled;
        };

        if outcome.success {
            info!(
                server = %target.name,
                connection_time_ms = outcome.connection_time_ms,
                "connected successfully"
            );
        } else {
            warn!(
                server = %target.name,
                error = outcome.error_message.as_deref().unwrap_or_default(),
                "test failed"
            );
        }

        match record_outcome(store, &outcome) {
            Ok(()) => CycleOutcome::Recorded(outcome),
            Err(error) => {
                error!(server = %target.name, error = %error, "failed to record result");
                CycleOutcome::RecordFailed { outcome, error }
            }
        }
    }

    /// Test `target` without recording.
    ///
    /// Returns `None` if shutdown was requested before an outcome was
    /// reached. Cleanup has completed by the time this returns.
    pub async fn execute<B: DaemonBackend>(
        &self,
        controller: &mut DaemonController<B>,
        target: &ServerTarget,
        cancel: &CancellationToken,
    ) -> Option<TestOutcome> {
        info!(server = %target.name, host = %target.host, "testing VPN server");

        let pending = TestOutcome::new(
            &self.identity,
            self.public_ip.as_deref(),
            &target.name,
            &target.host,
        );

        if target.is_connectivity_only() {
            return self.probe_only(target, pending, cancel).await;
        }

        let connection = target.connection_name();
        let attempt = self.attempt(controller, target, &connection, cancel).await;

        controller.tear_down(&connection).await;
        if let Err(e) = controller.stop().await {
            warn!(server = %target.name, error = %e, "daemon stop reported an error");
        }
        if let Err(e) = self.generator.bundle_for(target).remove() {
            warn!(server = %target.name, error = %e, "generated files could not be removed");
        }

        match attempt {
            Attempt::Cancelled => None,
            Attempt::Failed(kind, e) => Some(pending.failed(kind, e, None)),
            Attempt::Settled(result) => Some(settled_outcome(pending, result)),
        }
    }

    async fn attempt<B: DaemonBackend>(
        &self,
        controller: &mut DaemonController<B>,
        target: &ServerTarget,
        connection: &str,
        cancel: &CancellationToken,
    ) -> Attempt {
        let bundle = match self.generator.generate(target) {
            Ok(bundle) => bundle,
            Err(e) => return Attempt::Failed(ErrorKind::ConfigError, e),
        };

        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }
        match controller.start_with_cancel(cancel).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Attempt::Cancelled,
            Err(e) => return Attempt::Failed(ErrorKind::DaemonError, e),
        }

        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }
        if let Err(e) = controller.load_config(&bundle).await {
            return Attempt::Failed(daemon_error_kind(&e), e);
        }

        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }
        let started_at = Instant::now();
        if let Err(e) = controller.bring_up(connection, started_at + self.timeout).await {
            return Attempt::Failed(ErrorKind::DaemonError, e);
        }

        let result = self
            .monitor
            .await_established(controller, connection, started_at, self.timeout, cancel)
            .await;
        match result.state {
            TunnelState::Cancelled => Attempt::Cancelled,
            _ => Attempt::Settled(result),
        }
    }

    async fn probe_only(
        &self,
        target: &ServerTarget,
        pending: TestOutcome,
        cancel: &CancellationToken,
    ) -> Option<TestOutcome> {
        let started_at = Instant::now();
        let reachable = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            reachable = self.probe.is_reachable(&target.host, self.timeout) => reachable,
        };
        let elapsed_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        Some(if reachable {
            pending.succeeded(elapsed_ms)
        } else {
            pending.failed(ErrorKind::Unreachable, &target.host, Some(elapsed_ms))
        })
    }
}

/// Store writes are synchronous. On a multi-threaded runtime the worker is
/// handed over for the duration of the write so other tasks keep running;
/// on a current-thread runtime the write simply blocks.
fn record_outcome(store: &dyn ResultStore, outcome: &TestOutcome) -> Result<(), StoreError> {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| store.record(outcome)),
        _ => store.record(outcome),
    }
}

fn daemon_error_kind(error: &DaemonError) -> ErrorKind {
    if error.is_config_error() {
        ErrorKind::ConfigError
    } else {
        ErrorKind::DaemonError
    }
}

fn settled_outcome(pending: TestOutcome, result: TunnelResult) -> TestOutcome {
    let detail = result.detail.unwrap_or_else(|| result.state.to_string());
    let elapsed = Some(result.elapsed_ms);
    match result.state {
        TunnelState::Established => pending.succeeded(result.elapsed_ms),
        TunnelState::AuthFailed => pending.failed(ErrorKind::AuthFailed, detail, elapsed),
        TunnelState::ProposalMismatch => {
            pending.failed(ErrorKind::ProposalMismatch, detail, elapsed)
        }
        TunnelState::Unreachable => pending.failed(ErrorKind::Unreachable, detail, elapsed),
        TunnelState::ConfigRejected => pending.failed(ErrorKind::ConfigError, detail, elapsed),
        TunnelState::TimedOut | TunnelState::Cancelled => {
            pending.failed(ErrorKind::Timeout, detail, elapsed)
        }
    }
}
