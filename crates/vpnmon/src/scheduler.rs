//! Drives test cycles over the server list.
//!
//! Servers are tested strictly one at a time, in configuration order. A
//! pass covers every server once; with a non-zero interval the scheduler
//! sleeps and starts another pass until shutdown is requested.

use std::fmt;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpnmon_daemon::{DaemonBackend, DaemonController, DaemonState, ServerTarget};
use vpnmon_store::ResultStore;

use crate::cycle::{CycleOutcome, TestCycle};
use crate::probe::ReachabilityProbe;

/// Where the scheduler is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started.
    Idle,
    /// Testing the server at this index.
    RunningCycle(usize),
    /// Waiting for the next pass.
    Sleeping,
    /// Shutting down; making sure the daemon is stopped.
    Draining,
    /// Finished.
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RunningCycle(index) => write!(f, "running cycle {index}"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Totals accumulated over a scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Passes that reached every server.
    pub passes: u64,
    /// Cycles that produced an outcome.
    pub cycles: u64,
    /// Successful outcomes.
    pub successes: u64,
    /// Failed outcomes.
    pub failures: u64,
    /// Outcomes the store could not record.
    pub recording_errors: u64,
    /// Whether the run ended because shutdown was requested.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct PassTally {
    successes: u64,
    failures: u64,
}

/// Owns the daemon controller and runs cycles against it.
pub struct Scheduler<B: DaemonBackend, P> {
    controller: DaemonController<B>,
    cycle: TestCycle<P>,
    state: SchedulerState,
}

impl<B: DaemonBackend, P: ReachabilityProbe> Scheduler<B, P> {
    /// Create a scheduler.
    #[must_use]
    pub fn new(controller: DaemonController<B>, cycle: TestCycle<P>) -> Self {
        Self {
            controller,
            cycle,
            state: SchedulerState::Idle,
        }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The controller this scheduler drives.
    #[must_use]
    pub fn controller(&self) -> &DaemonController<B> {
        &self.controller
    }

    /// Test `targets` until done or cancelled.
    ///
    /// An `interval` of zero runs exactly one pass. Otherwise passes repeat,
    /// separated by `interval`, until `cancel` fires. Cancellation during a
    /// sleep ends the run immediately; during a cycle it ends the run once
    /// that cycle has cleaned up.
    pub async fn run(
        &mut self,
        targets: &[ServerTarget],
        interval: Duration,
        store: &dyn ResultStore,
        cancel: &CancellationToken,
    ) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        info!(
            servers = targets.len(),
            interval_secs = interval.as_secs(),
            "scheduler starting"
        );

        loop {
            if !self.run_pass(targets, store, cancel, &mut report).await {
                break;
            }
            if interval.is_zero() {
                break;
            }

            self.state = SchedulerState::Sleeping;
            info!(interval_secs = interval.as_secs(), "waiting for next pass");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(interval) => {}
            }
        }

        self.drain().await;
        report.cancelled = cancel.is_cancelled();
        info!(
            passes = report.passes,
            cycles = report.cycles,
            successes = report.successes,
            failures = report.failures,
            recording_errors = report.recording_errors,
            cancelled = report.cancelled,
            "scheduler stopped"
        );
        report
    }

    /// One pass. Returns `false` if the pass was cut short by shutdown.
    async fn run_pass(
        &mut self,
        targets: &[ServerTarget],
        store: &dyn ResultStore,
        cancel: &CancellationToken,
        report: &mut SchedulerReport,
    ) -> bool {
        let pass = report.passes + 1;
        let mut tally = PassTally::default();
        info!(pass, servers = targets.len(), "starting test pass");

        for (index, target) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                return false;
            }
            self.state = SchedulerState::RunningCycle(index);

            let outcome = self
                .cycle
                .run(&mut self.controller, target, store, cancel)
                .await;
            if let CycleOutcome::RecordFailed { .. } = outcome {
                report.recording_errors += 1;
            }
            match outcome.outcome() {
                Some(o) if o.success => tally.successes += 1,
                Some(_) => tally.failures += 1,
                None => return false,
            }
            report.cycles += 1;
        }

        report.passes = pass;
        report.successes += tally.successes;
        report.failures += tally.failures;
        info!(
            pass,
            successful = tally.successes,
            failed = tally.failures,
            "test pass complete"
        );
        true
    }

    async fn drain(&mut self) {
        self.state = SchedulerState::Draining;
        if self.controller.state() == DaemonState::Stopped {
            debug!("daemon already stopped");
        } else if let Err(e) = self.controller.stop().await {
            warn!(error = %e, "daemon stop during shutdown failed");
        }
        self.state = SchedulerState::Stopped;
    }
}
