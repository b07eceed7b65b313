//! Deadline-bounded polling of tunnel status.
//!
//! [`TunnelMonitor::await_established`] reads the daemon's status at a fixed
//! interval and stops at the first definitive signal, at the deadline, or
//! as soon as the cancellation token fires. Every status read is itself
//! bounded by the time left, so the call never overshoots the deadline by
//! more than one poll interval.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::DaemonBackend;
use crate::classify::{SignalKind, classify};
use crate::controller::DaemonController;
use crate::state::DaemonState;

/// Default interval between status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Final state of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// The tunnel came up.
    Established,
    /// The peer rejected our credentials.
    AuthFailed,
    /// No cipher proposal acceptable to both sides.
    ProposalMismatch,
    /// The peer could not be reached.
    Unreachable,
    /// The daemon did not know the connection.
    ConfigRejected,
    /// No definitive signal before the deadline.
    TimedOut,
    /// Shutdown was requested while waiting.
    Cancelled,
}

impl TunnelState {
    /// Whether the tunnel was established.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Established)
    }
}

impl From<SignalKind> for TunnelState {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Established => Self::Established,
            SignalKind::AuthFailed => Self::AuthFailed,
            SignalKind::ProposalMismatch => Self::ProposalMismatch,
            SignalKind::Unreachable => Self::Unreachable,
            SignalKind::ConfigRejected => Self::ConfigRejected,
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Established => write!(f, "established"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::ProposalMismatch => write!(f, "proposal mismatch"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::ConfigRejected => write!(f, "configuration rejected"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of [`TunnelMonitor::await_established`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResult {
    /// How the attempt ended.
    pub state: TunnelState,
    /// Milliseconds from the connect command to the outcome.
    pub elapsed_ms: u64,
    /// The status line that decided the outcome, or a description.
    pub detail: Option<String>,
}

/// Polls daemon status until a connection settles.
#[derive(Debug, Clone)]
pub struct TunnelMonitor {
    poll_interval: Duration,
}

impl Default for TunnelMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl TunnelMonitor {
    /// Monitor polling every `poll_interval`.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// The configured poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait for `connection` to be established, fail definitively, or time out.
    ///
    /// `started_at` is when the connect command was issued; both the
    /// deadline and the reported elapsed time are measured from it.
    pub async fn await_established<B: DaemonBackend>(
        &self,
        controller: &mut DaemonController<B>,
        connection: &str,
        started_at: Instant,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TunnelResult {
        let deadline = started_at + timeout;
        let mut polls = 0u32;
        let mut last_error: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return cancelled(started_at);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let read_budget = self.poll_interval.min(deadline - now);
            polls += 1;

            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(started_at),
                read = tokio::time::timeout(read_budget, controller.status(connection)) => read,
            };

            match read {
                Ok(Ok(text)) => {
                    if let Some(signal) = classify(&text) {
                        let state = TunnelState::from(signal.kind);
                        let elapsed_ms = elapsed_ms(started_at);
                        controller.settle(if state.is_success() {
                            DaemonState::Established
                        } else {
                            DaemonState::Failed
                        });
                        info!(connection, %state, elapsed_ms, polls, "tunnel settled");
                        return TunnelResult {
                            state,
                            elapsed_ms,
                            detail: Some(signal.line),
                        };
                    }
                }
                Ok(Err(e)) => {
                    debug!(connection, error = %e, "status read failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(
                        connection,
                        budget_ms = read_budget.as_millis() as u64,
                        "status read timed out"
                    );
                }
            }

            let next = (now + self.poll_interval).min(deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(started_at),
                () = tokio::time::sleep_until(next) => {}
            }
        }

        controller.settle(DaemonState::TimedOut);
        let elapsed_ms = elapsed_ms(started_at);
        warn!(connection, elapsed_ms, polls, "no definitive tunnel status before deadline");

        let mut detail = format!("no definitive status within {}ms", timeout.as_millis());
        if let Some(error) = last_error {
            detail.push_str(&format!(" (last status error: {error})"));
        }

        TunnelResult {
            state: TunnelState::TimedOut,
            elapsed_ms,
            detail: Some(detail),
        }
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn cancelled(started_at: Instant) -> TunnelResult {
    TunnelResult {
        state: TunnelState::Cancelled,
        elapsed_ms: elapsed_ms(started_at),
        detail: Some("shutdown requested".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ConfigGenerator;
    use crate::sim::SimulatedDaemon;
    use crate::target::ServerTarget;

    const CONNECTION: &str = "vpnmon-srv1";

    async fn connected(
        sim: SimulatedDaemon,
        dir: &std::path::Path,
    ) -> (DaemonController<SimulatedDaemon>, Instant) {
        let target = ServerTarget::new("srv1", "198.51.100.10", "alice", "pw", "key123");
        let bundle = ConfigGenerator::new(dir).generate(&target).expect("generate");
        let mut controller = DaemonController::new(sim);
        controller.start().await.expect("start");
        controller.load_config(&bundle).await.expect("load");
        let started_at = Instant::now();
        controller
            .bring_up(CONNECTION, started_at + Duration::from_secs(60))
            .await
            .expect("bring up");
        (controller, started_at)
    }

    #[tokio::test(start_paused = true)]
    async fn test_established_reports_elapsed_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new()
            .emit_after(Duration::from_millis(400), "initiating Main Mode IKE_SA")
            .emit_after(Duration::from_millis(900), "IKE_SA vpnmon-srv1[1] established between 10.0.0.2[10.0.0.2]...198.51.100.10[198.51.100.10]")
            .emit_after(Duration::from_millis(1200), "CHILD_SA vpnmon-srv1{1} established with SPIs c1a2b3c4_i c5d6e7f8_o");
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_millis(100))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::Established);
        assert_eq!(result.elapsed_ms, 1200);
        assert_eq!(controller.state(), DaemonState::Established);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new().emit_after(
            Duration::from_millis(300),
            "received AUTHENTICATION_FAILED error notify",
        );
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_millis(100))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::AuthFailed);
        assert_eq!(result.elapsed_ms, 300);
        assert_eq!(controller.state(), DaemonState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_beats_later_retransmit_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new()
            .emit_after(Duration::ZERO, "authentication of '198.51.100.10' with pre-shared key failed")
            .emit_after(Duration::ZERO, "giving up after 5 retransmits");
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::default()
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::AuthFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_one_up_then_quick_mode_rejected_is_proposal_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new()
            .emit_after(
                Duration::from_millis(500),
                "IKE_SA vpnmon-srv1[1] established between 10.0.0.2[10.0.0.2]...198.51.100.10[198.51.100.10]",
            )
            .emit_after(Duration::from_millis(550), "initiating Quick Mode CHILD_SA vpnmon-srv1{1}")
            .emit_after(Duration::from_millis(750), "received NO_PROPOSAL_CHOSEN error notify")
            .emit_after(Duration::from_millis(760), "establishing connection 'vpnmon-srv1' failed");
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_millis(100))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::ProposalMismatch);
        assert_eq!(result.elapsed_ms, 800);
        assert_eq!(controller.state(), DaemonState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_connection_fails_without_waiting_for_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new()
            .emit_after(Duration::from_millis(50), "no config named 'vpnmon-srv1'");
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_millis(100))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::ConfigRejected);
        assert_eq!(result.elapsed_ms, 100);
        assert_eq!(controller.state(), DaemonState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline_not_later_signal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new()
            .emit_after(Duration::from_secs(20), "CHILD_SA vpnmon-srv1{1} established with SPIs c1a2b3c4_i c5d6e7f8_o");
        let (mut controller, started_at) = connected(sim, dir.path()).await;
        let poll = Duration::from_secs(1);
        let timeout = Duration::from_secs(15);

        let result = TunnelMonitor::new(poll)
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                timeout,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::TimedOut);
        assert!(result.elapsed_ms >= 15_000);
        assert!(result.elapsed_ms <= (timeout + poll).as_millis() as u64);
        assert_eq!(controller.state(), DaemonState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_status_reads_are_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new().hang_status(Duration::from_secs(30));
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_secs(1))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(3),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::TimedOut);
        assert!(result.elapsed_ms <= 4_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_errors_end_in_timeout_with_detail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = SimulatedDaemon::new().fail_status();
        let (mut controller, started_at) = connected(sim, dir.path()).await;

        let result = TunnelMonitor::new(Duration::from_millis(500))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.state, TunnelState::TimedOut);
        let detail = result.detail.expect("detail");
        assert!(detail.contains("last status error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_polling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, started_at) = connected(SimulatedDaemon::new(), dir.path()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result = TunnelMonitor::new(Duration::from_secs(1))
            .await_established(
                &mut controller,
                CONNECTION,
                started_at,
                Duration::from_secs(30),
                &cancel,
            )
            .await;

        assert_eq!(result.state, TunnelState::Cancelled);
        assert!(result.elapsed_ms < 3_000);
    }

    #[test]
    fn test_state_from_signal() {
        assert_eq!(TunnelState::from(SignalKind::AuthFailed), TunnelState::AuthFailed);
        assert!(TunnelState::from(SignalKind::Established).is_success());
        assert!(!TunnelState::TimedOut.is_success());
        assert_eq!(
            TunnelState::from(SignalKind::ConfigRejected),
            TunnelState::ConfigRejected
        );
    }
}
