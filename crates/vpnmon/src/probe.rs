//! Reachability checks for connectivity-only servers.

use std::time::Duration;

use tracing::debug;
use vpnmon_daemon::command::{ControlCommand, Program};

/// Checks whether a host answers at all.
#[allow(async_fn_in_trait)]
pub trait ReachabilityProbe: Send + Sync {
    /// Whether `host` answered within `timeout`.
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool;
}

/// One ICMP echo through the system `ping`.
#[derive(Debug, Clone, Default)]
pub struct PingProbe {
    program_path: Option<String>,
}

impl PingProbe {
    /// Probe using `ping` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `ping` binary.
    #[must_use]
    pub fn with_program_path(mut self, path: impl Into<String>) -> Self {
        self.program_path = Some(path.into());
        self
    }

    fn command(&self, host: &str, timeout: Duration) -> ControlCommand {
        let wait_secs = timeout.as_secs().max(1).to_string();
        ControlCommand::new(Program::Ping)
            .with_program_path(self.program_path.as_deref())
            .args(["-c", "1", "-W", wait_secs.as_str(), host])
            .timeout(timeout + Duration::from_secs(1))
    }
}

impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool {
        match self.command(host, timeout).execute_unchecked().await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(host, error = %e, "ping could not run");
                false
            }
        }
    }
}
