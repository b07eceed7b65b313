//! strongSwan backend driven through the `ipsec` control script.
//!
//! `connect` spawns `ipsec up <conn>` as a child process and captures its
//! output lines in the background; `status` returns those lines followed by
//! `ipsec statusall <conn>`. The child is the session's process handle and
//! is killed on disconnect or drop.
//!
//! With an [`L2tpDriver`] attached, an installed IPsec `CHILD_SA` is only
//! the transport: the driver then dials the generated `[lac]` through
//! xl2tpd, and the status text carries the xl2tpd/pppd output instead of
//! the IPsec "established" lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::DaemonBackend;
use crate::classify::{CONNECT_EXITED, SignalKind, classify};
use crate::command::{ControlCommand, DEFAULT_COMMAND_TIMEOUT, Program, capture_output, kill_and_reap};
use crate::error::{DaemonError, Result};
use crate::generator::ConfigBundle;
use crate::l2tp::{L2tpDriver, without_transport_ready};

/// How long to wait for a freshly started daemon to answer `ipsec status`.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between readiness checks after launch.
const READY_POLL: Duration = Duration::from_millis(200);

/// A running `ipsec up` invocation.
struct UpSession {
    connection: String,
    child: Child,
    log: Arc<Mutex<Vec<String>>>,
    readers: Vec<JoinHandle<()>>,
}

impl UpSession {
    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    /// Exit status of `ipsec up` if it failed and all of its output has
    /// been captured.
    fn failed_exit(&mut self) -> Option<std::process::ExitStatus> {
        if !self.readers.iter().all(JoinHandle::is_finished) {
            return None;
        }
        match self.child.try_wait() {
            Ok(Some(status)) if !status.success() => Some(status),
            _ => None,
        }
    }
}

/// Backend for a local strongSwan installation.
pub struct StrongSwanBackend {
    program_path: Option<String>,
    command_timeout: Duration,
    session: Option<UpSession>,
    l2tp: Option<L2tpDriver>,
    l2tp_config: Option<PathBuf>,
}

impl StrongSwanBackend {
    /// Backend using `ipsec` from `PATH`, IPsec only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program_path: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            session: None,
            l2tp: None,
            l2tp_config: None,
        }
    }

    /// Use a specific `ipsec` binary.
    #[must_use]
    pub fn with_program_path(mut self, path: impl Into<String>) -> Self {
        self.program_path = Some(path.into());
        self
    }

    /// Bounded wait applied to every control command.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Layer an L2TP/PPP session on the IPsec transport.
    #[must_use]
    pub fn with_l2tp(mut self, driver: L2tpDriver) -> Self {
        self.l2tp = Some(driver);
        self
    }

    fn ipsec(&self) -> ControlCommand {
        ControlCommand::new(Program::Ipsec)
            .with_program_path(self.program_path.as_deref())
            .timeout(self.command_timeout)
    }

    async fn kill_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort_readers();
            kill_and_reap(&mut session.child, self.command_timeout, "ipsec up").await;
        }
    }

    async fn stop_l2tp(&mut self) {
        if let Some(driver) = self.l2tp.as_mut() {
            driver.stop().await;
        }
    }

    /// Dial L2TP once the transport is up and swap the IPsec readiness
    /// lines for the xl2tpd/pppd output.
    async fn layer_l2tp(&mut self, connection: &str, ipsec_text: String) -> Result<String> {
        let (Some(driver), Some(config)) = (self.l2tp.as_mut(), self.l2tp_config.as_deref()) else {
            return Ok(ipsec_text);
        };

        let transport_up =
            classify(&ipsec_text).is_some_and(|signal| signal.kind == SignalKind::Established);
        if transport_up && !driver.is_dialed(connection) {
            driver
                .dial(config, connection)
                .await
                .map_err(|e| DaemonError::status(format!("l2tp dial failed: {e}")))?;
        }

        let mut text = without_transport_ready(&ipsec_text);
        for line in driver.lines() {
            text.push_str(&line);
            text.push('\n');
        }
        Ok(text)
    }
}

impl Default for StrongSwanBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `ipsec statusall` output lists `connection` as a loaded config.
fn lists_connection(statusall: &str, connection: &str) -> bool {
    let header = format!("{connection}:");
    statusall
        .lines()
        .any(|line| line.trim_start().starts_with(&header))
}

impl DaemonBackend for StrongSwanBackend {
    fn name(&self) -> &'static str {
        "strongswan"
    }

    async fn launch(&mut self) -> Result<()> {
        if self.is_running().await {
            return Ok(());
        }

        self.ipsec().arg("start").execute().await?;

        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.is_running().await {
                info!("strongswan daemon started");
                return Ok(());
            }
            tokio::time::sleep(READY_POLL).await;
        }

        Err(DaemonError::command_timeout(
            "ipsec status",
            READY_TIMEOUT.as_millis() as u64,
        ))
    }

    async fn is_running(&mut self) -> bool {
        matches!(
            self.ipsec().arg("status").execute_unchecked().await,
            Ok(output) if output.success()
        )
    }

    async fn reload(&mut self, bundle: &ConfigBundle) -> Result<()> {
        debug!(config = %bundle.config_path.display(), "reloading strongswan configuration");

        self.ipsec()
            .arg("rereadsecrets")
            .execute()
            .await
            .map_err(|e| DaemonError::config_load(format!("secrets rejected: {e}")))?;

        self.ipsec()
            .arg("reload")
            .execute()
            .await
            .map_err(|e| DaemonError::config_load(format!("configuration rejected: {e}")))?;

        self.l2tp_config = Some(bundle.l2tp_path.clone());
        Ok(())
    }

    async fn has_connection(&mut self, connection: &str) -> Result<bool> {
        let output = self
            .ipsec()
            .arg("statusall")
            .execute()
            .await
            .map_err(|e| DaemonError::config_load(format!("cannot list connections: {e}")))?;
        Ok(lists_connection(&output.stdout_lossy(), connection))
    }

    async fn connect(&mut self, connection: &str) -> Result<()> {
        self.kill_session().await;
        self.stop_l2tp().await;

        let mut child = self
            .ipsec()
            .args(["up", connection])
            .spawn()
            .map_err(|e| DaemonError::bring_up(connection, e.to_string()))?;

        let log = Arc::new(Mutex::new(Vec::new()));
        let readers = capture_output(&mut child, &log);

        self.session = Some(UpSession {
            connection: connection.to_string(),
            child,
            log,
            readers,
        });
        Ok(())
    }

    async fn status(&mut self, connection: &str) -> Result<String> {
        let mut text = String::new();

        if let Some(session) = self.session.as_mut().filter(|s| s.connection == connection) {
            for line in session.log.lock().iter() {
                text.push_str(line);
                text.push('\n');
            }
            if let Some(status) = session.failed_exit() {
                text.push_str(&format!("{CONNECT_EXITED} ({status})\n"));
            }
        }

        let output = self
            .ipsec()
            .args(["statusall", connection])
            .execute_unchecked()
            .await
            .map_err(|e| DaemonError::status(e.to_string()))?;
        text.push_str(&output.stdout_lossy());

        self.layer_l2tp(connection, text).await
    }

    async fn disconnect(&mut self, connection: &str) -> Result<()> {
        self.stop_l2tp().await;
        let result = self.ipsec().args(["down", connection]).execute().await;
        self.kill_session().await;
        result.map(|_| ())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stop_l2tp().await;
        self.kill_session().await;
        self.l2tp_config = None;
        self.ipsec().arg("stop").execute().await?;
        info!("strongswan daemon stopped");
        Ok(())
    }

    async fn is_installed(&self) -> bool {
        matches!(
            self.ipsec().arg("--version").execute_unchecked().await,
            Ok(output) if output.success()
        )
    }
}
