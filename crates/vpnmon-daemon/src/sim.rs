//! In-process daemon simulator for tests and dry runs.
//!
//! [`SimulatedDaemon`] replays a script of status lines relative to the
//! moment `connect` was called, and can be told to fail any lifecycle
//! step. Every call is recorded in a shared journal so tests can assert on
//! exactly which operations ran, and how often, even after the simulator
//! has been moved into a controller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::backend::DaemonBackend;
use crate::error::{DaemonError, Result};
use crate::generator::ConfigBundle;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    /// `launch`
    Launch,
    /// `reload`
    Reload,
    /// `connect(connection)`
    Connect(String),
    /// `status(connection)`
    Status,
    /// `disconnect(connection)`
    Disconnect(String),
    /// `shutdown`
    Shutdown,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<SimCall>,
    running: bool,
}

/// Shared view of a simulator's journal.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    journal: Arc<Mutex<Journal>>,
}

impl SimHandle {
    /// All calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SimCall> {
        self.journal.lock().calls.clone()
    }

    /// How many times a given call was made.
    #[must_use]
    pub fn count(&self, call: &SimCall) -> usize {
        self.journal.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of `shutdown` calls.
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.count(&SimCall::Shutdown)
    }

    /// Number of `launch` calls.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.count(&SimCall::Launch)
    }

    /// Whether the simulated daemon process is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.journal.lock().running
    }

    /// Forget all recorded calls.
    pub fn clear(&self) {
        self.journal.lock().calls.clear();
    }
}

/// A scripted stand-in for the external daemon.
#[derive(Debug, Default)]
pub struct SimulatedDaemon {
    handle: SimHandle,
    events: Vec<(Duration, String)>,
    launch_failures: u32,
    reject_config: bool,
    forget_config: bool,
    fail_connect: bool,
    fail_status: bool,
    fail_disconnect: bool,
    status_delay: Option<Duration>,
    launch_delay: Option<Duration>,
    not_installed: bool,
    connected_at: Option<Instant>,
    connection: Option<String>,
}

impl SimulatedDaemon {
    /// A daemon that starts, loads, connects and then stays silent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `line` in the status output once `after` has elapsed since connect.
    #[must_use]
    pub fn emit_after(mut self, after: Duration, line: impl Into<String>) -> Self {
        self.events.push((after, line.into()));
        self.events.sort_by_key(|(at, _)| *at);
        self
    }

    /// Fail the first `n` launch attempts.
    #[must_use]
    pub fn fail_launches(mut self, n: u32) -> Self {
        self.launch_failures = n;
        self
    }

    /// Reject every configuration reload.
    #[must_use]
    pub fn reject_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    /// Accept every reload without ever learning the connection, as a
    /// daemon whose main configuration does not include the generated file.
    #[must_use]
    pub fn forget_config(mut self) -> Self {
        self.forget_config = true;
        self
    }

    /// Fail the connect command.
    #[must_use]
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Fail every status read.
    #[must_use]
    pub fn fail_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    /// Fail every disconnect.
    #[must_use]
    pub fn fail_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    /// Make every status read take `delay`.
    #[must_use]
    pub fn hang_status(mut self, delay: Duration) -> Self {
        self.status_delay = Some(delay);
        self
    }

    /// Make every launch wait `delay` before the daemon is ready.
    #[must_use]
    pub fn slow_launch(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Report the control binary as missing.
    #[must_use]
    pub fn not_installed(mut self) -> Self {
        self.not_installed = true;
        self
    }

    /// Handle for inspecting calls after the simulator is moved.
    #[must_use]
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    fn record(&self, call: SimCall) {
        self.handle.journal.lock().calls.push(call);
    }

    fn set_running(&self, running: bool) {
        self.handle.journal.lock().running = running;
    }
}

impl DaemonBackend for SimulatedDaemon {
    fn name(&self) -> &'static str {
        "simulator"
    }

    async fn launch(&mut self) -> Result<()> {
        self.record(SimCall::Launch);
        if self.handle.is_running() {
            return Ok(());
        }
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.launch_failures > 0 {
            self.launch_failures -= 1;
            return Err(DaemonError::command_failed(
                "simulated start",
                1,
                "charon refused to start",
            ));
        }
        self.set_running(true);
        Ok(())
    }

    async fn is_running(&mut self) -> bool {
        self.handle.is_running()
    }

    async fn reload(&mut self, _bundle: &ConfigBundle) -> Result<()> {
        self.record(SimCall::Reload);
        if self.reject_config {
            return Err(DaemonError::config_load("simulated daemon rejected configuration"));
        }
        Ok(())
    }

    async fn has_connection(&mut self, _connection: &str) -> Result<bool> {
        Ok(!self.forget_config)
    }

    async fn connect(&mut self, connection: &str) -> Result<()> {
        self.record(SimCall::Connect(connection.to_string()));
        if self.fail_connect {
            return Err(DaemonError::bring_up(connection, "simulated connect failure"));
        }
        self.connected_at = Some(Instant::now());
        self.connection = Some(connection.to_string());
        Ok(())
    }

    async fn status(&mut self, connection: &str) -> Result<String> {
        self.record(SimCall::Status);
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_status {
            return Err(DaemonError::status("simulated status failure"));
        }

        let Some(connected_at) = self
            .connected_at
            .filter(|_| self.connection.as_deref() == Some(connection))
        else {
            return Ok(String::new());
        };

        let elapsed = connected_at.elapsed();
        let mut text = String::new();
        for (at, line) in &self.events {
            if *at <= elapsed {
                text.push_str(line);
                text.push('\n');
            }
        }
        Ok(text)
    }

    async fn disconnect(&mut self, connection: &str) -> Result<()> {
        self.record(SimCall::Disconnect(connection.to_string()));
        self.connected_at = None;
        self.connection = None;
        if self.fail_disconnect {
            return Err(DaemonError::command_failed(
                "simulated down",
                1,
                "no connection to tear down",
            ));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record(SimCall::Shutdown);
        self.connected_at = None;
        self.connection = None;
        self.set_running(false);
        Ok(())
    }

    async fn is_installed(&self) -> bool {
        !self.not_installed
    }
}
