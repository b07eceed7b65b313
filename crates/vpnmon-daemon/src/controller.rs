//! Lifecycle control of the single VPN daemon.
//!
//! A [`DaemonController`] owns exactly one [`DaemonBackend`] and tracks the
//! daemon's [`DaemonState`]. Callers drive it through `start`,
//! `load_config`, `bring_up`, `tear_down` and `stop`; the tunnel outcome
//! itself is observed by [`TunnelMonitor`](crate::monitor::TunnelMonitor).
//!
//! Exclusivity comes from ownership: every operation takes `&mut self`, so
//! only one test cycle can hold the daemon at a time.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::DaemonBackend;
use crate::error::{DaemonError, Result};
use crate::generator::ConfigBundle;
use crate::retry::RetryPolicy;
use crate::state::DaemonState;

/// Default bounded wait for the daemon to acknowledge a configuration reload.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration and connection currently held by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSession {
    /// Files the daemon was told to load.
    pub bundle: ConfigBundle,
    /// Whether the connect command has been issued.
    pub connected: bool,
}

/// Owner of the external daemon's lifecycle.
pub struct DaemonController<B: DaemonBackend> {
    backend: B,
    state: DaemonState,
    retry: RetryPolicy,
    load_timeout: Duration,
    session: Option<DaemonSession>,
}

impl<B: DaemonBackend> DaemonController<B> {
    /// Create a controller with the default retry policy and load timeout.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: DaemonState::Stopped,
            retry: RetryPolicy::default(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            session: None,
        }
    }

    /// Override the launch retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the bounded wait for configuration reloads.
    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// The active session, if configuration has been loaded.
    #[must_use]
    pub fn session(&self) -> Option<&DaemonSession> {
        self.session.as_ref()
    }

    /// Name of the underlying backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether the daemon's control binary is present.
    pub async fn is_installed(&self) -> bool {
        self.backend.is_installed().await
    }

    /// Launch the daemon, retrying with backoff.
    ///
    /// A no-op if the controller already considers the daemon running.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::DaemonStart`] once every attempt has failed.
    pub async fn start(&mut self) -> Result<()> {
        self.start_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), but gives up as soon as `cancel` fires,
    /// whether a launch attempt or a backoff delay is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Cancelled`] if `cancel` fired first, otherwise
    /// as for [`start`](Self::start).
    pub async fn start_with_cancel(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state.is_running() {
            debug!(state = %self.state, "daemon already running");
            return Ok(());
        }

        self.state = DaemonState::Starting;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let launched = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.start_cancelled(attempt)),
                launched = self.backend.launch() => launched,
            };
            match launched {
                Ok(()) => {
                    info!(backend = self.backend.name(), attempt, "daemon started");
                    self.state = DaemonState::Running;
                    return Ok(());
                }
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "daemon start failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(self.start_cancelled(attempt)),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    self.state = DaemonState::Stopped;
                    return Err(DaemonError::daemon_start(attempt, e.to_string()));
                }
            }
        }
    }

    fn start_cancelled(&mut self, attempt: u32) -> DaemonError {
        info!(attempt, "daemon start abandoned, shutdown requested");
        self.state = DaemonState::Stopped;
        DaemonError::Cancelled {
            operation: "start daemon",
        }
    }

    /// Tell the daemon to load the generated configuration and secrets, and
    /// confirm it now knows the bundle's connection.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::ConfigLoad`] if the daemon rejects the
    /// configuration, does not acknowledge it within the load timeout, or
    /// acknowledges it without defining the connection. Returns
    /// [`DaemonError::InvalidState`] if the daemon is not running.
    pub async fn load_config(&mut self, bundle: &ConfigBundle) -> Result<()> {
        if !self.state.is_running() {
            return Err(self.invalid_state("load configuration"));
        }

        let backend = &mut self.backend;
        let outcome = tokio::time::timeout(self.load_timeout, async {
            backend.reload(bundle).await?;
            backend.has_connection(&bundle.connection_name).await
        })
        .await;
        match outcome {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                return Err(DaemonError::config_load(format!(
                    "daemon has no connection '{}' after reload; is {} included by its main configuration?",
                    bundle.connection_name,
                    bundle.config_path.display()
                )));
            }
            Ok(Err(e @ DaemonError::ConfigLoad { .. })) => return Err(e),
            Ok(Err(e)) => return Err(DaemonError::config_load(e.to_string())),
            Err(_) => {
                return Err(DaemonError::config_load(format!(
                    "no acknowledgement within {}ms",
                    self.load_timeout.as_millis()
                )));
            }
        }

        debug!(connection = %bundle.connection_name, "configuration loaded");
        self.state = DaemonState::ConfigLoaded;
        self.session = Some(DaemonSession {
            bundle: bundle.clone(),
            connected: false,
        });
        Ok(())
    }

    /// Issue the connect command for `connection`.
    ///
    /// Returns once the command has been handed to the daemon, never later
    /// than `deadline`. Whether the tunnel actually comes up is observed
    /// separately.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::BringUp`] if the command could not be issued in
    /// time, and [`DaemonError::InvalidState`] if no configuration is loaded.
    pub async fn bring_up(&mut self, connection: &str, deadline: Instant) -> Result<()> {
        if self.state != DaemonState::ConfigLoaded {
            return Err(self.invalid_state("bring up"));
        }

        match tokio::time::timeout_at(deadline, self.backend.connect(connection)).await {
            Ok(Ok(())) => {}
            Ok(Err(e @ DaemonError::BringUp { .. })) => return Err(e),
            Ok(Err(e)) => return Err(DaemonError::bring_up(connection, e.to_string())),
            Err(_) => {
                return Err(DaemonError::bring_up(
                    connection,
                    "connect command did not return before the deadline",
                ));
            }
        }

        info!(connection, "connect command issued");
        self.state = DaemonState::Connecting;
        if let Some(session) = self.session.as_mut() {
            session.connected = true;
        }
        Ok(())
    }

    /// Read the daemon's status text for `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Status`] if the daemon cannot be queried.
    pub async fn status(&mut self, connection: &str) -> Result<String> {
        self.backend.status(connection).await
    }

    /// Record the tunnel's terminal state.
    pub(crate) fn settle(&mut self, state: DaemonState) {
        if self.state.has_connection() {
            self.state = state;
        }
    }

    /// Best-effort disconnect of `connection`.
    ///
    /// Errors are logged and swallowed; a connection that is already down is
    /// not a failure.
    pub async fn tear_down(&mut self, connection: &str) {
        let had_connection = self.state.has_connection();
        if self.state.is_running() {
            self.state = DaemonState::TearingDown;
        }

        match self.backend.disconnect(connection).await {
            Ok(()) => debug!(connection, "connection torn down"),
            Err(e) if had_connection => warn!(connection, error = %e, "tear down failed"),
            Err(e) => debug!(connection, error = %e, "tear down found no connection"),
        }

        if let Some(session) = self.session.as_mut() {
            session.connected = false;
        }
    }

    /// Stop the daemon process and remove the session's files.
    ///
    /// Always calls the backend, whatever state the controller is in, so a
    /// partially started daemon is not left behind. The controller ends up
    /// `Stopped` even if the backend reports an error.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the stop command failed.
    pub async fn stop(&mut self) -> Result<()> {
        self.state = DaemonState::TearingDown;
        let result = self.backend.shutdown().await;
        self.state = DaemonState::Stopped;

        if let Some(session) = self.session.take() {
            if let Err(e) = session.bundle.remove() {
                warn!(error = %e, "failed to remove session files");
            }
        }

        match &result {
            Ok(()) => debug!(backend = self.backend.name(), "daemon stopped"),
            Err(e) => warn!(backend = self.backend.name(), error = %e, "daemon stop failed"),
        }
        result
    }

    fn invalid_state(&self, operation: &'static str) -> DaemonError {
        DaemonError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }
}
