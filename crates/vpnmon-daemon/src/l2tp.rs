//! L2TP/PPP session carried by the IPsec transport tunnel.
//!
//! Once the IPsec `CHILD_SA` is installed, [`L2tpDriver`] starts `xl2tpd`
//! in the foreground with the generated `[lac]` configuration and asks it
//! to dial through the control pipe. xl2tpd and the pppd it spawns write
//! their progress to the captured output (the generated PPP options set
//! `logfd 2`), so the PPP login outcome shows up in the status text next to
//! the IPsec lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{SignalKind, classify_line};
use crate::command::{
    ControlCommand, DEFAULT_COMMAND_TIMEOUT, Program, capture_output, kill_and_reap,
};
use crate::error::{DaemonError, Result};

/// Control pipe xl2tpd listens on unless told otherwise.
pub const DEFAULT_CONTROL_PATH: &str = "/var/run/xl2tpd/l2tp-control";

struct LacSession {
    lac: String,
    child: Child,
    log: Arc<Mutex<Vec<String>>>,
    readers: Vec<JoinHandle<()>>,
    dialed: bool,
}

/// Drives one `xl2tpd` process for one `[lac]` section at a time.
pub struct L2tpDriver {
    program_path: Option<String>,
    control_path: PathBuf,
    command_timeout: Duration,
    session: Option<LacSession>,
}

impl L2tpDriver {
    /// Driver using `xl2tpd` from `PATH` and the default control pipe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program_path: None,
            control_path: PathBuf::from(DEFAULT_CONTROL_PATH),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            session: None,
        }
    }

    /// Use a specific `xl2tpd` binary.
    #[must_use]
    pub fn with_program_path(mut self, path: impl Into<String>) -> Self {
        self.program_path = Some(path.into());
        self
    }

    /// Control pipe xl2tpd should create and read dial requests from.
    #[must_use]
    pub fn with_control_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_path = path.into();
        self
    }

    /// Bounded wait for control pipe writes and process exit.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Control pipe path.
    #[must_use]
    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// Whether a dial request for `lac` has been sent.
    #[must_use]
    pub fn is_dialed(&self, lac: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.lac == lac && session.dialed)
    }

    fn command(&self, config: &Path) -> ControlCommand {
        ControlCommand::new(Program::Xl2tpd)
            .with_program_path(self.program_path.as_deref())
            .args(["-D", "-c"])
            .arg(&config.to_string_lossy())
            .arg("-C")
            .arg(&self.control_path.to_string_lossy())
    }

    /// Start xl2tpd for `lac` if needed and send the dial request.
    ///
    /// Returns `false` while xl2tpd has not created its control pipe yet;
    /// call again on the next status read.
    ///
    /// # Errors
    ///
    /// Returns an error if xl2tpd cannot be spawned or the control pipe
    /// cannot be written in time.
    pub async fn dial(&mut self, config: &Path, lac: &str) -> Result<bool> {
        if self.session.as_ref().is_some_and(|s| s.lac != lac) {
            self.stop().await;
        }

        if self.session.is_none() {
            let mut child = self.command(config).spawn()?;
            let log = Arc::new(Mutex::new(Vec::new()));
            let readers = capture_output(&mut child, &log);
            info!(lac, control = %self.control_path.display(), "xl2tpd started");
            self.session = Some(LacSession {
                lac: lac.to_string(),
                child,
                log,
                readers,
                dialed: false,
            });
        }

        if self.is_dialed(lac) {
            return Ok(true);
        }
        if !self.control_path.exists() {
            debug!(lac, "xl2tpd control pipe not ready");
            return Ok(false);
        }

        self.send(&format!("c {lac}\n")).await?;
        if let Some(session) = self.session.as_mut() {
            session.dialed = true;
        }
        info!(lac, "l2tp dial requested");
        Ok(true)
    }

    /// Output captured from xl2tpd and pppd, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|session| session.log.lock().clone())
            .unwrap_or_default()
    }

    /// Hang up the PPP session and stop xl2tpd.
    pub async fn stop(&mut self) {
        let Some(lac) = self
            .session
            .as_ref()
            .filter(|session| session.dialed)
            .map(|session| session.lac.clone())
        else {
            self.reap().await;
            return;
        };

        if let Err(e) = self.send(&format!("d {lac}\n")).await {
            debug!(lac, error = %e, "l2tp hang-up request failed");
        }
        self.reap().await;
    }

    async fn reap(&mut self) {
        if let Some(mut session) = self.session.take() {
            for reader in session.readers.drain(..) {
                reader.abort();
            }
            kill_and_reap(&mut session.child, self.command_timeout, "xl2tpd").await;
        }
    }

    async fn send(&self, request: &str) -> Result<()> {
        let write = async {
            let mut pipe = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&self.control_path)
                .await?;
            pipe.write_all(request.as_bytes()).await?;
            pipe.flush().await
        };

        match tokio::time::timeout(self.command_timeout, write).await {
            Ok(result) => result.map_err(DaemonError::from),
            Err(_) => {
                warn!(control = %self.control_path.display(), "l2tp control pipe write timed out");
                Err(DaemonError::command_timeout(
                    format!("write {}", self.control_path.display()),
                    self.command_timeout.as_millis() as u64,
                ))
            }
        }
    }
}

impl Default for L2tpDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop "established" lines from IPsec status `text`.
///
/// With L2TP layered on top, an installed `CHILD_SA` only means the
/// transport is ready; the tunnel counts as up once PPP has an address.
#[must_use]
pub fn without_transport_ready(text: &str) -> String {
    let mut out = String::new();
    for line in text
        .lines()
        .filter(|line| classify_line(line) != Some(SignalKind::Established))
    {
        out.push_str(line);
        out.push('\n');
    }
    out
}
