//! Validated invocation of the daemon's control binaries.
//!
//! Commands are executed directly (never through a shell), only for a fixed
//! set of programs, and every argument is checked before the process is
//! spawned. Each invocation carries a bounded wait so a hung control binary
//! cannot stall a test cycle.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DaemonError, Result};

/// Default bounded wait for a control command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Programs the monitor is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// The strongSwan `ipsec` control script.
    Ipsec,
    /// The L2TP daemon.
    Xl2tpd,
    /// ICMP echo for connectivity-only targets.
    Ping,
}

impl Program {
    /// Default executable name, resolved through `PATH`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipsec => "ipsec",
            Self::Xl2tpd => "xl2tpd",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reject arguments that could break argument parsing of the child.
fn validate_argument(arg: &str, field: &str) -> Result<()> {
    if let Some(c) = arg.chars().find(|c| matches!(c, '\0' | '\n' | '\r')) {
        return Err(DaemonError::UnsafeArgument {
            field: field.to_string(),
            message: format!("forbidden character {c:?}"),
        });
    }
    Ok(())
}

/// Reject program path overrides that look like shell fragments.
fn validate_program_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(DaemonError::UnsafeArgument {
            field: "program_path".to_string(),
            message: "cannot be empty".to_string(),
        });
    }
    if path.contains("..") {
        return Err(DaemonError::UnsafeArgument {
            field: "program_path".to_string(),
            message: "path traversal".to_string(),
        });
    }
    if let Some(c) = path
        .chars()
        .find(|c| matches!(c, '\0' | '\n' | '\r' | ';' | '&' | '|' | '$' | '`'))
    {
        return Err(DaemonError::UnsafeArgument {
            field: "program_path".to_string(),
            message: format!("forbidden character {c:?}"),
        });
    }
    Ok(())
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
    /// Exit code (`-1` if terminated by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Stdout as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Builder for a validated control command.
#[derive(Debug)]
pub struct ControlCommand {
    program: Program,
    program_path: Option<String>,
    args: Vec<String>,
    timeout: Duration,
    errors: Vec<DaemonError>,
}

impl ControlCommand {
    /// Create a command for the given program.
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self {
            program,
            program_path: None,
            args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            errors: Vec::new(),
        }
    }

    /// Execute a specific binary instead of searching `PATH`.
    #[must_use]
    pub fn with_program_path(mut self, path: Option<&str>) -> Self {
        if let Some(path) = path {
            match validate_program_path(path) {
                Ok(()) => self.program_path = Some(path.to_string()),
                Err(e) => self.errors.push(e),
            }
        }
        self
    }

    /// Add one argument.
    #[must_use]
    pub fn arg(mut self, arg: &str) -> Self {
        match validate_argument(arg, "argument") {
            Ok(()) => self.args.push(arg.to_string()),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Add several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self = self.arg(arg.as_ref());
        }
        self
    }

    /// Bound how long `execute` waits for the command to exit.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line, for logs and error messages.
    #[must_use]
    pub fn description(&self) -> String {
        let program = self.program_path.as_deref().unwrap_or(self.program.as_str());
        if self.args.is_empty() {
            program.to_string()
        } else {
            format!("{program} {}", self.args.join(" "))
        }
    }

    fn build(&mut self) -> Result<Command> {
        if let Some(error) = self.errors.drain(..).next() {
            return Err(error);
        }

        let program = self.program_path.as_deref().unwrap_or(self.program.as_str());
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Run the command to completion without checking the exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument was rejected, the process could not be
    /// spawned, or it did not exit within the bounded wait.
    pub async fn execute_unchecked(mut self) -> Result<CommandOutput> {
        let description = self.description();
        let timeout = self.timeout;
        let mut cmd = self.build()?;

        debug!(command = %description, "executing daemon command");

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| DaemonError::command_timeout(&description, timeout.as_millis() as u64))??;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run the command to completion and require a zero exit code.
    ///
    /// # Errors
    ///
    /// As for [`execute_unchecked`](Self::execute_unchecked), plus
    /// `CommandFailed` on a non-zero exit.
    pub async fn execute(self) -> Result<CommandOutput> {
        let description = self.description();
        let output = self.execute_unchecked().await?;
        if !output.success() {
            return Err(DaemonError::command_failed(
                description,
                output.exit_code,
                output.stderr_lossy().trim(),
            ));
        }
        Ok(output)
    }

    /// Spawn the command and return immediately with its handle.
    ///
    /// The child is killed when the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument was rejected or the process could not
    /// be spawned.
    pub fn spawn(mut self) -> Result<Child> {
        let description = self.description();
        let mut cmd = self.build()?;
        debug!(command = %description, "spawning daemon command");
        Ok(cmd.spawn()?)
    }
}

/// Append every line `reader` produces to `log` until it closes.
pub(crate) fn capture_lines<R>(reader: R, log: Arc<Mutex<Vec<String>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.lock().push(line);
        }
    })
}

/// Capture stdout and stderr of a freshly spawned child into one log.
pub(crate) fn capture_output(child: &mut Child, log: &Arc<Mutex<Vec<String>>>) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(capture_lines(stdout, Arc::clone(log)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(capture_lines(stderr, Arc::clone(log)));
    }
    readers
}

/// Kill `child` and wait up to `timeout` for it to exit.
pub(crate) async fn kill_and_reap(child: &mut Child, timeout: Duration, label: &str) {
    if let Err(e) = child.start_kill() {
        debug!(process = label, error = %e, "already exited");
    }
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => debug!(process = label, %status, "reaped"),
        Ok(Err(e)) => warn!(process = label, error = %e, "failed to reap"),
        Err(_) => warn!(process = label, "did not exit after kill"),
    }
}
