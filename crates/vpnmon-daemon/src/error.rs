//! Error types for daemon configuration and control.
//!
//! Every failure that can happen between writing the daemon's configuration
//! and tearing the tunnel down again is expressed here, so the caller can
//! turn it into a recorded test outcome without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur while configuring or driving the VPN daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A server record could not be parsed or contains unsafe characters.
    #[error("invalid server target: {message}")]
    InvalidTarget {
        /// Description of the problem.
        message: String,
    },

    /// Configuration or secrets could not be written.
    #[error("failed to write daemon configuration to {path}: {reason}")]
    ConfigWrite {
        /// File or directory that could not be written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The daemon rejected the configuration or did not acknowledge it in time.
    #[error("daemon did not load configuration: {reason}")]
    ConfigLoad {
        /// Underlying reason.
        reason: String,
    },

    /// The daemon could not be started after all retries.
    #[error("daemon failed to start after {attempts} attempt(s): {reason}")]
    DaemonStart {
        /// Number of launch attempts made.
        attempts: u32,
        /// Reason reported by the last attempt.
        reason: String,
    },

    /// The connect command could not be issued.
    #[error("failed to bring up connection '{connection}': {reason}")]
    BringUp {
        /// Connection name.
        connection: String,
        /// Underlying reason.
        reason: String,
    },

    /// The daemon status could not be read.
    #[error("failed to read daemon status: {reason}")]
    Status {
        /// Underlying reason.
        reason: String,
    },

    /// An operation was attempted in the wrong controller state.
    #[error("invalid daemon state: cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// Current controller state.
        state: String,
    },

    /// Shutdown was requested before the operation finished.
    #[error("{operation} abandoned: shutdown requested")]
    Cancelled {
        /// The operation that was abandoned.
        operation: &'static str,
    },

    /// A daemon control command exited unsuccessfully.
    #[error("command '{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// The command line that was executed.
        command: String,
        /// Exit code of the command.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// A daemon control command did not finish within its bounded wait.
    #[error("command '{command}' did not complete within {timeout_ms}ms")]
    CommandTimeout {
        /// The command line that was executed.
        command: String,
        /// Bounded wait in milliseconds.
        timeout_ms: u64,
    },

    /// A command argument failed validation.
    #[error("unsafe command argument for {field}: {message}")]
    UnsafeArgument {
        /// Which argument was rejected.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// IO error (process spawning, file removal).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Creates an `InvalidTarget` error.
    #[must_use]
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
        }
    }

    /// Creates a `ConfigWrite` error.
    #[must_use]
    pub fn config_write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigLoad` error.
    #[must_use]
    pub fn config_load(reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            reason: reason.into(),
        }
    }

    /// Creates a `DaemonStart` error.
    #[must_use]
    pub fn daemon_start(attempts: u32, reason: impl Into<String>) -> Self {
        Self::DaemonStart {
            attempts,
            reason: reason.into(),
        }
    }

    /// Creates a `BringUp` error.
    #[must_use]
    pub fn bring_up(connection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BringUp {
            connection: connection.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Status` error.
    #[must_use]
    pub fn status(reason: impl Into<String>) -> Self {
        Self::Status {
            reason: reason.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    #[must_use]
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a `CommandTimeout` error.
    #[must_use]
    pub fn command_timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command: command.into(),
            timeout_ms,
        }
    }

    /// Returns `true` if the failure came from the generated configuration
    /// rather than from the daemon itself.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. } | Self::ConfigWrite { .. } | Self::ConfigLoad { .. }
        )
    }

    /// Returns `true` if the operation stopped because of shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::CommandTimeout { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_write_display() {
        let err = DaemonError::config_write("/etc/ipsec.d", "permission denied");
        assert_eq!(
            err.to_string(),
            "failed to write daemon configuration to /etc/ipsec.d: permission denied"
        );
    }

    #[test]
    fn test_daemon_start_display() {
        let err = DaemonError::daemon_start(3, "charon exited");
        assert_eq!(
            err.to_string(),
            "daemon failed to start after 3 attempt(s): charon exited"
        );
    }

    #[test]
    fn test_command_failed_display() {
        let err = DaemonError::command_failed("ipsec reload", 7, "no such connection");
        assert_eq!(
            err.to_string(),
            "command 'ipsec reload' exited with code 7: no such connection"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = DaemonError::InvalidState {
            operation: "bring up",
            state: "stopped".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid daemon state: cannot bring up while stopped"
        );
    }

    #[test]
    fn test_is_config_error() {
        assert!(DaemonError::invalid_target("x").is_config_error());
        assert!(DaemonError::config_write("/tmp", "x").is_config_error());
        assert!(DaemonError::config_load("x").is_config_error());

        assert!(!DaemonError::daemon_start(1, "x").is_config_error());
        assert!(!DaemonError::status("x").is_config_error());
    }

    #[test]
    fn test_cancelled_display() {
        let err = DaemonError::Cancelled {
            operation: "start daemon",
        };
        assert_eq!(err.to_string(), "start daemon abandoned: shutdown requested");
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(DaemonError::command_failed("ipsec start", 1, "").is_retryable());
        assert!(DaemonError::command_timeout("ipsec start", 5000).is_retryable());

        assert!(!DaemonError::config_load("rejected").is_retryable());
        assert!(!DaemonError::invalid_target("bad").is_retryable());
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "ipsec not found");
        let err: DaemonError = io_err.into();
        assert!(matches!(err, DaemonError::Io(_)));
        assert!(err.to_string().contains("ipsec not found"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DaemonError>();
    }
}
