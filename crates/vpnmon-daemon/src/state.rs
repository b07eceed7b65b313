//! Lifecycle states of the controlled daemon.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the daemon is in its test-cycle lifecycle.
///
/// ```text
/// Stopped -> Starting -> Running -> ConfigLoaded -> Connecting
///     -> {Established | Failed | TimedOut} -> TearingDown -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// No daemon process is running.
    #[default]
    Stopped,
    /// Launch is in progress.
    Starting,
    /// Daemon is running without a loaded test configuration.
    Running,
    /// Daemon has acknowledged the generated configuration.
    ConfigLoaded,
    /// The connect command has been issued.
    Connecting,
    /// The tunnel reached the established state.
    Established,
    /// The tunnel failed definitively.
    Failed,
    /// No definitive signal arrived before the deadline.
    TimedOut,
    /// Disconnect and shutdown are in progress.
    TearingDown,
}

impl DaemonState {
    /// Whether the daemon process is believed to be running.
    #[must_use]
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Stopped | Self::Starting)
    }

    /// Whether a connection attempt has been made and not yet torn down.
    #[must_use]
    pub fn has_connection(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Established | Self::Failed | Self::TimedOut
        )
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::ConfigLoaded => write!(f, "config loaded"),
            Self::Connecting => write!(f, "connecting"),
            Self::Established => write!(f, "established"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::TearingDown => write!(f, "tearing down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stopped() {
        assert_eq!(DaemonState::default(), DaemonState::Stopped);
    }

    #[test]
    fn test_is_running() {
        assert!(!DaemonState::Stopped.is_running());
        assert!(!DaemonState::Starting.is_running());
        assert!(DaemonState::Running.is_running());
        assert!(DaemonState::Established.is_running());
        assert!(DaemonState::TearingDown.is_running());
    }

    #[test]
    fn test_has_connection() {
        assert!(DaemonState::Connecting.has_connection());
        assert!(DaemonState::TimedOut.has_connection());
        assert!(!DaemonState::ConfigLoaded.has_connection());
        assert!(!DaemonState::Stopped.has_connection());
    }

    #[test]
    fn test_display() {
        assert_eq!(DaemonState::ConfigLoaded.to_string(), "config loaded");
        assert_eq!(DaemonState::TimedOut.to_string(), "timed out");
    }
}
