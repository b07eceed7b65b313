//! Error types for the monitor agent.

use thiserror::Error;
use vpnmon_daemon::DaemonError;
use vpnmon_store::StoreError;

/// Errors that stop the monitor from starting or running.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A setting is missing or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server list could not be parsed.
    #[error("invalid server list: {0}")]
    ServerList(#[source] DaemonError),

    /// The result store could not be opened or reached.
    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    /// The daemon could not be driven outside of a test cycle.
    #[error("daemon error: {0}")]
    Daemon(#[from] DaemonError),

    /// Logging could not be initialised.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Creates a `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` for problems in the operator's configuration.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ServerList(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MonitorError::config("VPN_TIMEOUT must be greater than zero");
        assert_eq!(
            err.to_string(),
            "configuration error: VPN_TIMEOUT must be greater than zero"
        );

        let err = MonitorError::ServerList(DaemonError::invalid_target("no VPN servers configured"));
        assert_eq!(
            err.to_string(),
            "invalid server list: invalid server target: no VPN servers configured"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: MonitorError = StoreError::write("disk full").into();
        assert!(matches!(err, MonitorError::Store(_)));
        assert!(!err.is_config_error());
    }

    #[test]
    fn config_errors_classified() {
        assert!(MonitorError::config("x").is_config_error());
        assert!(MonitorError::ServerList(DaemonError::invalid_target("x")).is_config_error());
    }
}
