//! Rows written by the monitor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a test cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server could not be reached.
    Unreachable,
    /// The server rejected our credentials or pre-shared key.
    AuthFailed,
    /// No cipher proposal acceptable to both sides.
    ProposalMismatch,
    /// No definitive answer before the deadline.
    Timeout,
    /// The daemon configuration could not be written or loaded.
    ConfigError,
    /// The daemon could not be started or driven.
    DaemonError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Unreachable,
        Self::AuthFailed,
        Self::ProposalMismatch,
        Self::Timeout,
        Self::ConfigError,
        Self::DaemonError,
    ];

    /// Stable identifier stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::AuthFailed => "auth_failed",
            Self::ProposalMismatch => "proposal_mismatch",
            Self::Timeout => "timeout",
            Self::ConfigError => "config_error",
            Self::DaemonError => "daemon_error",
        }
    }

    /// Parse a stored identifier.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Operator-facing prefix for the error message.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Unreachable => "Cannot reach VPN server",
            Self::AuthFailed => "Authentication failed",
            Self::ProposalMismatch => "No compatible encryption proposal",
            Self::Timeout => "Connection timeout",
            Self::ConfigError => "VPN configuration error",
            Self::DaemonError => "VPN daemon error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Who is running the monitor. Computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorIdentity {
    /// Hostname or configured override.
    pub computer_identifier: String,
    /// OS user running the monitor.
    pub system_username: String,
    /// OS name and kernel release.
    pub operating_system: String,
    /// Monitor release.
    pub monitor_version: String,
}

/// One completed test cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// When the cycle finished.
    pub timestamp: DateTime<Utc>,
    /// Configured server name.
    pub server_name: String,
    /// Server address.
    pub server_host: String,
    /// Whether the tunnel (or probe) succeeded.
    pub success: bool,
    /// Time from connect to outcome, when measured.
    pub connection_time_ms: Option<u64>,
    /// Failure classification; `None` on success.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure description; `None` on success.
    pub error_message: Option<String>,
    /// Public address of the monitor, if discovered.
    pub public_ip: Option<String>,
    /// Monitor identity.
    #[serde(flatten)]
    pub identity: MonitorIdentity,
}

impl TestOutcome {
    /// Start an outcome for one server. Call [`succeeded`](Self::succeeded)
    /// or [`failed`](Self::failed) to complete it.
    #[must_use]
    pub fn new(
        identity: &MonitorIdentity,
        public_ip: Option<&str>,
        server_name: impl Into<String>,
        server_host: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            server_name: server_name.into(),
            server_host: server_host.into(),
            success: false,
            connection_time_ms: None,
            error_kind: None,
            error_message: None,
            public_ip: public_ip.map(str::to_string),
            identity: identity.clone(),
        }
    }

    /// Mark as successful after `connection_time_ms`.
    #[must_use]
    pub fn succeeded(mut self, connection_time_ms: u64) -> Self {
        self.timestamp = Utc::now();
        self.success = true;
        self.connection_time_ms = Some(connection_time_ms);
        self.error_kind = None;
        self.error_message = None;
        self
    }

    /// Mark as failed. The message is prefixed with the kind's description.
    #[must_use]
    pub fn failed(
        mut self,
        kind: ErrorKind,
        detail: impl fmt::Display,
        connection_time_ms: Option<u64>,
    ) -> Self {
        self.timestamp = Utc::now();
        self.success = false;
        self.connection_time_ms = connection_time_ms;
        self.error_kind = Some(kind);
        self.error_message = Some(format!("{}: {detail}", kind.describe()));
        self
    }
}

/// Heartbeat row for one monitor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInstance {
    /// Hostname or configured override.
    pub computer_identifier: String,
    /// OS user running the monitor.
    pub system_username: String,
    /// OS name and kernel release.
    pub operating_system: String,
    /// Monitor release last reported.
    pub monitor_version: String,
    /// First recorded cycle.
    pub first_seen: DateTime<Utc>,
    /// Most recent recorded cycle.
    pub last_seen: DateTime<Utc>,
    /// Number of cycles recorded.
    pub total_tests_run: u64,
}
