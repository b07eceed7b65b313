//! Command-line and environment configuration.
//!
//! Every setting can be given as a flag or through its environment
//! variable; flags win.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use vpnmon_daemon::ServerTarget;
use vpnmon_daemon::generator::DEFAULT_CONFIG_DIR;
use vpnmon_daemon::l2tp::DEFAULT_CONTROL_PATH;
use vpnmon_store::DEFAULT_DB_PATH;

use crate::error::{MonitorError, Result};

/// Default per-attempt deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default status poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default pause between passes in seconds.
pub const DEFAULT_TEST_INTERVAL_SECS: u64 = 300;

/// VPN endpoint monitor.
#[derive(Parser, Debug, Clone)]
#[command(name = "vpn-monitor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated `name:host:username:password:sharedKey` records
    /// (`name:host` for a reachability check only).
    #[arg(long, env = "VPN_SERVERS", hide_env_values = true)]
    pub servers: Option<String>,

    /// SQLite database file for results.
    #[arg(long, env = "DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Per-attempt deadline in seconds.
    #[arg(long = "timeout", env = "VPN_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Interval between daemon status reads in milliseconds.
    #[arg(long = "poll-interval-ms", env = "POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Seconds between passes; 0 runs a single pass.
    #[arg(long = "interval", env = "TEST_INTERVAL", default_value_t = DEFAULT_TEST_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Override the computer identifier (defaults to the hostname).
    #[arg(long, env = "MONITOR_ID")]
    pub monitor_id: Option<String>,

    /// Directory the daemon reads generated configuration from.
    #[arg(long, env = "IPSEC_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub ipsec_config_dir: PathBuf,

    /// Path of the `ipsec` control binary.
    #[arg(long, env = "IPSEC_BIN", default_value = "ipsec")]
    pub ipsec_bin: String,

    /// Path of the `xl2tpd` binary.
    #[arg(long, env = "XL2TPD_BIN", default_value = "xl2tpd")]
    pub xl2tpd_bin: String,

    /// Control pipe xl2tpd reads dial requests from.
    #[arg(long, env = "L2TP_CONTROL_PATH", default_value = DEFAULT_CONTROL_PATH)]
    pub l2tp_control_path: PathBuf,

    /// Stop at the IPsec transport instead of also dialing L2TP/PPP.
    #[arg(long, env = "IPSEC_ONLY", default_value_t = false, action = ArgAction::Set)]
    pub ipsec_only: bool,

    /// Discover the public IP address at startup.
    #[arg(long, env = "PUBLIC_IP_LOOKUP", default_value_t = true, action = ArgAction::Set)]
    pub public_ip_lookup: bool,

    /// Also write logs to this file.
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Check database and daemon availability, then exit.
    #[arg(long, conflicts_with = "single_run")]
    pub health_check: bool,

    /// Run one pass over all servers, then exit.
    #[arg(long)]
    pub single_run: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// What the process should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Test every server, sleep, repeat until shut down.
    Continuous,
    /// Test every server once.
    SingleRun,
    /// Check dependencies only.
    HealthCheck,
}

/// Validated monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Servers to test, in order.
    pub servers: Vec<ServerTarget>,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Interval between status reads.
    pub poll_interval: Duration,
    /// Pause between passes.
    pub interval: Duration,
    /// Computer identifier override.
    pub monitor_id: Option<String>,
    /// Directory for generated daemon files.
    pub ipsec_config_dir: PathBuf,
    /// `ipsec` binary.
    pub ipsec_bin: String,
    /// `xl2tpd` binary.
    pub xl2tpd_bin: String,
    /// xl2tpd control pipe.
    pub l2tp_control_path: PathBuf,
    /// Whether to skip the L2TP/PPP layer.
    pub ipsec_only: bool,
    /// Whether to look up the public IP.
    pub public_ip_lookup: bool,
    /// Optional log file.
    pub log_file: Option<PathBuf>,
    /// Log output format.
    pub log_format: LogFormat,
    /// What to run.
    pub mode: RunMode,
}

impl MonitorConfig {
    /// Settings with defaults for the given servers.
    #[must_use]
    pub fn new(servers: Vec<ServerTarget>) -> Self {
        Self {
            servers,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            interval: Duration::from_secs(DEFAULT_TEST_INTERVAL_SECS),
            monitor_id: None,
            ipsec_config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            ipsec_bin: "ipsec".to_string(),
            xl2tpd_bin: "xl2tpd".to_string(),
            l2tp_control_path: PathBuf::from(DEFAULT_CONTROL_PATH),
            ipsec_only: false,
            public_ip_lookup: true,
            log_file: None,
            log_format: LogFormat::Text,
            mode: RunMode::Continuous,
        }
    }

    /// Build and validate settings from parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ServerList`] if a server record is malformed and
    /// [`MonitorError::Config`] if any setting is out of range.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mode = if cli.health_check {
            RunMode::HealthCheck
        } else if cli.single_run || cli.interval_secs == 0 {
            RunMode::SingleRun
        } else {
            RunMode::Continuous
        };

        let raw_servers = cli.servers.unwrap_or_default();
        let servers = if mode == RunMode::HealthCheck && raw_servers.trim().is_empty() {
            Vec::new()
        } else {
            ServerTarget::parse_list(&raw_servers).map_err(MonitorError::ServerList)?
        };

        let config = Self {
            servers,
            db_path: cli.db_path,
            timeout: Duration::from_secs(cli.timeout_secs),
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            interval: Duration::from_secs(cli.interval_secs),
            monitor_id: cli.monitor_id.filter(|id| !id.trim().is_empty()),
            ipsec_config_dir: cli.ipsec_config_dir,
            ipsec_bin: cli.ipsec_bin,
            xl2tpd_bin: cli.xl2tpd_bin,
            l2tp_control_path: cli.l2tp_control_path,
            ipsec_only: cli.ipsec_only,
            public_ip_lookup: cli.public_ip_lookup,
            log_file: cli.log_file,
            log_format: cli.log_format,
            mode,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(MonitorError::config("VPN_TIMEOUT must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(MonitorError::config(
                "POLL_INTERVAL_MS must be greater than zero",
            ));
        }
        if self.poll_interval > self.timeout {
            return Err(MonitorError::config(format!(
                "POLL_INTERVAL_MS ({}ms) must not exceed VPN_TIMEOUT ({}s)",
                self.poll_interval.as_millis(),
                self.timeout.as_secs()
            )));
        }
        if self.servers.is_empty() && self.mode != RunMode::HealthCheck {
            return Err(MonitorError::config("no VPN servers configured"));
        }
        if self.ipsec_bin.trim().is_empty() {
            return Err(MonitorError::config("IPSEC_BIN must not be empty"));
        }
        if !self.ipsec_only && self.xl2tpd_bin.trim().is_empty() {
            return Err(MonitorError::config("XL2TPD_BIN must not be empty"));
        }
        Ok(())
    }

    /// Pause the scheduler should use; zero means one pass.
    #[must_use]
    pub fn effective_interval(&self) -> Duration {
        match self.mode {
            RunMode::Continuous => self.interval,
            RunMode::SingleRun | RunMode::HealthCheck => Duration::ZERO,
        }
    }
}
