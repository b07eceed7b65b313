//! # vpnmon
//!
//! VPN endpoint monitor. On a fixed interval it brings up an IPsec tunnel
//! to each configured server, measures how long the tunnel takes to come
//! up (or classifies why it failed), tears it down again, and records the
//! outcome.
//!
//! The pieces:
//!
//! - [`config`]: flags and environment variables
//! - [`cycle`]: one test of one server
//! - [`scheduler`]: passes over the server list
//! - [`health`]: the `--health-check` mode
//! - [`identity`]: who the monitor is and its public address
//! - [`probe`]: reachability checks for servers without credentials
//!
//! Daemon control lives in `vpnmon-daemon`; persistence in `vpnmon-store`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod cycle;
pub mod error;
pub mod health;
pub mod identity;
pub mod logging;
pub mod probe;
pub mod scheduler;

/// Release of this monitor, recorded with every outcome.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{Cli, LogFormat, MonitorConfig, RunMode};
pub use cycle::{CycleOutcome, TestCycle};
pub use error::{MonitorError, Result};
pub use health::HealthReport;
pub use identity::PublicIpResolver;
pub use probe::{PingProbe, ReachabilityProbe};
pub use scheduler::{Scheduler, SchedulerReport, SchedulerState};
