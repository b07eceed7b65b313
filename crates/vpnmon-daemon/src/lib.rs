//! IPsec/L2TP daemon control for vpnmon.
//!
//! This crate covers everything between a configured VPN server and a
//! classified tunnel outcome:
//!
//! - [`ServerTarget`] parsing from `name:host:user:password:psk` records
//! - [`ConfigGenerator`] rendering deterministic strongSwan configuration,
//!   owner-only PSK secrets, and the xl2tpd/pppd files for the PPP login
//! - [`DaemonController`] driving a [`DaemonBackend`] through
//!   start, load, bring-up, tear-down and stop
//! - [`TunnelMonitor`] polling status against a deadline, with the pure
//!   [`classify`] function deciding what the status text means
//!
//! [`StrongSwanBackend`] talks to a real `ipsec` installation, optionally
//! dialing L2TP through an [`L2tpDriver`];
//! [`SimulatedDaemon`] replays scripted status output for tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use vpnmon_daemon::{ConfigGenerator, DaemonController, ServerTarget, StrongSwanBackend, TunnelMonitor};
//!
//! # async fn example() -> vpnmon_daemon::Result<()> {
//! let target = ServerTarget::parse("srv1:198.51.100.10:alice:pw:key123")?;
//! let bundle = ConfigGenerator::new("/etc/ipsec.d").generate(&target)?;
//!
//! let mut controller = DaemonController::new(StrongSwanBackend::new());
//! controller.start().await?;
//! controller.load_config(&bundle).await?;
//!
//! let started_at = tokio::time::Instant::now();
//! let timeout = Duration::from_secs(30);
//! controller.bring_up(&bundle.connection_name, started_at + timeout).await?;
//!
//! let result = TunnelMonitor::default()
//!     .await_established(&mut controller, &bundle.connection_name, started_at, timeout, &CancellationToken::new())
//!     .await;
//! println!("{} after {}ms", result.state, result.elapsed_ms);
//!
//! controller.tear_down(&bundle.connection_name).await;
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod classify;
pub mod command;
pub mod controller;
pub mod error;
pub mod generator;
pub mod l2tp;
pub mod monitor;
pub mod retry;
pub mod sim;
pub mod state;
pub mod strongswan;
pub mod target;

pub use backend::DaemonBackend;
pub use classify::{Signal, SignalKind, classify};
pub use controller::{DaemonController, DaemonSession};
pub use error::{DaemonError, Result};
pub use generator::{CipherProfile, ConfigBundle, ConfigGenerator};
pub use l2tp::L2tpDriver;
pub use monitor::{TunnelMonitor, TunnelResult, TunnelState};
pub use retry::RetryPolicy;
pub use sim::{SimCall, SimHandle, SimulatedDaemon};
pub use state::DaemonState;
pub use strongswan::StrongSwanBackend;
pub use target::{Credentials, ServerTarget};
