//! # vpnmon-store
//!
//! Persistence for VPN test results and monitor heartbeats.
//!
//! This crate provides:
//!
//! - [`TestOutcome`] and [`ErrorKind`] for one completed test cycle
//! - [`MonitorIdentity`] and [`MonitorInstance`] for the heartbeat row
//! - [`ResultStore`], the recorder contract
//! - [`SqliteStore`], the production backend
//! - [`MemoryStore`], an in-process backend for tests
//!
//! Every [`ResultStore::record`] call inserts one result row and upserts
//! the `(computer_identifier, system_username)` heartbeat row in the same
//! transaction, incrementing `total_tests_run`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use record::{ErrorKind, MonitorIdentity, MonitorInstance, TestOutcome};
pub use sqlite::{DEFAULT_DB_PATH, SqliteStore};
pub use store::ResultStore;
