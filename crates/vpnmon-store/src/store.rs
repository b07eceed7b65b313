//! The result recorder contract.

use crate::error::Result;
use crate::record::{MonitorInstance, TestOutcome};

/// Persistence for test outcomes and monitor heartbeats.
///
/// Implementations must make [`record`](Self::record) atomic: either both
/// the result row and the heartbeat update are stored, or neither is.
///
/// All methods are synchronous and may block on disk I/O. Async callers
/// should keep calls off the reactor (for example with
/// `tokio::task::block_in_place`).
pub trait ResultStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot answer a trivial query.
    fn ping(&self) -> Result<()>;

    /// Store one outcome and bump the heartbeat of its monitor instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseWrite`](crate::StoreError::DatabaseWrite)
    /// if the write fails.
    fn record(&self, outcome: &TestOutcome) -> Result<()>;

    /// The most recent outcomes, newest first, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns an error if stored rows cannot be read.
    fn recent_results(&self, limit: usize) -> Result<Vec<TestOutcome>>;

    /// The heartbeat row for one monitor instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    fn monitor_instance(
        &self,
        computer_identifier: &str,
        system_username: &str,
    ) -> Result<Option<MonitorInstance>>;
}
