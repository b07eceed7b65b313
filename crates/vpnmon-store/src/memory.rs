//! In-memory result store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::record::{MonitorInstance, TestOutcome};
use crate::store::ResultStore;

/// A [`ResultStore`] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    results: RwLock<Vec<TestOutcome>>,
    instances: RwLock<HashMap<(String, String), MonitorInstance>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored outcomes, oldest first.
    #[must_use]
    pub fn results(&self) -> Vec<TestOutcome> {
        self.results.read().clone()
    }

    /// Number of stored outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn record(&self, outcome: &TestOutcome) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write("memory store is rejecting writes"));
        }

        let identity = &outcome.identity;
        let key = (
            identity.computer_identifier.clone(),
            identity.system_username.clone(),
        );

        let mut instances = self.instances.write();
        let mut results = self.results.write();

        instances
            .entry(key)
            .and_modify(|row| {
                row.last_seen = outcome.timestamp;
                row.total_tests_run += 1;
                row.operating_system.clone_from(&identity.operating_system);
                row.monitor_version.clone_from(&identity.monitor_version);
            })
            .or_insert_with(|| MonitorInstance {
                computer_identifier: identity.computer_identifier.clone(),
                system_username: identity.system_username.clone(),
                operating_system: identity.operating_system.clone(),
                monitor_version: identity.monitor_version.clone(),
                first_seen: outcome.timestamp,
                last_seen: outcome.timestamp,
                total_tests_run: 1,
            });
        results.push(outcome.clone());

        Ok(())
    }

    fn recent_results(&self, limit: usize) -> Result<Vec<TestOutcome>> {
        Ok(self.results.read().iter().rev().take(limit).cloned().collect())
    }

    fn monitor_instance(
        &self,
        computer_identifier: &str,
        system_username: &str,
    ) -> Result<Option<MonitorInstance>> {
        let key = (computer_identifier.to_string(), system_username.to_string());
        Ok(self.instances.read().get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, MonitorIdentity};

    fn identity() -> MonitorIdentity {
        MonitorIdentity {
            computer_identifier: "probe-1".to_string(),
            system_username: "vpnmon".to_string(),
            operating_system: "Linux 6.1.0".to_string(),
            monitor_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn two_records_one_heartbeat_row() {
        let store = MemoryStore::new();
        let id = identity();

        store
            .record(&TestOutcome::new(&id, None, "srv1", "198.51.100.10").succeeded(900))
            .expect("record");
        store
            .record(&TestOutcome::new(&id, None, "srv2", "198.51.100.11").failed(
                ErrorKind::Timeout,
                "no status",
                Some(15_000),
            ))
            .expect("record");

        let row = store
            .monitor_instance("probe-1", "vpnmon")
            .expect("query")
            .expect("row");
        assert_eq!(row.total_tests_run, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recent_results_newest_first() {
        let store = MemoryStore::new();
        let id = identity();
        for name in ["a", "b", "c"] {
            store
                .record(&TestOutcome::new(&id, None, name, "198.51.100.10").succeeded(1))
                .expect("record");
        }

        let names: Vec<_> = store
            .recent_results(2)
            .expect("query")
            .into_iter()
            .map(|o| o.server_name)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn failing_writes_store_nothing() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let err = store
            .record(&TestOutcome::new(&identity(), None, "srv1", "198.51.100.10").succeeded(1))
            .expect_err("rejected");
        assert!(matches!(err, StoreError::DatabaseWrite { .. }));
        assert!(store.is_empty());
        assert!(store.monitor_instance("probe-1", "vpnmon").expect("query").is_none());
    }
}
