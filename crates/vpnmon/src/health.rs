//! Dependency check for `--health-check`.

use serde::Serialize;
use tracing::{error, info};
use vpnmon_daemon::{DaemonBackend, DaemonController};
use vpnmon_store::ResultStore;

/// Result of checking the monitor's dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Store backend that was checked.
    pub store: &'static str,
    /// Why the store is unavailable, if it is.
    pub store_error: Option<String>,
    /// Daemon backend that was checked.
    pub daemon: &'static str,
    /// Whether the daemon's control binary is present.
    pub daemon_installed: bool,
}

impl HealthReport {
    /// Whether every dependency is available.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.store_error.is_none() && self.daemon_installed
    }
}

/// Check that the store answers and the daemon is installed.
pub async fn check<B: DaemonBackend>(
    store: &dyn ResultStore,
    controller: &DaemonController<B>,
) -> HealthReport {
    let store_error = store.ping().err().map(|e| e.to_string());
    match &store_error {
        None => info!(store = store.name(), "result store reachable"),
        Some(e) => error!(store = store.name(), error = %e, "result store unavailable"),
    }

    let daemon_installed = controller.is_installed().await;
    if daemon_installed {
        info!(daemon = controller.backend_name(), "daemon installed");
    } else {
        error!(daemon = controller.backend_name(), "daemon not installed");
    }

    HealthReport {
        store: store.name(),
        store_error,
        daemon: controller.backend_name(),
        daemon_installed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnmon_daemon::SimulatedDaemon;
    use vpnmon_store::{MemoryStore, SqliteStore};

    #[tokio::test]
    async fn healthy_when_everything_answers() {
        let store = MemoryStore::new();
        let controller = DaemonController::new(SimulatedDaemon::new());

        let report = check(&store, &controller).await;
        assert!(report.is_healthy());
        assert_eq!(report.store, "memory");
        assert_eq!(report.daemon, "simulator");
    }

    #[tokio::test]
    async fn missing_daemon_is_unhealthy() {
        let store = SqliteStore::open_in_memory().expect("open");
        let controller = DaemonController::new(SimulatedDaemon::new().not_installed());

        let report = check(&store, &controller).await;
        assert!(!report.is_healthy());
        assert!(report.store_error.is_none());
        assert!(!report.daemon_installed);
    }
}
