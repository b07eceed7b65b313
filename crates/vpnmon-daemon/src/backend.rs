//! The external daemon as a swappable capability.
//!
//! [`DaemonBackend`] is the raw set of operations the external IPsec/L2TP
//! daemon exposes. It carries no lifecycle policy: retries, state tracking
//! and the unconditional-release guarantee live in
//! [`DaemonController`](crate::controller::DaemonController), which owns
//! exactly one backend.

use crate::error::Result;
use crate::generator::ConfigBundle;

/// Operations exposed by the external VPN daemon.
#[allow(async_fn_in_trait)]
pub trait DaemonBackend: Send {
    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// Launch the daemon process. Must be a no-op if it is already running.
    async fn launch(&mut self) -> Result<()>;

    /// Whether the daemon process is running and answering.
    async fn is_running(&mut self) -> bool;

    /// Make the daemon (re)read the generated configuration and secrets.
    async fn reload(&mut self, bundle: &ConfigBundle) -> Result<()>;

    /// Whether the loaded configuration defines `connection`.
    async fn has_connection(&mut self, connection: &str) -> Result<bool>;

    /// Issue the connect command without waiting for the outcome.
    async fn connect(&mut self, connection: &str) -> Result<()>;

    /// Status text for `connection`, oldest line first.
    async fn status(&mut self, connection: &str) -> Result<String>;

    /// Disconnect `connection` and release any process started by `connect`.
    async fn disconnect(&mut self, connection: &str) -> Result<()>;

    /// Stop the daemon process.
    async fn shutdown(&mut self) -> Result<()>;

    /// Whether the daemon's control binary is present on this host.
    async fn is_installed(&self) -> bool;
}
