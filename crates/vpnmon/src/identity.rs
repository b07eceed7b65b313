//! Who and where the monitor is running.

use std::time::Duration;

use sysinfo::System;
use tracing::{debug, info, warn};
use vpnmon_store::MonitorIdentity;

use crate::VERSION;

/// Public IP echo services, queried in order.
pub const PUBLIC_IP_SERVICES: [&str; 3] = [
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ipecho.net/plain",
];

/// Per-service timeout for public IP discovery.
pub const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(10);

/// Compute the monitor's identity.
///
/// `monitor_id` overrides the hostname when set.
#[must_use]
pub fn discover(monitor_id: Option<&str>) -> MonitorIdentity {
    let computer_identifier = monitor_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(system_hostname, str::to_string);

    MonitorIdentity {
        computer_identifier,
        system_username: system_username(),
        operating_system: operating_system(),
        monitor_version: VERSION.to_string(),
    }
}

fn system_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn system_username() -> String {
    ["USER", "LOGNAME"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn operating_system() -> String {
    let name = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    match System::kernel_version() {
        Some(release) => format!("{name} {release}"),
        None => name,
    }
}

/// Looks up the monitor's public address from echo services.
#[derive(Debug, Clone)]
pub struct PublicIpResolver {
    services: Vec<String>,
    timeout: Duration,
}

impl Default for PublicIpResolver {
    fn default() -> Self {
        Self::new(PUBLIC_IP_SERVICES.iter().map(ToString::to_string).collect())
    }
}

impl PublicIpResolver {
    /// Resolver querying `services` in order.
    #[must_use]
    pub fn new(services: Vec<String>) -> Self {
        Self {
            services,
            timeout: PUBLIC_IP_TIMEOUT,
        }
    }

    /// Override the per-service timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// First address any service returns, or `None` if all fail.
    pub async fn resolve(&self) -> Option<String> {
        let client = match reqwest::Client::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "cannot build HTTP client for public IP lookup");
                return None;
            }
        };

        for service in &self.services {
            match fetch(&client, service).await {
                Ok(ip) => {
                    info!(public_ip = %ip, service = %service, "public IP resolved");
                    return Some(ip);
                }
                Err(e) => debug!(service = %service, error = %e, "public IP service failed"),
            }
        }

        warn!("could not determine public IP address");
        None
    }
}

async fn fetch(client: &reqwest::Client, service: &str) -> Result<String, String> {
    let response = client
        .get(service)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let body = response.text().await.map_err(|e| e.to_string())?;
    let ip = body.trim();
    if ip.is_empty() || ip.contains(char::is_whitespace) {
        return Err("unexpected response body".to_string());
    }
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_hostname() {
        let identity = discover(Some("probe-eu-1"));
        assert_eq!(identity.computer_identifier, "probe-eu-1");
        assert_eq!(identity.monitor_version, VERSION);
        assert!(!identity.system_username.is_empty());
        assert!(!identity.operating_system.is_empty());
    }

    #[test]
    fn blank_override_falls_back_to_hostname() {
        let identity = discover(Some("   "));
        assert!(!identity.computer_identifier.trim().is_empty());
        assert_eq!(identity.computer_identifier, discover(None).computer_identifier);
    }

    #[tokio::test]
    async fn unreachable_services_yield_none() {
        let resolver = PublicIpResolver::new(vec![
            "http://127.0.0.1:9/".to_string(),
            "not a url".to_string(),
        ])
        .with_timeout(Duration::from_millis(500));
        assert_eq!(resolver.resolve().await, None);
    }

    #[test]
    fn default_services_in_order() {
        let resolver = PublicIpResolver::default();
        assert_eq!(resolver.services.len(), 3);
        assert_eq!(resolver.services[0], "https://api.ipify.org");
        assert_eq!(resolver.timeout, PUBLIC_IP_TIMEOUT);
    }
}
