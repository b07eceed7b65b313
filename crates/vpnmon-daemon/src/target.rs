//! Configured VPN servers.
//!
//! Servers are configured as a comma-separated list of colon-delimited
//! records:
//!
//! ```text
//! name:host:username:password:sharedKey   full tunnel test
//! name:host                               connectivity-only test
//! ```

use std::fmt;

use crate::error::{DaemonError, Result};

/// Characters that would corrupt the generated daemon files.
const FORBIDDEN_CHARS: &[char] = &['"', '\\'];

/// Prefix of every connection name handed to the daemon.
pub const CONNECTION_PREFIX: &str = "vpnmon-";

/// Credentials for an authenticated tunnel test.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// L2TP username.
    pub username: String,
    /// L2TP password.
    pub password: String,
    /// IPsec pre-shared key.
    pub shared_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("shared_key", &"<redacted>")
            .finish()
    }
}

/// One configured VPN server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    /// Human-readable server name.
    pub name: String,
    /// Hostname or IP address of the VPN endpoint.
    pub host: String,
    /// Tunnel credentials; `None` for connectivity-only targets.
    pub credentials: Option<Credentials>,
}

impl ServerTarget {
    /// Creates a target that is tested with a full authenticated tunnel.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        shared_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
                shared_key: shared_key.into(),
            }),
        }
    }

    /// Creates a connectivity-only target.
    #[must_use]
    pub fn connectivity_only(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            credentials: None,
        }
    }

    /// Parses a single `name:host[:username:password:sharedKey]` record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` if the record has the wrong number of fields,
    /// an empty field, or characters that cannot be written to the daemon
    /// configuration.
    pub fn parse(record: &str) -> Result<Self> {
        let record = record.trim();
        let parts: Vec<&str> = record.split(':').map(str::trim).collect();

        let target = match parts.as_slice() {
            [name, host] => Self::connectivity_only(*name, *host),
            [name, host, username, password, shared_key] => {
                Self::new(*name, *host, *username, *password, *shared_key)
            }
            _ => {
                return Err(DaemonError::invalid_target(format!(
                    "expected name:host or name:host:username:password:sharedKey, got {} field(s) in record for '{}'",
                    parts.len(),
                    parts.first().copied().unwrap_or_default()
                )));
            }
        };

        target.validate()?;
        Ok(target)
    }

    /// Parses a comma-separated server list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` if the list is empty, any record is invalid,
    /// or two records share a name.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        let mut targets: Vec<Self> = Vec::new();

        for record in list.split(',').filter(|r| !r.trim().is_empty()) {
            let target = Self::parse(record)?;
            if targets.iter().any(|t| t.name == target.name) {
                return Err(DaemonError::invalid_target(format!(
                    "duplicate server name '{}'",
                    target.name
                )));
            }
            targets.push(target);
        }

        if targets.is_empty() {
            return Err(DaemonError::invalid_target("no VPN servers configured"));
        }

        Ok(targets)
    }

    /// Whether this target only checks reachability.
    #[must_use]
    pub fn is_connectivity_only(&self) -> bool {
        self.credentials.is_none()
    }

    /// Name of the daemon connection used for this target.
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced with `-`.
    #[must_use]
    pub fn connection_name(&self) -> String {
        let sanitized: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{CONNECTION_PREFIX}{sanitized}")
    }

    fn validate(&self) -> Result<()> {
        validate_field("name", &self.name)?;
        validate_field("host", &self.host)?;
        if let Some(creds) = &self.credentials {
            validate_field("username", &creds.username)?;
            validate_field("password", &creds.password)?;
            validate_field("sharedKey", &creds.shared_key)?;
        }
        Ok(())
    }
}

fn validate_field(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DaemonError::invalid_target(format!("{field} cannot be empty")));
    }

    if let Some(c) = value
        .chars()
        .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(DaemonError::invalid_target(format!(
            "{field} contains forbidden character {c:?}"
        )));
    }

    if field == "host" && value.chars().any(char::is_whitespace) {
        return Err(DaemonError::invalid_target("host cannot contain whitespace"));
    }

    // The host is handed to `ping` as a positional argument.
    if field == "host" && value.starts_with('-') {
        return Err(DaemonError::invalid_target("host cannot start with '-'"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_full_record() {
        let target = ServerTarget::parse("srv1:198.51.100.10:alice:pw:key123").expect("valid");
        assert_eq!(target.name, "srv1");
        assert_eq!(target.host, "198.51.100.10");
        let creds = target.credentials.expect("credentials");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "pw");
        assert_eq!(creds.shared_key, "key123");
    }

    #[test]
    fn test_parse_connectivity_only_record() {
        let target = ServerTarget::parse("edge:vpn.example.net").expect("valid");
        assert!(target.is_connectivity_only());
        assert_eq!(target.host, "vpn.example.net");
    }

    #[test]
    fn test_parse_list_trims_and_skips_blank_entries() {
        let targets =
            ServerTarget::parse_list(" a:10.0.0.1:u:p:k , ,b:10.0.0.2 ").expect("valid list");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "a");
        assert_eq!(targets[1].name, "b");
    }

    #[test_case("" ; "empty list")]
    #[test_case(" , " ; "only separators")]
    fn test_parse_list_rejects_empty(list: &str) {
        assert!(ServerTarget::parse_list(list).is_err());
    }

    #[test_case("srv1" ; "one field")]
    #[test_case("srv1:host:user" ; "three fields")]
    #[test_case("srv1:host:user:pw" ; "four fields")]
    #[test_case("srv1:host:user:pw:key:extra" ; "six fields")]
    #[test_case("srv1::user:pw:key" ; "empty host")]
    #[test_case("srv1:host:user:p\"w:key" ; "quote in password")]
    #[test_case("srv1:host:user:pw:k\u{7}ey" ; "control char in key")]
    #[test_case("srv1:-oProxy:user:pw:key" ; "option-like host")]
    #[test_case("edge:-f" ; "option-like connectivity host")]
    fn test_parse_rejects_invalid_record(record: &str) {
        let err = ServerTarget::parse(record).expect_err("should be rejected");
        assert!(err.is_config_error());
    }

    #[test]
    fn test_parse_list_rejects_duplicate_names() {
        let err = ServerTarget::parse_list("a:10.0.0.1,a:10.0.0.2").expect_err("duplicate");
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn test_dash_only_rejected_at_start_of_host() {
        let err = ServerTarget::parse("srv1:-198.51.100.10").expect_err("leading dash");
        assert!(err.to_string().contains("cannot start with '-'"));
        assert!(ServerTarget::parse("srv1:vpn-east.example.net").is_ok());
    }

    #[test]
    fn test_connection_name_is_sanitized() {
        let target = ServerTarget::connectivity_only("office east/1", "10.0.0.1");
        assert_eq!(target.connection_name(), "vpnmon-office-east-1");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let target = ServerTarget::new("srv", "10.0.0.1", "alice", "hunter2", "psk-secret");
        let debug = format!("{target:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("psk-secret"));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn full_records_parse_back_to_their_fields(
                name in "[a-z][a-z0-9-]{0,12}",
                host in "[a-z0-9.]{1,20}",
                user in "[A-Za-z0-9_]{1,10}",
                password in "[A-Za-z0-9!#%]{1,16}",
                key in "[A-Za-z0-9]{1,24}",
            ) {
                let record = format!("{name}:{host}:{user}:{password}:{key}");
                let target = ServerTarget::parse(&record).expect("generated record is valid");
                prop_assert_eq!(target.name, name);
                prop_assert_eq!(target.host, host);
                let creds = target.credentials.expect("credentials");
                prop_assert_eq!(creds.password, password);
                prop_assert_eq!(creds.shared_key, key);
            }

            #[test]
            fn connection_names_only_use_safe_characters(name in "\\PC{1,20}") {
                let target = ServerTarget::connectivity_only(name, "10.0.0.1");
                let conn = target.connection_name();
                prop_assert!(conn.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            }
        }
    }
}
