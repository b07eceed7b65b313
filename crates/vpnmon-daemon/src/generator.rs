//! Daemon configuration and secrets generation.
//!
//! Renders a strongSwan `ipsec.conf` connection for L2TP-over-IPsec in
//! transport mode and the matching `ipsec.secrets` PSK line, plus the
//! xl2tpd `[lac]` section and the pppd options file carrying the PPP login.
//! All files are written to fixed paths inside the daemon's include
//! directory and are overwritten on every test cycle.
//!
//! The daemon only sees the generated connection if its main configuration
//! pulls the directory in. With the default directory that means:
//!
//! ```text
//! # /etc/ipsec.conf
//! include /etc/ipsec.d/*.conf
//!
//! # /etc/ipsec.secrets
//! include /etc/ipsec.d/*.secrets
//! ```
//!
//! Without those lines the reload succeeds but the connection is unknown;
//! [`DaemonController::load_config`](crate::controller::DaemonController::load_config)
//! reports that as a configuration error. The L2TP and PPP files use other
//! suffixes so the globs above never pick them up.

use std::fmt::Write as FmtWrite;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DaemonError, Result};
use crate::target::{Credentials, ServerTarget};

/// Default include directory read by the daemon.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/ipsec.d";

/// File name of the generated connection definition.
pub const CONFIG_FILE_NAME: &str = "vpnmon.conf";

/// File name of the generated secrets.
pub const SECRETS_FILE_NAME: &str = "vpnmon.secrets";

/// File name of the generated xl2tpd configuration.
pub const L2TP_FILE_NAME: &str = "vpnmon.xl2tpd";

/// File name of the generated pppd options, which hold the PPP password.
pub const PPP_OPTIONS_FILE_NAME: &str = "vpnmon.ppp";

/// L2TP runs over UDP port 1701.
pub const L2TP_PROTOPORT: &str = "17/1701";

/// Cipher suites offered to the remote endpoint.
///
/// The profile is static policy: proposals end with `!` so nothing outside
/// the list is negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherProfile {
    /// IKE (phase 1) proposals, in preference order.
    pub ike: Vec<String>,
    /// ESP (phase 2) proposals, in preference order.
    pub esp: Vec<String>,
    /// IKE SA lifetime.
    pub ike_lifetime: Duration,
    /// IPsec SA lifetime.
    pub key_life: Duration,
}

impl CipherProfile {
    /// Broad client compatibility, including 3DES/SHA1 for old endpoints.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            ike: vec![
                "aes256-sha1-modp2048".to_string(),
                "aes128-sha1-modp2048".to_string(),
                "aes128-sha1-modp1024".to_string(),
                "3des-sha1-modp1024".to_string(),
            ],
            esp: vec![
                "aes256-sha1".to_string(),
                "aes128-sha1".to_string(),
                "3des-sha1".to_string(),
            ],
            ike_lifetime: Duration::from_secs(8 * 3600),
            key_life: Duration::from_secs(3600),
        }
    }

    /// AES-only suites for endpoints that reject legacy ciphers.
    #[must_use]
    pub fn modern() -> Self {
        Self {
            ike: vec![
                "aes256-sha256-modp2048".to_string(),
                "aes128-sha256-modp2048".to_string(),
            ],
            esp: vec!["aes256-sha256".to_string(), "aes128-sha256".to_string()],
            ..Self::legacy()
        }
    }

    /// Whether any proposal uses a legacy suite.
    #[must_use]
    pub fn includes_legacy_suite(&self) -> bool {
        self.ike.iter().chain(&self.esp).any(|p| p.starts_with("3des-sha1"))
    }
}

impl Default for CipherProfile {
    fn default() -> Self {
        Self::legacy()
    }
}

/// Paths produced by one `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    /// Connection definition file.
    pub config_path: PathBuf,
    /// PSK secrets file (mode 0600).
    pub secrets_path: PathBuf,
    /// xl2tpd configuration with one `[lac]` section.
    pub l2tp_path: PathBuf,
    /// pppd options with the PPP login (mode 0600).
    pub ppp_options_path: PathBuf,
    /// Connection name declared in the config file.
    pub connection_name: String,
}

impl ConfigBundle {
    /// Every file the bundle consists of.
    #[must_use]
    pub fn paths(&self) -> [&Path; 4] {
        [
            &self.config_path,
            &self.secrets_path,
            &self.l2tp_path,
            &self.ppp_options_path,
        ]
    }

    /// Remove all generated files. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns the first removal error other than `NotFound`.
    pub fn remove(&self) -> Result<()> {
        let mut first_error = None;
        for path in self.paths() {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed generated file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove generated file");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Whether any generated file is still on disk.
    #[must_use]
    pub fn any_exists(&self) -> bool {
        self.paths().iter().any(|path| path.exists())
    }
}

/// Renders and writes daemon configuration for one target at a time.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    dir: PathBuf,
    profile: CipherProfile,
}

impl ConfigGenerator {
    /// Generator writing into `dir` with the legacy-compatible profile.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            profile: CipherProfile::default(),
        }
    }

    /// Use a different cipher profile.
    #[must_use]
    pub fn with_profile(mut self, profile: CipherProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active cipher profile.
    #[must_use]
    pub fn profile(&self) -> &CipherProfile {
        &self.profile
    }

    /// Fixed paths the generator writes to.
    #[must_use]
    pub fn bundle_for(&self, target: &ServerTarget) -> ConfigBundle {
        ConfigBundle {
            config_path: self.dir.join(CONFIG_FILE_NAME),
            secrets_path: self.dir.join(SECRETS_FILE_NAME),
            l2tp_path: self.dir.join(L2TP_FILE_NAME),
            ppp_options_path: self.dir.join(PPP_OPTIONS_FILE_NAME),
            connection_name: target.connection_name(),
        }
    }

    /// Write the connection definition, secrets and L2TP/PPP files for
    /// `target`.
    ///
    /// The secrets and PPP options files are created with owner-only
    /// permissions before any key material is written to them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` for connectivity-only targets and
    /// `ConfigWrite` if the directory is not writable.
    pub fn generate(&self, target: &ServerTarget) -> Result<ConfigBundle> {
        let creds = target.credentials.as_ref().ok_or_else(|| {
            DaemonError::invalid_target(format!(
                "server '{}' has no credentials; nothing to configure",
                target.name
            ))
        })?;

        let bundle = self.bundle_for(target);
        let config = render_config(target, &self.profile);
        let secrets = render_secrets(target, creds);
        let l2tp = render_l2tp(target, &bundle.ppp_options_path);
        let ppp_options = render_ppp_options(creds);

        write_file(&bundle.config_path, config.as_bytes(), 0o644)?;
        write_file(&bundle.secrets_path, secrets.as_bytes(), 0o600)?;
        write_file(&bundle.l2tp_path, l2tp.as_bytes(), 0o644)?;
        write_file(&bundle.ppp_options_path, ppp_options.as_bytes(), 0o600)?;

        debug!(
            server = %target.name,
            connection = %bundle.connection_name,
            config = %bundle.config_path.display(),
            "generated daemon configuration"
        );
        Ok(bundle)
    }
}

/// Render the `ipsec.conf` connection block for `target`.
#[must_use]
pub fn render_config(target: &ServerTarget, profile: &CipherProfile) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Generated by vpnmon for server '{}'.", target.name);
    out.push_str("# Overwritten on every test cycle; do not edit.\n");
    let _ = writeln!(out, "conn {}", target.connection_name());
    out.push_str("    keyexchange=ikev1\n");
    out.push_str("    type=transport\n");
    out.push_str("    authby=secret\n");
    out.push_str("    left=%defaultroute\n");
    let _ = writeln!(out, "    leftprotoport={L2TP_PROTOPORT}");
    let _ = writeln!(out, "    right={}", target.host);
    let _ = writeln!(out, "    rightprotoport={L2TP_PROTOPORT}");
    let _ = writeln!(out, "    ike={}!", profile.ike.join(","));
    let _ = writeln!(out, "    esp={}!", profile.esp.join(","));
    let _ = writeln!(out, "    ikelifetime={}s", profile.ike_lifetime.as_secs());
    let _ = writeln!(out, "    keylife={}s", profile.key_life.as_secs());
    out.push_str("    rekey=no\n");
    out.push_str("    keyingtries=1\n");
    out.push_str("    dpdaction=clear\n");
    out.push_str("    auto=start\n");

    out
}

/// Render the PSK line for `target`.
#[must_use]
pub fn render_secrets(target: &ServerTarget, creds: &Credentials) -> String {
    format!("%any {} : PSK \"{}\"\n", target.host, creds.shared_key)
}

/// Render the xl2tpd configuration dialing `target` over the IPsec tunnel.
#[must_use]
pub fn render_l2tp(target: &ServerTarget, ppp_options_path: &Path) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "; Generated by vpnmon for server '{}'.", target.name);
    out.push_str("; Overwritten on every test cycle; do not edit.\n");
    let _ = writeln!(out, "[lac {}]", target.connection_name());
    let _ = writeln!(out, "lns = {}", target.host);
    let _ = writeln!(out, "pppoptfile = {}", ppp_options_path.display());
    out.push_str("length bit = yes\n");
    out.push_str("ppp debug = yes\n");
    out.push_str("autodial = no\n");
    out.push_str("redial = no\n");

    out
}

/// Render the pppd options carrying the PPP login for `creds`.
#[must_use]
pub fn render_ppp_options(creds: &Credentials) -> String {
    let mut out = String::new();

    out.push_str("# Generated by vpnmon; overwritten on every test cycle.\n");
    for option in [
        "ipcp-accept-local",
        "ipcp-accept-remote",
        "refuse-eap",
        "noccp",
        "noauth",
        "noipdefault",
        "nodefaultroute",
        "mtu 1280",
        "mru 1280",
        "connect-delay 5000",
        "logfd 2",
    ] {
        out.push_str(option);
        out.push('\n');
    }
    let _ = writeln!(out, "name \"{}\"", creds.username);
    let _ = writeln!(out, "password \"{}\"", creds.password);

    out
}

fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let map_err = |e: std::io::Error| DaemonError::config_write(path, e.to_string());

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(map_err)?;

    // `mode` only applies on creation; tighten a pre-existing file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(map_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(contents).map_err(map_err)?;
    file.sync_all().map_err(map_err)?;
    Ok(())
}
