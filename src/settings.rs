//! Application settings, loaded from a JSON configuration file
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Address, Netmask};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8077";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30 * 60;
pub const DEFAULT_VERIFICATION_EXPIRATION_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_PEER_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    // Public address used in links, e.g. in verification email
    pub hostname: String,

    // URL prefix the front end is served under
    pub prefix: String,

    // Socket address to bind to
    pub addr: String,

    // Header fields consulted, in order, for the real remote address
    // when running behind a proxy (e.g. "X-Real-IP")
    pub deproxy_header_fields: Vec<String>,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            hostname: "http://localhost:8077".to_string(),
            prefix: String::new(),
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            deproxy_header_fields: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub read_only: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    // Register nodes directly instead of emailing a verification link
    pub verify_disabled: bool,

    // "From" address of outgoing notices
    pub email_address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    // Registered addresses must fall within this mask
    pub netmask: Option<Netmask>,

    // Verification requests must come from the node being verified
    pub from_node: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Name this instance is referred to by
    pub name: String,

    // Shown in notices, e.g. "Your Name <you@example.org>"
    pub admin_contact: String,

    pub web: WebSettings,

    // Peer maps pulled from every heartbeat. These are trusted fully.
    pub child_maps: Vec<String>,

    pub database: DatabaseSettings,

    // Interval between heartbeat runs
    pub heartbeat_rate_secs: u64,

    // Time allowed to verify a registration by email
    pub verification_expiration_secs: u64,

    // Upper bound on a single peer map fetch
    pub peer_fetch_timeout_secs: u64,

    // Email settings. Without them, registration is unavailable.
    pub smtp: Option<SmtpSettings>,

    pub verify: VerifySettings,

    // Addresses exempt from token and CAPTCHA checks
    pub admin_addresses: Vec<Address>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "meshmap".to_string(),
            admin_contact: String::new(),
            web: WebSettings::default(),
            child_maps: Vec::new(),
            database: DatabaseSettings::default(),
            heartbeat_rate_secs: DEFAULT_HEARTBEAT_SECS,
            verification_expiration_secs: DEFAULT_VERIFICATION_EXPIRATION_SECS,
            peer_fetch_timeout_secs: DEFAULT_PEER_FETCH_TIMEOUT_SECS,
            smtp: None,
            verify: VerifySettings::default(),
            admin_addresses: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_json(s: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read a configuration from the filesystem.
    pub fn read_config(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| config_error!("Could not read {}: {}", path.display(), e))?;
        Self::from_json(&contents)
    }

    /// Write the configuration to the filesystem, creating the file if
    /// it does not exist.
    pub fn write_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_rate_secs == 0 {
            return Err(config_error!("heartbeat_rate_secs must be positive"));
        }
        if self.peer_fetch_timeout_secs == 0 {
            return Err(config_error!("peer_fetch_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn heartbeat_rate(&self) -> Duration {
        Duration::from_secs(self.heartbeat_rate_secs)
    }

    pub fn verification_expiration(&self) -> Duration {
        Duration::from_secs(self.verification_expiration_secs)
    }

    pub fn peer_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_fetch_timeout_secs)
    }

    pub fn is_admin(&self, address: &Address) -> bool {
        self.admin_addresses.iter().any(|admin| admin == address)
    }

    /// Base URL of the front end, used when building links.
    pub fn public_link(&self) -> String {
        format!("{}{}", self.web.hostname, self.web.prefix)
    }
}
