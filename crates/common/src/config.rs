//! Service configuration
//!
//! Loaded from a TOML file when present, with environment variable
//! overrides for container deployments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Access policy governing who may obtain a share-link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Open,
    Whitelist,
    AdminApproval,
    Closed,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Open
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Whitelist => write!(f, "whitelist"),
            Self::AdminApproval => write!(f, "admin_approval"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "whitelist" => Ok(Self::Whitelist),
            "admin_approval" => Ok(Self::AdminApproval),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("unknown auth mode: {}", s)),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream panel configuration
    #[serde(default)]
    pub panel: PanelConfig,

    /// Access policy configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Share-link configuration
    #[serde(default)]
    pub links: LinkConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,

    /// Store directory path
    pub store_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            store_path: crate::default_store_path(),
        }
    }
}

/// Upstream panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Panel base URL
    pub base_url: String,

    /// Panel API key, sent as the `wg-dashboard-apikey` header
    pub api_key: String,

    /// Logical interface configuration name the panel multiplexes on
    pub config_name: String,

    /// DNS servers for new peers
    pub dns: String,

    /// Default allowed IPs for new peers
    pub endpoint_allowed_ip: String,

    /// Persistent keepalive for new peers, seconds
    pub keepalive: u32,

    /// MTU for new peers
    pub mtu: u32,

    /// Public endpoint inserted into downloaded configs when missing
    pub endpoint: Option<String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:10086".to_string(),
            api_key: String::new(),
            config_name: "wg0".to_string(),
            dns: "1.1.1.1".to_string(),
            endpoint_allowed_ip: "0.0.0.0/0".to_string(),
            keepalive: 21,
            mtu: 1420,
            endpoint: None,
        }
    }
}

/// Access policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Access mode
    pub mode: AuthMode,

    /// Admin user ids, always allowed
    pub admin_ids: Vec<i64>,

    /// Static allow-list consulted in whitelist mode
    pub allowed_user_ids: Vec<i64>,
}

/// Share-link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Public domain used to build download URLs
    pub link_domain: String,

    /// Default link lifetime, hours
    pub default_expiry_hours: i64,

    /// Default usage quota per link
    pub default_max_usage: i64,

    /// Expiry sweep interval, seconds
    pub cleanup_interval_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_domain: "http://localhost:3000".to_string(),
            default_expiry_hours: 24,
            default_max_usage: 1,
            cleanup_interval_secs: 3600,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from file, then apply environment overrides
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.server.store_path.join("state.db")
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PEERLINK_LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("PEERLINK_DB_PATH") {
            self.server.store_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PANEL_URL") {
            self.panel.base_url = v;
        }
        if let Ok(v) = std::env::var("PANEL_API_KEY") {
            self.panel.api_key = v;
        }
        if let Ok(v) = std::env::var("PANEL_CONFIG_NAME") {
            self.panel.config_name = v;
        }
        if let Ok(v) = std::env::var("WG_DNS") {
            self.panel.dns = v;
        }
        if let Ok(v) = std::env::var("WG_ALLOWED_IPS") {
            self.panel.endpoint_allowed_ip = v;
        }
        if let Ok(v) = std::env::var("WG_KEEPALIVE") {
            if let Ok(n) = v.trim().parse() {
                self.panel.keepalive = n;
            }
        }
        if let Ok(v) = std::env::var("WG_MTU") {
            if let Ok(n) = v.trim().parse() {
                self.panel.mtu = n;
            }
        }
        if let Ok(v) = std::env::var("WG_ENDPOINT") {
            self.panel.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("AUTH_MODE") {
            if let Ok(mode) = v.parse() {
                self.auth.mode = mode;
            }
        }
        if let Ok(v) = std::env::var("ADMIN_IDS") {
            self.auth.admin_ids = parse_id_list(&v);
        }
        if let Ok(v) = std::env::var("ALLOWED_USER_IDS") {
            self.auth.allowed_user_ids = parse_id_list(&v);
        }
        if let Ok(v) = std::env::var("LINK_DOMAIN") {
            self.links.link_domain = v;
        }
    }
}

/// Parse a comma-separated id list, skipping malformed entries
fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.auth.mode, AuthMode::Open);
        assert_eq!(config.panel.keepalive, 21);
        assert_eq!(config.panel.mtu, 1420);
        assert_eq!(config.links.default_expiry_hours, 24);
        assert_eq!(config.links.default_max_usage, 1);
    }

    #[test]
    fn test_auth_mode_roundtrip() {
        for mode in [
            AuthMode::Open,
            AuthMode::Whitelist,
            AuthMode::AdminApproval,
            AuthMode::Closed,
        ] {
            assert_eq!(mode.to_string().parse::<AuthMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3"), vec![1, 2, 3]);
        assert_eq!(parse_id_list("1,abc,3"), vec![1, 3]);
        assert!(parse_id_list("").is_empty());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ServiceConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ServiceConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.panel.config_name, config.panel.config_name);
    }
}
