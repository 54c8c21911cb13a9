use crate::storage::sanitize_account;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Subject key → display name, overriding the built-in names.
    #[serde(default)]
    pub subjects: BTreeMap<String, String>,
}

/// Portal connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Waits between data-page checks after the first login.
    #[serde(default = "default_primary_delays_ms")]
    pub primary_delays_ms: Vec<u64>,

    /// Waits between data-page checks after the fallback login.
    #[serde(default = "default_fallback_delays_ms")]
    pub fallback_delays_ms: Vec<u64>,
}

/// Poll cycle settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for one whole refresh (login + fetch + parse).
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
}

/// Storage of the last raw page and parsed snapshot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One portal login
#[derive(Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://homeinfopoint.de/salza-gymnasium/".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
        .to_string()
}
fn default_accept_language() -> String {
    "de-DE,de;q=0.9,en;q=0.8".to_string()
}
fn default_primary_delays_ms() -> Vec<u64> {
    vec![200, 600, 1000]
}
fn default_fallback_delays_ms() -> Vec<u64> {
    vec![300, 800, 1200, 2000]
}
fn default_interval_secs() -> u64 {
    6 * 60 * 60
}
fn default_refresh_timeout_secs() -> u64 {
    120
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_true() -> bool {
    true
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            primary_delays_ms: default_primary_delays_ms(),
            fallback_delays_ms: default_fallback_delays_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            enabled: true,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

impl PortalConfig {
    /// Same settings, pointed at another portal instance.
    pub fn with_base_url(&self, base_url: Option<&str>) -> Self {
        let mut cfg = self.clone();
        if let Some(url) = base_url {
            cfg.base_url = url.to_string();
        }
        cfg
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(env_source())
            .build()
            .context("Failed to read configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashMap::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                bail!("account with username {:?} has no name", account.username);
            }
            // Accounts must not share a storage directory
            let dir = sanitize_account(&account.name);
            if let Some(other) = seen.insert(dir.clone(), account.name.as_str()) {
                if other == account.name {
                    bail!("account name {:?} is configured twice", account.name);
                }
                bail!(
                    "account names {:?} and {:?} both map to storage dir {:?}",
                    other,
                    account.name,
                    dir
                );
            }
        }
        Ok(())
    }
}

/// `HIP_POLL__INTERVAL_SECS` overrides `poll.interval_secs`.
fn env_source() -> config::Environment {
    config::Environment::with_prefix("HIP")
        .prefix_separator("_")
        .separator("__")
}
