//! `forage.toml`: every field is optional.

use anyhow::Context;
use forage_registry::{npm, official, smithery, NpmRegistry, OfficialRegistry, SearchAggregator, Smithery};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "forage.toml";

#[derive(Debug, Deserialize)]
pub struct ForageConfig {
    /// Holds `manifest.json` and `install-log.jsonl`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Check npm before installing a package.
    #[serde(default = "default_true")]
    pub verify_packages: bool,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub servers: ServersConfig,
}

#[derive(Debug, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_official_url")]
    pub official_url: String,
    #[serde(default = "default_smithery_url")]
    pub smithery_url: String,
    #[serde(default = "default_npm_url")]
    pub npm_url: String,
    #[serde(default = "default_npm_downloads_url")]
    pub npm_downloads_url: String,
}

/// Timeouts for child servers.
#[derive(Debug, Deserialize)]
pub struct ServersConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ForageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            verify_packages: true,
            search: SearchConfig::default(),
            servers: ServersConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout(),
            official_url: default_official_url(),
            smithery_url: default_smithery_url(),
            npm_url: default_npm_url(),
            npm_downloads_url: default_npm_downloads_url(),
        }
    }
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ForageConfig {
    /// Load `explicit` if given (it must exist), else `forage.toml` if
    /// present, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read config file '{}'", path.display())
                })
            }
        };
        Self::parse(&text).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut config: ForageConfig = toml::from_str(text)?;
        config.data_dir = expand_home(&config.data_dir);
        Ok(config)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.servers.handshake_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.servers.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.servers.shutdown_timeout_secs)
    }

    pub fn official_registry(&self) -> OfficialRegistry {
        OfficialRegistry::with_base_url(&self.search.official_url)
    }

    pub fn npm_registry(&self) -> NpmRegistry {
        NpmRegistry::with_base_urls(&self.search.npm_url, &self.search.npm_downloads_url)
    }

    pub fn search_aggregator(&self) -> SearchAggregator {
        SearchAggregator::new(vec![
            Arc::new(self.official_registry()),
            Arc::new(Smithery::with_base_url(&self.search.smithery_url)),
            Arc::new(self.npm_registry()),
        ])
        .with_timeout(Duration::from_secs(self.search.timeout_secs))
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".forage")
}
fn default_true() -> bool {
    true
}
fn default_search_timeout() -> u64 {
    10
}
fn default_official_url() -> String {
    official::DEFAULT_BASE_URL.to_string()
}
fn default_smithery_url() -> String {
    smithery::DEFAULT_BASE_URL.to_string()
}
fn default_npm_url() -> String {
    npm::DEFAULT_BASE_URL.to_string()
}
fn default_npm_downloads_url() -> String {
    npm::DEFAULT_DOWNLOADS_URL.to_string()
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    60
}
fn default_shutdown_timeout() -> u64 {
    5
}
