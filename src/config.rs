use crate::ops::cache::{CacheStore, FileCacheStore, MemoryCacheStore};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONTROLLER: &[&str] = &["php", "universal_cron_controller.php"];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

/// Settings for the dashboard process itself (not the managed apps).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HubSettings {
    /// JSON registry of managed applications.
    pub apps_config: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_backend: CacheBackend,
    pub cache_ttl_secs: u64,
    /// Program plus fixed leading args; the verb is appended.
    pub controller: Vec<String>,
    pub fetch_timeout_secs: u64,
    pub default_log_lines: u32,
    pub bind: String,
    pub port: u16,
}

pub fn hub_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cronhub"))
        .unwrap_or_else(|| PathBuf::from(".cronhub"))
}

impl Default for HubSettings {
    fn default() -> Self {
        let dir = hub_dir();
        Self {
            apps_config: dir.join("apps.json"),
            cache_dir: dir.join("cache"),
            cache_backend: CacheBackend::File,
            cache_ttl_secs: 30,
            controller: DEFAULT_CONTROLLER.iter().map(|s| s.to_string()).collect(),
            fetch_timeout_secs: 20,
            default_log_lines: 50,
            bind: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl HubSettings {
    pub fn default_path() -> PathBuf {
        hub_dir().join("hub.toml")
    }

    /// Load from `path`, or from `~/.cronhub/hub.toml` when `None`.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (config_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !config_path.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// `CRONHUB_*` overrides, read through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CRONHUB_APPS_CONFIG") {
            self.apps_config = PathBuf::from(v);
        }
        if let Some(v) = lookup("CRONHUB_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CRONHUB_CONTROLLER") {
            let argv: Vec<String> = v.split_whitespace().map(str::to_string).collect();
            if !argv.is_empty() {
                self.controller = argv;
            }
        }
        if let Some(port) = lookup("CRONHUB_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn build_cache(&self) -> Arc<dyn CacheStore> {
        match self.cache_backend {
            CacheBackend::File => Arc::new(FileCacheStore::new(&self.cache_dir, self.cache_ttl())),
            CacheBackend::Memory => Arc::new(MemoryCacheStore::new(self.cache_ttl())),
        }
    }
}
