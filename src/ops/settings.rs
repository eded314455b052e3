use crate::error::{HubError, Result};
use crate::fsutil;
use crate::ops::config::{AppRegistry, ApplicationConfig, ConnectionType, MAX_PRIORITY, MIN_PRIORITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Partial settings for one application. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordination: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self == &SettingsUpdate::default()
    }

    /// Apply onto a copy of `current`. `current` itself is never touched.
    pub fn merged(&self, current: &ApplicationConfig) -> Result<ApplicationConfig> {
        if !current.is_configurable() {
            return Err(HubError::InvalidSetting(format!(
                "'{}' is an alias and has no schedule settings",
                current.id
            )));
        }
        if let Some(p) = self.priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
                return Err(HubError::InvalidSetting(format!(
                    "priority must be between {} and {}, got {}",
                    MIN_PRIORITY, MAX_PRIORITY, p
                )));
            }
        }

        let mut next = current.clone();
        if let Some(v) = self.auto_sync {
            next.auto_sync = v;
        }
        if let Some(v) = self.coordination {
            next.coordination = v;
        }
        if let Some(v) = self.priority {
            next.priority = v;
        }

        match next.connection_type {
            ConnectionType::Local => {
                if let Some(path) = &self.path {
                    next.path = Some(path.clone());
                }
                if self.api_url.is_some() || self.api_key.is_some() {
                    debug!("Ignoring remote fields for local app '{}'", current.id);
                }
            }
            ConnectionType::Remote => {
                if let Some(url) = &self.api_url {
                    next.api_url = Some(url.clone());
                }
                if let Some(key) = &self.api_key {
                    next.api_key = Some(key.clone());
                }
                if self.path.is_some() {
                    debug!("Ignoring path for remote app '{}'", current.id);
                }
            }
            ConnectionType::Alias => {}
        }
        Ok(next)
    }
}

/// Settings save as one locked read-merge-write against the file on disk.
pub struct SettingsWriter;

impl SettingsWriter {
    pub fn apply(
        config_path: &Path,
        app_id: &str,
        update: &SettingsUpdate,
    ) -> Result<ApplicationConfig> {
        let _lock =
            fsutil::lock_exclusive(config_path).map_err(|e| HubError::persist(config_path, e))?;

        // Re-read under the lock so a concurrent save is not lost. An
        // unreadable file is an error here: saving over it would wipe it.
        let mut registry = AppRegistry::try_load(config_path)?;
        registry.upsert(app_id, update).cloned()
    }
}
