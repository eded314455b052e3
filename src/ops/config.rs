use crate::error::{HubError, Result};
use crate::fsutil;
use crate::ops::settings::SettingsUpdate;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Local,
    Remote,
    /// Points at another app's schedule; nothing to configure.
    Alias,
}

/// Entries are written by a PHP admin page, so scalars arrive loosely
/// typed: `null` strings, `"2"` priorities, `"1"`/`0` flags.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApplicationConfig {
    /// Filled from the registry key on load.
    #[serde(skip)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub domain: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub auto_sync: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub coordination: bool,
    #[serde(default = "default_priority", deserialize_with = "lenient_priority")]
    pub priority: u8,
    /// Keys this crate does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;

fn default_priority() -> u8 {
    3
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `true`/`false`, `1`/`0`, `"1"`/`"0"`, `"true"`/`"false"`; `null` is false.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(de::Error::custom(format!("not a boolean: {:?}", other))),
        },
        other => Err(de::Error::custom(format!("not a boolean: {}", other))),
    }
}

/// A number or numeric string; `null` and `""` fall back to the default.
fn lenient_priority<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(default_priority()),
        Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        Value::String(s) if s.trim().is_empty() => return Ok(default_priority()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| de::Error::custom("priority must be a small integer"))
}

impl ApplicationConfig {
    pub fn is_configurable(&self) -> bool {
        self.connection_type != ConnectionType::Alias
    }
}

/// The JSON file of managed applications, keyed by id.
///
/// Entries that fail to deserialize are kept as raw JSON so a save never
/// drops data this crate cannot interpret.
#[derive(Debug, Clone)]
pub struct AppRegistry {
    path: PathBuf,
    apps: BTreeMap<String, ApplicationConfig>,
    unparsed: BTreeMap<String, Value>,
}

impl AppRegistry {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            apps: BTreeMap::new(),
            unparsed: BTreeMap::new(),
        }
    }

    /// Load the registry, treating a missing or invalid file as "no apps".
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("{}; continuing with no applications", e);
                Self::empty(path)
            }
        }
    }

    /// Like [`AppRegistry::load`] but reports an unreadable or invalid file.
    /// A missing file is still an empty registry.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No app registry at {}", path.display());
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(HubError::ConfigLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let root: Map<String, Value> =
            serde_json::from_str(&content).map_err(|e| HubError::ConfigLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut registry = Self::empty(path);
        for (id, raw) in root {
            match serde_json::from_value::<ApplicationConfig>(raw.clone()) {
                Ok(mut app) => {
                    app.id = id.clone();
                    registry.apps.insert(id, app);
                }
                Err(e) => {
                    warn!("App '{}' in {} is not usable: {}", id, path.display(), e);
                    registry.unparsed.insert(id, raw);
                }
            }
        }
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&ApplicationConfig> {
        self.apps.get(id)
    }

    /// Highest priority (1) first, ties broken by id.
    pub fn by_priority(&self) -> Vec<&ApplicationConfig> {
        let mut apps: Vec<_> = self.apps.values().collect();
        apps.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Merge `update` into an existing app and persist the whole registry.
    ///
    /// Only existing ids are accepted. The in-memory registry changes only
    /// once the file has been written.
    pub fn upsert(&mut self, id: &str, update: &SettingsUpdate) -> Result<&ApplicationConfig> {
        let current = self
            .apps
            .get(id)
            .ok_or_else(|| HubError::UnknownApplication(id.to_string()))?;
        let merged = update.merged(current)?;

        let mut next = self.apps.clone();
        next.insert(id.to_string(), merged);
        write_registry(&self.path, &next, &self.unparsed)?;

        info!("Saved settings for '{}' to {}", id, self.path.display());
        self.apps = next;
        self.apps
            .get(id)
            .ok_or_else(|| HubError::UnknownApplication(id.to_string()))
    }

    pub fn save(&self) -> Result<()> {
        write_registry(&self.path, &self.apps, &self.unparsed)
    }
}

fn write_registry(
    path: &Path,
    apps: &BTreeMap<String, ApplicationConfig>,
    unparsed: &BTreeMap<String, Value>,
) -> Result<()> {
    let mut root = Map::new();
    for (id, raw) in unparsed {
        root.insert(id.clone(), raw.clone());
    }
    for (id, app) in apps {
        let value = serde_json::to_value(app).map_err(|e| HubError::persist(path, e.into()))?;
        root.insert(id.clone(), value);
    }

    let json = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| HubError::persist(path, e.into()))?;
    fsutil::write_atomic(path, json.as_bytes()).map_err(|e| HubError::persist(path, e))
}
