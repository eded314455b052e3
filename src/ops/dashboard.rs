use crate::error::{HubError, Result};
use crate::ops::cache::CacheStore;
use crate::ops::config::{AppRegistry, ApplicationConfig, ConnectionType};
use crate::ops::monitor::{parse_status, ServerStatusRecord, StatusSummary};
use crate::ops::shell::StatusSource;
use crate::ops::Scope;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub scope: String,
    pub records: Vec<ServerStatusRecord>,
    pub summary: StatusSummary,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: String,
}

impl StatusSnapshot {
    fn new(
        scope: &Scope,
        records: Vec<ServerStatusRecord>,
        cached: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            scope: scope.to_string(),
            summary: StatusSummary::from_records(&records),
            records,
            cached,
            error,
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Plain-text report in the controller's own layout.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            let _ = writeln!(out, "📡 {} ({})", r.name, r.id);
            let _ = writeln!(
                out,
                "   Tasks: {} ({} enabled) | Running: {} | Failed (24h): {} | Last Run: {}",
                r.tasks, r.enabled, r.running, r.failed, r.last_run
            );
        }
        let s = &self.summary;
        let _ = writeln!(
            out,
            "Σ {} servers, {} tasks ({} enabled), {} running, {} failed{}",
            s.servers,
            s.tasks,
            s.enabled,
            s.running,
            s.failed,
            if self.cached { " [cached]" } else { "" }
        );
        if let Some(err) = &self.error {
            let _ = writeln!(out, "⚠️  {}", err);
        }
        out
    }
}

/// What the dashboard shows for one app. Never carries the API key.
#[derive(Debug, Clone, Serialize)]
pub struct AppView {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub description: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub auto_sync: bool,
    pub coordination: bool,
    pub priority: u8,
    pub configurable: bool,
    pub has_api_key: bool,
}

impl From<&ApplicationConfig> for AppView {
    fn from(app: &ApplicationConfig) -> Self {
        Self {
            id: app.id.clone(),
            name: app.name.clone(),
            domain: app.domain.clone(),
            description: app.description.clone(),
            connection_type: app.connection_type,
            auto_sync: app.auto_sync,
            coordination: app.coordination,
            priority: app.priority,
            configurable: app.is_configurable(),
            has_api_key: app.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub apps: Vec<AppView>,
    pub status: StatusSnapshot,
}

/// Config loader, status cache and status source wired together.
pub struct CronDashboard {
    apps_config: PathBuf,
    source: Arc<dyn StatusSource>,
    cache: Arc<dyn CacheStore>,
}

impl CronDashboard {
    pub fn new(
        apps_config: impl Into<PathBuf>,
        source: Arc<dyn StatusSource>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            apps_config: apps_config.into(),
            source,
            cache,
        }
    }

    pub fn registry(&self) -> AppRegistry {
        AppRegistry::load(&self.apps_config)
    }

    /// Cached status if fresh, otherwise fetch, parse and cache.
    ///
    /// Never fails: controller errors come back as an empty (or partial)
    /// record set with `error` set, and are not cached.
    pub fn status(&self, scope: &Scope) -> StatusSnapshot {
        if let Some(records) = self.cache.get(scope) {
            return StatusSnapshot::new(scope, records, true, None);
        }

        let (text, error) = match self.source.fetch_status(scope) {
            Ok(text) => (text, None),
            Err(e) => {
                warn!("Status fetch for '{}' degraded: {}", scope, e);
                let message = e.to_string();
                let partial = match e {
                    HubError::FetchTimeout { partial, .. } => partial,
                    _ => String::new(),
                };
                (partial, Some(message))
            }
        };

        let records = parse_status(&text);
        if error.is_none() {
            self.store(scope, &records);
        }
        StatusSnapshot::new(scope, records, false, error)
    }

    pub fn invalidate(&self, scope: &Scope) {
        self.cache.invalidate(scope);
    }

    /// Drop the cache entry and fetch fresh. Returns the raw controller text.
    pub fn refresh(&self, scope: &Scope) -> Result<String> {
        self.cache.invalidate(scope);
        let text = self.source.fetch_status(scope)?;
        let records = parse_status(&text);
        info!("Refreshed status for '{}': {} servers", scope, records.len());
        self.store(scope, &records);
        Ok(text)
    }

    pub fn snapshot(&self, scope: &Scope) -> DashboardSnapshot {
        let registry = self.registry();
        DashboardSnapshot {
            apps: registry.by_priority().into_iter().map(AppView::from).collect(),
            status: self.status(scope),
        }
    }

    fn store(&self, scope: &Scope, records: &[ServerStatusRecord]) {
        if let Err(e) = self.cache.put(scope, records) {
            warn!("Status cache write skipped: {}", e);
        }
    }
}

/// Text for pass-through actions. Timeouts still show what was captured.
pub fn render_output(result: Result<String>) -> String {
    match result {
        Ok(text) => text,
        Err(HubError::FetchTimeout { after, partial }) => {
            format!(
                "{}\n[controller timed out after {}s; output truncated]\n",
                partial.trim_end(),
                after.as_secs()
            )
        }
        Err(e) => format!("Error: {}\n", e),
    }
}
