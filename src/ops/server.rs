//! HTTP surface for the dashboard page's AJAX calls.
//!
//! `GET /cron?action=...` returns controller text verbatim,
//! `POST /cron?action=save_settings` returns `{success, error?}`, and a plain
//! `GET /cron` returns the JSON snapshot the page renders from.

use crate::error::HubError;
use crate::ops::dashboard::{render_output, CronDashboard};
use crate::ops::settings::{SettingsUpdate, SettingsWriter};
use crate::ops::shell::{Controller, ControllerCommand};
use crate::ops::Scope;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<CronDashboard>,
    pub controller: Arc<dyn Controller>,
    pub apps_config: PathBuf,
    pub default_log_lines: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub action: Option<String>,
    pub app: Option<String>,
    pub lines: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RefreshStatus,
    ListTasks,
    ViewLogs,
    ViewCrontab,
    SyncAll,
    Coordinate,
    SaveSettings,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh_status" => Ok(Action::RefreshStatus),
            "list_tasks" => Ok(Action::ListTasks),
            "view_logs" => Ok(Action::ViewLogs),
            "view_crontab" => Ok(Action::ViewCrontab),
            "sync_all" => Ok(Action::SyncAll),
            "coordinate" => Ok(Action::Coordinate),
            "save_settings" => Ok(Action::SaveSettings),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

impl Action {
    /// Controller verb behind a pass-through action.
    fn command(self, scope: &Scope, lines: u32) -> Option<ControllerCommand> {
        let server = scope.server().map(str::to_string);
        match self {
            Action::ListTasks => Some(ControllerCommand::List { server }),
            Action::ViewLogs => Some(ControllerCommand::Logs {
                server,
                lines: Some(lines),
            }),
            Action::ViewCrontab => Some(ControllerCommand::Crontab { server }),
            Action::SyncAll => Some(ControllerCommand::Sync),
            Action::Coordinate => Some(ControllerCommand::Coordinate),
            Action::RefreshStatus | Action::SaveSettings => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveSettingsRequest {
    pub app_id: String,
    #[serde(flatten)]
    pub update: SettingsUpdate,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cron", get(cron_get).post(cron_post))
        .route("/api/cron/status", get(api_status))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (status, body.into()).into_response()
}

fn settings_reply(status: StatusCode, err: Option<String>) -> Response {
    let body = match err {
        None => json!({ "success": true }),
        Some(e) => json!({ "success": false, "error": e }),
    };
    (status, Json(body)).into_response()
}

async fn cron_get(State(state): State<AppState>, Query(q): Query<ActionQuery>) -> Response {
    let scope = match Scope::parse(q.app.as_deref()) {
        Ok(s) => s,
        Err(e) => return text(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let action = match q.action.as_deref() {
        None | Some("") => {
            let dashboard = state.dashboard.clone();
            return match tokio::task::spawn_blocking(move || dashboard.snapshot(&scope)).await {
                Ok(snapshot) => Json(snapshot).into_response(),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
        }
        Some(raw) => match raw.parse::<Action>() {
            Ok(a) => a,
            Err(e) => return text(StatusCode::BAD_REQUEST, e),
        },
    };

    if action == Action::SaveSettings {
        return text(StatusCode::METHOD_NOT_ALLOWED, "save_settings requires POST");
    }

    let lines = q.lines.unwrap_or(state.default_log_lines);
    let job = move || match action.command(&scope, lines) {
        Some(command) => render_output(state.controller.run(&command)),
        None => render_output(state.dashboard.refresh(&scope)),
    };

    match tokio::task::spawn_blocking(job).await {
        Ok(output) => text(StatusCode::OK, output),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cron_post(
    State(state): State<AppState>,
    Query(q): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    if q.action.as_deref() != Some("save_settings") {
        return settings_reply(
            StatusCode::BAD_REQUEST,
            Some("Unsupported POST action".to_string()),
        );
    }

    let request: SaveSettingsRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return settings_reply(
                StatusCode::BAD_REQUEST,
                Some(format!("Invalid settings payload: {}", e)),
            )
        }
    };

    let path = state.apps_config.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        SettingsWriter::apply(&path, &request.app_id, &request.update)
    })
    .await;

    match outcome {
        Ok(Ok(app)) => {
            info!("Settings saved for '{}'", app.id);
            settings_reply(StatusCode::OK, None)
        }
        Ok(Err(e)) => {
            let status = match e {
                HubError::UnknownApplication(_) => StatusCode::NOT_FOUND,
                HubError::InvalidSetting(_) => StatusCode::BAD_REQUEST,
                _ => {
                    error!("Settings save failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            settings_reply(status, Some(e.to_string()))
        }
        Err(e) => settings_reply(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
    }
}

async fn api_status(State(state): State<AppState>, Query(q): Query<ActionQuery>) -> Response {
    let scope = match Scope::parse(q.app.as_deref()) {
        Ok(s) => s,
        Err(e) => return text(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let dashboard = state.dashboard.clone();
    match tokio::task::spawn_blocking(move || dashboard.status(&scope)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Bind and serve until the process is stopped.
pub async fn start_server(bind: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Cron dashboard listening on http://{}/cron", addr);
    println!("🎯 cronhub is serving http://{}/cron", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
