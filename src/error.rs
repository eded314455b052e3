use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the cron status layer.
///
/// Read-path variants (`ConfigLoad`, `FetchTimeout`, `FetchFailure`) are
/// normally degraded to empty data by the caller. Write-path variants are
/// reported back to whoever asked for the write.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to load config {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("controller timed out after {}s", .after.as_secs())]
    FetchTimeout { after: Duration, partial: String },

    #[error("controller failed: {0}")]
    FetchFailure(String),

    #[error("unknown application: {0}")]
    UnknownApplication(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("invalid scope '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidScope(String),

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HubError {
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HubError::Persist {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;
