use crate::config::{CacheBackend, HubSettings};
use crate::ops::config::AppRegistry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub overall_health: CheckStatus,
}

pub struct HubDoctor;

impl HubDoctor {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, settings: &HubSettings) -> DoctorReport {
        let checks = vec![
            self.check_controller(settings),
            self.check_apps_config(&settings.apps_config),
            self.check_cache(settings),
        ];

        let overall_health = if checks.iter().any(|c| matches!(c.status, CheckStatus::Fail)) {
            CheckStatus::Fail
        } else if checks
            .iter()
            .any(|c| matches!(c.status, CheckStatus::Warning))
        {
            CheckStatus::Warning
        } else {
            CheckStatus::Pass
        };

        DoctorReport {
            checks,
            overall_health,
        }
    }

    fn check_controller(&self, settings: &HubSettings) -> DoctorCheck {
        let name = "Cron Controller".to_string();
        let Some(program) = settings.controller.first() else {
            return DoctorCheck {
                name,
                status: CheckStatus::Fail,
                message: "No controller command configured".to_string(),
            };
        };

        match resolve_program(program) {
            Some(path) => DoctorCheck {
                name,
                status: CheckStatus::Pass,
                message: format!("Using {}", path.display()),
            },
            None => DoctorCheck {
                name,
                status: CheckStatus::Fail,
                message: format!("'{}' not found on PATH", program),
            },
        }
    }

    fn check_apps_config(&self, path: &Path) -> DoctorCheck {
        let name = "Application Registry".to_string();
        if !path.exists() {
            return DoctorCheck {
                name,
                status: CheckStatus::Warning,
                message: format!("{} missing; no applications configured", path.display()),
            };
        }
        match AppRegistry::try_load(path) {
            Ok(registry) => DoctorCheck {
                name,
                status: CheckStatus::Pass,
                message: format!("{} applications loaded", registry.len()),
            },
            Err(e) => DoctorCheck {
                name,
                status: CheckStatus::Fail,
                message: e.to_string(),
            },
        }
    }

    fn check_cache(&self, settings: &HubSettings) -> DoctorCheck {
        let name = "Status Cache".to_string();
        if settings.cache_backend == CacheBackend::Memory {
            return DoctorCheck {
                name,
                status: CheckStatus::Pass,
                message: "In-memory cache".to_string(),
            };
        }

        let probe = settings.cache_dir.join(".doctor_probe");
        let result = fs::create_dir_all(&settings.cache_dir)
            .and_then(|_| fs::write(&probe, b"ok"))
            .and_then(|_| fs::remove_file(&probe));
        match result {
            Ok(()) => DoctorCheck {
                name,
                status: CheckStatus::Pass,
                message: format!("{} is writable", settings.cache_dir.display()),
            },
            // The dashboard still works uncached.
            Err(e) => DoctorCheck {
                name,
                status: CheckStatus::Warning,
                message: format!("{} not writable: {}", settings.cache_dir.display(), e),
            },
        }
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
