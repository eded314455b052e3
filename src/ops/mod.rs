//! Cron status layer: app registry, controller plumbing, parser, cache, HTTP.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod monitor;
pub mod server;
pub mod settings;
pub mod shell;

use crate::error::{HubError, Result};
use std::fmt;

/// Which servers a status query covers. Also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    #[default]
    All,
    App(String),
}

impl Scope {
    /// `None`, empty, and `"all"` select every server.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") | Some("all") => return Ok(Scope::All),
            Some(s) => s,
        };
        if raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            Ok(Scope::App(raw.to_string()))
        } else {
            Err(HubError::InvalidScope(raw.to_string()))
        }
    }

    pub fn cache_key(&self) -> &str {
        match self {
            Scope::All => "all",
            Scope::App(id) => id,
        }
    }

    /// Value for the controller's `--server=` flag, if scoped.
    pub fn server(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::App(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_defaults_to_all() {
        assert_eq!(Scope::parse(None).unwrap(), Scope::All);
        assert_eq!(Scope::parse(Some("")).unwrap(), Scope::All);
        assert_eq!(Scope::parse(Some("all")).unwrap(), Scope::All);
    }

    #[test]
    fn test_scope_parse_app_id() {
        let scope = Scope::parse(Some("hdgwrzntwa")).unwrap();
        assert_eq!(scope.cache_key(), "hdgwrzntwa");
        assert_eq!(scope.server(), Some("hdgwrzntwa"));
    }

    #[test]
    fn test_scope_rejects_path_characters() {
        assert!(matches!(
            Scope::parse(Some("../etc")),
            Err(HubError::InvalidScope(_))
        ));
        assert!(Scope::parse(Some("a b")).is_err());
    }
}
