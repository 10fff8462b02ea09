//! Runtime configuration.
//!
//! Each setting is resolved from the command line first, then the
//! environment, then a built-in default.

use crate::gate::MissingDependencyPolicy;
use std::path::PathBuf;
use tracing::warn;

pub const DB_ENV: &str = "TASKDAG_DB";
pub const PROJECT_ENV: &str = "TASKDAG_PROJECT";
pub const MISSING_DEPS_ENV: &str = "TASKDAG_MISSING_DEPS";

pub const DEFAULT_DB_FILE: &str = "taskdag.db";
pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub project: String,
    pub missing_dependency: MissingDependencyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            project: DEFAULT_PROJECT.to_string(),
            missing_dependency: MissingDependencyPolicy::default(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub project: Option<String>,
    pub missing_dependency: Option<MissingDependencyPolicy>,
}

impl Config {
    /// Resolve against the process environment
    pub fn resolve(overrides: Overrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(overrides: Overrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let db_path = overrides
            .db_path
            .or_else(|| non_empty(DB_ENV).map(PathBuf::from))
            .unwrap_or(defaults.db_path);

        let project = overrides
            .project
            .or_else(|| non_empty(PROJECT_ENV))
            .unwrap_or(defaults.project);

        let missing_dependency = overrides
            .missing_dependency
            .or_else(|| {
                let raw = non_empty(MISSING_DEPS_ENV)?;
                let parsed = MissingDependencyPolicy::parse(&raw);
                if parsed.is_none() {
                    warn!(value = %raw, "ignoring unknown {MISSING_DEPS_ENV} value");
                }
                parsed
            })
            .unwrap_or(defaults.missing_dependency);

        Config {
            db_path,
            project,
            missing_dependency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve_with(Overrides::default(), env(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.db_path, PathBuf::from("taskdag.db"));
        assert_eq!(config.project, "default");
        assert_eq!(config.missing_dependency, MissingDependencyPolicy::Block);
    }

    #[test]
    fn test_environment_beats_defaults() {
        let config = Config::resolve_with(
            Overrides::default(),
            env(&[
                (DB_ENV, "/tmp/tasks.db"),
                (PROJECT_ENV, "website"),
                (MISSING_DEPS_ENV, "ignore"),
            ]),
        );
        assert_eq!(config.db_path, PathBuf::from("/tmp/tasks.db"));
        assert_eq!(config.project, "website");
        assert_eq!(config.missing_dependency, MissingDependencyPolicy::Ignore);
    }

    #[test]
    fn test_flags_beat_environment() {
        let overrides = Overrides {
            db_path: Some(PathBuf::from("local.db")),
            project: Some("cli".to_string()),
            missing_dependency: Some(MissingDependencyPolicy::Block),
        };
        let config = Config::resolve_with(
            overrides,
            env(&[(PROJECT_ENV, "website"), (MISSING_DEPS_ENV, "ignore")]),
        );
        assert_eq!(config.db_path, PathBuf::from("local.db"));
        assert_eq!(config.project, "cli");
        assert_eq!(config.missing_dependency, MissingDependencyPolicy::Block);
    }

    #[test]
    fn test_blank_and_unknown_values_fall_back() {
        let config = Config::resolve_with(
            Overrides::default(),
            env(&[(PROJECT_ENV, "  "), (MISSING_DEPS_ENV, "sometimes")]),
        );
        assert_eq!(config.project, "default");
        assert_eq!(config.missing_dependency, MissingDependencyPolicy::Block);
    }
}
