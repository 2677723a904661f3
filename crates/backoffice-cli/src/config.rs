//! Configuration - ~/.backoffice/config.json, then environment overrides

use backoffice_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE: &str = "BACKOFFICE_DATABASE";
pub const ENV_OPERATIONS_DIR: &str = "BACKOFFICE_OPERATIONS_DIR";
pub const ENV_LISTEN: &str = "BACKOFFICE_LISTEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file scripts query through `query()`
    pub database: PathBuf,
    /// Root of the file-backed operation store
    pub operations_dir: PathBuf,
    /// Address for `backoffice serve`
    pub listen: String,
    pub pool_size: u32,
    pub timeout_ms: u64,
    pub max_memory_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            database: base.join("backoffice.db"),
            operations_dir: base.join("operations"),
            listen: "127.0.0.1:8080".to_string(),
            pool_size: 8,
            timeout_ms: 30_000,
            max_memory_mb: 64,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists.
    /// An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(operations_dir) = lookup(ENV_OPERATIONS_DIR) {
            self.operations_dir = PathBuf::from(operations_dir);
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
    }

    pub fn sandbox(&self) -> SandboxConfig {
        SandboxConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_memory: self.max_memory_mb.saturating_mul(1024 * 1024),
            ..SandboxConfig::default()
        }
    }
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".backoffice"))
        .unwrap_or_else(|| PathBuf::from(".backoffice"))
}

pub fn default_path() -> PathBuf {
    base_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.database.ends_with(".backoffice/backoffice.db"));
        assert!(config.operations_dir.ends_with(".backoffice/operations"));
        assert_eq!(config.listen, "127.0.0.1:8080");

        let sandbox = config.sandbox();
        assert_eq!(sandbox.timeout, Duration::from_secs(30));
        assert_eq!(sandbox.max_memory, 64 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"listen": "0.0.0.0:9000", "timeout_ms": 500}"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.sandbox().timeout, Duration::from_millis(500));
        assert_eq!(config.pool_size, AppConfig::default().pool_size);
    }

    #[test]
    fn test_huge_memory_limit_saturates() {
        let config = AppConfig {
            max_memory_mb: usize::MAX,
            ..AppConfig::default()
        };
        assert_eq!(config.sandbox().max_memory, usize::MAX);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let tmp = TempDir::new().unwrap();
        let err = AppConfig::load(Some(&tmp.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{listen").unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid config"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE, "/srv/app.db"),
            (ENV_LISTEN, "0.0.0.0:80"),
        ]);

        let mut config = AppConfig::default();
        let operations_dir = config.operations_dir.clone();
        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.database, PathBuf::from("/srv/app.db"));
        assert_eq!(config.listen, "0.0.0.0:80");
        assert_eq!(config.operations_dir, operations_dir);
    }
}
