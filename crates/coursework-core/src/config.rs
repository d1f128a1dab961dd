//! Process configuration, loaded from TOML.
//!
//! ```toml
//! [store]
//! backend = "surreal"
//! url = "surrealkv://.coursework/db"
//!
//! [queue]
//! position_interval_ms = 3000
//! deadline_secs = 600
//! workers = 1
//!
//! [loaders]
//! recent_submissions = 10
//! access_key_context = "git"
//!
//! [logging]
//! json = false
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::jobs::QueueConfig;

/// Default location, relative to the working directory. Optional.
pub const DEFAULT_CONFIG_PATH: &str = "config/coursework.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseworkConfig {
    pub store: StoreConfig,
    pub queue: QueueSettings,
    pub loaders: LoaderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Surreal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Surreal,
            url: "surrealkv://.coursework/db".to_string(),
            namespace: "coursework".to_string(),
            database: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub position_interval_ms: u64,
    pub deadline_secs: u64,
    pub workers: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            position_interval_ms: 3_000,
            deadline_secs: 600,
            workers: 1,
        }
    }
}

impl QueueSettings {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            position_interval: Duration::from_millis(self.position_interval_ms),
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How many recent submissions the `submission` loader returns
    pub recent_submissions: usize,
    /// Context name used for access keys
    pub access_key_context: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            recent_submissions: 10,
            access_key_context: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

impl CourseworkConfig {
    pub fn from_toml(text: &str) -> CoreResult<Self> {
        toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Read and parse `path`. Any failure is an error.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    /// Load an explicit path strictly, or the default path if it exists.
    pub fn load(explicit: Option<&Path>) -> CoreResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = CourseworkConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Surreal);
        assert_eq!(config.queue.position_interval_ms, 3_000);
        assert_eq!(config.queue.deadline_secs, 600);
        assert_eq!(config.loaders.recent_submissions, 10);
        assert_eq!(config.loaders.access_key_context, "git");
        assert!(!config.logging.json);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = CourseworkConfig::from_toml(
            r#"
            [store]
            backend = "memory"

            [queue]
            deadline_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.namespace, "coursework");
        assert_eq!(config.queue.deadline_secs, 30);
        assert_eq!(config.queue.workers, 1);
        assert_eq!(
            config.queue.queue_config().position_interval,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = CourseworkConfig::from_toml("[store]\nbackend = \"oracle\"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loaders]\nrecent_submissions = 3").unwrap();

        let config = CourseworkConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.loaders.recent_submissions, 3);
    }

    #[test]
    fn missing_explicit_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = CourseworkConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
