//! Runtime configuration.
//!
//! JSON document; every field is optional and falls back to its default.
//!
//! ```json
//! { "enforce_type_tags": true, "log_level": "info",
//!   "log_dir": "/var/log/nodeslot", "store_path": "/var/lib/nodeslot/nodes.db" }
//! ```

use crate::logging::normalize_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Reject slot values that violate the slot's type tag.
    pub enforce_type_tags: bool,
    /// Defaults to `logging::default_log_level()`.
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// SQLite file used by the store.
    pub store_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enforce_type_tags: true,
            log_level: None,
            log_dir: None,
            store_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(level) = &self.log_level {
            normalize_level(level).map_err(ConfigError::Invalid)?;
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        if self
            .store_path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(ConfigError::Invalid("store_path cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RuntimeConfig};
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.enforce_type_tags);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_levels() {
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"typo": 1}"#).unwrap_err(),
            ConfigError::Parse(_)
        ));
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"log_level": "loud"}"#).unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"log_dir": "relative/logs"}"#).unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"enforce_type_tags": false, "log_level": "warn"}}"#).unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert!(!config.enforce_type_tags);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
