use std::fmt;
use std::path::{Path, PathBuf};

use conveyor_object_store::{ObjectStore, ObjectStoreConfig, ObjectStoreError};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "conveyor.toml";
/// Metadata database created inside local store directories
pub const DB_FILE_NAME: &str = "meta.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// Default log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of nodes copied concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Store content is copied from
    #[serde(default)]
    pub source: Option<ObjectStoreConfig>,
    /// SQLite metadata for the source store
    #[serde(default)]
    pub source_db: Option<PathBuf>,
    /// Store content is copied to
    #[serde(default)]
    pub destination: Option<ObjectStoreConfig>,
    /// SQLite metadata for the destination store
    #[serde(default)]
    pub destination_db: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_concurrency() -> usize {
    common::dag::DEFAULT_CONCURRENCY
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            concurrency: default_concurrency(),
            source: None,
            source_db: None,
            destination: None,
            destination_db: None,
        }
    }
}

/// Which end of a copy a store sits at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Source,
    Destination,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Source => write!(f, "source"),
            StoreRole::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("no {0} store configured")]
    MissingStore(StoreRole),
    #[error("failed to open {role} store: {source}")]
    Store {
        role: StoreRole,
        #[source]
        source: ObjectStoreError,
    },
}

impl AppConfig {
    /// Load the config file at `path`.
    ///
    /// Without an explicit path the default file in the working directory
    ///  is used if present, and the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::NotFound(path));
            }
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    fn store(&self, role: StoreRole) -> (Option<&ObjectStoreConfig>, Option<&PathBuf>) {
        match role {
            StoreRole::Source => (self.source.as_ref(), self.source_db.as_ref()),
            StoreRole::Destination => (self.destination.as_ref(), self.destination_db.as_ref()),
        }
    }

    /// Where the metadata database for a store lives. `None` means in memory.
    pub fn db_path(&self, role: StoreRole) -> Result<Option<PathBuf>, ConfigError> {
        match self.store(role) {
            (None, _) => Err(ConfigError::MissingStore(role)),
            (Some(_), Some(db)) => Ok(Some(db.clone())),
            (Some(ObjectStoreConfig::Local { path }), None) => Ok(Some(path.join(DB_FILE_NAME))),
            (Some(_), None) => Ok(None),
        }
    }

    /// Open the store configured for `role`
    pub async fn open_store(&self, role: StoreRole) -> Result<ObjectStore, ConfigError> {
        let db_path = self.db_path(role)?;
        let (config, _) = self.store(role);
        let config = config.cloned().ok_or(ConfigError::MissingStore(role))?;

        tracing::debug!(%role, ?config, ?db_path, "opening store");
        let store = match db_path {
            Some(db_path) => ObjectStore::new(&db_path, config).await,
            None => ObjectStore::in_memory(config).await,
        };
        store.map_err(|source| ConfigError::Store { role, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_parse_stores() {
        let config = AppConfig::from_toml(
            r#"
            log_level = "debug"
            concurrency = 8

            [source]
            type = "local"
            path = "/var/lib/conveyor/src"

            [destination]
            type = "s3"
            endpoint = "http://localhost:9000"
            access_key = "minioadmin"
            secret_key = "minioadmin"
            bucket = "artifacts"
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(
            config.source,
            Some(ObjectStoreConfig::Local {
                path: PathBuf::from("/var/lib/conveyor/src")
            })
        );
        assert!(matches!(
            config.destination,
            Some(ObjectStoreConfig::S3 { ref bucket, region: None, .. }) if bucket == "artifacts"
        ));
    }

    #[test]
    fn test_db_paths() {
        let mut config = AppConfig::from_toml(
            r#"
            [source]
            type = "local"
            path = "/data/src"

            [destination]
            type = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.db_path(StoreRole::Source).unwrap(),
            Some(PathBuf::from("/data/src/meta.db"))
        );
        assert_eq!(config.db_path(StoreRole::Destination).unwrap(), None);

        config.destination_db = Some(PathBuf::from("/data/dst.db"));
        assert_eq!(
            config.db_path(StoreRole::Destination).unwrap(),
            Some(PathBuf::from("/data/dst.db"))
        );
    }

    #[test]
    fn test_missing_store() {
        let config = AppConfig::default();
        assert!(matches!(
            config.db_path(StoreRole::Source),
            Err(ConfigError::MissingStore(StoreRole::Source))
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_toml("concurrency = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
        let config = AppConfig::from_toml("log_level = \"chatty\"").unwrap();
        assert!(matches!(
            config.log_level(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = AppConfig::from_toml(
            r#"
            [destination]
            type = "memory"
            "#,
        )
        .unwrap();
        config.open_store(StoreRole::Destination).await.unwrap();
        assert!(matches!(
            config.open_store(StoreRole::Source).await,
            Err(ConfigError::MissingStore(StoreRole::Source))
        ));
    }
}
