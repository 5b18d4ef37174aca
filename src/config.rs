//! Application configuration (spec.md §1 "the configuration loader
//! ... is treated as a collaborator"; SPEC_FULL.md ambient-stack
//! addition). Dev builds load from `.env` + environment variables;
//! release builds load a JSON config file under the user's home
//! directory, mirroring the teacher's `Config::load`
//! `cfg(debug_assertions)` split in spirit (env in dev, a persisted file
//! in release) without the keyring/S3/encryption fields this crate has
//! no use for.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::{TorrentClientConfig, UsenetClientConfig};
use crate::organizer::Strategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("required environment variable {0} is not set")]
    MissingEnv(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub library_root: PathBuf,
    pub import_roots: Vec<PathBuf>,
    pub folder_naming_pattern: String,
    pub file_naming_pattern: String,
    pub organization_strategy: Strategy,
    pub concurrent_scans: usize,
    pub max_parallel_operations: usize,
    pub operation_timeout_secs: u64,
    pub stale_sweep_interval_secs: u64,
    pub completed_retention_secs: u64,
    pub log_ring_capacity: usize,
    pub known_series_dirs: Vec<String>,
    pub torrent_client: Option<TorrentClientConfig>,
    pub usenet_client: Option<UsenetClientConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library_root: PathBuf::from("."),
            import_roots: Vec::new(),
            folder_naming_pattern: "{author}/{series}".to_string(),
            file_naming_pattern: "{title}".to_string(),
            organization_strategy: Strategy::Auto,
            concurrent_scans: 4,
            max_parallel_operations: 2,
            operation_timeout_secs: 30 * 60,
            stale_sweep_interval_secs: 60,
            completed_retention_secs: 24 * 60 * 60,
            log_ring_capacity: 1000,
            known_series_dirs: Vec::new(),
            torrent_client: None,
            usenet_client: None,
        }
    }
}

impl Config {
    /// Load configuration based on build mode: `.env` + environment
    /// variables in debug builds, a JSON file under `~/.jab/config.json`
    /// in release builds.
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("loaded .env file for development config");
            }
            Self::from_env()
        }

        #[cfg(not(debug_assertions))]
        {
            Self::from_file(&Self::default_config_path())
        }
    }

    #[cfg(debug_assertions)]
    fn from_env() -> Result<Self, ConfigError> {
        let env_var = |key: &str| std::env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()));

        let library_root = PathBuf::from(env_var("JAB_LIBRARY_ROOT")?);
        let import_roots = std::env::var("JAB_IMPORT_ROOTS")
            .unwrap_or_default()
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        let mut config = Config {
            library_root,
            import_roots,
            ..Config::default()
        };

        if let Ok(pattern) = std::env::var("JAB_FOLDER_PATTERN") {
            config.folder_naming_pattern = pattern;
        }
        if let Ok(pattern) = std::env::var("JAB_FILE_PATTERN") {
            config.file_naming_pattern = pattern;
        }

        Ok(config)
    }

    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .expect("home directory must be resolvable")
            .join(".jab")
            .join("config.json")
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }

    pub fn library_path(&self) -> PathBuf {
        self.library_root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_strategy_and_pool_sizes() {
        let config = Config::default();
        assert_eq!(config.organization_strategy, Strategy::Auto);
        assert_eq!(config.concurrent_scans, 4);
        assert_eq!(config.max_parallel_operations, 2);
    }

    #[test]
    fn from_file_roundtrips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            library_root: PathBuf::from("/library"),
            ..Config::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.library_root, PathBuf::from("/library"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(&PathBuf::from("/does/not/exist.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
