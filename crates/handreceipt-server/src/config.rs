//! Server configuration
//!
//! Loaded from a TOML file; every section and field has a default, so an
//! empty file (or none at all) yields a runnable development setup apart
//! from the credential secret, which must be provided either in the file
//! or through `HANDRECEIPT_QR_SECRET`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use handreceipt_core::EngineConfig;
use handreceipt_ledger::RecorderConfig;
use handreceipt_logging::{LogConfig, LogPreset};
use handreceipt_storage::RedbStorageConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding `[credentials] secret`.
pub const SECRET_ENV: &str = "HANDRECEIPT_QR_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Parse(String),

    #[error("no credential secret configured; set [credentials] secret or {SECRET_ENV}")]
    MissingSecret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub storage: StorageConfig,
    pub credentials: CredentialConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub cache_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let redb = RedbStorageConfig::default();
        Self {
            backend: StorageBackend::Redb,
            path: redb.db_path,
            cache_size: redb.cache_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub secret: Option<String>,
    pub validity_secs: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            secret: None,
            validity_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub retry_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let recorder = RecorderConfig::default();
        Self {
            retry_interval_ms: recorder.retry_interval.as_millis() as u64,
            batch_size: recorder.batch_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub preset: LogPreset,
    /// Overrides the preset's default level
    pub level: Option<String>,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            preset: LogPreset::default(),
            level: None,
            dir: PathBuf::from("./logs"),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The credential secret, preferring the environment over the file.
    pub fn credential_secret(&self) -> Result<String, ConfigError> {
        Self::resolve_secret(std::env::var(SECRET_ENV).ok(), self.credentials.secret.clone())
    }

    fn resolve_secret(env: Option<String>, file: Option<String>) -> Result<String, ConfigError> {
        env.into_iter()
            .chain(file)
            .find(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let millis = self.credentials.validity_secs.saturating_mul(1000);
        EngineConfig {
            credential_validity_ms: i64::try_from(millis).unwrap_or(i64::MAX),
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            batch_size: self.ledger.batch_size.max(1),
            retry_interval: Duration::from_millis(self.ledger.retry_interval_ms.max(1)),
        }
    }

    pub fn redb_config(&self) -> RedbStorageConfig {
        RedbStorageConfig {
            db_path: self.storage.path.clone(),
            cache_size: self.storage.cache_size,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_preset(self.logging.preset, self.logging.dir.clone());
        if let Some(level) = &self.logging.level {
            config.level = level.clone();
        }
        config
    }
}
