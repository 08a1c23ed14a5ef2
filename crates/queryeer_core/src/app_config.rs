use crate::DbError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_crawl_ttl_secs() -> u64 {
    600
}

fn default_worker_threads() -> usize {
    4
}

fn default_validation_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How long a crawled catalog is served before a background refresh.
    #[serde(default = "default_crawl_ttl_secs")]
    pub crawl_ttl_secs: u64,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Base64 salt for deriving the password encryption key.
    #[serde(default)]
    pub crypto_salt: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawl_ttl_secs: default_crawl_ttl_secs(),
            worker_threads: default_worker_threads(),
            validation_timeout_secs: default_validation_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            crypto_salt: None,
        }
    }
}

impl AppConfig {
    pub fn crawl_ttl(&self) -> Duration {
        Duration::from_secs(self.crawl_ttl_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Decoded salt, generating and recording one if none exists yet.
    ///
    /// Returns `true` in the second position when the config changed and
    /// should be saved.
    pub fn ensure_crypto_salt(&mut self) -> Result<(Vec<u8>, bool), DbError> {
        if let Some(encoded) = &self.crypto_salt {
            let salt = STANDARD
                .decode(encoded)
                .map_err(|e| DbError::Crypto(format!("Invalid crypto salt in config: {}", e)))?;
            return Ok((salt, false));
        }

        let salt = crate::crypto::generate_salt().to_vec();
        self.crypto_salt = Some(STANDARD.encode(&salt));
        Ok((salt, true))
    }
}

pub struct AppConfigStore {
    path: PathBuf,
}

impl AppConfigStore {
    pub fn new() -> Result<Self, DbError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DbError::IoError(std::io::Error::other("Could not find config directory"))
        })?;

        Self::with_dir(config_dir.join("queryeer"))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(DbError::IoError)?;

        Ok(Self {
            path: dir.join("config.json"),
        })
    }

    pub fn load(&self) -> Result<AppConfig, DbError> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.path).map_err(DbError::IoError)?;
        let config: AppConfig =
            serde_json::from_str(&content).map_err(|e| DbError::InvalidProfile(e.to_string()))?;

        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), DbError> {
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| DbError::IoError(std::io::Error::other(e.to_string())))?;
        fs::write(&self.path, content).map_err(DbError::IoError)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppConfigStore::with_dir(dir.path()).unwrap();
        let config = store.load().unwrap();

        assert_eq!(config.crawl_ttl(), Duration::from_secs(600));
        assert_eq!(config.worker_threads, 4);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppConfigStore::with_dir(dir.path()).unwrap();
        fs::write(store.path(), r#"{ "crawl_ttl_secs": 30 }"#).unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.crawl_ttl_secs, 30);
        assert_eq!(config.validation_timeout_secs, 5);
    }

    #[test]
    fn salt_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppConfigStore::with_dir(dir.path()).unwrap();

        let mut config = store.load().unwrap();
        let (salt, changed) = config.ensure_crypto_salt().unwrap();
        assert!(changed);
        assert_eq!(salt.len(), crate::crypto::SALT_LEN);
        store.save(&config).unwrap();

        let mut reloaded = store.load().unwrap();
        let (again, changed) = reloaded.ensure_crypto_salt().unwrap();
        assert!(!changed);
        assert_eq!(again, salt);
    }
}
