//! Ambient configuration: storage root, relay URL, and session timeouts,
//! layered as defaults overridden by an optional TOML file, overridden in
//! turn by environment variables.

use config::{Config as ConfigLoader, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

const ENV_PREFIX: &str = "VAULTCORE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCoreConfig {
    /// Directory `FsStorage` persists vault records under.
    pub storage_dir: PathBuf,
    /// Base URL of the signing-session relay server.
    pub relay_url: String,
    pub join_timeout_secs: u64,
    pub round_timeout_secs: u64,
    pub session_timeout_secs: u64,
    /// TTL a cached keyshare stays unlockable without re-entering a password.
    pub secret_cache_ttl_secs: u64,
    pub log_level: String,
    /// Configuration file paths that contributed a value, for diagnostics.
    pub loaded_files: Vec<String>,
}

impl Default for VaultCoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vaultcore"),
            relay_url: "https://api.vultisig.com/router".to_string(),
            join_timeout_secs: 60,
            round_timeout_secs: 30,
            session_timeout_secs: 300,
            secret_cache_ttl_secs: 300,
            log_level: "info".to_string(),
            loaded_files: Vec::new(),
        }
    }
}

impl VaultCoreConfig {
    /// Load defaults, then an optional `vaultcore.toml`/`.json`, then
    /// `VAULTCORE_*` environment variables, in increasing precedence.
    pub fn load() -> Result<Self, Error> {
        let mut cfg = Self::default();
        cfg.load_from_files()?;
        cfg.load_from_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn load_from_files(&mut self) -> Result<(), Error> {
        let config_dir = env::var(format!("{ENV_PREFIX}_CONFIG_DIR")).unwrap_or_else(|_| ".".to_string());
        let search_paths = [config_dir.as_str(), "config", "."];
        let file_names = ["vaultcore.toml", "vaultcore.json"];

        for search_path in search_paths {
            for file_name in file_names {
                let path = Path::new(search_path).join(file_name);
                if path.exists() {
                    self.merge_file(&path)?;
                    self.loaded_files.push(path.to_string_lossy().to_string());
                }
            }
        }
        Ok(())
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), Error> {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };
        let settings = ConfigLoader::builder()
            .add_source(File::from(path).format(format))
            .build()
            .map_err(|e| Error::Config(format!("failed to load config file {path:?}: {e}")))?;

        if let Ok(v) = settings.get_string("storage_dir") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = settings.get_string("relay_url") {
            self.relay_url = v;
        }
        if let Ok(v) = settings.get_int("join_timeout_secs") {
            self.join_timeout_secs = v as u64;
        }
        if let Ok(v) = settings.get_int("round_timeout_secs") {
            self.round_timeout_secs = v as u64;
        }
        if let Ok(v) = settings.get_int("session_timeout_secs") {
            self.session_timeout_secs = v as u64;
        }
        if let Ok(v) = settings.get_int("secret_cache_ttl_secs") {
            self.secret_cache_ttl_secs = v as u64;
        }
        if let Ok(v) = settings.get_string("log_level") {
            self.log_level = v;
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_STORAGE_DIR")) {
            self.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_RELAY_URL")) {
            self.relay_url = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_JOIN_TIMEOUT_SECS")) {
            if let Ok(parsed) = v.parse() {
                self.join_timeout_secs = parsed;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_ROUND_TIMEOUT_SECS")) {
            if let Ok(parsed) = v.parse() {
                self.round_timeout_secs = parsed;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_SESSION_TIMEOUT_SECS")) {
            if let Ok(parsed) = v.parse() {
                self.session_timeout_secs = parsed;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_SECRET_CACHE_TTL_SECS")) {
            if let Ok(parsed) = v.parse() {
                self.secret_cache_ttl_secs = parsed;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}_LOG_LEVEL")) {
            self.log_level = v;
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.relay_url.is_empty() {
            return Err(Error::Config("relay_url must not be empty".to_string()));
        }
        if self.join_timeout_secs == 0 || self.round_timeout_secs == 0 || self.session_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn secret_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let cfg = VaultCoreConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_relay_url_fails_validation() {
        let mut cfg = VaultCoreConfig::default();
        cfg.relay_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        std::env::set_var("VAULTCORE_RELAY_URL", "https://example.test/relay");
        let mut cfg = VaultCoreConfig::default();
        cfg.load_from_env();
        std::env::remove_var("VAULTCORE_RELAY_URL");
        assert_eq!(cfg.relay_url, "https://example.test/relay");
    }
}
