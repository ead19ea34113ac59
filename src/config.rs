//! Process-wide settings loaded once from `VS_*` environment variables (C16).
//!
//! Grounded on the teacher's `Config::load` (env/file fallback) generalized to
//! the upstream Python `Settings(BaseSettings)` field set and validators.

use std::path::PathBuf;

use crate::error::{kind, AppError, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub log_level: String,
    pub api_key_admin: String,
    pub api_key_monitor: Option<String>,
    pub game_version: String,
    pub data_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub console_history_lines: usize,
    pub disk_space_warning_threshold_gb: f64,
    pub mod_cache_max_size_mb: u64,
    pub host: String,
    pub port: u16,
}

/// Sentinel used by the game version field when no concrete version has been
/// resolved yet; compatibility checks treat this as "unknown".
pub const UNKNOWN_GAME_VERSION: &str = "stable";

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn validate_origin(origin: &str) -> bool {
    let re = regex::Regex::new(r"^https?://[A-Za-z0-9_.\-]+(:\d+)?/?$").unwrap();
    re.is_match(origin)
}

impl Settings {
    /// Load from the environment, applying the same defaults and validators
    /// as the original `VS_`-prefixed pydantic settings object.
    pub fn from_env() -> Result<Self> {
        let debug = env_var("VS_DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let log_level = env_var("VS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let api_key_admin = env_var("VS_API_KEY_ADMIN").unwrap_or_default();
        let api_key_monitor = env_var("VS_API_KEY_MONITOR");

        let game_version = env_var("VS_GAME_VERSION").unwrap_or_else(|| UNKNOWN_GAME_VERSION.to_string());
        let data_dir = env_var("VS_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/data"));

        let cors_origins: Vec<String> = env_var("VS_CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["http://localhost:5173".to_string()]);
        if cors_origins.is_empty() {
            return Err(kind::internal("cors_origins must not be empty"));
        }
        for origin in &cors_origins {
            if !validate_origin(origin) {
                return Err(kind::internal(format!("invalid CORS origin: {origin}")));
            }
        }

        let console_history_lines = env_var("VS_CONSOLE_HISTORY_LINES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|_| kind::internal("VS_CONSOLE_HISTORY_LINES must be a non-negative integer"))?
            .unwrap_or(100);

        let disk_space_warning_threshold_gb = env_var("VS_DISK_SPACE_WARNING_THRESHOLD_GB")
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|_| kind::internal("VS_DISK_SPACE_WARNING_THRESHOLD_GB must be a number"))?
            .unwrap_or(1.0);
        if disk_space_warning_threshold_gb < 0.0 {
            return Err(kind::internal("disk_space_warning_threshold_gb must be >= 0"));
        }

        let mod_cache_max_size_mb = env_var("VS_MOD_CACHE_MAX_SIZE_MB")
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|_| kind::internal("VS_MOD_CACHE_MAX_SIZE_MB must be a non-negative integer"))?
            .unwrap_or(500);

        let host = env_var("VS_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_var("VS_PORT")
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|_| kind::internal("VS_PORT must be a valid port number"))?
            .unwrap_or(8080);

        Ok(Self {
            debug,
            log_level,
            api_key_admin,
            api_key_monitor,
            game_version,
            data_dir,
            cors_origins,
            console_history_lines,
            disk_space_warning_threshold_gb,
            mod_cache_max_size_mb,
            host,
            port,
        })
    }

    pub fn server_dir(&self) -> PathBuf {
        self.data_dir.join("server")
    }

    pub fn serverdata_dir(&self) -> PathBuf {
        self.data_dir.join("serverdata")
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.serverdata_dir().join("Mods")
    }

    pub fn serverconfig_path(&self) -> PathBuf {
        self.serverdata_dir().join("serverconfig.json")
    }

    pub fn vsmanager_dir(&self) -> PathBuf {
        self.data_dir.join("vsmanager")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.vsmanager_dir().join("cache")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.vsmanager_dir().join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.vsmanager_dir().join("logs")
    }

    pub fn current_version_path(&self) -> PathBuf {
        self.vsmanager_dir().join("current_version")
    }

    pub fn mods_json_path(&self) -> PathBuf {
        self.state_dir().join("mods.json")
    }

    pub fn api_settings_path(&self) -> PathBuf {
        self.state_dir().join("api-settings.json")
    }

    /// Validates `api_key_admin` is present and creates every managed directory.
    pub async fn ensure_data_directories(&self) -> Result<()> {
        if self.api_key_admin.is_empty() {
            return Err(AppError::new(
                crate::error::ErrorCode::Internal,
                "VS_API_KEY_ADMIN must be set and non-empty",
            ));
        }

        for dir in [
            self.server_dir(),
            self.serverdata_dir(),
            self.mods_dir(),
            self.vsmanager_dir(),
            self.cache_dir().join("mods"),
            self.state_dir(),
            self.logs_dir(),
        ] {
            match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => tracing::debug!(path = %dir.display(), "directory_created"),
                Err(e) => {
                    tracing::error!(path = %dir.display(), error = %e, "directory_creation_failed");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_cors_origin() {
        assert!(!validate_origin("not-a-url"));
        assert!(validate_origin("http://localhost:5173"));
        assert!(validate_origin("https://example.com"));
    }
}
