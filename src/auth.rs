//! API-key authentication and one-shot WebSocket tokens (C11).
//!
//! Grounded on this codebase's `AuthManager`/`RateLimiter`, replacing the JWT
//! session model (not needed for a single-operator control plane) with a
//! constant-time compare against two configured keys, plus a short-lived
//! token service so the console WebSocket doesn't have to carry the raw
//! admin key in a query string.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use rand::RngCore;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::error::{kind, Result};

const WS_TOKEN_TTL: Duration = Duration::from_secs(300);
const WS_TOKEN_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Monitor,
}

/// Constant-time comparison so key-length/content timing cannot leak
/// information about the configured secret.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub struct AuthService {
    settings: Arc<Settings>,
}

impl AuthService {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Classifies a presented API key, or rejects it. The admin key grants
    /// both roles' access; the monitor key (if configured) grants read-only
    /// access.
    pub fn authenticate(&self, presented_key: &str) -> Result<Role> {
        if presented_key.is_empty() {
            return Err(kind::unauthorized("Missing API key"));
        }
        if constant_time_eq(presented_key, &self.settings.api_key_admin) {
            return Ok(Role::Admin);
        }
        if let Some(monitor_key) = &self.settings.api_key_monitor {
            if constant_time_eq(presented_key, monitor_key) {
                return Ok(Role::Monitor);
            }
        }
        Err(kind::unauthorized("Invalid API key"))
    }

    pub fn require_admin(&self, role: Role) -> Result<()> {
        match role {
            Role::Admin => Ok(()),
            Role::Monitor => Err(kind::forbidden("This operation requires the admin API key")),
        }
    }
}

struct TokenEntry {
    role: Role,
    expires_at: Instant,
}

/// Short-lived, single-purpose tokens exchanged for WebSocket access, since
/// the browser WS client cannot set a custom header during the handshake.
pub struct WsTokenService {
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl WsTokenService {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    /// Mints a random 32-byte, base64url-encoded token valid for 300s. If
    /// the table is at capacity, the single oldest-issued token is evicted
    /// first rather than growing unbounded.
    pub async fn create(&self, role: Role) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        let mut tokens = self.tokens.lock().await;
        if tokens.len() >= WS_TOKEN_CAP {
            if let Some(oldest) = tokens
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                tokens.remove(&oldest);
            }
        }
        tokens.insert(token.clone(), TokenEntry { role, expires_at: Instant::now() + WS_TOKEN_TTL });
        token
    }

    /// Validates and consumes a token; each token is usable exactly once.
    pub async fn validate(&self, token: &str) -> Option<Role> {
        let mut tokens = self.tokens.lock().await;
        let entry = tokens.remove(token)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.role)
    }
}

impl Default for WsTokenService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings() -> Settings {
        Settings {
            debug: false,
            log_level: "info".into(),
            api_key_admin: "admin-secret".into(),
            api_key_monitor: Some("monitor-secret".into()),
            game_version: "stable".into(),
            data_dir: PathBuf::from("/tmp"),
            cors_origins: vec!["http://localhost:5173".into()],
            console_history_lines: 100,
            disk_space_warning_threshold_gb: 1.0,
            mod_cache_max_size_mb: 500,
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }

    #[test]
    fn admin_key_grants_admin_role() {
        let auth = AuthService::new(Arc::new(settings()));
        assert_eq!(auth.authenticate("admin-secret").unwrap(), Role::Admin);
    }

    #[test]
    fn monitor_key_grants_monitor_role() {
        let auth = AuthService::new(Arc::new(settings()));
        assert_eq!(auth.authenticate("monitor-secret").unwrap(), Role::Monitor);
    }

    #[test]
    fn unknown_key_is_unauthorized() {
        let auth = AuthService::new(Arc::new(settings()));
        assert!(auth.authenticate("nope").is_err());
    }

    #[test]
    fn require_admin_rejects_monitor_role() {
        let auth = AuthService::new(Arc::new(settings()));
        assert!(auth.require_admin(Role::Monitor).is_err());
        assert!(auth.require_admin(Role::Admin).is_ok());
    }

    #[tokio::test]
    async fn ws_token_is_single_use() {
        let service = WsTokenService::new();
        let token = service.create(Role::Admin).await;
        assert_eq!(service.validate(&token).await, Some(Role::Admin));
        assert_eq!(service.validate(&token).await, None);
    }
}
