//! Game/API configuration tables, live-update routing, and first-run init
//! (C9 + C13).
//!
//! Grounded on this codebase's `core/config.rs` (typed config struct with
//! `load`/`save` and an env-var fallback layer), generalized into a
//! key-driven table since the game config here is an externally-defined
//! JSON document this system only partially understands, plus a parallel
//! small typed API config.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde_json::{json, Value};

use crate::error::{kind, Result};
use crate::process::{ServerState, ServerSupervisor};
use crate::restart_pending::RestartPending;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    Bool,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolFormat {
    TrueFalse,
    ZeroOne,
}

#[derive(Debug, Clone, Copy)]
pub struct SettingDef {
    pub value_type: ValueType,
    pub console_template: Option<&'static str>,
    pub live_update: bool,
    pub requires_restart: bool,
    pub bool_format: Option<BoolFormat>,
}

fn settings_table() -> &'static HashMap<&'static str, SettingDef> {
    static TABLE: OnceLock<HashMap<&'static str, SettingDef>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use BoolFormat::*;
        use ValueType::*;
        let mut m = HashMap::new();
        m.insert("ServerName", SettingDef { value_type: String, console_template: Some(r#"/serverconfig name "{value}""#), live_update: true, requires_restart: false, bool_format: None });
        m.insert("ServerDescription", SettingDef { value_type: String, console_template: Some(r#"/serverconfig description "{value}""#), live_update: true, requires_restart: false, bool_format: None });
        m.insert("WelcomeMessage", SettingDef { value_type: String, console_template: Some(r#"/serverconfig motd "{value}""#), live_update: true, requires_restart: false, bool_format: None });
        m.insert("MaxClients", SettingDef { value_type: Int, console_template: Some("/serverconfig maxclients {value}"), live_update: true, requires_restart: false, bool_format: None });
        m.insert("MaxChunkRadius", SettingDef { value_type: Int, console_template: Some("/serverconfig maxchunkradius {value}"), live_update: true, requires_restart: false, bool_format: None });
        m.insert("Password", SettingDef { value_type: String, console_template: Some(r#"/serverconfig password "{value}""#), live_update: true, requires_restart: false, bool_format: None });
        m.insert("AllowPvP", SettingDef { value_type: Bool, console_template: Some("/serverconfig allowpvp {value}"), live_update: true, requires_restart: false, bool_format: Some(TrueFalse) });
        m.insert("AllowFireSpread", SettingDef { value_type: Bool, console_template: Some("/serverconfig allowfirespread {value}"), live_update: true, requires_restart: false, bool_format: Some(TrueFalse) });
        m.insert("AllowFallingBlocks", SettingDef { value_type: Bool, console_template: Some("/serverconfig allowfallingblocks {value}"), live_update: true, requires_restart: false, bool_format: Some(TrueFalse) });
        m.insert("EntitySpawning", SettingDef { value_type: Bool, console_template: Some("/serverconfig entityspawning {value}"), live_update: true, requires_restart: false, bool_format: Some(TrueFalse) });
        m.insert("PassTimeWhenEmpty", SettingDef { value_type: Bool, console_template: Some("/serverconfig passtimewhenempty {value}"), live_update: true, requires_restart: false, bool_format: Some(TrueFalse) });
        m.insert("Upnp", SettingDef { value_type: Bool, console_template: Some("/serverconfig upnp {value}"), live_update: true, requires_restart: false, bool_format: Some(ZeroOne) });
        m.insert("AdvertiseServer", SettingDef { value_type: Bool, console_template: Some("/serverconfig advertise {value}"), live_update: true, requires_restart: false, bool_format: Some(ZeroOne) });
        m.insert("Port", SettingDef { value_type: Int, console_template: None, live_update: false, requires_restart: true, bool_format: None });
        m.insert("Ip", SettingDef { value_type: String, console_template: None, live_update: false, requires_restart: true, bool_format: None });
        m
    })
}

/// `VS_CFG_<NAME> -> (dotted config path, value type)`, applied during
/// first-run template initialization.
fn env_var_map() -> &'static HashMap<&'static str, (&'static str, ValueType)> {
    static MAP: OnceLock<HashMap<&'static str, (&'static str, ValueType)>> = OnceLock::new();
    MAP.get_or_init(|| {
        use ValueType::*;
        let mut m = HashMap::new();
        m.insert("VS_CFG_SERVER_NAME", ("ServerName", String));
        m.insert("VS_CFG_SERVER_PORT", ("Port", Int));
        m.insert("VS_CFG_MAX_CLIENTS", ("MaxClients", Int));
        m.insert("VS_CFG_ALLOW_PVP", ("AllowPvP", Bool));
        m.insert("VS_CFG_SERVER_PASSWORD", ("Password", String));
        m.insert("VS_CFG_ADVERTISE_SERVER", ("AdvertiseServer", Bool));
        m.insert("VS_CFG_ONLY_WHITELISTED", ("OnlyWhitelisted", Bool));
        m.insert("VS_CFG_SPAWN_CAP_PLAYER_SCALING", ("SpawnCapPlayerScaling", Float));
        m.insert("VS_CFG_WORLD_SEED", ("WorldConfig.Seed", String));
        m.insert("VS_CFG_ALLOW_CREATIVE_MODE", ("WorldConfig.AllowCreativeMode", Bool));
        m
    })
}

fn bundled_template() -> Value {
    json!({
        "ServerName": "Vintage Story Server",
        "Port": 42420,
        "MaxClients": 16,
        "Password": null,
        "AdvertiseServer": false,
        "AllowPvP": true,
        "ServerIdentifier": null,
        "Roles": ["admin", "suplayer"],
        "DefaultRoleCode": "suplayer",
        "WorldConfig": {
            "Seed": null,
            "SaveFileLocation": "Saves/world.vcdbs",
            "WorldName": "world",
            "PlayStyle": "Surviveandplay",
            "WorldType": "DefaultSpawn"
        },
        "ModPaths": ["Mods"]
    })
}

fn parse_env_value(raw: &str, value_type: ValueType) -> Result<Value> {
    match value_type {
        ValueType::String => Ok(Value::String(raw.to_string())),
        ValueType::Int => raw
            .parse::<i64>()
            .map(|v| json!(v))
            .map_err(|_| kind::internal(format!("{raw} is not a valid integer"))),
        ValueType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(json!(true)),
            "false" | "0" | "no" | "off" => Ok(json!(false)),
            _ => Err(kind::internal(format!("{raw} is not a valid boolean"))),
        },
        ValueType::Float => raw
            .parse::<f64>()
            .map(|v| json!(v))
            .map_err(|_| kind::internal(format!("{raw} is not a valid float"))),
    }
}

fn set_dotted_path(root: &mut Value, dotted_path: &str, value: Value) {
    let parts: Vec<&str> = dotted_path.split('.').collect();
    let mut cursor = root;
    for part in &parts[..parts.len() - 1] {
        if !cursor.get(*part).map(|v| v.is_object()).unwrap_or(false) {
            cursor[*part] = json!({});
        }
        cursor = cursor.get_mut(*part).unwrap();
    }
    cursor[parts[parts.len() - 1]] = value;
}

fn get_dotted_path<'a>(root: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut cursor = root;
    for part in dotted_path.split('.') {
        cursor = cursor.get(part)?;
    }
    Some(cursor)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SettingView {
    pub key: String,
    pub value: Value,
    pub value_type: &'static str,
    pub live_update: bool,
    pub requires_restart: bool,
    pub env_managed: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UpdateOutcome {
    pub method: &'static str,
    pub pending_restart: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub auto_start_server: bool,
    #[serde(default = "default_true")]
    pub block_env_managed_settings: bool,
    #[serde(default)]
    pub enforce_env_on_restart: bool,
    #[serde(default = "default_refresh_interval")]
    pub mod_list_refresh_interval: u64,
    #[serde(default = "default_refresh_interval")]
    pub server_versions_refresh_interval: u64,
    #[serde(default = "default_refresh_interval")]
    pub metrics_collection_interval: u64,
}

fn default_true() -> bool {
    true
}
fn default_refresh_interval() -> u64 {
    3600
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            auto_start_server: true,
            block_env_managed_settings: true,
            enforce_env_on_restart: false,
            mod_list_refresh_interval: default_refresh_interval(),
            server_versions_refresh_interval: default_refresh_interval(),
            metrics_collection_interval: default_refresh_interval(),
        }
    }
}

pub struct ConfigEngine {
    serverconfig_path: PathBuf,
    api_settings_path: PathBuf,
    restart_pending: Arc<RestartPending>,
    supervisor: Arc<ServerSupervisor>,
}

impl ConfigEngine {
    pub fn new(
        serverconfig_path: PathBuf,
        api_settings_path: PathBuf,
        restart_pending: Arc<RestartPending>,
        supervisor: Arc<ServerSupervisor>,
    ) -> Self {
        Self { serverconfig_path, api_settings_path, restart_pending, supervisor }
    }

    /// The corresponding `VS_CFG_*` variable name for a live-settings key,
    /// matching the names used by `ENV_VAR_MAP`'s first-run overrides.
    fn env_var_for(key: &str) -> &'static str {
        match key {
            "ServerName" => "VS_CFG_SERVER_NAME",
            "ServerDescription" => "VS_CFG_SERVER_DESCRIPTION",
            "WelcomeMessage" => "VS_CFG_WELCOME_MESSAGE",
            "MaxClients" => "VS_CFG_MAX_CLIENTS",
            "MaxChunkRadius" => "VS_CFG_MAX_CHUNK_RADIUS",
            "Password" => "VS_CFG_SERVER_PASSWORD",
            "AllowPvP" => "VS_CFG_ALLOW_PVP",
            "AllowFireSpread" => "VS_CFG_ALLOW_FIRE_SPREAD",
            "AllowFallingBlocks" => "VS_CFG_ALLOW_FALLING_BLOCKS",
            "EntitySpawning" => "VS_CFG_ENTITY_SPAWNING",
            "PassTimeWhenEmpty" => "VS_CFG_PASS_TIME_WHEN_EMPTY",
            "Upnp" => "VS_CFG_UPNP",
            "AdvertiseServer" => "VS_CFG_ADVERTISE_SERVER",
            "Port" => "VS_CFG_SERVER_PORT",
            "Ip" => "VS_CFG_SERVER_IP",
            _ => "",
        }
    }

    async fn load_game_config(&self) -> Result<Value> {
        let bytes = tokio::fs::read(&self.serverconfig_path)
            .await
            .map_err(|_| kind::config_not_found("serverconfig.json not found"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save_game_config(&self, doc: &Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.serverconfig_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.serverconfig_path).await?;
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<Vec<SettingView>> {
        let doc = self.load_game_config().await?;
        let mut views = Vec::new();
        for (key, def) in settings_table().iter() {
            let value = doc.get(*key).cloned().unwrap_or(Value::Null);
            let env_var = Self::env_var_for(key);
            let env_managed = !env_var.is_empty() && std::env::var(env_var).is_ok();
            views.push(SettingView {
                key: key.to_string(),
                value,
                value_type: type_name(def.value_type),
                live_update: def.live_update,
                requires_restart: def.requires_restart,
                env_managed,
            });
        }
        views.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(views)
    }

    /// Rejects unknown keys, env-managed keys (when blocking is enabled),
    /// and string values containing injection-sensitive characters. Routes
    /// to a live console command when the server is running and the key
    /// supports it, otherwise rewrites the file and signals C6 when needed.
    pub async fn update_setting(&self, key: &str, raw_value: &str, block_env_managed: bool) -> Result<UpdateOutcome> {
        let def = *settings_table().get(key).ok_or_else(|| kind::setting_unknown(key))?;

        if block_env_managed {
            let env_var = Self::env_var_for(key);
            if !env_var.is_empty() && std::env::var(env_var).is_ok() {
                return Err(kind::setting_env_managed(key, env_var));
            }
        }

        let coerced = coerce_value(raw_value, def.value_type)?;
        if let Value::String(s) = &coerced {
            if s.contains(['"', '\\', '\n', '\r']) {
                return Err(kind::setting_value_invalid(format!(
                    "value for '{key}' contains a disallowed character"
                )));
            }
        }

        let server_running = self.supervisor.state().await == ServerState::Running;
        if server_running && def.live_update {
            let template = def.console_template.ok_or_else(|| {
                kind::setting_update_failed(format!("'{key}' has no console command template"))
            })?;
            let formatted = format_for_console(&coerced, def.bool_format);
            let command = template.replace("{value}", &formatted);
            if !self.supervisor.send_command(&command).await {
                return Err(kind::setting_update_failed(format!("failed to send console command for '{key}'")));
            }
            return Ok(UpdateOutcome { method: "console_command", pending_restart: false });
        }

        let mut doc = self.load_game_config().await?;
        doc[key] = coerced;
        self.save_game_config(&doc).await?;

        let pending_restart = def.requires_restart || (!def.live_update && server_running);
        if pending_restart {
            self.restart_pending.require_restart(format!("setting changed: {key}")).await;
        }
        Ok(UpdateOutcome { method: "file_update", pending_restart })
    }

    pub async fn get_api_settings(&self) -> ApiSettings {
        match tokio::fs::read(&self.api_settings_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "api_settings_malformed_using_defaults");
                ApiSettings::default()
            }),
            Err(_) => ApiSettings::default(),
        }
    }

    pub async fn save_api_settings(&self, settings: &ApiSettings) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(settings)?;
        let tmp = self.api_settings_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.api_settings_path).await?;
        Ok(())
    }

    /// Renders the bundled template and applies any `VS_CFG_*` overrides,
    /// but only if no game config file exists yet. A single malformed
    /// override is skipped with a warning; the rest of init proceeds.
    pub async fn initialize_game_config_if_absent(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.serverconfig_path).await.unwrap_or(false) {
            return Ok(());
        }

        let mut doc = bundled_template();
        for (env_key, (dotted_path, value_type)) in env_var_map().iter() {
            let Ok(raw) = std::env::var(env_key) else { continue };
            match parse_env_value(&raw, *value_type) {
                Ok(value) => set_dotted_path(&mut doc, dotted_path, value),
                Err(e) => tracing::warn!(env_key, error = %e.message, "config_init_override_skipped"),
            }
        }

        if let Some(parent) = self.serverconfig_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.save_game_config(&doc).await?;
        tracing::info!("game_config_initialized");
        Ok(())
    }
}

fn type_name(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::String => "string",
        ValueType::Int => "int",
        ValueType::Bool => "bool",
        ValueType::Float => "float",
    }
}

fn coerce_value(raw: &str, value_type: ValueType) -> Result<Value> {
    match value_type {
        ValueType::String => Ok(Value::String(raw.to_string())),
        ValueType::Int => raw
            .parse::<i64>()
            .map(|v| json!(v))
            .map_err(|_| kind::setting_value_invalid(format!("'{raw}' is not a valid integer"))),
        ValueType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(json!(true)),
            "false" | "0" | "no" => Ok(json!(false)),
            _ => Err(kind::setting_value_invalid(format!("'{raw}' is not a valid boolean"))),
        },
        ValueType::Float => raw
            .parse::<f64>()
            .map(|v| json!(v))
            .map_err(|_| kind::setting_value_invalid(format!("'{raw}' is not a valid float"))),
    }
}

fn format_for_console(value: &Value, bool_format: Option<BoolFormat>) -> String {
    match value {
        Value::Bool(b) => match bool_format {
            Some(BoolFormat::ZeroOne) => if *b { "1" } else { "0" }.to_string(),
            _ => b.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_value_bool_accepts_aliases_and_rejects_garbage() {
        assert_eq!(parse_env_value("true", ValueType::Bool).unwrap(), json!(true));
        assert_eq!(parse_env_value("OFF", ValueType::Bool).unwrap(), json!(false));
        assert!(parse_env_value("maybe", ValueType::Bool).is_err());
    }

    #[test]
    fn parse_env_value_int_rejects_float_looking_strings() {
        assert!(parse_env_value("3.14", ValueType::Int).is_err());
        assert_eq!(parse_env_value("42", ValueType::Int).unwrap(), json!(42));
    }

    #[test]
    fn parse_env_value_float_accepts_scientific_notation() {
        assert_eq!(parse_env_value("1e3", ValueType::Float).unwrap(), json!(1000.0));
    }

    #[test]
    fn dotted_path_set_creates_parents() {
        let mut doc = json!({});
        set_dotted_path(&mut doc, "WorldConfig.Seed", json!("abc"));
        assert_eq!(get_dotted_path(&doc, "WorldConfig.Seed").unwrap(), &json!("abc"));
    }

    #[test]
    fn coerce_value_rejects_injection_candidates_upstream() {
        let coerced = coerce_value("Hi\"", ValueType::String).unwrap();
        assert!(matches!(coerced, Value::String(ref s) if s.contains('"')));
    }

    #[test]
    fn env_var_for_matches_env_var_map_naming() {
        assert_eq!(ConfigEngine::env_var_for("ServerName"), "VS_CFG_SERVER_NAME");
        assert_eq!(ConfigEngine::env_var_for("AllowPvP"), "VS_CFG_ALLOW_PVP");
        assert_eq!(ConfigEngine::env_var_for("Port"), "VS_CFG_SERVER_PORT");
    }
}
