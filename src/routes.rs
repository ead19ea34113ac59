//! Thin HTTP adapter (C14): translates `/api/v1alpha1/*` requests into core
//! component calls and wraps results in the standard envelope.
//!
//! Grounded on this codebase's `routes/` handlers and `ApiResponse` envelope
//! pattern; every handler here is a thin delegate with no business logic of
//! its own, per this layer's stated job.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Role;
use crate::error::{kind, Result};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope<T> {
    Ok { data: T },
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope::Ok { data })).into_response()
}

fn extract_api_key(headers: &HeaderMap) -> String {
    headers.get("X-API-Key").and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Role> {
    state.auth.authenticate(&extract_api_key(headers))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let role = authenticate(state, headers)?;
    state.auth.require_admin(role)
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/me", get(auth_me))
        .route("/auth/ws-token", post(auth_ws_token))
        .route("/server", get(server_get).post(server_post).delete(server_delete))
        .route("/versions", get(versions_list))
        .route("/versions/:version", get(versions_get))
        .route("/config/game", get(config_game_get))
        .route("/config/game/settings/:key", post(config_game_set))
        .route("/config/api", get(config_api_get).post(config_api_set))
        .route("/mods", get(mods_list))
        .route("/mods/lookup", get(mods_lookup))
        .route("/mods/install", post(mods_install))
        .route("/mods/:slug", get(mods_get).delete(mods_remove))
        .route("/mods/:slug/enable", post(mods_enable))
        .route("/mods/:slug/disable", post(mods_disable))
        .route("/console/history", get(console_history))
        .route("/console/command", post(console_command))
        .route("/console/ws", get(crate::websocket::console_ws))
        .route("/metrics/current", get(metrics_current))
        .route("/metrics/history", get(metrics_history))
        .route("/jobs", get(jobs_list))
        .route("/jobs/:id", delete(jobs_remove))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1alpha1", api)
}

async fn healthz() -> Response {
    ok(serde_json::json!({"status": "alive"}))
}

async fn readyz() -> Response {
    ok(serde_json::json!({"status": "ready"}))
}

async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let role = authenticate(&state, &headers)?;
    let role_str = match role {
        Role::Admin => "admin",
        Role::Monitor => "monitor",
    };
    Ok(ok(serde_json::json!({"role": role_str})))
}

async fn auth_ws_token(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let role = authenticate(&state, &headers)?;
    let token = state.ws_tokens.create(role).await;
    Ok(ok(serde_json::json!({
        "token": token,
        "expires_in_seconds": 300,
    })))
}

async fn server_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    authenticate(&state, &headers)?;
    Ok(ok(serde_json::json!({"state": state.supervisor.state().await})))
}

#[derive(Deserialize)]
struct ServerInstallRequest {
    archive_path: std::path::PathBuf,
    version: String,
}

async fn server_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    let action = body.get("action").and_then(|v| v.as_str()).unwrap_or("start");
    match action {
        "install" => {
            let req: ServerInstallRequest = serde_json::from_value(body)
                .map_err(|e| kind::internal(format!("invalid install request: {e}")))?;
            state.supervisor.install_server(&req.archive_path, &req.version).await?;
        }
        "start" => {
            let executable = body
                .get("executable")
                .and_then(|v| v.as_str())
                .ok_or_else(|| kind::internal("missing 'executable'"))?;
            state.supervisor.start_server(executable, &[]).await?;
        }
        "stop" => state.supervisor.stop_server().await?,
        other => return Err(kind::internal(format!("unknown action '{other}'"))),
    }
    Ok(ok(serde_json::json!({"state": state.supervisor.state().await})))
}

async fn server_delete(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_admin(&state, &headers)?;
    state.supervisor.uninstall_server().await?;
    Ok(ok(serde_json::json!({"state": state.supervisor.state().await})))
}

#[derive(Deserialize)]
struct VersionsQuery {
    #[serde(default = "default_channel")]
    channel: String,
}

fn default_channel() -> String {
    "stable".to_string()
}

async fn versions_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VersionsQuery>,
) -> Result<Response> {
    authenticate(&state, &headers)?;
    let versions = state.version_cache.list(&query.channel).await?;
    Ok(ok(versions))
}

async fn versions_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VersionsQuery>,
    AxumPath(version): AxumPath<String>,
) -> Result<Response> {
    authenticate(&state, &headers)?;
    let entry = state.version_cache.get(&query.channel, &version).await?;
    Ok(ok(entry))
}

async fn config_game_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    authenticate(&state, &headers)?;
    let settings = state.config_engine.get_settings().await?;
    Ok(ok(settings))
}

#[derive(Deserialize)]
struct SettingUpdateRequest {
    value: String,
}

async fn config_game_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(key): AxumPath<String>,
    Json(body): Json<SettingUpdateRequest>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    let api_settings = state.config_engine.get_api_settings().await;
    let outcome = state
        .config_engine
        .update_setting(&key, &body.value, api_settings.block_env_managed_settings)
        .await?;
    Ok(ok(outcome))
}

async fn config_api_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.config_engine.get_api_settings().await))
}

async fn config_api_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<crate::config_engine::ApiSettings>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    state.config_engine.save_api_settings(&body).await?;
    Ok(ok(body))
}

async fn mods_list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    authenticate(&state, &headers)?;
    Ok(ok(state.mod_manager.list().await))
}

async fn mods_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    authenticate(&state, &headers)?;
    Ok(ok(state.mod_manager.get(&slug).await?))
}

#[derive(Deserialize)]
struct ModSlugQuery {
    slug: String,
}

async fn mods_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ModSlugQuery>,
) -> Result<Response> {
    authenticate(&state, &headers)?;
    Ok(ok(state.mod_manager.lookup(&query.slug).await?))
}

#[derive(Deserialize)]
struct ModInstallRequest {
    slug: String,
}

async fn mods_install(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ModInstallRequest>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.mod_manager.install(&body.slug).await?))
}

async fn mods_enable(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.mod_manager.enable(&slug).await?))
}

async fn mods_disable(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.mod_manager.disable(&slug).await?))
}

async fn mods_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    state.mod_manager.remove(&slug).await?;
    Ok(ok(serde_json::json!({"removed": slug})))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: i64,
}

async fn console_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.console.get_history(query.limit).await))
}

#[derive(Deserialize)]
struct ConsoleCommandRequest {
    command: String,
}

async fn console_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConsoleCommandRequest>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    if !state.supervisor.send_command(&body.command).await {
        return Err(kind::server_not_running("Server is not running"));
    }
    Ok(ok(serde_json::json!({"enqueued": true})))
}

async fn metrics_current(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.metrics.latest().await))
}

#[derive(Deserialize)]
struct MetricsHistoryQuery {
    #[serde(default = "default_minutes")]
    minutes: i64,
}

fn default_minutes() -> i64 {
    60
}

async fn metrics_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MetricsHistoryQuery>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.metrics.window(query.minutes).await))
}

async fn jobs_list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_admin(&state, &headers)?;
    Ok(ok(state.scheduler.job_names().await))
}

async fn jobs_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> Result<Response> {
    require_admin(&state, &headers)?;
    if state.scheduler.remove_job(&id).await {
        Ok(ok(serde_json::json!({"removed": id})))
    } else {
        Err(kind::job_not_found(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(crate::config::Settings {
            debug: false,
            log_level: "info".into(),
            api_key_admin: "admin-key".into(),
            api_key_monitor: Some("monitor-key".into()),
            game_version: "stable".into(),
            data_dir: dir.path().to_path_buf(),
            cors_origins: vec!["http://localhost:5173".into()],
            console_history_lines: 100,
            disk_space_warning_threshold_gb: 1.0,
            mod_cache_max_size_mb: 500,
            host: "127.0.0.1".into(),
            port: 0,
        });
        settings.ensure_data_directories().await.unwrap();

        let console = Arc::new(crate::console_streamer::ConsoleRing::new(100));
        let restart_pending = Arc::new(crate::restart_pending::RestartPending::new());
        let cache = Arc::new(crate::cache::CacheEvictor::new(settings.cache_dir(), settings.mod_cache_max_size_mb));
        let mod_index = Arc::new(crate::mod_index::ModIndex::load(settings.state_dir()).await.unwrap());
        let catalogue = Arc::new(crate::mod_catalogue::CatalogueClient::new("https://example.invalid"));
        let server_running = Arc::new(crate::server_running::ServerRunningState::new());
        let supervisor = Arc::new(crate::process::ServerSupervisor::new(
            settings.clone(),
            console.clone(),
            restart_pending.clone(),
            server_running.clone(),
        ));
        let config_engine = Arc::new(crate::config_engine::ConfigEngine::new(
            settings.serverconfig_path(),
            settings.api_settings_path(),
            restart_pending.clone(),
            supervisor.clone(),
        ));
        let mod_manager = Arc::new(crate::mod_manager::ModManager::new(
            settings.clone(),
            mod_index.clone(),
            catalogue.clone(),
            cache.clone(),
            restart_pending.clone(),
            server_running.clone(),
        ));
        let metrics = Arc::new(crate::metrics::MetricsCollector::new(Duration::from_secs(60)));
        let auth = Arc::new(crate::auth::AuthService::new(settings.clone()));
        let ws_tokens = Arc::new(crate::auth::WsTokenService::new());
        let version_cache = Arc::new(crate::version_cache::VersionCache::new("https://example.invalid"));
        let scheduler = Arc::new(crate::scheduler::Scheduler::new());

        let state = AppState {
            settings,
            console,
            restart_pending,
            cache,
            mod_index,
            catalogue,
            mod_manager,
            metrics,
            config_engine,
            supervisor,
            auth,
            ws_tokens,
            version_cache,
            scheduler,
        };
        (state, dir)
    }

    #[tokio::test]
    async fn healthz_is_reachable_without_auth() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn server_status_without_api_key_is_unauthorized() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let request = Request::builder().uri("/api/v1alpha1/server").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn server_status_with_admin_key_succeeds() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let request = Request::builder()
            .uri("/api/v1alpha1/server")
            .header("X-API-Key", "admin-key")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn monitor_key_cannot_install_server() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1alpha1/server")
            .header("X-API-Key", "monitor-key")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
