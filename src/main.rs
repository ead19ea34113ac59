//! Process entry point: construct every component in dependency order,
//! bind the HTTP listener, and wire graceful shutdown.
//!
//! Grounded on this codebase's `main.rs` wiring order (config -> components
//! -> background tasks -> router -> `axum::serve`), generalized to this
//! system's component graph.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;

use vsmanager_hostd::auth::{AuthService, WsTokenService};
use vsmanager_hostd::cache::CacheEvictor;
use vsmanager_hostd::config::Settings;
use vsmanager_hostd::config_engine::ConfigEngine;
use vsmanager_hostd::console_streamer::ConsoleRing;
use vsmanager_hostd::metrics::MetricsCollector;
use vsmanager_hostd::mod_catalogue::CatalogueClient;
use vsmanager_hostd::mod_index::ModIndex;
use vsmanager_hostd::mod_manager::ModManager;
use vsmanager_hostd::process::ServerSupervisor;
use vsmanager_hostd::restart_pending::RestartPending;
use vsmanager_hostd::routes;
use vsmanager_hostd::scheduler::Scheduler;
use vsmanager_hostd::server_running::ServerRunningState;
use vsmanager_hostd::state::AppState;
use vsmanager_hostd::version_cache::VersionCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env()?);
    init_logging(&settings);

    settings.ensure_data_directories().await?;

    let console = Arc::new(ConsoleRing::new(settings.console_history_lines.max(16)));
    let restart_pending = Arc::new(RestartPending::new());
    let cache = Arc::new(CacheEvictor::new(settings.cache_dir(), settings.mod_cache_max_size_mb));
    let mod_index = Arc::new(ModIndex::load(settings.state_dir()).await?);
    mod_index.sync_state_with_disk(&settings.mods_dir()).await?;
    let catalogue = Arc::new(CatalogueClient::new("https://mods.vintagestory.at/api"));
    let server_running = Arc::new(ServerRunningState::new());
    let supervisor = Arc::new(ServerSupervisor::new(
        settings.clone(),
        console.clone(),
        restart_pending.clone(),
        server_running.clone(),
    ));

    let config_engine = Arc::new(ConfigEngine::new(
        settings.serverconfig_path(),
        settings.api_settings_path(),
        restart_pending.clone(),
        supervisor.clone(),
    ));
    config_engine.initialize_game_config_if_absent().await?;

    let api_settings = config_engine.get_api_settings().await;
    let metrics = Arc::new(MetricsCollector::new(Duration::from_secs(
        api_settings.metrics_collection_interval.max(1),
    )));
    {
        let metrics = metrics.clone();
        let supervisor = supervisor.clone();
        tokio::spawn(async move { metrics.run(supervisor).await });
    }

    let mod_manager = Arc::new(ModManager::new(
        settings.clone(),
        mod_index.clone(),
        catalogue.clone(),
        cache.clone(),
        restart_pending.clone(),
        server_running.clone(),
    ));

    let auth = Arc::new(AuthService::new(settings.clone()));
    let ws_tokens = Arc::new(WsTokenService::new());
    let version_cache = Arc::new(VersionCache::new("https://mods.vintagestory.at/versions"));
    let scheduler = Arc::new(Scheduler::new());

    let state = AppState {
        settings: settings.clone(),
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
        scheduler: scheduler.clone(),
    };

    let cors = build_cors(&settings.cors_origins);
    let app = routes::router(state).layer(cors);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let shutdown = shutdown_signal();
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    scheduler.shutdown(true).await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(settings.debug).init();
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE, "x-api-key".parse().unwrap()])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
