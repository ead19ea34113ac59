//! Shared application state (C15 wiring helper).
//!
//! Grounded on this codebase's large `ApiAppState` struct assembled in
//! `main`: one `Arc`-wrapped handle per component, cloned cheaply into every
//! request handler via axum's `State` extractor.

use std::sync::Arc;

use crate::auth::{AuthService, WsTokenService};
use crate::cache::CacheEvictor;
use crate::config::Settings;
use crate::config_engine::ConfigEngine;
use crate::console_streamer::ConsoleRing;
use crate::mod_catalogue::CatalogueClient;
use crate::mod_index::ModIndex;
use crate::mod_manager::ModManager;
use crate::process::ServerSupervisor;
use crate::restart_pending::RestartPending;
use crate::scheduler::Scheduler;
use crate::metrics::MetricsCollector;
use crate::version_cache::VersionCache;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub console: Arc<ConsoleRing>,
    pub restart_pending: Arc<RestartPending>,
    pub cache: Arc<CacheEvictor>,
    pub mod_index: Arc<ModIndex>,
    pub catalogue: Arc<CatalogueClient>,
    pub mod_manager: Arc<ModManager>,
    pub metrics: Arc<MetricsCollector>,
    pub config_engine: Arc<ConfigEngine>,
    pub supervisor: Arc<ServerSupervisor>,
    pub auth: Arc<AuthService>,
    pub ws_tokens: Arc<WsTokenService>,
    pub version_cache: Arc<VersionCache>,
    pub scheduler: Arc<Scheduler>,
}
