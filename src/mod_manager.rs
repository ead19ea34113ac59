//! Mod lifecycle orchestration (C5): list/get/lookup/install/enable/disable/remove.
//!
//! Grounded on this codebase's `ModManager` (wraps a catalogue client +
//! download pipeline + persisted store), generalized to drive the cache
//! evictor, mod index, and catalogue client built for this system, plus the
//! shared restart-pending flag.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::cache::CacheEvictor;
use crate::config::{Settings, UNKNOWN_GAME_VERSION};
use crate::error::{kind, Result};
use crate::mod_catalogue::CatalogueClient;
use crate::mod_index::{self, InstalledMod, ModIndex};
use crate::restart_pending::RestartPending;
use crate::server_running::ServerRunningState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityStatus {
    Compatible,
    Incompatible,
    NotVerified,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModLookup {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub compatibility: CompatibilityStatus,
    pub compatibility_message: String,
}

pub struct ModManager {
    settings: Arc<Settings>,
    index: Arc<ModIndex>,
    catalogue: Arc<CatalogueClient>,
    cache: Arc<CacheEvictor>,
    restart_pending: Arc<RestartPending>,
    server_running: Arc<ServerRunningState>,
}

impl ModManager {
    pub fn new(
        settings: Arc<Settings>,
        index: Arc<ModIndex>,
        catalogue: Arc<CatalogueClient>,
        cache: Arc<CacheEvictor>,
        restart_pending: Arc<RestartPending>,
        server_running: Arc<ServerRunningState>,
    ) -> Self {
        Self { settings, index, catalogue, cache, restart_pending, server_running }
    }

    /// Marks a restart pending only if the supervised server is actually
    /// running - a mod mutation while the server is stopped has nothing to
    /// reload.
    async fn require_restart_if_running(&self, reason: String) {
        if self.server_running.is_running().await {
            self.restart_pending.require_restart(reason).await;
        }
    }

    pub async fn list(&self) -> Vec<InstalledMod> {
        self.index.list().await
    }

    pub async fn get(&self, slug: &str) -> Result<InstalledMod> {
        self.index.get(slug).await.ok_or_else(|| kind::mod_not_found(slug))
    }

    /// Looks up a mod in the catalogue and classifies its compatibility
    /// against the configured game version. An unresolved game version
    /// (empty, or the `stable` sentinel) always reports `not_verified`
    /// rather than guessing.
    pub async fn lookup(&self, slug: &str) -> Result<ModLookup> {
        let info = self.catalogue.get_mod(slug).await?;
        let (status, message) = self.classify_compatibility(&info.version, &info.minecraft_versions);
        Ok(ModLookup {
            slug: info.slug,
            name: info.name,
            version: info.version,
            compatibility: status,
            compatibility_message: message,
        })
    }

    /// Classifies whether `mod_version` is compatible with the configured
    /// game version, given the tags the catalogue lists as supported.
    ///
    /// An exact match (after stripping a leading `v`/`V` from both sides) is
    /// `compatible`. An unresolved game version, an empty tag list, or tags
    /// that merely share the same `major.minor` as the game version fall
    /// back to `not_verified` rather than a guess in either direction.
    /// Anything else is `incompatible`, with a message listing up to three
    /// of the supported tags.
    fn classify_compatibility(&self, mod_version: &str, tags: &[String]) -> (CompatibilityStatus, String) {
        if self.settings.game_version.is_empty() || self.settings.game_version == UNKNOWN_GAME_VERSION {
            return (
                CompatibilityStatus::NotVerified,
                "Game server version unknown - cannot verify compatibility".to_string(),
            );
        }
        if tags.is_empty() {
            return (CompatibilityStatus::NotVerified, "Mod lists no supported versions".to_string());
        }

        let game_version = normalize_version(&self.settings.game_version);
        let normalized_tags: Vec<String> = tags.iter().map(|t| normalize_version(t)).collect();

        if normalized_tags.iter().any(|t| t == &game_version) {
            return (CompatibilityStatus::Compatible, format!("Supports {}", self.settings.game_version));
        }

        let game_major_minor = major_minor(&game_version);
        let shares_major_minor = match &game_major_minor {
            Some(game_mm) => normalized_tags.iter().any(|t| major_minor(t).as_ref() == Some(game_mm)),
            None => false,
        };
        if game_major_minor.is_none() || shares_major_minor {
            return (
                CompatibilityStatus::NotVerified,
                format!("Mod not explicitly verified for version {}. May still work.", self.settings.game_version),
            );
        }

        let listed: Vec<&str> = tags.iter().take(3).map(|s| s.as_str()).collect();
        let suffix = if tags.len() > 3 { "..." } else { "" };
        let versions = listed.join(", ");
        (
            CompatibilityStatus::Incompatible,
            format!("Mod version {mod_version} is only compatible with {versions}{suffix}. Installation may cause issues."),
        )
    }

    /// Downloads, imports, and registers a mod. Marks a restart pending if
    /// the server is currently running, since it would need to reload
    /// `Mods/` to pick this up.
    pub async fn install(&self, slug: &str) -> Result<InstalledMod> {
        mod_index::validate_slug(slug)?;
        if let Some(existing) = self.index.get(slug).await {
            return Err(kind::mod_already_installed(slug, &existing.version));
        }

        let info = self.catalogue.get_mod(slug).await?;
        let file_name = format!("{}-{}.zip", info.slug, info.version);
        let mods_dir = self.cache.mods_dir();
        let archive_path = self.catalogue.download_mod(&info, &mods_dir, &file_name).await?;

        match self.finish_install(&archive_path, &info, &file_name).await {
            Ok(entry) => {
                self.cache.evict_if_needed();
                Ok(entry)
            }
            Err(e) => {
                let final_dest = self.settings.mods_dir().join(&file_name);
                let _ = tokio::fs::remove_file(&final_dest).await;
                let _ = self.index.remove(&info.slug).await;
                Err(e)
            }
        }
    }

    async fn finish_install(
        &self,
        archive_path: &PathBuf,
        info: &crate::mod_catalogue::CatalogueModInfo,
        file_name: &str,
    ) -> Result<InstalledMod> {
        let metadata = self.index.import_mod(archive_path, &info.slug, &info.version, &info.name).await?;
        let display_name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&info.name)
            .to_string();

        let mods_dir = self.settings.mods_dir();
        tokio::fs::create_dir_all(&mods_dir).await?;
        let final_dest = mods_dir.join(file_name);
        let tmp_dest = mods_dir.join(format!("{file_name}.tmp"));
        tokio::fs::copy(archive_path, &tmp_dest).await?;
        tokio::fs::rename(&tmp_dest, &final_dest).await?;

        let entry = InstalledMod {
            slug: info.slug.clone(),
            name: display_name,
            version: info.version.clone(),
            enabled: true,
            file_name: file_name.to_string(),
            installed_at: chrono::Utc::now(),
        };
        self.index.upsert(entry.clone()).await?;
        self.require_restart_if_running(format!("Mod '{}' was installed", info.slug)).await;
        Ok(entry)
    }

    pub async fn enable(&self, slug: &str) -> Result<InstalledMod> {
        self.set_enabled(slug, true).await
    }

    pub async fn disable(&self, slug: &str) -> Result<InstalledMod> {
        self.set_enabled(slug, false).await
    }

    /// Renames the archive on disk (`<file>` <-> `<file>.disabled`), updates
    /// the index entry's `file_name` to match, and marks a restart pending if
    /// the server is running. A no-op success if the mod is already in the
    /// requested state.
    async fn set_enabled(&self, slug: &str, enabled: bool) -> Result<InstalledMod> {
        let entry = self.index.get(slug).await.ok_or_else(|| kind::mod_not_found(slug))?;
        if entry.enabled == enabled {
            return Ok(entry);
        }

        let new_file_name = if enabled {
            entry.file_name.trim_end_matches(".disabled").to_string()
        } else {
            format!("{}.disabled", entry.file_name)
        };

        let mods_dir = self.settings.mods_dir();
        tokio::fs::rename(mods_dir.join(&entry.file_name), mods_dir.join(&new_file_name)).await?;

        let updated = InstalledMod { enabled, file_name: new_file_name, ..entry };
        self.index.upsert(updated.clone()).await?;

        let verb = if enabled { "enabled" } else { "disabled" };
        self.require_restart_if_running(format!("Mod '{slug}' was {verb}")).await;
        Ok(updated)
    }

    /// Removes a mod's archive, its index entry, and its per-mod metadata
    /// cache directory. The cached download (if any) is left for reuse.
    pub async fn remove(&self, slug: &str) -> Result<()> {
        let entry = self.index.remove(slug).await?.ok_or_else(|| kind::mod_not_found(slug))?;
        let installed_path: PathBuf = self.settings.mods_dir().join(&entry.file_name);
        match tokio::fs::remove_file(&installed_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index.remove_metadata_dir(slug).await?;
        self.require_restart_if_running(format!("Mod '{slug}' was removed")).await;
        Ok(())
    }
}

fn normalize_version(version: &str) -> String {
    version.trim_start_matches(['v', 'V']).to_string()
}

/// Parses the `major.minor` prefix of a normalized version string, returning
/// `None` if either component is missing or non-numeric (mirroring Python's
/// `str.isdigit()`, which rejects the empty string).
fn major_minor(version: &str) -> Option<(String, String)> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if is_digits(major) && is_digits(minor) {
        Some((major.to_string(), minor.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_version(version: &str) -> Settings {
        Settings {
            debug: false,
            log_level: "info".into(),
            api_key_admin: "admin".into(),
            api_key_monitor: None,
            game_version: version.into(),
            data_dir: PathBuf::from("/tmp/vs-test"),
            cors_origins: vec!["http://localhost:5173".into()],
            console_history_lines: 100,
            disk_space_warning_threshold_gb: 1.0,
            mod_cache_max_size_mb: 500,
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }

    fn manager_with_version(version: &str) -> ModManager {
        let settings = Arc::new(settings_with_version(version));
        ModManager {
            settings,
            index: Arc::new(futures::executor::block_on(ModIndex::load(PathBuf::from("/tmp/vs-test-idx"))).unwrap()),
            catalogue: Arc::new(CatalogueClient::new("http://127.0.0.1:1")),
            cache: Arc::new(CacheEvictor::new(PathBuf::from("/tmp/vs-test-cache"), 1)),
            restart_pending: Arc::new(RestartPending::new()),
            server_running: Arc::new(ServerRunningState::new()),
        }
    }

    #[test]
    fn unknown_game_version_is_never_verified() {
        let manager = manager_with_version(UNKNOWN_GAME_VERSION);
        let (status, message) = manager.classify_compatibility("1.20.0", &["v1.20.0".to_string()]);
        assert_eq!(status, CompatibilityStatus::NotVerified);
        assert_eq!(message, "Game server version unknown - cannot verify compatibility");
    }

    #[test]
    fn empty_game_version_is_never_verified() {
        let manager = manager_with_version("");
        let (status, _) = manager.classify_compatibility("1.20.0", &["v1.20.0".to_string()]);
        assert_eq!(status, CompatibilityStatus::NotVerified);
    }

    #[test]
    fn matching_version_is_compatible() {
        let manager = manager_with_version("1.19.8");
        let (status, _) = manager.classify_compatibility("1.19.8", &["1.19.8".to_string(), "1.19.7".to_string()]);
        assert_eq!(status, CompatibilityStatus::Compatible);
    }

    #[test]
    fn leading_v_is_normalized_before_comparison() {
        let manager = manager_with_version("1.19.8");
        let (status, _) = manager.classify_compatibility("1.19.8", &["v1.19.8".to_string()]);
        assert_eq!(status, CompatibilityStatus::Compatible);
    }

    #[test]
    fn same_major_minor_falls_back_to_not_verified() {
        let manager = manager_with_version("1.19.8");
        let (status, message) = manager.classify_compatibility("1.19.8", &["1.19.2".to_string()]);
        assert_eq!(status, CompatibilityStatus::NotVerified);
        assert_eq!(message, "Mod not explicitly verified for version 1.19.8. May still work.");
    }

    #[test]
    fn mismatched_major_minor_is_incompatible_with_up_to_three_tags() {
        let manager = manager_with_version("1.19.8");
        let (status, message) = manager.classify_compatibility(
            "1.19.8",
            &["1.18.0".to_string(), "1.18.1".to_string(), "1.18.2".to_string(), "1.18.3".to_string()],
        );
        assert_eq!(status, CompatibilityStatus::Incompatible);
        assert_eq!(
            message,
            "Mod version 1.19.8 is only compatible with 1.18.0, 1.18.1, 1.18.2.... Installation may cause issues."
        );
    }
}
