//! Installed-mod index persisted as a single JSON document (C3).
//!
//! Grounded on this codebase's `store_mod_info`/database-backed mod records,
//! replaced here with a flat `mods.json` file since there is no database in
//! this architecture. Saves are temp-file-then-rename so a crash mid-write
//! never corrupts the previous snapshot.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{kind, Result};

const RESERVED_WINDOWS_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validates a mod slug: 1-50 chars of `[A-Za-z0-9_-]`, not a reserved
/// Windows device name (the catalogue API is case-insensitive on this).
pub fn validate_slug(slug: &str) -> Result<()> {
    let re = regex::Regex::new(r"^[A-Za-z0-9_-]{1,50}$").unwrap();
    if !re.is_match(slug) {
        return Err(kind::invalid_slug(slug));
    }
    if RESERVED_WINDOWS_NAMES.iter().any(|r| r.eq_ignore_ascii_case(slug)) {
        return Err(kind::invalid_slug(slug));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledMod {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub file_name: String,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexDocument {
    mods: HashMap<String, InstalledMod>,
}

pub struct ModIndex {
    path: PathBuf,
    state_dir: PathBuf,
    doc: RwLock<IndexDocument>,
}

impl ModIndex {
    /// Loads `mods.json` from `state_dir`, or starts empty if it doesn't
    /// exist yet.
    pub async fn load(state_dir: PathBuf) -> Result<Self> {
        let path = state_dir.join("mods.json");
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "mods_index_corrupt_using_empty");
                IndexDocument::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state_dir, doc: RwLock::new(doc) })
    }

    async fn persist(&self, doc: &IndexDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<InstalledMod> {
        self.doc.read().await.mods.values().cloned().collect()
    }

    pub async fn get(&self, slug: &str) -> Option<InstalledMod> {
        self.doc.read().await.mods.get(slug).cloned()
    }

    pub async fn upsert(&self, entry: InstalledMod) -> Result<()> {
        let mut doc = self.doc.write().await;
        doc.mods.insert(entry.slug.clone(), entry);
        self.persist(&doc).await
    }

    pub async fn remove(&self, slug: &str) -> Result<Option<InstalledMod>> {
        let mut doc = self.doc.write().await;
        let removed = doc.mods.remove(slug);
        if removed.is_some() {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    pub async fn set_enabled(&self, slug: &str, enabled: bool) -> Result<InstalledMod> {
        let mut doc = self.doc.write().await;
        let entry = doc.mods.get_mut(slug).ok_or_else(|| kind::mod_not_found(slug))?;
        entry.enabled = enabled;
        let updated = entry.clone();
        self.persist(&doc).await?;
        Ok(updated)
    }

    fn mod_metadata_dir(&self, slug: &str, version: &str) -> PathBuf {
        self.state_dir.join("mods").join(slug).join(version)
    }

    /// Recursively removes the per-mod metadata cache directory for `slug`,
    /// covering every version that was ever imported under it.
    pub async fn remove_metadata_dir(&self, slug: &str) -> Result<()> {
        let dir = self.state_dir.join("mods").join(slug);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Extracts `modinfo.json` from a downloaded archive into per-mod
    /// metadata storage, traversal-safe (rejects absolute paths and `..`
    /// components inside the archive). Falls back to caller-supplied
    /// metadata if the archive carries no `modinfo.json`.
    pub async fn import_mod(
        &self,
        archive_path: &Path,
        slug: &str,
        version: &str,
        fallback_name: &str,
    ) -> Result<serde_json::Value> {
        validate_slug(slug)?;
        let archive_path = archive_path.to_path_buf();
        let slug_owned = slug.to_string();
        let version_owned = version.to_string();
        let fallback_owned = fallback_name.to_string();

        let metadata = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
            let file = std::fs::File::open(&archive_path)?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| kind::internal(e.to_string()))?;
            for i in 0..zip.len() {
                let mut entry = zip.by_index(i).map_err(|e| kind::internal(e.to_string()))?;
                let name = entry.name().to_string();
                if is_unsafe_archive_path(&name) {
                    return Err(kind::internal(format!("unsafe archive entry: {name}")));
                }
                if name.ends_with("modinfo.json") {
                    let mut contents = String::new();
                    entry.read_to_string(&mut contents).map_err(|e| kind::internal(e.to_string()))?;
                    return Ok(serde_json::from_str(&contents)
                        .unwrap_or_else(|_| serde_json::json!({"name": fallback_owned, "version": version_owned})));
                }
            }
            Ok(serde_json::json!({"name": fallback_owned, "version": version_owned}))
        })
        .await
        .map_err(|e| kind::internal(e.to_string()))??;

        let dest_dir = self.mod_metadata_dir(&slug_owned, &version_owned);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join("modinfo.json");
        tokio::fs::write(&dest, serde_json::to_vec_pretty(&metadata)?).await?;
        Ok(metadata)
    }

    /// Lists archive file names directly under `mods_dir` ending in `.zip`
    /// or `.zip.disabled`.
    pub async fn scan_mods_directory(&self, mods_dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(mods_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".zip") || name.ends_with(".zip.disabled") {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Rebuilds the index to match what's actually on disk under the mods
    /// directory: archives present on disk but missing from the index are
    /// imported and inserted, and entries whose backing file vanished are
    /// dropped. Persists once if anything changed.
    pub async fn sync_state_with_disk(&self, mods_dir: &Path) -> Result<()> {
        let disk_files: std::collections::HashSet<String> =
            self.scan_mods_directory(mods_dir).await?.into_iter().collect();

        let mut doc = self.doc.write().await;
        let state_files: std::collections::HashSet<String> =
            doc.mods.values().map(|m| m.file_name.clone()).collect();

        let mut changed = false;

        let mut stale = Vec::new();
        for (slug, entry) in doc.mods.iter() {
            if !disk_files.contains(&entry.file_name) {
                tracing::warn!(slug = %slug, file = %entry.file_name, "mod_file_missing_on_disk");
                stale.push(slug.clone());
            }
        }
        for slug in stale {
            doc.mods.remove(&slug);
            changed = true;
        }

        for file_name in disk_files.difference(&state_files) {
            let enabled = !file_name.ends_with(".disabled");
            let slug = derive_slug_from_filename(file_name);
            if validate_slug(&slug).is_err() {
                tracing::warn!(file = %file_name, "mod_file_has_unusable_slug_skipped");
                continue;
            }

            drop(doc);
            let metadata = self.import_mod(&mods_dir.join(file_name), &slug, "unknown", &slug).await;
            doc = self.doc.write().await;

            let metadata = match metadata {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(slug = %slug, error = %e, "mod_file_import_failed_during_sync");
                    continue;
                }
            };
            let name = metadata.get("name").and_then(|v| v.as_str()).unwrap_or(&slug).to_string();
            let version =
                metadata.get("version").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();

            doc.mods.insert(
                slug.clone(),
                InstalledMod {
                    slug,
                    name,
                    version,
                    enabled,
                    file_name: file_name.clone(),
                    installed_at: chrono::Utc::now(),
                },
            );
            changed = true;
        }

        if changed {
            self.persist(&doc).await?;
        }
        Ok(())
    }
}

/// Derives a fallback slug from an on-disk archive file name by stripping
/// the `.disabled` and `.zip` suffixes, for files discovered on disk that
/// have no corresponding index entry.
fn derive_slug_from_filename(file_name: &str) -> String {
    file_name.strip_suffix(".disabled").unwrap_or(file_name).trim_end_matches(".zip").to_string()
}

fn is_unsafe_archive_path(name: &str) -> bool {
    let path = Path::new(name);
    path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation_rules() {
        assert!(validate_slug("carry-capacity").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug(&"a".repeat(51)).is_err());
        assert!(validate_slug("bad slug").is_err());
        assert!(validate_slug("CON").is_err());
        assert!(validate_slug("com1").is_err());
    }

    #[test]
    fn rejects_traversal_paths() {
        assert!(is_unsafe_archive_path("../../etc/passwd"));
        assert!(is_unsafe_archive_path("/etc/passwd"));
        assert!(!is_unsafe_archive_path("modinfo.json"));
        assert!(!is_unsafe_archive_path("assets/textures/a.png"));
    }

    #[tokio::test]
    async fn upsert_then_remove_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        index
            .upsert(InstalledMod {
                slug: "carry-capacity".into(),
                name: "Carry Capacity".into(),
                version: "1.0.0".into(),
                enabled: true,
                file_name: "carry-capacity-1.0.0.zip".into(),
                installed_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(dir.path().join("mods.json").exists());

        let reloaded = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);

        reloaded.remove("carry-capacity").await.unwrap();
        assert!(reloaded.get("carry-capacity").await.is_none());
    }

    #[tokio::test]
    async fn remove_metadata_dir_is_idempotent_and_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let index = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        let meta_dir = dir.path().join("mods").join("carry-capacity").join("1.0.0");
        tokio::fs::create_dir_all(&meta_dir).await.unwrap();
        tokio::fs::write(meta_dir.join("modinfo.json"), b"{}").await.unwrap();

        index.remove_metadata_dir("carry-capacity").await.unwrap();
        assert!(!dir.path().join("mods").join("carry-capacity").exists());
        index.remove_metadata_dir("carry-capacity").await.unwrap();
    }

    #[tokio::test]
    async fn set_enabled_on_missing_slug_is_mod_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let index = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        let err = index.set_enabled("ghost", false).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ModNotFound);
    }

    #[tokio::test]
    async fn malformed_index_file_loads_empty_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("mods.json"), b"not json").await.unwrap();
        let index = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        assert!(index.list().await.is_empty());
    }

    #[test]
    fn derives_slug_from_archive_filename() {
        assert_eq!(derive_slug_from_filename("carry-capacity.zip"), "carry-capacity");
        assert_eq!(derive_slug_from_filename("carry-capacity.zip.disabled"), "carry-capacity");
    }

    fn write_empty_zip(path: &Path) {
        use std::io::Write as _;
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("readme.txt", options).unwrap();
        zip.write_all(b"hello").unwrap();
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn sync_state_with_disk_imports_new_and_drops_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mods_dir = dir.path().join("Mods");
        std::fs::create_dir_all(&mods_dir).unwrap();
        write_empty_zip(&mods_dir.join("carry-capacity.zip"));

        let index = ModIndex::load(dir.path().to_path_buf()).await.unwrap();
        index
            .upsert(InstalledMod {
                slug: "ghost-mod".into(),
                name: "Ghost".into(),
                version: "1.0.0".into(),
                enabled: true,
                file_name: "ghost-mod.zip".into(),
                installed_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        index.sync_state_with_disk(&mods_dir).await.unwrap();

        assert!(index.get("ghost-mod").await.is_none());
        let imported = index.get("carry-capacity").await.unwrap();
        assert_eq!(imported.file_name, "carry-capacity.zip");
        assert!(imported.enabled);
        assert_eq!(imported.version, "unknown");
    }
}
