//! Download cache with LRU eviction by access time (C2).
//!
//! Grounded on the source's `CacheEvictionService`: evicts only `*.zip`/`*.cs`
//! files under `<cache_root>/mods/`, sorted ascending by atime, until total
//! size is at or below the configured limit.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

const PATTERNS: [&str; 2] = ["*.zip", "*.cs"];

#[derive(Debug, Clone)]
struct CacheFileInfo {
    path: PathBuf,
    size_bytes: u64,
    access_time: SystemTime,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EvictionResult {
    pub files_evicted: u64,
    pub bytes_freed: u64,
    pub files_remaining: u64,
    pub bytes_remaining: u64,
}

pub struct CacheEvictor {
    cache_dir: PathBuf,
    max_size_bytes: u64,
}

impl CacheEvictor {
    pub fn new(cache_dir: PathBuf, max_size_mb: u64) -> Self {
        Self { cache_dir, max_size_bytes: max_size_mb * 1024 * 1024 }
    }

    pub fn eviction_enabled(&self) -> bool {
        self.max_size_bytes > 0
    }

    fn list_files(&self) -> Vec<CacheFileInfo> {
        let mods_dir = self.cache_dir.join("mods");
        let mut files = Vec::new();
        for pattern in PATTERNS {
            let glob_pattern = mods_dir.join(pattern);
            let Some(glob_str) = glob_pattern.to_str() else { continue };
            let Ok(paths) = glob::glob(glob_str) else { continue };
            for entry in paths.flatten() {
                match std::fs::metadata(&entry) {
                    Ok(meta) => {
                        let access_time = meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
                        files.push(CacheFileInfo { path: entry, size_bytes: meta.len(), access_time });
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.display(), error = %e, "cache_file_stat_failed");
                    }
                }
            }
        }
        files.sort_by_key(|f| f.access_time);
        files
    }

    pub fn get_cache_size(&self) -> (u64, u64) {
        let files = self.list_files();
        (files.len() as u64, files.iter().map(|f| f.size_bytes).sum())
    }

    /// Evicts oldest-by-atime files until total size is within the limit.
    /// A no-op if eviction is disabled or the current size is already within
    /// the limit. Deletion failures are logged and the file stays counted as
    /// present; the final remaining counts come from a fresh rescan.
    pub fn evict_if_needed(&self) -> EvictionResult {
        if !self.eviction_enabled() {
            let (files, bytes) = self.get_cache_size();
            return EvictionResult { files_remaining: files, bytes_remaining: bytes, ..Default::default() };
        }

        let files = self.list_files();
        let total: u64 = files.iter().map(|f| f.size_bytes).sum();
        if total <= self.max_size_bytes {
            return EvictionResult { files_remaining: files.len() as u64, bytes_remaining: total, ..Default::default() };
        }

        let mut current = total;
        let mut evicted = 0u64;
        let mut freed = 0u64;
        for file in &files {
            if current <= self.max_size_bytes {
                break;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    current -= file.size_bytes;
                    evicted += 1;
                    freed += file.size_bytes;
                    tracing::info!(path = %file.path.display(), reason = "size_limit", "cache_evicted");
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "cache_eviction_failed");
                }
            }
        }

        let (files_remaining, bytes_remaining) = self.get_cache_size();
        if evicted > 0 {
            tracing::info!(evicted, freed, "cache_eviction_complete");
        }
        EvictionResult { files_evicted: evicted, bytes_freed: freed, files_remaining, bytes_remaining }
    }

    /// Unlinks every eligible file regardless of the configured limit.
    pub fn evict_all(&self) -> EvictionResult {
        let files = self.list_files();
        let mut evicted = 0u64;
        let mut freed = 0u64;
        for file in &files {
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    evicted += 1;
                    freed += file.size_bytes;
                    tracing::info!(path = %file.path.display(), reason = "manual_clear", "cache_evicted");
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "cache_eviction_failed");
                }
            }
        }
        let remaining = files.len() as u64 - evicted;
        let bytes_remaining: u64 = files.iter().map(|f| f.size_bytes).sum::<u64>() - freed;
        EvictionResult { files_evicted: evicted, bytes_freed: freed, files_remaining: remaining, bytes_remaining }
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.cache_dir.join("mods")
    }
}

/// True if `path`'s extension makes it eligible for LRU eviction.
pub fn is_evictable(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("zip") | Some("cs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn touch(path: &Path, size: usize, atime_offset_secs: u64) {
        fs::write(path, vec![0u8; size]).unwrap();
        let file = std::fs::File::open(path).unwrap();
        let when = SystemTime::now() - Duration::from_secs(atime_offset_secs);
        let atime = filetime::FileTime::from_system_time(when);
        let _ = file;
        let _ = filetime::set_file_atime(path, atime);
    }

    #[test]
    fn eviction_disabled_when_limit_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mods")).unwrap();
        let evictor = CacheEvictor::new(dir.path().to_path_buf(), 0);
        assert!(!evictor.eviction_enabled());
        let result = evictor.evict_if_needed();
        assert_eq!(result.files_evicted, 0);
    }

    #[test]
    fn evicts_oldest_first_until_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mods_dir = dir.path().join("mods");
        fs::create_dir_all(&mods_dir).unwrap();
        touch(&mods_dir.join("old.zip"), 100, 3600);
        touch(&mods_dir.join("mid.zip"), 100, 1800);
        touch(&mods_dir.join("new.zip"), 100, 0);

        // 1 MB limit in MB units, so force a tiny byte limit directly.
        let evictor = CacheEvictor { cache_dir: dir.path().to_path_buf(), max_size_bytes: 150 };
        let result = evictor.evict_if_needed();
        assert_eq!(result.files_evicted, 2);
        assert!(result.bytes_remaining <= 150);
        assert!(mods_dir.join("new.zip").exists());
        assert!(!mods_dir.join("old.zip").exists());
    }

    #[test]
    fn non_eligible_extension_is_ignored() {
        assert!(is_evictable(Path::new("a.zip")));
        assert!(is_evictable(Path::new("a.cs")));
        assert!(!is_evictable(Path::new("a.txt")));
    }
}
