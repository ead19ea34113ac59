//! Lazily-fetched, per-channel list of available game server versions (C12).
//!
//! Grounded on this codebase's `version_manager`/`version_resolver` pairing
//! (remote fetch behind an in-memory cache), narrowed to per-channel
//! independent caching so one channel's upstream outage doesn't take down
//! lookups for the others.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{kind, Result};

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameVersion {
    pub version: String,
    pub channel: String,
    pub download_url: String,
    #[serde(default)]
    pub md5: Option<String>,
}

struct CacheEntry {
    versions: Vec<GameVersion>,
    fetched_at: Instant,
}

pub struct VersionCache {
    client: reqwest::Client,
    source_url: String,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl VersionCache {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builder with static config never fails"),
            source_url: source_url.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached version list for `channel`, refetching if the
    /// cache is empty or stale. A fetch failure on one channel never
    /// disturbs any other channel's cached entry.
    pub async fn list(&self, channel: &str) -> Result<Vec<GameVersion>> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(channel) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(entry.versions.clone());
                }
            }
        }

        let url = format!("{}/{}", self.source_url, channel);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| kind::external_api(format!("version source unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(kind::external_api(format!("version source returned status {}", response.status())));
        }
        let versions: Vec<GameVersion> = response
            .json()
            .await
            .map_err(|e| kind::external_api(format!("invalid version source response: {e}")))?;

        let mut entries = self.entries.lock().await;
        entries.insert(channel.to_string(), CacheEntry { versions: versions.clone(), fetched_at: Instant::now() });
        Ok(versions)
    }

    pub async fn get(&self, channel: &str, version: &str) -> Result<GameVersion> {
        let versions = self.list(channel).await?;
        versions
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| kind::version_not_found(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_propagates_version_not_found() {
        let cache = VersionCache::new("http://127.0.0.1:1");
        let err = cache.list("stable").await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ExternalApiError);
    }
}
