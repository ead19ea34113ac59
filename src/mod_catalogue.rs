//! Read-through client for the external mod catalogue (C4).
//!
//! Grounded on this codebase's `search_modrinth`/`download_modrinth_mod`
//! (reqwest client, SHA1 verification, chunked streaming download), narrowed
//! to a single catalogue backend and a streamed temp-file-then-rename
//! download instead of loading the whole archive into memory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::error::{kind, AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogueModInfo {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub minecraft_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCatalogueResponse {
    #[serde(default)]
    statuscode: Option<StatusCodeField>,
    #[serde(flatten)]
    info: Option<CatalogueModInfo>,
}

/// The upstream API returns `statuscode` as either a string or a number
/// depending on endpoint; accept both rather than failing deserialization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusCodeField {
    Str(String),
    Num(i64),
}

impl StatusCodeField {
    fn is_ok(&self) -> bool {
        match self {
            StatusCodeField::Str(s) => s == "200",
            StatusCodeField::Num(n) => *n == 200,
        }
    }
}

pub struct CatalogueClient {
    client: reqwest::Client,
    base_url: String,
}

impl CatalogueClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builder with static config never fails");
        Self { client, base_url: base_url.into() }
    }

    /// Fetches a single mod's catalogue entry by slug. Returns
    /// `ErrorCode::ModNotFound` on a 404 and `ErrorCode::ExternalApiError`
    /// for timeouts, connect failures, and other non-2xx responses.
    pub async fn get_mod(&self, slug: &str) -> Result<CatalogueModInfo> {
        crate::mod_index::validate_slug(slug)?;
        let normalized = slug.to_lowercase();
        let url = format!("{}/mods/{}", self.base_url, normalized);

        let response = self.client.get(&url).send().await.map_err(classify_transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(kind::mod_not_found(slug));
        }
        if !response.status().is_success() {
            return Err(kind::external_api(format!(
                "catalogue returned status {}",
                response.status()
            )));
        }

        let raw: RawCatalogueResponse = response.json().await.map_err(classify_transport_error)?;
        if let Some(code) = &raw.statuscode {
            if !code.is_ok() {
                return Err(kind::mod_not_found(slug));
            }
        }
        raw.info.ok_or_else(|| kind::external_api("catalogue response missing mod data"))
    }

    /// Streams a mod archive to `dest_dir/<file_name>` via a temp file then
    /// atomic rename, verifying SHA1 if the catalogue supplied one.
    pub async fn download_mod(
        &self,
        info: &CatalogueModInfo,
        dest_dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf> {
        let response = self.client.get(&info.download_url).send().await.map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(kind::external_api(format!("download returned status {}", response.status())));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(file_name);
        let tmp = dest_dir.join(format!("{file_name}.part"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut hasher = Sha1::new();
        let mut stream = response.bytes_stream();

        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_transport_error)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = &info.sha1 {
            let actual = format!("{:x}", hasher.finalize());
            if &actual != expected {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(kind::external_api(format!(
                    "checksum mismatch for {}: expected {expected}, got {actual}",
                    info.slug
                )));
            }
        }

        tokio::fs::rename(&tmp, &dest).await?;
        Ok(dest)
    }
}

fn classify_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        kind::external_api(format!("catalogue request timed out: {err}"))
    } else if err.is_connect() {
        kind::external_api(format!("catalogue unreachable: {err}"))
    } else {
        kind::external_api(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_field_accepts_string_or_number() {
        assert!(StatusCodeField::Str("200".into()).is_ok());
        assert!(!StatusCodeField::Str("404".into()).is_ok());
        assert!(StatusCodeField::Num(200).is_ok());
        assert!(!StatusCodeField::Num(500).is_ok());
    }

    #[tokio::test]
    async fn get_mod_rejects_invalid_slug_before_any_request() {
        let client = CatalogueClient::new("http://127.0.0.1:1");
        let err = client.get_mod("bad slug!").await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidSlug);
    }
}
