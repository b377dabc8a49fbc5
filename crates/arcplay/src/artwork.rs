//! Item thumbnails, fetched once and then served from disk.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ArtworkCache {
    dir: PathBuf,
    http: reqwest::Client,
    base_url: String,
}

impl ArtworkCache {
    pub fn new(cache_dir: &Path, base_url: &str) -> Self {
        Self {
            dir: cache_dir.join("artwork"),
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(crate::download_manager::sanitize_component(identifier))
    }

    /// Local path of the item's thumbnail, downloading it on first use.
    pub async fn artwork(&self, identifier: &str) -> Result<PathBuf> {
        let path = self.path_for(identifier);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("artwork cache hit for {}", identifier);
            return Ok(path);
        }

        let url = format!("{}/services/img/{}", self.base_url, identifier);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch artwork")?;
        if !response.status().is_success() {
            anyhow::bail!("Artwork fetch returned status: {}", response.status());
        }
        let bytes = response
            .bytes()
            .await
            .context("Failed to read artwork data")?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        debug!("artwork cached for {} ({} bytes)", identifier, bytes.len());
        Ok(path)
    }
}
