//! Collection shortcuts per media type, cached on disk with a fixed expiry,
//! plus filters the user added by hand.

use crate::api::{ApiError, ArchiveService};
use archive_proto::model::{ArchiveMetadata, MediaType, SearchFilter};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter identifier must not be empty")]
    EmptyIdentifier,
    #[error("a filter for \"{0}\" already exists")]
    Duplicate(String),
    #[error("no user filter \"{0}\"")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not write filter cache: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode filter cache: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFilters {
    fetched_at: DateTime<Utc>,
    filters: Vec<SearchFilter>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    /// Keyed by `MediaType::label`.
    #[serde(default)]
    entries: BTreeMap<String, CachedFilters>,
    #[serde(default)]
    user_filters: Vec<SearchFilter>,
}

pub struct FilterCache {
    service: Arc<dyn ArchiveService>,
    path: PathBuf,
    expiry: Duration,
    data: CacheFile,
}

impl FilterCache {
    /// Load `<cache_dir>/filters.json`.  A missing or unreadable file starts
    /// an empty cache.
    pub fn open(service: Arc<dyn ArchiveService>, cache_dir: &Path, expiry: Duration) -> Self {
        let path = cache_dir.join("filters.json");
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring corrupt filter cache {:?}: {}", path, e);
                CacheFile::default()
            }),
            Err(_) => CacheFile::default(),
        };
        Self {
            service,
            path,
            expiry,
            data,
        }
    }

    pub async fn filters(&mut self, media_type: MediaType) -> Result<Vec<SearchFilter>, FilterError> {
        self.filters_at(media_type, Utc::now()).await
    }

    /// Cached filters while they are younger than the expiry, otherwise a
    /// fresh fetch.  A failed fetch falls back to stale entries when present.
    pub async fn filters_at(
        &mut self,
        media_type: MediaType,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchFilter>, FilterError> {
        if let Some(entry) = self.data.entries.get(media_type.label()) {
            if now - entry.fetched_at < self.expiry {
                debug!("filter cache hit for {}", media_type.label());
                return Ok(self.with_user_filters(media_type, entry.filters.clone()));
            }
        }

        match self.fetch(media_type, now).await {
            Ok(filters) => Ok(filters),
            Err(FilterError::Api(e)) => match self.data.entries.get(media_type.label()) {
                Some(stale) => {
                    warn!("Filter refresh failed, serving stale list: {}", e);
                    Ok(self.with_user_filters(media_type, stale.filters.clone()))
                }
                None => Err(FilterError::Api(e)),
            },
            Err(e) => Err(e),
        }
    }

    /// Fetch regardless of age.
    pub async fn refresh(&mut self, media_type: MediaType) -> Result<Vec<SearchFilter>, FilterError> {
        self.fetch(media_type, Utc::now()).await
    }

    pub async fn add_user_filter(&mut self, mut filter: SearchFilter) -> Result<SearchFilter, FilterError> {
        filter.identifier = filter.identifier.trim().to_string();
        if filter.identifier.is_empty() {
            return Err(FilterError::EmptyIdentifier);
        }
        if self.knows(&filter.identifier) {
            return Err(FilterError::Duplicate(filter.identifier));
        }
        if filter.name.trim().is_empty() {
            filter.name = filter.identifier.clone();
        }
        if filter.icon_url.is_none() {
            filter.icon_url = Some(ArchiveMetadata::icon_url_for(&filter.identifier));
        }
        filter.user_defined = true;

        self.data.user_filters.push(filter.clone());
        self.save().await?;
        info!("Added user filter {}", filter.identifier);
        Ok(filter)
    }

    pub async fn remove_user_filter(&mut self, identifier: &str) -> Result<SearchFilter, FilterError> {
        let identifier = identifier.trim();
        let index = self
            .data
            .user_filters
            .iter()
            .position(|f| f.identifier == identifier)
            .ok_or_else(|| FilterError::NotFound(identifier.to_string()))?;
        let removed = self.data.user_filters.remove(index);
        self.save().await?;
        Ok(removed)
    }

    async fn fetch(
        &mut self,
        media_type: MediaType,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchFilter>, FilterError> {
        info!("Fetching {} collections", media_type.label());
        let filters = self.service.collections(media_type).await?;
        self.data.entries.insert(
            media_type.label().to_string(),
            CachedFilters {
                fetched_at: now,
                filters: filters.clone(),
            },
        );
        self.save().await?;
        Ok(self.with_user_filters(media_type, filters))
    }

    fn with_user_filters(&self, media_type: MediaType, mut filters: Vec<SearchFilter>) -> Vec<SearchFilter> {
        filters.extend(
            self.data
                .user_filters
                .iter()
                .filter(|f| f.media_type == media_type)
                .cloned(),
        );
        filters
    }

    fn knows(&self, identifier: &str) -> bool {
        self.data
            .entries
            .values()
            .flat_map(|e| e.filters.iter())
            .chain(self.data.user_filters.iter())
            .any(|f| f.identifier == identifier)
    }

    async fn save(&self) -> Result<(), FilterError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
