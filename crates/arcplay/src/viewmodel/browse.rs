use super::LoadState;
use crate::api::{ArchiveService, SearchQuery};
use archive_proto::model::SearchDoc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Members of one collection: sub-collections first, then items.
pub struct BrowseModel {
    service: Arc<dyn ArchiveService>,
    excluded_collection: String,
    collection: Option<String>,
    items: Vec<SearchDoc>,
    page: u32,
    total: u64,
    /// Hits received so far, including excluded ones.
    fetched: u64,
    state: LoadState,
}

impl BrowseModel {
    pub fn new(service: Arc<dyn ArchiveService>, excluded_collection: impl Into<String>) -> Self {
        Self {
            service,
            excluded_collection: excluded_collection.into(),
            collection: None,
            items: Vec::new(),
            page: 0,
            total: 0,
            fetched: 0,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn items(&self) -> &[SearchDoc] {
        &self.items
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.page > 0 && self.fetched < self.total
    }

    pub async fn open(&mut self, collection: &str) -> &LoadState {
        self.collection = Some(collection.trim().to_string());
        self.items.clear();
        self.page = 0;
        self.total = 0;
        self.fetched = 0;
        self.fetch(1).await
    }

    pub async fn load_more(&mut self) -> &LoadState {
        if !self.has_more() {
            return &self.state;
        }
        self.fetch(self.page + 1).await
    }

    /// Fetch `page`, then keep going while every hit so far was excluded and
    /// the server reports more.
    async fn fetch(&mut self, mut page: u32) -> &LoadState {
        let Some(collection) = self.collection.clone() else {
            return &self.state;
        };
        self.state = LoadState::Loading;
        let query = SearchQuery::collection_members(collection);

        loop {
            let result = match self.service.search(&query, page).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Browse failed: {}", e);
                    self.state = LoadState::Error(e.to_string());
                    return &self.state;
                }
            };
            let received = result.docs.len();
            self.page = page;
            self.total = result.total;
            self.fetched += received as u64;
            self.items.extend(result.docs);
            self.items = arrange(std::mem::take(&mut self.items), &self.excluded_collection);

            if !self.items.is_empty() {
                self.state = LoadState::Loaded;
                break;
            }
            if received == 0 || !self.has_more() {
                self.state = LoadState::NoResults;
                break;
            }
            debug!("Browse page {} was entirely excluded, fetching the next", page);
            page += 1;
        }
        &self.state
    }
}

/// Drop entries tagged with the excluded collection and move collections
/// ahead of leaf items, otherwise keeping server order.
pub fn arrange(docs: Vec<SearchDoc>, excluded_collection: &str) -> Vec<SearchDoc> {
    let mut docs: Vec<SearchDoc> = docs
        .into_iter()
        .filter(|d| {
            excluded_collection.is_empty()
                || (d.identifier != excluded_collection
                    && !d.collections.iter().any(|c| c == excluded_collection))
        })
        .collect();
    docs.sort_by_key(|d| !d.is_collection());
    docs
}
