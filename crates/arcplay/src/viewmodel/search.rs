use super::LoadState;
use crate::api::{ApiError, ArchiveService, SearchQuery};
use archive_proto::model::{MediaType, SearchDoc, SearchPage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Catalog search with paging.  At most one request is in flight: starting a
/// new search aborts the one it supersedes.
pub struct SearchModel {
    service: Arc<dyn ArchiveService>,
    query: SearchQuery,
    results: Vec<SearchDoc>,
    page: u32,
    total: u64,
    state: LoadState,
    /// State to fall back to when the in-flight request is cancelled.
    settled: LoadState,
    in_flight: Option<Pending>,
}

struct Pending {
    page: u32,
    handle: JoinHandle<Result<SearchPage, ApiError>>,
}

impl SearchModel {
    pub fn new(service: Arc<dyn ArchiveService>, media_type: MediaType) -> Self {
        Self {
            service,
            query: SearchQuery {
                media_type: Some(media_type),
                ..SearchQuery::default()
            },
            results: Vec::new(),
            page: 0,
            total: 0,
            state: LoadState::Idle,
            settled: LoadState::Idle,
            in_flight: None,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn results(&self) -> &[SearchDoc] {
        &self.results
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn has_more(&self) -> bool {
        self.page > 0 && (self.results.len() as u64) < self.total
    }

    /// Scope searches to one collection (a search filter), or lift the scope.
    pub fn set_collection(&mut self, collection: Option<String>) {
        self.query.collection = collection.filter(|c| !c.trim().is_empty());
    }

    /// Start a fresh search for `text`, replacing any request in flight.
    /// Blank text with no collection scope resets to idle.
    pub fn begin(&mut self, text: &str) {
        self.abort_in_flight();
        self.query.text = text.trim().to_string();

        if self.query.text.is_empty() && self.query.collection.is_none() {
            self.results.clear();
            self.page = 0;
            self.total = 0;
            self.state = LoadState::Idle;
            self.settled = LoadState::Idle;
            return;
        }
        self.spawn_page(1);
    }

    /// Start fetching the next page.  Returns `false` when there is nothing
    /// more to load or a request is already running.
    pub fn begin_load_more(&mut self) -> bool {
        if !self.has_more() || self.in_flight.is_some() {
            return false;
        }
        self.spawn_page(self.page + 1);
        true
    }

    /// Abort the request in flight.  The previous results and state stay.
    pub async fn cancel(&mut self) {
        if let Some(pending) = self.in_flight.as_ref() {
            pending.handle.abort();
        }
        self.finish().await;
    }

    pub fn is_searching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Wait for the request in flight and fold its outcome into the model.
    /// Dropping the returned future keeps the request in flight.
    pub async fn finish(&mut self) -> &LoadState {
        let Some(pending) = self.in_flight.as_mut() else {
            return &self.state;
        };
        let outcome = (&mut pending.handle).await;
        let page = pending.page;
        self.in_flight = None;

        match outcome {
            Ok(Ok(result)) => self.apply(page, result),
            Ok(Err(e)) => {
                warn!("Search failed: {}", e);
                self.state = LoadState::Error(e.to_string());
            }
            Err(e) if e.is_cancelled() => {
                debug!("Search for {:?} cancelled", self.query.text);
                self.state = self.settled.clone();
            }
            Err(e) => {
                warn!("Search task failed: {}", e);
                self.state = LoadState::Error(e.to_string());
            }
        }
        if self.state != LoadState::Loading {
            self.settled = self.state.clone();
        }
        &self.state
    }

    pub async fn search(&mut self, text: &str) -> &LoadState {
        self.begin(text);
        self.finish().await
    }

    pub async fn load_more(&mut self) -> &LoadState {
        if self.begin_load_more() {
            self.finish().await
        } else {
            &self.state
        }
    }

    fn spawn_page(&mut self, page: u32) {
        let service = Arc::clone(&self.service);
        let query = self.query.clone();
        debug!("Searching {:?} page {}", query.to_query_string(), page);

        self.state = LoadState::Loading;
        self.in_flight = Some(Pending {
            page,
            handle: tokio::spawn(async move { service.search(&query, page).await }),
        });
    }

    fn abort_in_flight(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            pending.handle.abort();
        }
    }

    fn apply(&mut self, page: u32, result: SearchPage) {
        if page <= 1 {
            self.results = result.docs;
        } else {
            self.results.extend(result.docs);
        }
        self.page = page;
        self.total = result.total;
        self.state = if self.results.is_empty() {
            LoadState::NoResults
        } else {
            LoadState::Loaded
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{doc, FakeArchive};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn catalog() -> Vec<SearchDoc> {
        (1..=5)
            .map(|n| doc(&format!("gd{}", n), &format!("Dead show {}", n), "audio"))
            .chain(std::iter::once(doc("phish1", "Phish live", "audio")))
            .collect()
    }

    #[tokio::test]
    async fn test_search_then_load_more_appends() {
        let fake = Arc::new(FakeArchive::with_docs(catalog(), 2));
        let mut model = SearchModel::new(fake.clone(), MediaType::Audio);

        assert_eq!(model.search("dead").await, &LoadState::Loaded);
        assert_eq!(model.results().len(), 2);
        assert_eq!(model.total(), 5);
        assert!(model.has_more());

        model.load_more().await;
        model.load_more().await;
        assert_eq!(model.results().len(), 5);
        assert_eq!(model.results()[4].identifier, "gd5");
        assert!(!model.has_more());
        assert!(!model.begin_load_more());

        // A fresh search replaces rather than appends.
        model.search("phish").await;
        assert_eq!(model.results().len(), 1);
        assert_eq!(fake.search_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_no_results_is_not_an_error() {
        let fake = Arc::new(FakeArchive::with_docs(catalog(), 10));
        let mut model = SearchModel::new(fake.clone(), MediaType::Audio);
        assert_eq!(model.search("coltrane").await, &LoadState::NoResults);

        fake.fail.store(true, Ordering::SeqCst);
        assert!(matches!(model.search("dead").await, LoadState::Error(_)));
    }

    #[tokio::test]
    async fn test_superseded_search_is_dropped() {
        let fake = Arc::new(FakeArchive {
            delay: Some(Duration::from_millis(50)),
            ..FakeArchive::with_docs(catalog(), 10)
        });
        let mut model = SearchModel::new(fake.clone(), MediaType::Audio);

        model.begin("dead");
        model.begin("phish");
        assert_eq!(model.finish().await, &LoadState::Loaded);
        assert_eq!(model.results().len(), 1);
        assert_eq!(model.results()[0].identifier, "phish1");
    }

    #[tokio::test]
    async fn test_cancel_keeps_previous_results() {
        let fake = Arc::new(FakeArchive {
            delay: Some(Duration::from_millis(50)),
            ..FakeArchive::with_docs(catalog(), 10)
        });
        let mut model = SearchModel::new(fake.clone(), MediaType::Audio);
        model.search("phish").await;

        model.begin("dead");
        assert_eq!(model.state(), &LoadState::Loading);
        model.cancel().await;

        assert_eq!(model.state(), &LoadState::Loaded);
        assert_eq!(model.results()[0].identifier, "phish1");
    }

    #[tokio::test]
    async fn test_abandoned_wait_keeps_request() {
        let fake = Arc::new(FakeArchive {
            delay: Some(Duration::from_millis(50)),
            ..FakeArchive::with_docs(catalog(), 10)
        });
        let mut model = SearchModel::new(fake, MediaType::Audio);

        model.begin("phish");
        let timed_out = tokio::time::timeout(Duration::from_millis(5), model.finish())
            .await
            .is_err();
        assert!(timed_out);
        assert!(model.is_searching());
        assert_eq!(model.finish().await, &LoadState::Loaded);
        assert!(!model.is_searching());
    }

    #[tokio::test]
    async fn test_blank_query_resets_to_idle() {
        let fake = Arc::new(FakeArchive::with_docs(catalog(), 10));
        let mut model = SearchModel::new(fake.clone(), MediaType::Audio);
        model.search("dead").await;

        assert_eq!(model.search("   ").await, &LoadState::Idle);
        assert!(model.results().is_empty());

        model.set_collection(Some("etree".into()));
        model.search("").await;
        let (query, page) = fake.queries.lock().unwrap().last().cloned().unwrap();
        assert_eq!(query.collection.as_deref(), Some("etree"));
        assert_eq!(page, 1);
    }
}
