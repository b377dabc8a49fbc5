//! Internet Archive client: catalog search, item metadata and collection
//! listings.

use archive_proto::config::ArchiveConfig;
use archive_proto::model::{
    ArchiveFile, ArchiveMetadata, MediaType, SearchDoc, SearchFilter, SearchPage,
};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const SEARCH_FIELDS: &[&str] = &[
    "identifier",
    "title",
    "creator",
    "mediatype",
    "collection",
    "downloads",
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("archive returned status {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("{0} was not found")]
    NotFound(String),
}

/// What to search for.  Every part is optional; they are AND-ed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub media_type: Option<MediaType>,
    pub collection: Option<String>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            text: text.into(),
            media_type: Some(media_type),
            collection: None,
        }
    }

    /// Everything directly inside a collection, items and sub-collections alike.
    pub fn collection_members(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        let text = self.text.trim();
        if !text.is_empty() {
            parts.push(format!("({})", text));
        }
        if let Some(media_type) = self.media_type {
            parts.push(format!("mediatype:({})", media_type.archive_mediatype()));
        }
        if let Some(collection) = self.collection.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("collection:({})", collection));
        }
        if parts.is_empty() {
            "*:*".to_string()
        } else {
            parts.join(" AND ")
        }
    }
}

/// An item's metadata plus its file listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchiveDocument {
    pub metadata: ArchiveMetadata,
    pub mediatype: Option<MediaType>,
    pub files: Vec<ArchiveFile>,
}

#[async_trait]
pub trait ArchiveService: Send + Sync + 'static {
    /// Fetch one page (1-based) of search hits.
    async fn search(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, ApiError>;
    async fn metadata(&self, identifier: &str) -> Result<ArchiveDocument, ApiError>;
    /// Top-level collections for a media type, most downloaded first.
    async fn collections(&self, media_type: MediaType) -> Result<Vec<SearchFilter>, ApiError>;
}

pub struct ArchiveClient {
    http: reqwest::Client,
    base_url: String,
    rows: u32,
}

impl ArchiveClient {
    pub fn new(config: &ArchiveConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rows: config.rows_per_page.max(1),
        })
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ArchiveService for ArchiveClient {
    async fn search(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, ApiError> {
        let q = query.to_query_string();
        debug!("archive search q={} page={}", q, page);

        let mut params: Vec<(&str, String)> = vec![("q", q)];
        params.extend(SEARCH_FIELDS.iter().map(|f| ("fl[]", f.to_string())));
        params.push(("sort[]", "downloads desc".to_string()));
        params.push(("rows", self.rows.to_string()));
        params.push(("page", page.max(1).to_string()));
        params.push(("output", "json".to_string()));

        let url = format!("{}/advancedsearch.php", self.base_url);
        let body = self.get_text(&url, &params).await?;
        parse_search_response(&body)
    }

    async fn metadata(&self, identifier: &str) -> Result<ArchiveDocument, ApiError> {
        let url = format!("{}/metadata/{}", self.base_url, identifier);
        let body = self.get_text(&url, &[]).await?;
        parse_metadata_response(identifier, &body)
    }

    async fn collections(&self, media_type: MediaType) -> Result<Vec<SearchFilter>, ApiError> {
        let query = SearchQuery {
            text: "mediatype:collection".to_string(),
            media_type: None,
            collection: Some(media_type.archive_mediatype().to_string()),
        };
        let page = self.search(&query, 1).await?;
        Ok(page
            .docs
            .into_iter()
            .map(|doc| SearchFilter {
                icon_url: Some(ArchiveMetadata::icon_url_for(&doc.identifier)),
                name: doc.display_title().to_string(),
                identifier: doc.identifier,
                media_type,
                user_defined: false,
            })
            .collect())
    }
}

// ── wire format ───────────────────────────────────────────────────────────────

/// Archive fields arrive as either a string or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn first(self) -> Option<String> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(v) => v.into_iter().next(),
        }
    }

    fn joined(self) -> String {
        match self {
            Self::One(s) => s,
            Self::Many(v) => v.join(", "),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default)]
    docs: Vec<RawDoc>,
}

#[derive(Debug, Deserialize)]
struct RawDoc {
    identifier: String,
    title: Option<OneOrMany>,
    creator: Option<OneOrMany>,
    mediatype: Option<String>,
    collection: Option<OneOrMany>,
    downloads: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MetadataEnvelope {
    metadata: Option<RawMetadata>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    identifier: Option<String>,
    title: Option<OneOrMany>,
    creator: Option<OneOrMany>,
    publisher: Option<OneOrMany>,
    description: Option<OneOrMany>,
    mediatype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    name: String,
    format: Option<String>,
    title: Option<String>,
    creator: Option<OneOrMany>,
    artist: Option<OneOrMany>,
    track: Option<String>,
    size: Option<String>,
    length: Option<String>,
}

fn parse_search_response(body: &str) -> Result<SearchPage, ApiError> {
    let envelope: SearchEnvelope =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    let docs = envelope
        .response
        .docs
        .into_iter()
        .map(|d| SearchDoc {
            identifier: d.identifier,
            title: d.title.and_then(OneOrMany::first),
            creator: d.creator.map(OneOrMany::joined),
            mediatype: d.mediatype,
            collections: d.collection.map(OneOrMany::into_vec).unwrap_or_default(),
            downloads: d.downloads,
        })
        .collect();
    Ok(SearchPage {
        docs,
        total: envelope.response.num_found,
    })
}

fn parse_metadata_response(identifier: &str, body: &str) -> Result<ArchiveDocument, ApiError> {
    let envelope: MetadataEnvelope =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    // Unknown identifiers come back as an empty object.
    let raw = envelope
        .metadata
        .ok_or_else(|| ApiError::NotFound(identifier.to_string()))?;

    let identifier = raw.identifier.unwrap_or_else(|| identifier.to_string());
    let creator = raw.creator.map(OneOrMany::joined);
    let files = envelope
        .files
        .into_iter()
        .map(|f| ArchiveFile {
            id: None,
            identifier: identifier.clone(),
            title: f.title.filter(|t| !t.trim().is_empty()),
            artist: f
                .artist
                .or(f.creator)
                .map(OneOrMany::joined)
                .or_else(|| creator.clone()),
            format: f.format,
            track: f.track.as_deref().and_then(parse_track),
            size: f.size.as_deref().and_then(|s| s.trim().parse().ok()),
            length: f.length,
            local_path: None,
            name: f.name,
        })
        .collect();

    Ok(ArchiveDocument {
        metadata: ArchiveMetadata {
            icon_url: Some(ArchiveMetadata::icon_url_for(&identifier)),
            title: raw.title.and_then(OneOrMany::first),
            creator,
            publisher: raw.publisher.map(OneOrMany::joined),
            description: raw.description.map(OneOrMany::joined),
            added_at: None,
            identifier,
        },
        mediatype: raw
            .mediatype
            .as_deref()
            .and_then(MediaType::from_archive_mediatype),
        files,
    })
}

/// Track numbers look like "3", "03" or "3/12".
fn parse_track(raw: &str) -> Option<u32> {
    raw.split('/').next()?.trim().parse().ok()
}
