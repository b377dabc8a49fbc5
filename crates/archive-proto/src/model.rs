//! Records shared by the store, the player core and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Canonical host used to resolve download URLs.
pub const ARCHIVE_BASE_URL: &str = "https://archive.org";

/// Kind of media a search or filter is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

impl MediaType {
    /// Value of the archive's `mediatype` field.
    pub fn archive_mediatype(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "movies",
        }
    }

    pub fn from_archive_mediatype(value: &str) -> Option<Self> {
        match value {
            "audio" | "etree" => Some(Self::Audio),
            "movies" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// One remote or downloaded media file inside an archive item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchiveFile {
    /// Store row id.  `None` until the record has been persisted.
    #[serde(default)]
    pub id: Option<i64>,
    pub identifier: String,
    /// Path of the file inside the item, e.g. `disc1/01 Intro.mp3`.
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub track: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Duration exactly as the archive reports it ("245.31" or "4:05").
    #[serde(default)]
    pub length: Option<String>,
    /// Set once the file has been downloaded.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl ArchiveFile {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Resolved download URL on the public archive host.  Used as the
    /// identity of a file for playlist de-duplication.
    pub fn remote_url(&self) -> String {
        self.remote_url_on(ARCHIVE_BASE_URL)
    }

    /// Download URL on an arbitrary archive host.  Every path segment of the
    /// file name is percent-encoded.
    pub fn remote_url_on(&self, base_url: &str) -> String {
        match url::Url::parse(base_url) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments
                        .pop_if_empty()
                        .push("download")
                        .push(&self.identifier)
                        .extend(self.name.split('/'));
                }
                url.to_string()
            }
            Err(_) => format!(
                "{}/download/{}/{}",
                base_url.trim_end_matches('/'),
                self.identifier,
                self.name
            ),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// What the player should open: the local copy when there is one.
    pub fn playback_url(&self) -> String {
        match &self.local_path {
            Some(path) => path.display().to_string(),
            None => self.remote_url(),
        }
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => self.name.rsplit('/').next().unwrap_or(&self.name),
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.length.as_deref().and_then(parse_length)
    }
}

/// Parse an archive `length` field: plain seconds or `[hh:]mm:ss`.
pub fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if !raw.contains(':') {
        return raw.parse::<f64>().ok().filter(|v| *v >= 0.0);
    }
    let mut total = 0.0;
    for part in raw.split(':') {
        let v: f64 = part.trim().parse().ok()?;
        total = total * 60.0 + v;
    }
    Some(total)
}

/// Format seconds the way the player's on-screen feedback shows them.
pub fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// A named, ordered list of files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    /// System lists (main queue, favorites) cannot be renamed or deleted.
    pub permanent: bool,
}

/// A bookmarked catalog entry, independent of any particular file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

impl ArchiveMetadata {
    pub fn icon_url_for(identifier: &str) -> String {
        format!("{}/services/img/{}", ARCHIVE_BASE_URL, identifier)
    }
}

/// A previously played file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub file: ArchiveFile,
    pub last_played: DateTime<Utc>,
    pub play_count: u32,
}

/// Shortcut to a remote collection used to scope searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub media_type: MediaType,
    #[serde(default)]
    pub user_defined: bool,
}

/// One hit from a catalog search.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchDoc {
    pub identifier: String,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub mediatype: Option<String>,
    pub collections: Vec<String>,
    pub downloads: Option<u64>,
}

impl SearchDoc {
    pub fn is_collection(&self) -> bool {
        self.mediatype.as_deref() == Some("collection")
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.identifier)
    }
}

/// A page of search hits plus the total the server reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub docs: Vec<SearchDoc>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_url_encodes_segments() {
        let file = ArchiveFile::new("gd1977-05-08", "disc 1/01 Minglewood Blues.mp3");
        assert_eq!(
            file.remote_url(),
            "https://archive.org/download/gd1977-05-08/disc%201/01%20Minglewood%20Blues.mp3"
        );
    }

    #[test]
    fn test_remote_url_on_custom_base() {
        let file = ArchiveFile::new("item", "a.mp3");
        assert_eq!(
            file.remote_url_on("http://127.0.0.1:9000/"),
            "http://127.0.0.1:9000/download/item/a.mp3"
        );
    }

    #[test]
    fn test_playback_url_prefers_local() {
        let mut file = ArchiveFile::new("item", "a.mp3");
        assert!(file.playback_url().starts_with("https://"));
        file.local_path = Some(PathBuf::from("/tmp/item/a.mp3"));
        assert_eq!(file.playback_url(), "/tmp/item/a.mp3");
        assert!(file.is_local());
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length("245.5"), Some(245.5));
        assert_eq!(parse_length("4:05"), Some(245.0));
        assert_eq!(parse_length("1:00:01"), Some(3601.0));
        assert_eq!(parse_length(""), None);
        assert_eq!(parse_length("abc"), None);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(65.0), "1:05");
        assert_eq!(format_clock(3725.0), "1:02:05");
        assert_eq!(format_clock(-3.0), "0:00");
    }

    #[test]
    fn test_display_title_falls_back_to_file_name() {
        let mut file = ArchiveFile::new("item", "set2/07 Encore.flac");
        assert_eq!(file.display_title(), "07 Encore.flac");
        file.title = Some("Encore".into());
        assert_eq!(file.display_title(), "Encore");
    }

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(MediaType::Video.archive_mediatype(), "movies");
        assert_eq!(MediaType::from_archive_mediatype("audio"), Some(MediaType::Audio));
        assert_eq!(MediaType::from_archive_mediatype("texts"), None);
    }
}
