use crate::api::{ApiError, ArchiveDocument, ArchiveService};
use crate::store::{SharedStore, StoreError};
use archive_proto::model::{ArchiveFile, ArchiveMetadata, MediaType};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const AUDIO_FORMATS: &[&str] = &[
    "VBR MP3",
    "MP3",
    "128Kbps MP3",
    "64Kbps MP3",
    "Ogg Vorbis",
    "Flac",
    "24bit Flac",
    "Apple Lossless Audio",
    "AIFF",
    "WAVE",
];

const VIDEO_FORMATS: &[&str] = &[
    "MPEG4",
    "h.264",
    "h.264 IA",
    "512Kb MPEG4",
    "Ogg Video",
    "Matroska",
];

/// One archive item: its metadata, playable files and bookmark state.
pub struct DetailModel {
    service: Arc<dyn ArchiveService>,
    store: SharedStore,
    document: Option<ArchiveDocument>,
    files: Vec<ArchiveFile>,
    favorite: bool,
    alert: Option<String>,
}

impl DetailModel {
    pub fn new(service: Arc<dyn ArchiveService>, store: SharedStore) -> Self {
        Self {
            service,
            store,
            document: None,
            files: Vec::new(),
            favorite: false,
            alert: None,
        }
    }

    pub async fn load(&mut self, identifier: &str) -> Result<(), ApiError> {
        let document = self.service.metadata(identifier.trim()).await?;
        self.files = playable_files(&document.files, document.mediatype);
        self.favorite = self
            .store
            .lock()
            .await
            .is_favorite_archive(&document.metadata.identifier)
            .unwrap_or(false);
        info!(
            "Loaded {} ({} playable files)",
            document.metadata.identifier,
            self.files.len()
        );
        self.document = Some(document);
        Ok(())
    }

    pub fn metadata(&self) -> Option<&ArchiveMetadata> {
        self.document.as_ref().map(|d| &d.metadata)
    }

    pub fn files(&self) -> &[ArchiveFile] {
        &self.files
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite
    }

    /// Message for the user left by the last action, if any.
    pub fn take_alert(&mut self) -> Option<String> {
        self.alert.take()
    }

    /// Add one file to a playlist.  A duplicate is not an error: it leaves an
    /// alert and returns `None`.
    pub async fn add_to_playlist(
        &mut self,
        playlist_id: i64,
        file: &ArchiveFile,
    ) -> Result<Option<ArchiveFile>, StoreError> {
        let result = self.store.lock().await.add_file(playlist_id, file);
        match result {
            Ok(stored) => Ok(Some(stored)),
            Err(e) if e.is_duplicate() => {
                self.alert = Some(e.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Add every playable file in order; returns how many were new.
    pub async fn add_all_to_playlist(&mut self, playlist_id: i64) -> Result<usize, StoreError> {
        let mut added = 0;
        let mut skipped = 0;
        for file in self.files.clone() {
            match self.add_to_playlist(playlist_id, &file).await? {
                Some(_) => added += 1,
                None => skipped += 1,
            }
        }
        if skipped > 1 {
            self.alert = Some(format!("{} files were already in the playlist", skipped));
        }
        Ok(added)
    }

    /// Bookmark or un-bookmark the loaded archive.  Returns the new state.
    pub async fn toggle_favorite(&mut self) -> Result<bool, StoreError> {
        let Some(document) = self.document.as_ref() else {
            return Ok(self.favorite);
        };
        let store = self.store.lock().await;
        let identifier = &document.metadata.identifier;

        self.favorite = if store.is_favorite_archive(identifier)? {
            store.remove_favorite_archive(identifier)?;
            false
        } else {
            store.add_favorite_archive(&ArchiveMetadata {
                added_at: Some(Utc::now()),
                ..document.metadata.clone()
            })?;
            true
        };
        Ok(self.favorite)
    }
}

/// Files worth offering for playback, by track number and then name.  An
/// item of unknown media type accepts both allow-lists.
pub fn playable_files(files: &[ArchiveFile], media_type: Option<MediaType>) -> Vec<ArchiveFile> {
    let allowed = |format: &str| match media_type {
        Some(MediaType::Audio) => AUDIO_FORMATS.contains(&format),
        Some(MediaType::Video) => VIDEO_FORMATS.contains(&format),
        None => AUDIO_FORMATS.contains(&format) || VIDEO_FORMATS.contains(&format),
    };

    let mut playable: Vec<ArchiveFile> = files
        .iter()
        .filter(|f| f.format.as_deref().is_some_and(|format| allowed(format)))
        .cloned()
        .collect();
    playable.sort_by(|a, b| {
        a.track
            .unwrap_or(u32::MAX)
            .cmp(&b.track.unwrap_or(u32::MAX))
            .then_with(|| a.name.cmp(&b.name))
    });
    playable
}
