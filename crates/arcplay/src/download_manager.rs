//! Download manager for archive files
//!
//! Single-file HTTP downloads into `<documents>/<identifier>/`, with
//! percentage progress.  A finished download flips the file record from its
//! remote URL to the local path; removing it flips it back.

use crate::store::{SharedStore, StoreError};
use archive_proto::model::ArchiveFile;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("\"{0}\" is already downloaded")]
    AlreadyDownloaded(String),
    #[error("download failed: {0}")]
    TransferFailed(String),
    #[error("\"{0}\" has not been downloaded")]
    NotDownloaded(String),
    #[error("could not create download folder {path:?}: {reason}")]
    DirectoryCreation { path: PathBuf, reason: String },
    #[error("downloaded file is missing: {0:?}")]
    MissingLocalFile(PathBuf),
    #[error("file has not been added to the library")]
    NotInLibrary,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Download status for a file
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    /// Not downloaded
    NotDownloaded,
    /// Currently downloading with progress (0.0 - 100.0)
    Downloading(f32),
    /// Downloaded and available at path
    Downloaded(PathBuf),
    /// Download failed with error message
    Failed(String),
}

/// Progress update from a download task
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub file_id: i64,
    pub status: DownloadStatus,
}

/// The part of the manager a spawned download task needs.
#[derive(Clone)]
struct Downloader {
    http: reqwest::Client,
    store: SharedStore,
    documents_dir: PathBuf,
    base_url: String,
}

/// Download manager handles archive file downloads
pub struct DownloadManager {
    inner: Downloader,
    statuses: HashMap<i64, DownloadStatus>,
    progress_tx: mpsc::Sender<DownloadProgress>,
    progress_rx: mpsc::Receiver<DownloadProgress>,
}

impl DownloadManager {
    pub fn new(documents_dir: PathBuf, base_url: &str, store: SharedStore) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(100);
        Self {
            inner: Downloader {
                http: reqwest::Client::new(),
                store,
                documents_dir,
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            statuses: HashMap::new(),
            progress_tx,
            progress_rx,
        }
    }

    /// Where a file lands on disk once downloaded.
    pub fn local_path_for(&self, file: &ArchiveFile) -> PathBuf {
        self.inner.local_path_for(file)
    }

    /// Download a file and wait for it.  `on_progress` receives 0–100.
    pub async fn download<F>(&self, file: &ArchiveFile, on_progress: F) -> Result<ArchiveFile, DownloadError>
    where
        F: FnMut(f32) + Send,
    {
        self.inner.download(file, on_progress).await
    }

    /// Start downloading in the background.  Progress shows up through
    /// `update_statuses` / `get_status`.
    pub async fn start_download(&mut self, file: &ArchiveFile) -> Result<(), DownloadError> {
        let file = self.inner.refresh(file).await?;
        let file_id = file.id.ok_or(DownloadError::NotInLibrary)?;

        match self.statuses.get(&file_id) {
            Some(DownloadStatus::Downloading(_)) => {
                return Err(DownloadError::TransferFailed(
                    "already downloading".to_string(),
                ));
            }
            _ if file.is_local() => {
                return Err(DownloadError::AlreadyDownloaded(
                    file.display_title().to_string(),
                ));
            }
            _ => {}
        }

        info!("Starting download of {}", file.remote_url());
        self.statuses
            .insert(file_id, DownloadStatus::Downloading(0.0));

        let inner = self.inner.clone();
        let progress_tx = self.progress_tx.clone();

        tokio::spawn(async move {
            let tick_tx = progress_tx.clone();
            let mut last_sent = -1.0f32;
            let result = inner
                .download(&file, |pct| {
                    // Whole-percent steps are enough for a status display.
                    if pct.floor() > last_sent {
                        last_sent = pct.floor();
                        let _ = tick_tx.try_send(DownloadProgress {
                            file_id,
                            status: DownloadStatus::Downloading(pct),
                        });
                    }
                })
                .await;

            let status = match result {
                Ok(updated) => {
                    let path = updated.local_path.unwrap_or_default();
                    info!("Download complete: {:?}", path);
                    DownloadStatus::Downloaded(path)
                }
                Err(e) => {
                    error!("Download failed: {}", e);
                    DownloadStatus::Failed(e.to_string())
                }
            };

            let _ = progress_tx.send(DownloadProgress { file_id, status }).await;
        });

        Ok(())
    }

    /// Process pending progress updates
    pub fn update_statuses(&mut self) {
        while let Ok(progress) = self.progress_rx.try_recv() {
            self.statuses.insert(progress.file_id, progress.status);
        }
    }

    /// Get status for a file
    pub fn get_status(&self, file: &ArchiveFile) -> DownloadStatus {
        if let Some(status) = file.id.and_then(|id| self.statuses.get(&id)) {
            return status.clone();
        }
        match &file.local_path {
            Some(path) => DownloadStatus::Downloaded(path.clone()),
            None => DownloadStatus::NotDownloaded,
        }
    }

    /// Point the record at a finished download, copying it into the
    /// documents folder first when it lives elsewhere.  Refuses when the file
    /// is not actually on disk.
    pub async fn complete_download(
        &self,
        file_id: i64,
        path: &Path,
    ) -> Result<ArchiveFile, DownloadError> {
        self.inner.complete_download(file_id, path).await
    }

    /// Delete the local copy and revert the record to its remote URL.
    pub async fn remove_download(&mut self, file: &ArchiveFile) -> Result<ArchiveFile, DownloadError> {
        let file = self.inner.refresh(file).await?;
        let file_id = file.id.ok_or(DownloadError::NotInLibrary)?;
        let path = file
            .local_path
            .clone()
            .ok_or_else(|| DownloadError::NotDownloaded(file.display_title().to_string()))?;

        self.statuses.remove(&file_id);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            // Keep the record usable even though the copy vanished.
            self.inner.store.lock().await.clear_local_path(file_id)?;
            return Err(DownloadError::MissingLocalFile(path));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| DownloadError::TransferFailed(e.to_string()))?;
        remove_dir_if_empty(path.parent()).await;

        let reverted = self.inner.store.lock().await.clear_local_path(file_id)?;
        info!("Removed download {:?}", path);
        Ok(reverted)
    }
}

impl Downloader {
    fn local_path_for(&self, file: &ArchiveFile) -> PathBuf {
        self.documents_dir
            .join(sanitize_component(&file.identifier))
            .join(sanitize_component(&file.name))
    }

    /// Re-read the record so decisions use the stored download state.
    async fn refresh(&self, file: &ArchiveFile) -> Result<ArchiveFile, DownloadError> {
        let file_id = file.id.ok_or(DownloadError::NotInLibrary)?;
        Ok(self.store.lock().await.file(file_id)?)
    }

    async fn download<F>(&self, file: &ArchiveFile, mut on_progress: F) -> Result<ArchiveFile, DownloadError>
    where
        F: FnMut(f32) + Send,
    {
        let file = self.refresh(file).await?;
        let file_id = file.id.ok_or(DownloadError::NotInLibrary)?;
        if file.is_local() {
            return Err(DownloadError::AlreadyDownloaded(
                file.display_title().to_string(),
            ));
        }

        let dest = self.local_path_for(&file);
        let dir = dest.parent().unwrap_or(&self.documents_dir).to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::DirectoryCreation {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let url = file.remote_url_on(&self.base_url);
        info!("Downloading {} to {:?}", url, dest);
        on_progress(0.0);

        let mut partial = dest.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        if let Err(e) = self.transfer(&url, &partial, file.size, &mut on_progress).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| DownloadError::TransferFailed(e.to_string()))?;
        on_progress(100.0);

        self.complete_download(file_id, &dest).await
    }

    async fn transfer<F>(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
        on_progress: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(f32) + Send,
    {
        let response = self.http.get(url).send().await.map_err(transfer_failed)?;
        if !response.status().is_success() {
            return Err(DownloadError::TransferFailed(format!(
                "server returned status {}",
                response.status()
            )));
        }

        let total = response
            .content_length()
            .filter(|n| *n > 0)
            .or(expected_size);
        let mut out = tokio::fs::File::create(dest).await.map_err(transfer_failed)?;
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transfer_failed)?;
            out.write_all(&chunk).await.map_err(transfer_failed)?;
            received += chunk.len() as u64;
            if let Some(total) = total {
                on_progress(((received as f64 / total as f64) * 100.0).min(100.0) as f32);
            }
        }
        out.flush().await.map_err(transfer_failed)?;
        Ok(())
    }

    /// Records only ever point inside the documents folder.  A copy found
    /// elsewhere is duplicated into place and the original is left alone.
    async fn complete_download(&self, file_id: i64, path: &Path) -> Result<ArchiveFile, DownloadError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DownloadError::MissingLocalFile(path.to_path_buf()));
        }
        let file = self.store.lock().await.file(file_id)?;
        let dest = self.local_path_for(&file);

        if path != dest {
            let dir = dest.parent().unwrap_or(&self.documents_dir).to_path_buf();
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DownloadError::DirectoryCreation {
                    path: dir.clone(),
                    reason: e.to_string(),
                })?;
            tokio::fs::copy(path, &dest).await.map_err(transfer_failed)?;
            info!("Copied {:?} to {:?}", path, dest);
        }
        Ok(self.store.lock().await.set_local_path(file_id, &dest)?)
    }
}

/// Make an identifier or in-item path safe to use as one path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

fn transfer_failed(e: impl std::fmt::Display) -> DownloadError {
    DownloadError::TransferFailed(e.to_string())
}

/// Delete on-disk copies of records the store already dropped.
pub async fn delete_local_copies(files: &[ArchiveFile]) {
    for path in files.iter().filter_map(|f| f.local_path.as_ref()) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("Deleted orphaned download {:?}", path);
                remove_dir_if_empty(path.parent()).await;
            }
            Err(e) => warn!("Failed to delete orphaned download {:?}: {}", path, e),
        }
    }
}

async fn remove_dir_if_empty(dir: Option<&Path>) {
    if let Some(dir) = dir {
        // Fails harmlessly while other downloads of the item remain.
        let _ = tokio::fs::remove_dir(dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use axum::{http::StatusCode, routing::get, Router};

    const BODY: &[u8] = b"ID3 fake audio payload for download tests";

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/download/item/a.mp3", get(|| async { BODY.to_vec() }))
            .route("/download/item/b.mp3", get(|| async { BODY.to_vec() }))
            .route(
                "/download/item/gone.mp3",
                get(|| async { StatusCode::NOT_FOUND }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn setup(names: &[&str]) -> (tempfile::TempDir, DownloadManager, Vec<ArchiveFile>) {
        let base_url = spawn_server().await;
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();
        let files = names
            .iter()
            .map(|n| store.add_file(main.id, &ArchiveFile::new("item", *n)).unwrap())
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let manager = DownloadManager::new(dir.path().join("docs"), &base_url, store.into_shared());
        (dir, manager, files)
    }

    #[tokio::test]
    async fn test_download_flips_record_to_local() {
        let (_dir, manager, files) = setup(&["a.mp3"]).await;
        let mut seen = Vec::new();

        let updated = manager.download(&files[0], |p| seen.push(p)).await.unwrap();

        let path = updated.local_path.clone().unwrap();
        assert_eq!(path, manager.inner.documents_dir.join("item").join("a.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), BODY);
        assert_eq!(updated.playback_url(), path.display().to_string());
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));

        let again = manager.download(&files[0], |_| {}).await;
        assert!(matches!(again, Err(DownloadError::AlreadyDownloaded(_))));
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_record_remote() {
        let (_dir, manager, files) = setup(&["gone.mp3"]).await;

        let err = manager.download(&files[0], |_| {}).await.unwrap_err();
        assert!(matches!(err, DownloadError::TransferFailed(_)));

        let record = manager.inner.refresh(&files[0]).await.unwrap();
        assert!(!record.is_local());
        let item_dir = manager.inner.documents_dir.join("item");
        assert_eq!(std::fs::read_dir(item_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_complete_requires_file_on_disk() {
        let (dir, manager, files) = setup(&["a.mp3"]).await;
        let id = files[0].id.unwrap();

        let missing = dir.path().join("nowhere.mp3");
        let err = manager.complete_download(id, &missing).await.unwrap_err();
        assert!(matches!(err, DownloadError::MissingLocalFile(_)));
        assert!(!manager.inner.refresh(&files[0]).await.unwrap().is_local());

        let present = dir.path().join("present.mp3");
        std::fs::write(&present, BODY).unwrap();
        let updated = manager.complete_download(id, &present).await.unwrap();
        let managed = manager.inner.documents_dir.join("item").join("a.mp3");
        assert_eq!(updated.local_path, Some(managed.clone()));
        assert_eq!(std::fs::read(&managed).unwrap(), BODY);
        assert!(present.exists());
    }

    #[tokio::test]
    async fn test_adopted_file_outside_documents_survives_removal() {
        let (dir, mut manager, files) = setup(&["a.mp3"]).await;
        let music = dir.path().join("MyMusic");
        std::fs::create_dir_all(&music).unwrap();
        let precious = music.join("precious.flac");
        std::fs::write(&precious, BODY).unwrap();

        let adopted = manager
            .complete_download(files[0].id.unwrap(), &precious)
            .await
            .unwrap();
        let managed = adopted.local_path.clone().unwrap();
        assert!(managed.starts_with(&manager.inner.documents_dir));

        manager.remove_download(&adopted).await.unwrap();
        assert!(!managed.exists());
        assert!(precious.exists());
        assert!(music.exists());

        let adopted = manager
            .complete_download(files[0].id.unwrap(), &precious)
            .await
            .unwrap();
        let main_id = manager.inner.store.lock().await.main_playlist().unwrap().id;
        let orphans = manager
            .inner
            .store
            .lock()
            .await
            .remove_file(main_id, adopted.id.unwrap())
            .unwrap();
        delete_local_copies(&orphans).await;
        assert!(precious.exists());
        assert!(music.exists());
    }

    #[tokio::test]
    async fn test_remove_download_restores_remote_url() {
        let (_dir, mut manager, files) = setup(&["a.mp3"]).await;

        let err = manager.remove_download(&files[0]).await.unwrap_err();
        assert!(matches!(err, DownloadError::NotDownloaded(_)));

        let local = manager.download(&files[0], |_| {}).await.unwrap();
        let path = local.local_path.clone().unwrap();

        let reverted = manager.remove_download(&local).await.unwrap();
        assert!(!reverted.is_local());
        assert_eq!(reverted.playback_url(), files[0].remote_url());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_download_with_vanished_file() {
        let (_dir, mut manager, files) = setup(&["a.mp3"]).await;
        let local = manager.download(&files[0], |_| {}).await.unwrap();
        std::fs::remove_file(local.local_path.as_ref().unwrap()).unwrap();

        let err = manager.remove_download(&local).await.unwrap_err();
        assert!(matches!(err, DownloadError::MissingLocalFile(_)));
        assert!(!manager.inner.refresh(&local).await.unwrap().is_local());
    }

    #[tokio::test]
    async fn test_directory_creation_failure() {
        let (dir, first, files) = setup(&["a.mp3"]).await;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let store = first.inner.store.clone();
        let manager = DownloadManager::new(blocker, "http://127.0.0.1:9", store);
        let err = manager.download(&files[0], |_| {}).await.unwrap_err();
        assert!(matches!(err, DownloadError::DirectoryCreation { .. }));
    }

    #[tokio::test]
    async fn test_background_download_reports_status() {
        let (_dir, mut manager, files) = setup(&["b.mp3"]).await;
        manager.start_download(&files[0]).await.unwrap();
        assert!(matches!(
            manager.get_status(&files[0]),
            DownloadStatus::Downloading(_)
        ));

        let mut status = DownloadStatus::NotDownloaded;
        for _ in 0..100 {
            manager.update_statuses();
            status = manager.get_status(&files[0]);
            if matches!(status, DownloadStatus::Downloaded(_) | DownloadStatus::Failed(_)) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(matches!(status, DownloadStatus::Downloaded(_)));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("disc 1/01: Intro?.mp3"), "disc 1_01_ Intro_.mp3");
        assert_eq!(sanitize_component("../etc"), "_etc");
        assert_eq!(sanitize_component(".."), "_");
    }

    #[tokio::test]
    async fn test_orphaned_downloads_are_deleted() {
        let (_dir, manager, files) = setup(&["a.mp3"]).await;
        let local = manager.download(&files[0], |_| {}).await.unwrap();
        let path = local.local_path.clone().unwrap();

        let main_id = manager.inner.store.lock().await.main_playlist().unwrap().id;
        let orphans = manager
            .inner
            .store
            .lock()
            .await
            .remove_file(main_id, local.id.unwrap())
            .unwrap();
        assert_eq!(orphans.len(), 1);

        delete_local_copies(&orphans).await;
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }
}
