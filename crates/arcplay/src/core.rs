/// PlayerCore: single-owner event loop for all playback state.
///
/// Everything that wants to change playback (CLI `serve`, HTTP handlers,
/// the mpv reader) sends a `PlayerEvent` into this loop.  PlayerCore owns the
/// media backend and is the only writer of the shared `PlayerState`; after
/// each change it broadcasts `BroadcastMessage::StateUpdated`.
///
/// Playback follows the active playlist: `next`/`prev` and end-of-file walk
/// the playlist order and stop at either end.
use std::sync::Arc;

use archive_proto::deeplink::{parse_link, LinkError};
use archive_proto::model::format_clock;
use archive_proto::protocol::{Command, PlaybackStatus};
use archive_proto::state::StateManager;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::download_manager::delete_local_copies;
use crate::reachability::Reachability;
use crate::store::{SharedStore, StoreError};

// ── events ────────────────────────────────────────────────────────────────────

/// Why the backend finished a file.
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    Eof,
    /// Replaced or stopped on request.
    Stopped,
    Error(String),
}

/// What the media backend reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    CoreIdle(bool),
    Paused(bool),
    TimePos(Option<f64>),
    Duration(Option<f64>),
    FileLoaded,
    EndFile(EndReason),
}

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum PlayerEvent {
    Command(Command),
    Backend(BackendEvent),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// User-visible failure, e.g. trying to stream while offline.
    Alert(String),
    /// Transient on-screen text such as "+15s".
    Feedback(String),
    Log(String),
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("no network connection: \"{0}\" has to be downloaded to play offline")]
    Offline(String),
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("no entry at position {0}")]
    OutOfRange(usize),
    #[error("player failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("could not save player state: {0}")]
    State(String),
}

impl From<anyhow::Error> for PlayError {
    fn from(e: anyhow::Error) -> Self {
        PlayError::State(e.to_string())
    }
}

/// The one media player the core drives.
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    /// Start `url` at `volume` (0.0 - 1.0), unpaused.
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()>;
    /// Pause, stop observing and release the current media.
    async fn teardown(&mut self) -> anyhow::Result<()>;
    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()>;
    async fn seek_to(&mut self, secs: f64) -> anyhow::Result<()>;
    async fn seek_relative(&mut self, secs: f64) -> anyhow::Result<()>;
    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()>;
    async fn shutdown(&mut self);
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<B: MediaBackend, R: Reachability> {
    store: SharedStore,
    state_manager: Arc<StateManager>,
    backend: B,
    reachability: R,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    seek_step: f64,
    obs_core_idle: Option<bool>,
    obs_pause: bool,
    /// Set between a load and its `FileLoaded`; end-of-file events seen
    /// meanwhile belong to the file that was replaced.
    awaiting_load: bool,
    last_status: PlaybackStatus,
}

impl<B: MediaBackend, R: Reachability> PlayerCore<B, R> {
    pub fn new(
        store: SharedStore,
        state_manager: Arc<StateManager>,
        backend: B,
        reachability: R,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        seek_step: f64,
    ) -> Self {
        Self {
            store,
            state_manager,
            backend,
            reachability,
            broadcast_tx,
            seek_step,
            obs_core_idle: None,
            obs_pause: false,
            awaiting_load: false,
            last_status: PlaybackStatus::Idle,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` arrives or every sender is gone.  Command errors
    /// are logged and broadcast as alerts; they never end the loop.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        while let Some(event) = event_rx.recv().await {
            match event {
                PlayerEvent::Shutdown => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                PlayerEvent::Command(cmd) => {
                    debug!("PlayerCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        warn!("PlayerCore: command failed: {}", e);
                        self.alert(e.to_string()).await;
                    }
                }
                PlayerEvent::Backend(evt) => self.handle_backend_event(evt).await,
            }
        }

        info!("PlayerCore: shutting down backend");
        self.backend.shutdown().await;
        Ok(())
    }

    pub async fn handle_command(&mut self, cmd: Command) -> Result<(), PlayError> {
        match cmd {
            Command::PlayFile { file_id } => self.play_file(file_id).await?,
            Command::PlayPlaylist { playlist_id, index } => {
                self.play_in_playlist(playlist_id, index).await?
            }
            Command::TogglePause => self.toggle_pause().await?,
            Command::Pause => self.set_paused(true).await?,
            Command::Resume => self.set_paused(false).await?,
            Command::Stop => self.stop().await?,
            Command::Next => {
                self.next().await?;
            }
            Command::Prev => {
                self.prev().await?;
            }
            Command::SeekTo { seconds } => self.seek_to(seconds).await?,
            Command::SeekBy { seconds } => self.seek_by(seconds).await?,
            Command::Skip { forward } => {
                let step = if forward { self.seek_step } else { -self.seek_step };
                self.seek_by(step).await?
            }
            Command::Volume { value } => self.set_volume(value).await?,
            Command::ClearPlaylist => self.clear_active_playlist().await?,
            Command::MoveInPlaylist { from, to } => self.move_in_active_playlist(from, to).await?,
            Command::ToggleFavorite => {
                self.toggle_favorite_current().await?;
            }
            Command::OpenLink { url } => self.open_link(&url).await?,
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    // ── playback ──────────────────────────────────────────────────────────────

    /// Play a stored file inside the active playlist when it is a member,
    /// otherwise inside the main queue (appending it there if needed).
    pub async fn play_file(&mut self, file_id: i64) -> Result<(), PlayError> {
        let active = self.active_playlist_id().await?;
        let (playlist_id, index) = {
            let mut store = self.store.lock().await;
            match store.position_of(active, file_id)? {
                Some(index) => (active, index),
                None => {
                    let main = store.main_playlist()?;
                    match store.position_of(main.id, file_id)? {
                        Some(index) => (main.id, index),
                        None => {
                            let file = store.file(file_id)?;
                            store.add_file(main.id, &file)?;
                            (main.id, store.playlist_len(main.id)?.saturating_sub(1))
                        }
                    }
                }
            }
        };
        self.play_in_playlist(playlist_id, index).await
    }

    /// Make `playlist_id` active and play its `index`-th entry.
    pub async fn play_in_playlist(&mut self, playlist_id: i64, index: usize) -> Result<(), PlayError> {
        let file = {
            let store = self.store.lock().await;
            store
                .playlist_files(playlist_id)?
                .into_iter()
                .nth(index)
                .ok_or(PlayError::OutOfRange(index))?
        };

        if !file.is_local() && !self.reachability.is_online().await {
            return Err(PlayError::Offline(file.display_title().to_string()));
        }

        // At most one active player: release the previous file first.
        if let Err(e) = self.backend.teardown().await {
            warn!("PlayerCore: teardown failed: {}", e);
        }
        self.obs_core_idle = None;
        self.obs_pause = false;

        let url = file.playback_url();
        info!("Playing {} ({}[{}])", url, playlist_id, index);
        self.state_manager
            .set_loading(file.clone(), playlist_id, index)
            .await?;
        self.last_status = PlaybackStatus::Loading;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);

        let volume = self.state_manager.get_state().await.volume;
        if let Err(e) = self.backend.load(&url, volume).await {
            error!("Failed to load '{}': {}", url, e);
            self.awaiting_load = false;
            self.set_status(PlaybackStatus::Error).await;
            return Err(PlayError::Backend(e.to_string()));
        }
        self.awaiting_load = true;

        if let Err(e) = self.store.lock().await.record_play(&file) {
            warn!("Failed to record history for {}: {}", url, e);
        }
        Ok(())
    }

    /// Advance within the active playlist.  `false` at the last entry.
    pub async fn next(&mut self) -> Result<bool, PlayError> {
        let Some((playlist_id, position, len)) = self.current_position().await? else {
            return Ok(false);
        };
        if position + 1 >= len {
            debug!("PlayerCore: already at the last entry");
            return Ok(false);
        }
        self.play_in_playlist(playlist_id, position + 1).await?;
        Ok(true)
    }

    /// Step back within the active playlist.  `false` at the first entry.
    pub async fn prev(&mut self) -> Result<bool, PlayError> {
        let Some((playlist_id, position, _)) = self.current_position().await? else {
            return Ok(false);
        };
        if position == 0 {
            debug!("PlayerCore: already at the first entry");
            return Ok(false);
        }
        self.play_in_playlist(playlist_id, position - 1).await?;
        Ok(true)
    }

    pub async fn toggle_pause(&mut self) -> Result<(), PlayError> {
        // Locally observed pause state, no IPC round-trip.
        let paused = !self.obs_pause;
        self.set_paused(paused).await
    }

    pub async fn set_paused(&mut self, paused: bool) -> Result<(), PlayError> {
        if self.state_manager.get_state().await.current_file.is_none() {
            return Ok(());
        }
        self.backend
            .set_pause(paused)
            .await
            .map_err(|e| PlayError::Backend(e.to_string()))?;
        self.obs_pause = paused;
        self.update_status().await;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), PlayError> {
        info!("Stopping playback");
        if let Err(e) = self.backend.teardown().await {
            warn!("PlayerCore: teardown failed: {}", e);
        }
        self.obs_core_idle = None;
        self.obs_pause = false;
        self.last_status = PlaybackStatus::Idle;
        self.state_manager.set_stopped().await?;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    pub async fn seek_to(&mut self, seconds: f64) -> Result<(), PlayError> {
        let state = self.state_manager.get_state().await;
        if state.current_file.is_none() {
            return Err(PlayError::NothingPlaying);
        }
        let mut target = seconds.max(0.0);
        if let Some(duration) = state.duration_secs {
            target = target.min(duration);
        }
        self.backend
            .seek_to(target)
            .await
            .map_err(|e| PlayError::Backend(e.to_string()))?;
        self.state_manager
            .set_timeline(Some(target), state.duration_secs)
            .await;
        self.feedback(format_clock(target)).await;
        Ok(())
    }

    pub async fn seek_by(&mut self, delta: f64) -> Result<(), PlayError> {
        if self.state_manager.get_state().await.current_file.is_none() {
            return Err(PlayError::NothingPlaying);
        }
        self.backend
            .seek_relative(delta)
            .await
            .map_err(|e| PlayError::Backend(e.to_string()))?;
        self.feedback(format!("{:+}s", delta.round() as i64)).await;
        Ok(())
    }

    pub async fn set_volume(&mut self, value: f32) -> Result<(), PlayError> {
        let value = value.clamp(0.0, 1.0);
        self.state_manager.set_volume(value).await?;
        self.backend
            .set_volume(value)
            .await
            .map_err(|e| PlayError::Backend(e.to_string()))?;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    // ── active playlist ───────────────────────────────────────────────────────

    /// Empty the active playlist and stop playback.
    pub async fn clear_active_playlist(&mut self) -> Result<(), PlayError> {
        let playlist_id = self.active_playlist_id().await?;
        self.stop().await?;
        let orphans = self.store.lock().await.clear_playlist(playlist_id)?;
        delete_local_copies(&orphans).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    /// Reorder the active playlist; the current position follows its file.
    pub async fn move_in_active_playlist(&mut self, from: usize, to: usize) -> Result<(), PlayError> {
        let playlist_id = self.active_playlist_id().await?;
        let current = self.state_manager.get_state().await.current_file;

        let position = {
            let mut store = self.store.lock().await;
            store.move_file(playlist_id, from, to)?;
            match current.and_then(|f| f.id) {
                Some(file_id) => store.position_of(playlist_id, file_id)?,
                None => None,
            }
        };
        if position.is_some() {
            self.state_manager.set_position(position).await;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    /// Append the linked file to the main queue (reusing an existing entry),
    /// make the main queue active and play it.
    pub async fn open_link(&mut self, link: &str) -> Result<(), PlayError> {
        let file = parse_link(link)?;
        info!("Opening link for {}/{}", file.identifier, file.name);

        let (main_id, index) = {
            let mut store = self.store.lock().await;
            let main = store.main_playlist()?;
            let existing = match store.file_by_url(&file.remote_url())? {
                Some(stored) => match stored.id {
                    Some(id) => store.position_of(main.id, id)?,
                    None => None,
                },
                None => None,
            };
            let index = match existing {
                Some(index) => index,
                None => {
                    store.add_file(main.id, &file)?;
                    store.playlist_len(main.id)?.saturating_sub(1)
                }
            };
            (main.id, index)
        };
        self.play_in_playlist(main_id, index).await
    }

    /// Add the current file to Favorites, or take it out.  Returns whether it
    /// is a favorite afterwards.
    pub async fn toggle_favorite_current(&mut self) -> Result<bool, PlayError> {
        let file = self
            .state_manager
            .get_state()
            .await
            .current_file
            .ok_or(PlayError::NothingPlaying)?;
        let file_id = file.id.ok_or(PlayError::NothingPlaying)?;

        let (now_favorite, orphans) = {
            let mut store = self.store.lock().await;
            let favorites = store.favorites_playlist()?;
            if store.position_of(favorites.id, file_id)?.is_some() {
                (false, store.remove_file(favorites.id, file_id)?)
            } else {
                store.add_file(favorites.id, &file)?;
                (true, Vec::new())
            }
        };
        delete_local_copies(&orphans).await;

        let text = if now_favorite {
            "Added to Favorites"
        } else {
            "Removed from Favorites"
        };
        self.feedback(text.to_string()).await;
        Ok(now_favorite)
    }

    // ── backend events ────────────────────────────────────────────────────────

    pub async fn handle_backend_event(&mut self, evt: BackendEvent) {
        match evt {
            BackendEvent::CoreIdle(idle) => {
                if Some(idle) != self.obs_core_idle {
                    self.obs_core_idle = Some(idle);
                    self.update_status().await;
                }
            }
            BackendEvent::Paused(paused) => {
                if paused != self.obs_pause {
                    self.obs_pause = paused;
                    self.update_status().await;
                }
            }
            BackendEvent::TimePos(pos) => {
                self.state_manager.set_timeline(pos, None).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            BackendEvent::Duration(duration) => {
                let pos = self.state_manager.get_state().await.time_pos_secs;
                self.state_manager.set_timeline(pos, duration).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            BackendEvent::FileLoaded => {
                debug!("PlayerCore: file loaded");
                self.awaiting_load = false;
            }
            BackendEvent::EndFile(EndReason::Stopped) => {}
            BackendEvent::EndFile(EndReason::Eof) if self.awaiting_load => {
                debug!("PlayerCore: ignoring end of file from the replaced file");
            }
            BackendEvent::EndFile(EndReason::Eof) => {
                info!("PlayerCore: end of file, advancing");
                match self.next().await {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Err(e) = self.stop().await {
                            warn!("PlayerCore: stop after last entry failed: {}", e);
                        }
                    }
                    Err(e) => {
                        warn!("PlayerCore: auto-advance failed: {}", e);
                        self.alert(e.to_string()).await;
                    }
                }
            }
            BackendEvent::EndFile(EndReason::Error(reason)) => {
                warn!("PlayerCore: playback error: {}", reason);
                self.set_status(PlaybackStatus::Error).await;
                self.alert(format!("Playback failed: {}", reason)).await;
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// The active playlist, falling back to the main queue when none is set
    /// or the stored one no longer exists.
    async fn active_playlist_id(&self) -> Result<i64, PlayError> {
        let active = self.state_manager.get_state().await.active_playlist;
        let store = self.store.lock().await;
        if let Some(id) = active {
            if store.playlist(id).is_ok() {
                return Ok(id);
            }
        }
        Ok(store.main_playlist()?.id)
    }

    /// (playlist, position, length) of the current file.
    async fn current_position(&self) -> Result<Option<(i64, usize, usize)>, PlayError> {
        let state = self.state_manager.get_state().await;
        let (Some(playlist_id), Some(file_id)) = (
            state.active_playlist,
            state.current_file.as_ref().and_then(|f| f.id),
        ) else {
            return Ok(None);
        };
        let store = self.store.lock().await;
        let Some(position) = store.position_of(playlist_id, file_id)? else {
            return Ok(None);
        };
        Ok(Some((playlist_id, position, store.playlist_len(playlist_id)?)))
    }

    /// Derive the status from observed backend state.
    async fn update_status(&mut self) {
        let has_file = self.state_manager.get_state().await.current_file.is_some();
        let status = if !has_file {
            PlaybackStatus::Idle
        } else if self.obs_pause {
            PlaybackStatus::Paused
        } else if self.obs_core_idle == Some(false) {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Loading
        };
        self.set_status(status).await;
    }

    async fn set_status(&mut self, status: PlaybackStatus) {
        if status != self.last_status {
            info!("PlayerCore: status {:?} → {:?}", self.last_status, status);
            self.last_status = status.clone();
            self.state_manager.set_playback_status(status).await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn feedback(&self, text: String) {
        self.state_manager.set_feedback(Some(text.clone())).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::Feedback(text));
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn alert(&self, text: String) {
        self.state_manager.set_alert(Some(text.clone())).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::Alert(text));
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Store;
    use archive_proto::deeplink::to_link;
    use archive_proto::model::ArchiveFile;
    use std::sync::Mutex;

    /// Records every backend call as a short string.
    #[derive(Clone, Default)]
    pub struct RecordingBackend {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingBackend {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl MediaBackend for RecordingBackend {
        async fn load(&mut self, url: &str, _volume: f32) -> anyhow::Result<()> {
            self.record(format!("load {}", url));
            Ok(())
        }
        async fn teardown(&mut self) -> anyhow::Result<()> {
            self.record("teardown".into());
            Ok(())
        }
        async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
            self.record(format!("pause {}", paused));
            Ok(())
        }
        async fn seek_to(&mut self, secs: f64) -> anyhow::Result<()> {
            self.record(format!("seek_to {}", secs));
            Ok(())
        }
        async fn seek_relative(&mut self, secs: f64) -> anyhow::Result<()> {
            self.record(format!("seek_by {}", secs));
            Ok(())
        }
        async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()> {
            self.record(format!("volume {}", volume));
            Ok(())
        }
        async fn shutdown(&mut self) {
            self.record("shutdown".into());
        }
    }

    pub struct FixedReachability(pub bool);

    #[async_trait]
    impl Reachability for FixedReachability {
        async fn is_online(&self) -> bool {
            self.0
        }
    }

    pub struct Fixture {
        pub core: PlayerCore<RecordingBackend, FixedReachability>,
        pub backend: RecordingBackend,
        pub store: SharedStore,
        pub main_id: i64,
        pub files: Vec<ArchiveFile>,
        pub broadcast_rx: broadcast::Receiver<BroadcastMessage>,
        pub dir: tempfile::TempDir,
    }

    pub fn fixture(online: bool, tracks: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_in_memory().unwrap();
        let main_id = store.main_playlist().unwrap().id;
        let files = (1..=tracks)
            .map(|n| {
                let mut file = ArchiveFile::new("gd77", format!("t{:02}.mp3", n));
                file.length = Some("5:00".into());
                store.add_file(main_id, &file).unwrap()
            })
            .collect();
        let store = store.into_shared();

        let backend = RecordingBackend::default();
        let state_manager = Arc::new(StateManager::new(dir.path().join("state.json")));
        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        let core = PlayerCore::new(
            store.clone(),
            state_manager,
            backend.clone(),
            FixedReachability(online),
            broadcast_tx,
            15.0,
        );
        Fixture {
            core,
            backend,
            store,
            main_id,
            files,
            broadcast_rx,
            dir,
        }
    }

    #[tokio::test]
    async fn test_previous_file_torn_down_before_next_load() {
        let mut f = fixture(true, 2);
        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        f.core.play_in_playlist(f.main_id, 1).await.unwrap();

        assert_eq!(
            f.backend.calls(),
            vec![
                "teardown".to_string(),
                format!("load {}", f.files[0].remote_url()),
                "teardown".to_string(),
                format!("load {}", f.files[1].remote_url()),
            ]
        );
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.position, Some(1));
        assert_eq!(state.status, PlaybackStatus::Loading);
        assert_eq!(state.now_playing.unwrap().title, "t02.mp3");
        assert_eq!(f.store.lock().await.history(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_remote_play_is_refused() {
        let mut f = fixture(false, 1);
        let err = f.core.play_in_playlist(f.main_id, 0).await.unwrap_err();
        assert!(matches!(err, PlayError::Offline(_)));
        assert!(f.backend.calls().is_empty());
        assert!(f.store.lock().await.history(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_local_play_is_allowed() {
        let mut f = fixture(false, 1);
        let path = f.dir.path().join("t01.mp3");
        std::fs::write(&path, b"x").unwrap();
        let id = f.files[0].id.unwrap();
        f.store.lock().await.set_local_path(id, &path).unwrap();

        f.core.play_file(id).await.unwrap();
        assert_eq!(f.backend.calls()[1], format!("load {}", path.display()));
    }

    #[tokio::test]
    async fn test_next_and_prev_stop_at_the_ends() {
        let mut f = fixture(true, 2);
        assert!(!f.core.next().await.unwrap());

        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        assert!(!f.core.prev().await.unwrap());
        assert!(f.core.next().await.unwrap());
        assert!(!f.core.next().await.unwrap());
        assert_eq!(f.core.state_manager().get_state().await.position, Some(1));
    }

    #[tokio::test]
    async fn test_end_of_file_advances_then_stops() {
        let mut f = fixture(true, 2);
        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        f.core.handle_backend_event(BackendEvent::FileLoaded).await;

        f.core
            .handle_backend_event(BackendEvent::EndFile(EndReason::Eof))
            .await;
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.current_file.unwrap().name, "t02.mp3");

        f.core.handle_backend_event(BackendEvent::FileLoaded).await;
        f.core
            .handle_backend_event(BackendEvent::EndFile(EndReason::Eof))
            .await;
        let state = f.core.state_manager().get_state().await;
        assert!(state.current_file.is_none());
        assert_eq!(state.status, PlaybackStatus::Idle);
        assert_eq!(state.active_playlist, Some(f.main_id));
    }

    #[tokio::test]
    async fn test_end_of_replaced_file_does_not_skip() {
        let mut f = fixture(true, 3);
        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        f.core.handle_backend_event(BackendEvent::FileLoaded).await;

        // Track 1 ends while the user's `next` is already loading track 2.
        assert!(f.core.next().await.unwrap());
        f.core
            .handle_backend_event(BackendEvent::EndFile(EndReason::Eof))
            .await;
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.current_file.unwrap().name, "t02.mp3");
        assert_eq!(state.position, Some(1));

        f.core.handle_backend_event(BackendEvent::FileLoaded).await;
        f.core
            .handle_backend_event(BackendEvent::EndFile(EndReason::Eof))
            .await;
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.current_file.unwrap().name, "t03.mp3");
    }

    #[tokio::test]
    async fn test_status_follows_backend_events() {
        let mut f = fixture(true, 1);
        f.core.play_in_playlist(f.main_id, 0).await.unwrap();

        f.core.handle_backend_event(BackendEvent::CoreIdle(false)).await;
        assert!(f.core.state_manager().get_state().await.is_playing());

        f.core.toggle_pause().await.unwrap();
        let state = f.core.state_manager().get_state().await;
        assert!(state.is_paused());
        assert_eq!(state.now_playing.unwrap().rate, 0.0);

        f.core
            .handle_backend_event(BackendEvent::EndFile(EndReason::Error("codec".into())))
            .await;
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.status, PlaybackStatus::Error);
        assert!(state.alert.unwrap().contains("codec"));
    }

    #[tokio::test]
    async fn test_seek_feedback_text() {
        let mut f = fixture(true, 1);
        assert!(matches!(f.core.seek_by(15.0).await, Err(PlayError::NothingPlaying)));

        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        f.core.handle_command(Command::Skip { forward: true }).await.unwrap();
        assert_eq!(
            f.core.state_manager().get_state().await.feedback.as_deref(),
            Some("+15s")
        );
        f.core.handle_command(Command::Skip { forward: false }).await.unwrap();
        assert_eq!(
            f.core.state_manager().get_state().await.feedback.as_deref(),
            Some("-15s")
        );
        f.core.seek_to(65.0).await.unwrap();
        assert_eq!(
            f.core.state_manager().get_state().await.feedback.as_deref(),
            Some("1:05")
        );
        // Clamped to the known duration.
        f.core.seek_to(9999.0).await.unwrap();
        assert!(f.backend.calls().contains(&"seek_to 300".to_string()));
    }

    #[tokio::test]
    async fn test_move_keeps_position_on_current_file() {
        let mut f = fixture(true, 3);
        f.core.play_in_playlist(f.main_id, 1).await.unwrap();

        f.core.move_in_active_playlist(1, 0).await.unwrap();
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.position, Some(0));
        assert_eq!(state.current_file.unwrap().name, "t02.mp3");

        f.core.move_in_active_playlist(2, 0).await.unwrap();
        assert_eq!(f.core.state_manager().get_state().await.position, Some(1));
    }

    #[tokio::test]
    async fn test_clear_active_playlist_stops() {
        let mut f = fixture(true, 2);
        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        f.core.clear_active_playlist().await.unwrap();

        assert_eq!(f.store.lock().await.playlist_len(f.main_id).unwrap(), 0);
        let state = f.core.state_manager().get_state().await;
        assert!(state.current_file.is_none());
    }

    #[tokio::test]
    async fn test_open_link_appends_once_and_plays() {
        let mut f = fixture(true, 1);
        let mut linked = ArchiveFile::new("other", "song.ogg");
        linked.title = Some("Song".into());
        let link = to_link(&linked);

        f.core.open_link(&link).await.unwrap();
        f.core.open_link(&link).await.unwrap();

        assert_eq!(f.store.lock().await.playlist_len(f.main_id).unwrap(), 2);
        let state = f.core.state_manager().get_state().await;
        assert_eq!(state.position, Some(1));
        assert_eq!(state.now_playing.unwrap().title, "Song");

        assert!(matches!(
            f.core.open_link("arcplay://queue?identifier=x&name=y").await,
            Err(PlayError::Link(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_favorite_current() {
        let mut f = fixture(true, 1);
        assert!(matches!(
            f.core.toggle_favorite_current().await,
            Err(PlayError::NothingPlaying)
        ));

        f.core.play_in_playlist(f.main_id, 0).await.unwrap();
        assert!(f.core.toggle_favorite_current().await.unwrap());
        let fav_id = f.store.lock().await.favorites_playlist().unwrap().id;
        assert_eq!(f.store.lock().await.playlist_len(fav_id).unwrap(), 1);

        assert!(!f.core.toggle_favorite_current().await.unwrap());
        assert_eq!(f.store.lock().await.playlist_len(fav_id).unwrap(), 0);
        // Still in the main queue, so the record survives.
        assert!(f.store.lock().await.file(f.files[0].id.unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_run_loop_turns_errors_into_alerts() {
        let mut f = fixture(false, 1);
        let (tx, rx) = mpsc::channel(8);
        let state_manager = f.core.state_manager();
        let backend = f.backend.clone();

        tx.send(PlayerEvent::Command(Command::PlayPlaylist {
            playlist_id: f.main_id,
            index: 0,
        }))
        .await
        .unwrap();
        tx.send(PlayerEvent::Shutdown).await.unwrap();
        f.core.run(rx).await.unwrap();

        assert!(state_manager.get_state().await.alert.unwrap().contains("no network"));
        assert_eq!(backend.calls(), vec!["shutdown".to_string()]);

        let mut saw_alert = false;
        while let Ok(msg) = f.broadcast_rx.try_recv() {
            saw_alert |= matches!(msg, BroadcastMessage::Alert(_));
        }
        assert!(saw_alert);
    }
}
