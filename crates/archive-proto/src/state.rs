use crate::model::ArchiveFile;
use crate::protocol::{NowPlaying, PlaybackStatus, PlayerState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: f32,
    #[serde(default)]
    pub active_playlist: Option<i64>,
    #[serde(default)]
    pub last_file_id: Option<i64>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            volume: 0.8,
            active_playlist: None,
            last_file_id: None,
        }
    }
}

/// Owner of the shared `PlayerState`.  Only the player core writes through
/// it; everything else reads snapshots.
pub struct StateManager {
    state: Arc<RwLock<PlayerState>>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);

        let state = PlayerState {
            rev: 1,
            volume: persistent.volume,
            active_playlist: persistent.active_playlist,
            ..PlayerState::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub async fn get_state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    pub async fn set_loading(
        &self,
        file: ArchiveFile,
        playlist_id: i64,
        position: usize,
    ) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            let now_playing = now_playing_for(&file);
            state.active_playlist = Some(playlist_id);
            state.position = Some(position);
            state.duration_secs = file.duration_secs();
            state.current_file = Some(file);
            state.now_playing = Some(now_playing);
            state.status = PlaybackStatus::Loading;
            state.time_pos_secs = Some(0.0);
            state.alert = None;
            state.feedback = None;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_stopped(&self) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.status = PlaybackStatus::Idle;
            state.current_file = None;
            state.now_playing = None;
            state.position = None;
            state.time_pos_secs = None;
            state.duration_secs = None;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_playback_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        let rate = if status == PlaybackStatus::Playing { 1.0 } else { 0.0 };
        if let Some(np) = state.now_playing.as_mut() {
            np.rate = rate;
        }
        state.status = status;
        state.rev += 1;
    }

    pub async fn set_timeline(&self, time_pos_secs: Option<f64>, duration_secs: Option<f64>) {
        let mut state = self.state.write().await;
        state.time_pos_secs = time_pos_secs;
        if duration_secs.is_some() {
            state.duration_secs = duration_secs;
        }
        let duration = state.duration_secs;
        if let Some(np) = state.now_playing.as_mut() {
            np.elapsed_secs = time_pos_secs;
            np.duration_secs = duration;
        }
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.volume = volume.clamp(0.0, 1.0);
            state.rev += 1;
        }
        self.save().await
    }

    /// Re-point the current entry after the active playlist changed shape.
    pub async fn set_position(&self, position: Option<usize>) {
        let mut state = self.state.write().await;
        state.position = position;
        state.rev += 1;
    }

    pub async fn set_active_playlist(&self, playlist_id: Option<i64>) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.active_playlist = playlist_id;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_feedback(&self, feedback: Option<String>) {
        let mut state = self.state.write().await;
        state.feedback = feedback;
        state.rev += 1;
    }

    pub async fn set_alert(&self, alert: Option<String>) {
        let mut state = self.state.write().await;
        state.alert = alert;
        state.rev += 1;
    }

    async fn save(&self) -> anyhow::Result<()> {
        let state = self.state.read().await;
        let persistent = PersistentState {
            volume: state.volume,
            active_playlist: state.active_playlist,
            last_file_id: state.current_file.as_ref().and_then(|f| f.id),
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        debug!("Saved player state to {:?}", self.state_file);
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        let content = match std::fs::read_to_string(state_file) {
            Ok(content) => content,
            Err(e) => {
                debug!("No saved player state at {:?}: {}", state_file, e);
                return PersistentState::default();
            }
        };
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(persistent) => persistent,
            Err(e) => {
                warn!("Ignoring unreadable player state {:?}: {}", state_file, e);
                PersistentState::default()
            }
        }
    }
}

/// Build the now-playing record for a file that is about to start.
pub fn now_playing_for(file: &ArchiveFile) -> NowPlaying {
    NowPlaying {
        title: file.display_title().to_string(),
        artist: file.artist.clone(),
        album: file.identifier.clone(),
        duration_secs: file.duration_secs(),
        elapsed_secs: Some(0.0),
        rate: 0.0,
        artwork_url: crate::model::ArchiveMetadata::icon_url_for(&file.identifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_volume_and_playlist_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let manager = StateManager::new(path.clone());
        manager.set_volume(1.7).await.unwrap();
        manager.set_active_playlist(Some(4)).await.unwrap();
        assert_eq!(manager.get_state().await.volume, 1.0);

        let reloaded = StateManager::new(path);
        let state = reloaded.get_state().await;
        assert_eq!(state.volume, 1.0);
        assert_eq!(state.active_playlist, Some(4));
        assert_eq!(state.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let manager = StateManager::new(path.clone());
        let state = manager.get_state().await;
        assert_eq!(state.volume, PersistentState::default().volume);
        assert_eq!(state.active_playlist, None);

        manager.set_volume(0.3).await.unwrap();
        let saved: PersistentState =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.volume, 0.3);
    }

    #[tokio::test]
    async fn test_loading_publishes_now_playing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().join("state.json"));

        let mut file = ArchiveFile::new("item", "01.mp3");
        file.id = Some(9);
        file.title = Some("Opening".into());
        file.length = Some("3:00".into());
        manager.set_loading(file, 1, 0).await.unwrap();
        manager.set_playback_status(PlaybackStatus::Playing).await;

        let state = manager.get_state().await;
        let np = state.now_playing.unwrap();
        assert_eq!(np.title, "Opening");
        assert_eq!(np.album, "item");
        assert_eq!(np.duration_secs, Some(180.0));
        assert_eq!(np.rate, 1.0);
        assert_eq!(state.position, Some(0));
    }
}
