use serde::{Deserialize, Serialize};

use crate::model::ArchiveFile;

/// Commands accepted by the player core (from the CLI, the HTTP API or a
/// deep link).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Play a stored file, inside the active playlist when it is a member.
    PlayFile { file_id: i64 },
    /// Play the `index`-th entry of a playlist and make that playlist active.
    PlayPlaylist { playlist_id: i64, index: usize },
    TogglePause,
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    SeekTo { seconds: f64 },
    SeekBy { seconds: f64 },
    /// Skip forward (or back when `forward` is false) by the configured step.
    Skip { forward: bool },
    Volume { value: f32 },
    ClearPlaylist,
    MoveInPlaylist { from: usize, to: usize },
    ToggleFavorite,
    /// Deep link carrying a single file description.
    OpenLink { url: String },
    GetState,
}

/// Detailed playback status, derived from what the player reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing loaded / explicitly stopped
    Loading, // file handed to the player, waiting for audio
    Playing,
    Paused,
    Error, // failed to play
}

/// Snapshot of what is playing, shaped for a system now-playing display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NowPlaying {
    pub title: String,
    pub artist: Option<String>,
    /// The archive item the file belongs to.
    pub album: String,
    pub duration_secs: Option<f64>,
    pub elapsed_secs: Option<f64>,
    /// 1.0 while playing, 0.0 while paused.
    pub rate: f32,
    pub artwork_url: String,
}

/// Full state of the player.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerState {
    #[serde(default)]
    pub rev: u64,
    pub status: PlaybackStatus,
    pub active_playlist: Option<i64>,
    /// Position of `current_file` inside the active playlist.
    pub position: Option<usize>,
    pub current_file: Option<ArchiveFile>,
    pub now_playing: Option<NowPlaying>,
    pub volume: f32,
    pub time_pos_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    /// Short on-screen feedback, e.g. "+15s" after a skip.
    pub feedback: Option<String>,
    /// Last user-visible error.
    pub alert: Option<String>,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }
}
