//! Remote-control API.  Reads come from the shared `StateManager`; every
//! write is a `Command` handed to the player core.

use crate::core::PlayerEvent;
use archive_proto::protocol::{Command, NowPlaying, PlayerState};
use archive_proto::state::StateManager;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Deserialize)]
struct OpenParams {
    url: Option<String>,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<PlayerEvent>) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/now-playing", get(now_playing))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/resume", get(resume).post(resume))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/next", get(next).post(next))
        .route("/api/prev", get(prev).post(prev))
        .route("/api/seek/:secs", get(seek_to).post(seek_to))
        .route("/api/skip/:delta", get(skip).post(skip))
        .route("/api/forward", get(forward).post(forward))
        .route("/api/back", get(back).post(back))
        .route("/api/play/:file_id", get(play_file).post(play_file))
        .route(
            "/api/playlist/:playlist_id/:index",
            get(play_playlist).post(play_playlist),
        )
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/favorite", post(toggle_favorite))
        .route("/api/clear", post(clear_playlist))
        .route("/api/move/:from/:to", post(move_entry))
        .route("/api/open", post(open_link))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(PlayerEvent::Command(cmd)).await.is_err() {
        error!("Failed to reach the player core");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerState> {
    Json(state.state_manager.get_state().await)
}

async fn now_playing(State(state): State<HttpState>) -> Response {
    let now_playing: Option<NowPlaying> = state.state_manager.get_state().await.now_playing;
    match now_playing {
        Some(np) => Json(np).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePause).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Pause).await
}

async fn resume(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Resume).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Prev).await
}

async fn seek_to(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    send(&state, Command::SeekTo { seconds: secs }).await
}

async fn skip(State(state): State<HttpState>, Path(delta): Path<f64>) -> StatusCode {
    send(&state, Command::SeekBy { seconds: delta }).await
}

async fn forward(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Skip { forward: true }).await
}

async fn back(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Skip { forward: false }).await
}

async fn play_playlist(
    State(state): State<HttpState>,
    Path((playlist_id, index)): Path<(i64, usize)>,
) -> StatusCode {
    send(&state, Command::PlayPlaylist { playlist_id, index }).await
}

async fn play_file(State(state): State<HttpState>, Path(file_id): Path<i64>) -> StatusCode {
    send(&state, Command::PlayFile { file_id }).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    send(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let player_state = state.state_manager.get_state().await;
    let volume = (player_state.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn toggle_favorite(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ToggleFavorite).await
}

async fn clear_playlist(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ClearPlaylist).await
}

async fn move_entry(
    State(state): State<HttpState>,
    Path((from, to)): Path<(usize, usize)>,
) -> StatusCode {
    send(&state, Command::MoveInPlaylist { from, to }).await
}

/// The link comes from `?url=` or, failing that, the request body.
async fn open_link(
    State(state): State<HttpState>,
    Query(params): Query<OpenParams>,
    body: String,
) -> StatusCode {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(body);
    if url.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    send(&state, Command::OpenLink { url: url.trim().to_string() }).await
}
