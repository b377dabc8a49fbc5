/// mpv IPC driver with separated reader/writer tasks, and the `MpvBackend`
/// the player core drives.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.
use crate::core::{BackendEvent, EndReason, MediaBackend, PlayerEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_TIME_POS: u64 = 3;
pub const OBS_DURATION: u64 = 4;

const OBSERVED: [(u64, &str); 4] = [
    (OBS_CORE_IDLE, "core-idle"),
    (OBS_PAUSE, "pause"),
    (OBS_TIME_POS, "time-pos"),
    (OBS_DURATION, "duration"),
];

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Translate into what the player core cares about.
    pub fn to_backend_event(&self) -> Option<BackendEvent> {
        if let Some((obs_id, data)) = self.as_property_change() {
            let number = if data.is_null() { None } else { data.as_f64() };
            return match obs_id {
                OBS_CORE_IDLE => data.as_bool().map(BackendEvent::CoreIdle),
                OBS_PAUSE => Some(BackendEvent::Paused(data.as_bool().unwrap_or(false))),
                OBS_TIME_POS => Some(BackendEvent::TimePos(number)),
                OBS_DURATION => Some(BackendEvent::Duration(number)),
                _ => None,
            };
        }

        match self.event_name()? {
            "file-loaded" => Some(BackendEvent::FileLoaded),
            "end-file" => {
                let reason = match self.raw.get("reason").and_then(|v| v.as_str()) {
                    Some("eof") => EndReason::Eof,
                    Some("error") => EndReason::Error(
                        self.raw
                            .get("file_error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("playback error")
                            .to_string(),
                    ),
                    _ => EndReason::Stopped,
                };
                Some(BackendEvent::EndFile(reason))
            }
            _ => None,
        }
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_file(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        let _ = self.set_volume(volume).await;
        self.set_pause(false).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    pub async fn seek_relative(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "relative"])).await?;
        Ok(())
    }

    /// Register observe_property for everything the core follows.
    pub async fn observe_all_properties(&self) {
        for (id, name) in OBSERVED {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    pub async fn unobserve_all_properties(&self) {
        for (id, name) in OBSERVED {
            if let Err(e) = self.send(json!(["unobserve_property", id])).await {
                debug!("mpv: unobserve_property {} failed: {}", name, e);
            }
        }
    }
}

/// One IPC connection and the tasks serving it.  Dropping it aborts the
/// tasks, which closes the socket.
pub struct MpvConnection {
    pub handle: MpvHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl MpvConnection {
    /// True once any task serving the connection has stopped.
    pub fn is_closed(&self) -> bool {
        self.tasks.iter().any(|task| task.is_finished())
    }
}

impl Drop for MpvConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    video: bool,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(video: bool, volume: f32) -> Self {
        Self {
            socket_name: archive_proto::platform::mpv_socket_name(),
            process: None,
            video,
            last_volume: volume,
        }
    }

    /// True when mpv was spawned here and has since exited.  An instance
    /// adopted through `try_reconnect` is not owned and never reports this.
    pub fn owned_process_exited(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_some(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning new process (video={})", self.video);
        let mpv_binary = archive_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let mut command = tokio::process::Command::new(mpv_binary);
        if !self.video {
            command.arg("--no-video");
        }
        let child = command
            .arg("--idle=yes")
            .arg(archive_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvConnection> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process().await?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }

    /// Try to connect to an already-running mpv socket without spawning.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvConnection> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                Some(start_io_tasks(stream, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvConnection> {
        self.spawn_process().await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvConnection> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                Some(start_io_tasks(client, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect to named pipe: {}", e);
                None
            }
        }
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvConnection
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    let writer = tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    let reader = tokio::spawn(reader_task(reader, pending, event_tx));

    MpvConnection {
        handle: MpvHandle { tx: cmd_tx },
        tasks: vec![writer, reader],
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── backend ───────────────────────────────────────────────────────────────────

/// `MediaBackend` over one long-lived mpv process.  Events are forwarded to
/// the player core as `PlayerEvent::Backend`.
pub struct MpvBackend {
    driver: MpvDriver,
    connection: Option<MpvConnection>,
    core_tx: mpsc::Sender<PlayerEvent>,
}

impl MpvBackend {
    pub fn new(video: bool, volume: f32, core_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            driver: MpvDriver::new(video, volume),
            connection: None,
            core_tx,
        }
    }

    fn handle(&self) -> Option<MpvHandle> {
        self.connection.as_ref().map(|conn| conn.handle.clone())
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        let stale = match &self.connection {
            Some(conn) if conn.is_closed() => {
                warn!("mpv connection closed, reconnecting");
                true
            }
            Some(_) if self.driver.owned_process_exited() => {
                warn!("mpv process died, dropping connection");
                true
            }
            _ => false,
        };
        if stale {
            self.connection = None;
        }
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        // One forwarder per connection.
        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.core_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                if let Some(event) = evt.to_backend_event() {
                    if core_tx.send(PlayerEvent::Backend(event)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let mut conn = match self.driver.try_reconnect(event_tx.clone()).await {
            Some(conn) => conn,
            None => match self.driver.spawn_and_connect(event_tx).await {
                Ok(conn) => conn,
                Err(e) => {
                    forwarder.abort();
                    return Err(e);
                }
            },
        };
        conn.tasks.push(forwarder);
        let handle = conn.handle.clone();
        self.connection = Some(conn);
        Ok(handle)
    }
}

#[async_trait]
impl MediaBackend for MpvBackend {
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()> {
        let handle = self.ensure_handle().await?;
        info!("mpv: loading {}", url);
        handle.load_file(url, volume).await?;
        handle.observe_all_properties().await;
        Ok(())
    }

    async fn teardown(&mut self) -> anyhow::Result<()> {
        let Some(handle) = self.handle() else {
            return Ok(());
        };
        let _ = handle.set_pause(true).await;
        handle.unobserve_all_properties().await;
        handle.stop().await
    }

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
        match self.handle() {
            Some(handle) => handle.set_pause(paused).await,
            None => Ok(()),
        }
    }

    async fn seek_to(&mut self, secs: f64) -> anyhow::Result<()> {
        match self.handle() {
            Some(handle) => handle.seek_to(secs).await,
            None => Ok(()),
        }
    }

    async fn seek_relative(&mut self, secs: f64) -> anyhow::Result<()> {
        match self.handle() {
            Some(handle) => handle.seek_relative(secs).await,
            None => Ok(()),
        }
    }

    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()> {
        self.driver.last_volume = volume;
        match self.handle() {
            Some(handle) => handle.set_volume(volume).await,
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        info!("mpv: shutting down");
        if let Some(conn) = self.connection.take() {
            let _ = conn.handle.stop().await;
        }
        self.driver.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> Option<BackendEvent> {
        MpvEvent { raw }.to_backend_event()
    }

    #[test]
    fn test_property_changes_translate() {
        assert_eq!(
            event(json!({"event": "property-change", "id": OBS_TIME_POS, "name": "time-pos", "data": 12.5})),
            Some(BackendEvent::TimePos(Some(12.5)))
        );
        assert_eq!(
            event(json!({"event": "property-change", "id": OBS_DURATION, "name": "duration"})),
            Some(BackendEvent::Duration(None))
        );
        assert_eq!(
            event(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": false})),
            Some(BackendEvent::CoreIdle(false))
        );
        assert_eq!(
            event(json!({"event": "property-change", "id": 99, "data": 1})),
            None
        );
    }

    #[test]
    fn test_end_file_reasons() {
        assert_eq!(
            event(json!({"event": "end-file", "reason": "eof"})),
            Some(BackendEvent::EndFile(EndReason::Eof))
        );
        assert_eq!(
            event(json!({"event": "end-file", "reason": "stop"})),
            Some(BackendEvent::EndFile(EndReason::Stopped))
        );
        assert_eq!(
            event(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"})),
            Some(BackendEvent::EndFile(EndReason::Error("loading failed".into())))
        );
        assert_eq!(event(json!({"event": "file-loaded"})), Some(BackendEvent::FileLoaded));
        assert_eq!(event(json!({"event": "seek"})), None);
    }

    /// Plays the mpv side of the socket: answers every request and pushes one
    /// unsolicited event.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_requests_and_events_over_socket() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let conn = start_io_tasks(ours, event_tx);
        let handle = conn.handle.clone();

        tokio::spawn(async move {
            let (read_half, mut write_half) = theirs.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let error = if req["command"][0] == "bogus" {
                    "invalid parameter"
                } else {
                    "success"
                };
                let event = json!({"event": "end-file", "reason": "eof"});
                let reply = json!({"request_id": id, "error": error, "data": 42});
                let out = format!("{}\n{}\n", event, reply);
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let resp = handle.send(json!(["get_property", "volume"])).await.unwrap();
        assert_eq!(resp["data"], 42);
        assert!(handle.send(json!(["bogus"])).await.is_err());

        let evt = event_rx.recv().await.unwrap();
        assert_eq!(
            evt.to_backend_event(),
            Some(BackendEvent::EndFile(EndReason::Eof))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adopted_connection_is_reused() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let (core_tx, _core_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let mut backend = MpvBackend::new(false, 0.5, core_tx);
        backend.connection = Some(start_io_tasks(ours, event_tx));

        // Nothing was spawned here, so there is no process to outlive.
        for _ in 0..3 {
            let handle = backend.ensure_handle().await.unwrap();
            let current = &backend.connection.as_ref().unwrap().handle;
            assert!(handle.tx.same_channel(&current.tx));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_connection_releases_socket() {
        use tokio::io::AsyncReadExt;

        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let (event_tx, _event_rx) = mpsc::channel(8);
        let conn = start_io_tasks(ours, event_tx);
        assert!(!conn.is_closed());
        drop(conn);

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(std::time::Duration::from_secs(2), theirs.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connection_closed_by_peer() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (event_tx, _event_rx) = mpsc::channel(8);
        let conn = start_io_tasks(ours, event_tx);
        drop(theirs);

        for _ in 0..100 {
            if conn.is_closed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(conn.is_closed());
    }
}
