//! Subcommand implementations.  Each one drives a view-model or the store
//! and prints plain text; failures bubble up to `main` as `error: ...`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use archive_proto::config::{Config, HttpConfig};
use archive_proto::deeplink::{parse_link, to_link};
use archive_proto::model::{format_clock, ArchiveFile, MediaType, Playlist, SearchDoc, SearchFilter};
use archive_proto::protocol::PlayerState;
use archive_proto::state::StateManager;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ArchiveClient, ArchiveService};
use crate::artwork::ArtworkCache;
use crate::cli::{Commands, FilterCommands, PlaylistCommands, RemoteCommands};
use crate::core::{BroadcastMessage, PlayerCore, PlayerEvent};
use crate::download_manager::{delete_local_copies, DownloadManager, DownloadStatus};
use crate::filter_cache::FilterCache;
use crate::http;
use crate::mpv::MpvBackend;
use crate::reachability::NetworkProbe;
use crate::store::{SharedStore, StoreError};
use crate::viewmodel::{debounce, BrowseModel, DetailModel, LoadState, SearchModel, DEFAULT_DEBOUNCE};

pub struct App {
    config: Config,
    store: SharedStore,
    service: Arc<dyn ArchiveService>,
}

impl App {
    pub fn new(config: Config, store: SharedStore) -> Result<Self> {
        let client = ArchiveClient::new(&config.archive)?;
        Ok(Self::with_service(config, store, Arc::new(client)))
    }

    pub fn with_service(config: Config, store: SharedStore, service: Arc<dyn ArchiveService>) -> Self {
        Self {
            config,
            store,
            service,
        }
    }

    pub async fn run(
        &self,
        command: Commands,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Result<()> {
        match command {
            Commands::Serve => self.serve(broadcast_tx).await,
            Commands::Search {
                query,
                media,
                collection,
                pages,
                interactive,
            } => {
                let mut model = SearchModel::new(Arc::clone(&self.service), media);
                model.set_collection(collection);
                if interactive {
                    search_interactive(model).await
                } else {
                    search_once(model, &query.join(" "), pages).await
                }
            }
            Commands::Browse { collection, pages } => self.browse(&collection, pages).await,
            Commands::Show {
                identifier,
                artwork,
            } => self.show(&identifier, artwork).await,
            Commands::Add {
                identifier,
                files,
                playlist,
            } => self.add(&identifier, &files, playlist.as_deref()).await,
            Commands::Favorite { identifier } => self.favorite(&identifier).await,
            Commands::Unfavorite { identifier } => {
                let removed = self.store.lock().await.remove_favorite_archive(identifier.trim())?;
                if !removed {
                    bail!("{} is not in your favorites", identifier.trim());
                }
                println!("Removed {} from favorites", identifier.trim());
                Ok(())
            }
            Commands::Favorites => self.favorites().await,
            Commands::Playlist(cmd) => self.playlist(cmd).await,
            Commands::History { limit, clear } => self.history(limit, clear).await,
            Commands::Download {
                file_ids,
                playlist,
                from,
            } => self.download(&file_ids, playlist.as_deref(), from).await,
            Commands::Undownload { file_id } => {
                let mut manager = self.download_manager();
                let file = self.store.lock().await.file(file_id)?;
                let reverted = manager.remove_download(&file).await?;
                println!("{} streams from the archive again", reverted.display_title());
                Ok(())
            }
            Commands::Filters(cmd) => self.filters(cmd).await,
            Commands::Open { link } => self.open(&link).await,
            Commands::Share { file_id } => {
                let file = self.store.lock().await.file(file_id)?;
                println!("{}", to_link(&file));
                Ok(())
            }
            Commands::Remote(cmd) => remote(RemoteClient::new(&self.config.http)?, cmd).await,
        }
    }

    // ── serve ─────────────────────────────────────────────────────────────────

    async fn serve(&self, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Result<()> {
        let config = &self.config;

        // Event channel: every external input funnels into PlayerCore
        let (event_tx, event_rx) = mpsc::channel::<PlayerEvent>(256);

        let fresh = !config.paths.state_file.exists();
        let state_manager = Arc::new(StateManager::new(config.paths.state_file.clone()));
        if fresh {
            state_manager.set_volume(config.player.default_volume).await?;
        }
        let volume = state_manager.get_state().await.volume;

        let backend = MpvBackend::new(config.player.video, volume, event_tx.clone());
        let core = PlayerCore::new(
            Arc::clone(&self.store),
            Arc::clone(&state_manager),
            backend,
            NetworkProbe::for_base_url(&config.archive.base_url),
            broadcast_tx.clone(),
            config.player.seek_step_secs,
        );

        let shutdown = CancellationToken::new();
        let http_handle = if config.http.enabled {
            Some(http::start_server(
                config.http.bind_address.clone(),
                config.http.port,
                core.state_manager(),
                event_tx.clone(),
                shutdown.clone(),
            ))
        } else {
            info!("HTTP API disabled");
            None
        };

        let printer = tokio::spawn(print_broadcasts(broadcast_tx.subscribe()));

        let ctrl_tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = ctrl_tx.send(PlayerEvent::Shutdown).await;
            }
        });

        println!("Player ready. Press Ctrl-C to quit.");
        core.run(event_rx).await?;

        shutdown.cancel();
        if let Some(handle) = http_handle {
            let _ = handle.await;
        }
        printer.abort();
        Ok(())
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    async fn browse(&self, collection: &str, pages: u32) -> Result<()> {
        let mut model = BrowseModel::new(
            Arc::clone(&self.service),
            self.config.filters.excluded_collection.clone(),
        );
        model.open(collection).await;
        for _ in 1..pages.max(1) {
            if !model.has_more() {
                break;
            }
            model.load_more().await;
        }

        match model.state() {
            LoadState::Error(msg) => bail!("{}", msg),
            LoadState::NoResults => println!(
                "{} has no browsable members",
                model.collection().unwrap_or(collection)
            ),
            _ => {
                for doc in model.items() {
                    print_doc(doc);
                }
                if model.has_more() {
                    println!("(more available, use --pages)");
                }
            }
        }
        Ok(())
    }

    async fn show(&self, identifier: &str, artwork: bool) -> Result<()> {
        let mut model = DetailModel::new(Arc::clone(&self.service), Arc::clone(&self.store));
        model.load(identifier).await?;

        if let Some(meta) = model.metadata() {
            let star = if model.is_favorite() { " ★" } else { "" };
            println!("{}{}", meta.title.as_deref().unwrap_or(&meta.identifier), star);
            println!("  identifier: {}", meta.identifier);
            if let Some(creator) = &meta.creator {
                println!("  creator:    {}", creator);
            }
            if let Some(publisher) = &meta.publisher {
                println!("  publisher:  {}", publisher);
            }
            if let Some(description) = &meta.description {
                println!();
                println!("{}", description.trim());
            }
        }

        println!();
        if model.files().is_empty() {
            println!("No playable files");
        }
        for file in model.files() {
            let track = file.track.map(|t| format!("{:>3}.", t)).unwrap_or_else(|| "    ".into());
            let length = file.duration_secs().map(format_clock).unwrap_or_default();
            println!(
                "{} {}  [{}] {}  ({})",
                track,
                file.display_title(),
                file.format.as_deref().unwrap_or("?"),
                length,
                file.name
            );
        }

        if artwork {
            let cache = ArtworkCache::new(&self.config.paths.cache_dir, &self.config.archive.base_url);
            match cache.artwork(identifier.trim()).await {
                Ok(path) => println!("\nArtwork: {}", path.display()),
                Err(e) => warn!("No artwork for {}: {:#}", identifier, e),
            }
        }
        Ok(())
    }

    async fn add(&self, identifier: &str, names: &[String], playlist: Option<&str>) -> Result<()> {
        let playlist = match playlist {
            Some(name) => self.playlist_named(name).await?,
            None => self.store.lock().await.main_playlist()?,
        };

        let mut model = DetailModel::new(Arc::clone(&self.service), Arc::clone(&self.store));
        model.load(identifier).await?;

        if names.is_empty() {
            let added = model.add_all_to_playlist(playlist.id).await?;
            println!("Added {} files to \"{}\"", added, playlist.name);
            if let Some(alert) = model.take_alert() {
                println!("{}", alert);
            }
            return Ok(());
        }

        for name in names {
            let file = model
                .files()
                .iter()
                .find(|f| &f.name == name)
                .cloned()
                .with_context(|| format!("{} has no playable file named \"{}\"", identifier, name))?;
            if let Some(stored) = model.add_to_playlist(playlist.id, &file).await? {
                println!(
                    "Added [{}] {} to \"{}\"",
                    stored.id.unwrap_or_default(),
                    stored.display_title(),
                    playlist.name
                );
            }
            if let Some(alert) = model.take_alert() {
                println!("{}", alert);
            }
        }
        Ok(())
    }

    async fn favorite(&self, identifier: &str) -> Result<()> {
        let mut model = DetailModel::new(Arc::clone(&self.service), Arc::clone(&self.store));
        model.load(identifier).await?;
        let Some(meta) = model.metadata().cloned() else {
            bail!("{} was not found", identifier);
        };
        if model.is_favorite() {
            println!("{}", StoreError::AlreadyFavorite(meta.identifier));
            return Ok(());
        }
        model.toggle_favorite().await?;
        println!(
            "Added {} to favorites",
            meta.title.as_deref().unwrap_or(&meta.identifier)
        );
        Ok(())
    }

    async fn favorites(&self) -> Result<()> {
        let favorites = self.store.lock().await.favorite_archives()?;
        if favorites.is_empty() {
            println!("No favorites yet");
        }
        for meta in favorites {
            let added = meta
                .added_at
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            println!(
                "{:<32} {}  {}",
                meta.identifier,
                meta.title.as_deref().unwrap_or(""),
                added
            );
        }
        Ok(())
    }

    // ── library ───────────────────────────────────────────────────────────────

    async fn playlist_named(&self, name: &str) -> Result<Playlist> {
        let store = self.store.lock().await;
        match store.playlist_by_name(name.trim())? {
            Some(playlist) => Ok(playlist),
            None => Err(StoreError::PlaylistNotFound(name.trim().to_string()).into()),
        }
    }

    async fn playlist(&self, cmd: PlaylistCommands) -> Result<()> {
        match cmd {
            PlaylistCommands::List => {
                let store = self.store.lock().await;
                for playlist in store.playlists()? {
                    let len = store.playlist_len(playlist.id)?;
                    let marker = if playlist.permanent { " (system)" } else { "" };
                    println!("{:<24} {:>4} files{}", playlist.name, len, marker);
                }
            }
            PlaylistCommands::Show { name } => {
                let playlist = self.playlist_named(&name).await?;
                let files = self.store.lock().await.playlist_files(playlist.id)?;
                if files.is_empty() {
                    println!("\"{}\" is empty", playlist.name);
                }
                for (index, file) in files.iter().enumerate() {
                    print_file(index, file);
                }
            }
            PlaylistCommands::Create { name } => {
                let playlist = self.store.lock().await.create_playlist(&name)?;
                println!("Created \"{}\"", playlist.name);
            }
            PlaylistCommands::Rename { name, new_name } => {
                let playlist = self.playlist_named(&name).await?;
                let renamed = self.store.lock().await.rename_playlist(playlist.id, &new_name)?;
                println!("Renamed \"{}\" to \"{}\"", playlist.name, renamed.name);
            }
            PlaylistCommands::Delete { name } => {
                let playlist = self.playlist_named(&name).await?;
                let orphans = self.store.lock().await.delete_playlist(playlist.id)?;
                delete_local_copies(&orphans).await;
                println!("Deleted \"{}\"", playlist.name);
            }
            PlaylistCommands::Remove { name, file_id } => {
                let playlist = self.playlist_named(&name).await?;
                let orphans = self.store.lock().await.remove_file(playlist.id, file_id)?;
                delete_local_copies(&orphans).await;
                println!("Removed file {} from \"{}\"", file_id, playlist.name);
            }
            PlaylistCommands::Move { name, from, to } => {
                let playlist = self.playlist_named(&name).await?;
                self.store.lock().await.move_file(playlist.id, from, to)?;
                println!("Moved entry {} to {} in \"{}\"", from, to, playlist.name);
            }
            PlaylistCommands::Clear { name } => {
                let playlist = self.playlist_named(&name).await?;
                let orphans = self.store.lock().await.clear_playlist(playlist.id)?;
                delete_local_copies(&orphans).await;
                println!("Cleared \"{}\"", playlist.name);
            }
        }
        Ok(())
    }

    async fn history(&self, limit: usize, clear: bool) -> Result<()> {
        let store = self.store.lock().await;
        if clear {
            let removed = store.clear_history()?;
            println!("Forgot {} entries", removed);
            return Ok(());
        }
        let entries = store.history(limit)?;
        if entries.is_empty() {
            println!("Nothing played yet");
        }
        for entry in entries {
            println!(
                "{}  {:>3}x  {} ({})",
                entry
                    .last_played
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M"),
                entry.play_count,
                entry.file.display_title(),
                entry.file.identifier
            );
        }
        Ok(())
    }

    // ── downloads ─────────────────────────────────────────────────────────────

    fn download_manager(&self) -> DownloadManager {
        DownloadManager::new(
            self.config.paths.documents_dir.clone(),
            &self.config.archive.base_url,
            Arc::clone(&self.store),
        )
    }

    async fn download(&self, file_ids: &[i64], playlist: Option<&str>, from: Option<PathBuf>) -> Result<()> {
        let mut manager = self.download_manager();

        if let Some(path) = from {
            let [file_id] = file_ids else {
                bail!("--from takes exactly one file id");
            };
            let file = manager.complete_download(*file_id, &path).await?;
            let stored = file.local_path.as_deref().unwrap_or(path.as_path());
            println!("{} now plays from {}", file.display_title(), stored.display());
            return Ok(());
        }

        if file_ids.is_empty() && playlist.is_none() {
            let downloaded = self.store.lock().await.downloaded_files()?;
            if downloaded.is_empty() {
                println!("Nothing downloaded yet");
            }
            for (index, file) in downloaded.iter().enumerate() {
                print_file(index, file);
            }
            return Ok(());
        }

        let files: Vec<ArchiveFile> = match playlist {
            Some(name) => {
                let playlist = self.playlist_named(name).await?;
                let files = self.store.lock().await.playlist_files(playlist.id)?;
                files.into_iter().filter(|f| !f.is_local()).collect()
            }
            None => {
                let store = self.store.lock().await;
                file_ids
                    .iter()
                    .map(|id| store.file(*id))
                    .collect::<Result<_, _>>()?
            }
        };

        match files.as_slice() {
            [] => bail!("nothing to download"),
            [file] => {
                let title = file.display_title().to_string();
                let mut shown = -1.0f32;
                let updated = manager
                    .download(file, |pct| {
                        if pct.floor() > shown {
                            shown = pct.floor();
                            print!("\r{:>3.0}%  {}", pct, title);
                            let _ = std::io::stdout().flush();
                        }
                    })
                    .await;
                println!();
                let updated = updated?;
                if let Some(path) = updated.local_path {
                    println!("Saved to {}", path.display());
                }
                Ok(())
            }
            files => download_all(&mut manager, files).await,
        }
    }

    // ── filters ───────────────────────────────────────────────────────────────

    async fn filters(&self, cmd: FilterCommands) -> Result<()> {
        let mut cache = FilterCache::open(
            Arc::clone(&self.service),
            &self.config.paths.cache_dir,
            self.config.filter_expiry(),
        );
        match cmd {
            FilterCommands::List { media } => print_filters(&cache.filters(media).await?),
            FilterCommands::Refresh { media } => print_filters(&cache.refresh(media).await?),
            FilterCommands::Add {
                identifier,
                name,
                media,
            } => {
                let filter = cache
                    .add_user_filter(SearchFilter {
                        identifier,
                        name: name.unwrap_or_default(),
                        icon_url: None,
                        media_type: media,
                        user_defined: true,
                    })
                    .await?;
                println!("Added {} filter \"{}\"", filter.media_type.label(), filter.name);
            }
            FilterCommands::Remove { identifier } => {
                let removed = cache.remove_user_filter(&identifier).await?;
                println!("Removed filter \"{}\"", removed.name);
            }
        }
        Ok(())
    }

    // ── links ─────────────────────────────────────────────────────────────────

    /// Hand the link to a running player, or queue it when none is running.
    async fn open(&self, link: &str) -> Result<()> {
        let file = parse_link(link)?;
        let remote = RemoteClient::new(&self.config.http)?;

        match remote.open(link).await {
            Ok(()) => {
                println!("Playing {}", file.display_title());
                return Ok(());
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!("No running player ({}), queueing instead", e);
            }
            Err(e) => return Err(e.into()),
        }

        let mut store = self.store.lock().await;
        let main = store.main_playlist()?;
        match store.add_file(main.id, &file) {
            Ok(stored) => println!(
                "Queued [{}] {} in \"{}\"",
                stored.id.unwrap_or_default(),
                stored.display_title(),
                main.name
            ),
            Err(e) if e.is_duplicate() => println!("{}", e),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

async fn search_once(mut model: SearchModel, text: &str, pages: u32) -> Result<()> {
    if text.trim().is_empty() && model.query().collection.is_none() {
        bail!("nothing to search for");
    }
    model.search(text).await;
    for _ in 1..pages.max(1) {
        if !model.has_more() {
            break;
        }
        model.load_more().await;
    }
    print_search(&model)
}

/// One query per stdin line.  A search starts once typing settles; a newer
/// query replaces the one in flight and Ctrl-C cancels it.
async fn search_interactive(mut model: SearchModel) -> Result<()> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    let mut settled = debounce(rx, DEFAULT_DEBOUNCE);

    loop {
        let searching = model.is_searching();
        tokio::select! {
            query = settled.recv() => match query {
                Some(query) => model.begin(&query),
                None => break,
            },
            _ = async { model.finish().await; }, if searching => {
                if let Err(e) = print_search(&model) {
                    eprintln!("error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                model.cancel().await;
                return Ok(());
            }
        }
    }

    if model.is_searching() {
        model.finish().await;
        print_search(&model)?;
    }
    Ok(())
}

fn print_search(model: &SearchModel) -> Result<()> {
    match model.state() {
        LoadState::Error(msg) => bail!("{}", msg),
        LoadState::NoResults => println!("No results"),
        LoadState::Loaded => {
            for doc in model.results() {
                print_doc(doc);
            }
            println!("{} of {} results", model.results().len(), model.total());
        }
        LoadState::Idle | LoadState::Loading => {}
    }
    Ok(())
}

fn print_doc(doc: &SearchDoc) {
    let kind = if doc.is_collection() {
        "[collection]".to_string()
    } else {
        doc.mediatype
            .as_deref()
            .and_then(MediaType::from_archive_mediatype)
            .map(|m| format!("[{}]", m.label()))
            .unwrap_or_default()
    };
    println!("{:<36} {} {}", doc.identifier, doc.display_title(), kind);
}

fn print_file(index: usize, file: &ArchiveFile) {
    let local = if file.is_local() { "  (downloaded)" } else { "" };
    println!(
        "{:>3}. [{}] {} ({}){}",
        index,
        file.id.unwrap_or_default(),
        file.display_title(),
        file.identifier,
        local
    );
}

fn print_filters(filters: &[SearchFilter]) {
    for filter in filters {
        let mine = if filter.user_defined { "  (yours)" } else { "" };
        println!("{:<32} {}{}", filter.identifier, filter.name, mine);
    }
}

/// Run several downloads side by side and report each outcome.
async fn download_all(manager: &mut DownloadManager, files: &[ArchiveFile]) -> Result<()> {
    let mut started = Vec::new();
    for file in files {
        match manager.start_download(file).await {
            Ok(()) => started.push(file),
            Err(e) => eprintln!("error: {}: {}", file.display_title(), e),
        }
    }

    loop {
        manager.update_statuses();
        let running = started
            .iter()
            .filter(|f| matches!(manager.get_status(f), DownloadStatus::Downloading(_)))
            .count();
        print!("\r{} of {} downloads running", running, started.len());
        let _ = std::io::stdout().flush();
        if running == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    println!();

    let mut failed = files.len() - started.len();
    for file in started {
        match manager.get_status(file) {
            DownloadStatus::Downloaded(path) => {
                println!("ok      {} -> {}", file.display_title(), path.display())
            }
            DownloadStatus::Failed(msg) => {
                failed += 1;
                println!("failed  {}: {}", file.display_title(), msg);
            }
            DownloadStatus::NotDownloaded | DownloadStatus::Downloading(_) => {}
        }
    }
    if failed > 0 {
        bail!("{} of {} downloads failed", failed, files.len());
    }
    Ok(())
}

/// Print what remote clients would see while the player runs.
async fn print_broadcasts(mut rx: broadcast::Receiver<BroadcastMessage>) {
    loop {
        match rx.recv().await {
            Ok(BroadcastMessage::Feedback(text)) => println!("{}", text),
            Ok(BroadcastMessage::Log(line)) => eprintln!("{}", line),
            Ok(BroadcastMessage::Alert(_)) | Ok(BroadcastMessage::StateUpdated) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ── remote ────────────────────────────────────────────────────────────────────

/// Client for the HTTP API of a running `arcplay serve`.
struct RemoteClient {
    http: reqwest::Client,
    base: String,
}

impl RemoteClient {
    fn new(config: &HttpConfig) -> Result<Self> {
        let host = match config.bind_address.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base: format!("http://{}:{}/api", host, config.port),
        })
    }

    async fn command(&self, path: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{}/{}", self.base, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn state(&self) -> Result<PlayerState, reqwest::Error> {
        self.http
            .get(format!("{}/state", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn open(&self, link: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{}/open", self.base))
            .body(link.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn explain(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_connect() {
            anyhow!("no player is running at {}", self.base)
        } else {
            e.into()
        }
    }
}

async fn remote(client: RemoteClient, cmd: RemoteCommands) -> Result<()> {
    let path = match cmd {
        RemoteCommands::State => {
            let state = client.state().await.map_err(|e| client.explain(e))?;
            print_state(&state);
            return Ok(());
        }
        RemoteCommands::Toggle => "toggle".to_string(),
        RemoteCommands::Next => "next".to_string(),
        RemoteCommands::Prev => "prev".to_string(),
        RemoteCommands::Stop => "stop".to_string(),
        RemoteCommands::Seek { seconds } => format!("seek/{}", seconds),
        RemoteCommands::Skip { delta } => format!("skip/{}", delta),
        RemoteCommands::Play { file_id } => format!("play/{}", file_id),
        RemoteCommands::Volume { percent } => format!("volume/{}", percent),
    };
    client.command(&path).await.map_err(|e| client.explain(e))
}

fn print_state(state: &PlayerState) {
    println!("status:   {:?}", state.status);
    match &state.current_file {
        Some(file) => {
            let elapsed = state.time_pos_secs.map(format_clock).unwrap_or_else(|| "-".into());
            let total = state
                .duration_secs
                .or_else(|| file.duration_secs())
                .map(format_clock)
                .unwrap_or_else(|| "-".into());
            println!("playing:  {} ({})", file.display_title(), file.identifier);
            println!("time:     {} / {}", elapsed, total);
            if let Some(position) = state.position {
                println!("position: {}", position);
            }
        }
        None => println!("playing:  nothing"),
    }
    println!("volume:   {:.0}%", state.volume * 100.0);
    if let Some(alert) = &state.alert {
        println!("alert:    {}", alert);
    }
}
