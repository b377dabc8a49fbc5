//! Local library: playlists, file records, bookmarked archives and play
//! history, kept in SQLite.

use archive_proto::model::{ArchiveFile, ArchiveMetadata, HistoryEntry, Playlist};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const MAIN_PLAYLIST: &str = "Now Playing";
pub const FAVORITES_PLAYLIST: &str = "Favorites";

/// Store handle shared between the player core, the download manager and
/// the HTTP handlers.
pub type SharedStore = Arc<tokio::sync::Mutex<Store>>;

const DB_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL,
        name TEXT NOT NULL,
        remote_url TEXT NOT NULL UNIQUE,
        title TEXT,
        artist TEXT,
        format TEXT,
        track INTEGER,
        size INTEGER,
        length TEXT,
        local_path TEXT
    );

    CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        permanent BOOLEAN NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS playlist_files (
        playlist_id INTEGER NOT NULL,
        file_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        FOREIGN KEY(playlist_id) REFERENCES playlists(id) ON DELETE CASCADE,
        FOREIGN KEY(file_id) REFERENCES files(id),
        PRIMARY KEY (playlist_id, file_id)
    );

    CREATE TABLE IF NOT EXISTS favorite_archives (
        identifier TEXT PRIMARY KEY,
        title TEXT,
        creator TEXT,
        publisher TEXT,
        description TEXT,
        icon_url TEXT,
        added_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL,
        name TEXT NOT NULL,
        title TEXT,
        artist TEXT,
        format TEXT,
        track INTEGER,
        size INTEGER,
        length TEXT,
        last_played INTEGER NOT NULL,
        play_count INTEGER NOT NULL DEFAULT 1,
        UNIQUE(identifier, name)
    );
"#;

const FILE_COLUMNS: &str =
    "f.id, f.identifier, f.name, f.title, f.artist, f.format, f.track, f.size, f.length, f.local_path";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("\"{file}\" is already in \"{playlist}\"")]
    AlreadyInPlaylist { file: String, playlist: String },
    #[error("{0} is already in your favorites")]
    AlreadyFavorite(String),
    #[error("playlist {0} not found")]
    PlaylistNotFound(String),
    #[error("file {0} not found")]
    FileNotFound(i64),
    #[error("a playlist named \"{0}\" already exists")]
    PlaylistExists(String),
    #[error("\"{0}\" is a system playlist and cannot be changed")]
    PermanentPlaylist(String),
    #[error("playlist name cannot be empty")]
    EmptyName,
    #[error("position {0} is out of range")]
    OutOfRange(usize),
}

impl StoreError {
    /// Duplicate adds are reported to the user rather than ignored.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInPlaylist { .. } | Self::AlreadyFavorite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            // A missing directory surfaces as an open error below.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path.as_ref())?;
        info!("Store opened at {:?}", path.as_ref());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(DB_SCHEMA)?;
        for name in [MAIN_PLAYLIST, FAVORITES_PLAYLIST] {
            conn.execute(
                "INSERT OR IGNORE INTO playlists (name, permanent) VALUES (?1, 1)",
                params![name],
            )?;
        }
        Ok(Self { conn })
    }

    // ── playlists ─────────────────────────────────────────────────────────────

    pub fn playlists(&self) -> Result<Vec<Playlist>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, permanent FROM playlists ORDER BY permanent DESC, id ASC")?;
        let playlists = stmt
            .query_map([], playlist_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(playlists)
    }

    pub fn playlist(&self, id: i64) -> Result<Playlist> {
        self.conn
            .query_row(
                "SELECT id, name, permanent FROM playlists WHERE id = ?1",
                params![id],
                playlist_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::PlaylistNotFound(id.to_string()))
    }

    pub fn playlist_by_name(&self, name: &str) -> Result<Option<Playlist>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, permanent FROM playlists WHERE name = ?1",
                params![name],
                playlist_from_row,
            )
            .optional()?)
    }

    /// The system queue that deep links and ad-hoc plays go to.
    pub fn main_playlist(&self) -> Result<Playlist> {
        self.playlist_by_name(MAIN_PLAYLIST)?
            .ok_or_else(|| StoreError::PlaylistNotFound(MAIN_PLAYLIST.to_string()))
    }

    pub fn favorites_playlist(&self) -> Result<Playlist> {
        self.playlist_by_name(FAVORITES_PLAYLIST)?
            .ok_or_else(|| StoreError::PlaylistNotFound(FAVORITES_PLAYLIST.to_string()))
    }

    pub fn create_playlist(&self, name: &str) -> Result<Playlist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if self.playlist_by_name(name)?.is_some() {
            return Err(StoreError::PlaylistExists(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO playlists (name, permanent) VALUES (?1, 0)",
            params![name],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Created playlist {} ({})", name, id);
        self.playlist(id)
    }

    pub fn rename_playlist(&self, id: i64, name: &str) -> Result<Playlist> {
        let playlist = self.playlist(id)?;
        if playlist.permanent {
            return Err(StoreError::PermanentPlaylist(playlist.name));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if let Some(existing) = self.playlist_by_name(name)? {
            if existing.id != id {
                return Err(StoreError::PlaylistExists(name.to_string()));
            }
        }
        self.conn.execute(
            "UPDATE playlists SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        self.playlist(id)
    }

    /// Delete a user playlist.  Returns downloaded files that no longer belong
    /// to any playlist; their records are gone and the caller owns the
    /// on-disk copies.
    pub fn delete_playlist(&mut self, id: i64) -> Result<Vec<ArchiveFile>> {
        let playlist = self.playlist(id)?;
        if playlist.permanent {
            return Err(StoreError::PermanentPlaylist(playlist.name));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_files WHERE playlist_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        tx.commit()?;
        info!("Deleted playlist {}", playlist.name);
        self.cleanup_orphans()
    }

    pub fn playlist_files(&self, playlist_id: i64) -> Result<Vec<ArchiveFile>> {
        let sql = format!(
            "SELECT {} FROM playlist_files pf JOIN files f ON f.id = pf.file_id
             WHERE pf.playlist_id = ?1 ORDER BY pf.position ASC",
            FILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![playlist_id], file_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(files)
    }

    pub fn playlist_len(&self, playlist_id: i64) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM playlist_files WHERE playlist_id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn position_of(&self, playlist_id: i64, file_id: i64) -> Result<Option<usize>> {
        let pos: Option<i64> = self
            .conn
            .query_row(
                "SELECT position FROM playlist_files WHERE playlist_id = ?1 AND file_id = ?2",
                params![playlist_id, file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pos.map(|p| p as usize))
    }

    /// True when a file with the same resolved remote URL is in the playlist.
    pub fn contains_url(&self, playlist_id: i64, remote_url: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT f.id FROM playlist_files pf JOIN files f ON f.id = pf.file_id
                 WHERE pf.playlist_id = ?1 AND f.remote_url = ?2",
                params![playlist_id, remote_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Append a file to a playlist.  The file record is created on first use
    /// and shared by every playlist that contains the same remote URL.
    pub fn add_file(&mut self, playlist_id: i64, file: &ArchiveFile) -> Result<ArchiveFile> {
        let playlist = self.playlist(playlist_id)?;
        let remote_url = file.remote_url();
        if self.contains_url(playlist_id, &remote_url)? {
            return Err(StoreError::AlreadyInPlaylist {
                file: file.display_title().to_string(),
                playlist: playlist.name,
            });
        }

        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM files WHERE remote_url = ?1",
                params![remote_url],
                |row| row.get(0),
            )
            .optional()?;
        let file_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO files (
                        identifier, name, remote_url, title, artist, format,
                        track, size, length, local_path
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        file.identifier,
                        file.name,
                        remote_url,
                        file.title,
                        file.artist,
                        file.format,
                        file.track.map(i64::from),
                        file.size.map(|s| s as i64),
                        file.length,
                        file.local_path.as_ref().map(|p| p.display().to_string()),
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT INTO playlist_files (playlist_id, file_id, position)
             SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0) FROM playlist_files WHERE playlist_id = ?1",
            params![playlist_id, file_id],
        )?;
        tx.commit()?;

        debug!("Added {} to playlist {}", remote_url, playlist.name);
        self.file(file_id)
    }

    pub fn remove_file(&mut self, playlist_id: i64, file_id: i64) -> Result<Vec<ArchiveFile>> {
        let position = self
            .position_of(playlist_id, file_id)?
            .ok_or(StoreError::FileNotFound(file_id))?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_files WHERE playlist_id = ?1 AND file_id = ?2",
            params![playlist_id, file_id],
        )?;
        tx.execute(
            "UPDATE playlist_files SET position = position - 1
             WHERE playlist_id = ?1 AND position > ?2",
            params![playlist_id, position as i64],
        )?;
        tx.commit()?;
        self.cleanup_orphans()
    }

    /// Move the entry at `from` so that it ends up at `to`.
    pub fn move_file(&mut self, playlist_id: i64, from: usize, to: usize) -> Result<()> {
        let mut ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT file_id FROM playlist_files WHERE playlist_id = ?1 ORDER BY position ASC",
            )?;
            let ids = stmt
                .query_map(params![playlist_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, rusqlite::Error>>()?;
            ids
        };
        if from >= ids.len() {
            return Err(StoreError::OutOfRange(from));
        }
        if to >= ids.len() {
            return Err(StoreError::OutOfRange(to));
        }
        if from == to {
            return Ok(());
        }
        let moved = ids.remove(from);
        ids.insert(to, moved);

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE playlist_files SET position = ?3 WHERE playlist_id = ?1 AND file_id = ?2",
            )?;
            for (position, file_id) in ids.iter().enumerate() {
                stmt.execute(params![playlist_id, file_id, position as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_playlist(&mut self, playlist_id: i64) -> Result<Vec<ArchiveFile>> {
        self.playlist(playlist_id)?;
        self.conn.execute(
            "DELETE FROM playlist_files WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        self.cleanup_orphans()
    }

    /// Drop file records that no playlist references.  Returns the ones that
    /// had a local copy so the caller can delete it from disk.
    fn cleanup_orphans(&mut self) -> Result<Vec<ArchiveFile>> {
        let tx = self.conn.transaction()?;
        let downloaded = {
            let sql = format!(
                "SELECT {} FROM files f
                 WHERE f.local_path IS NOT NULL
                   AND f.id NOT IN (SELECT file_id FROM playlist_files)",
                FILE_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            let files = stmt
                .query_map([], file_from_row)?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            files
        };
        let removed = tx.execute(
            "DELETE FROM files WHERE id NOT IN (SELECT file_id FROM playlist_files)",
            [],
        )?;
        tx.commit()?;
        if removed > 0 {
            debug!("Removed {} orphaned file records", removed);
        }
        Ok(downloaded)
    }

    // ── files ─────────────────────────────────────────────────────────────────

    pub fn file(&self, id: i64) -> Result<ArchiveFile> {
        let sql = format!("SELECT {} FROM files f WHERE f.id = ?1", FILE_COLUMNS);
        self.conn
            .query_row(&sql, params![id], file_from_row)
            .optional()?
            .ok_or(StoreError::FileNotFound(id))
    }

    pub fn file_by_url(&self, remote_url: &str) -> Result<Option<ArchiveFile>> {
        let sql = format!("SELECT {} FROM files f WHERE f.remote_url = ?1", FILE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![remote_url], file_from_row)
            .optional()?)
    }

    pub fn downloaded_files(&self) -> Result<Vec<ArchiveFile>> {
        let sql = format!(
            "SELECT {} FROM files f WHERE f.local_path IS NOT NULL ORDER BY f.identifier, f.name",
            FILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map([], file_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(files)
    }

    pub fn set_local_path(&self, file_id: i64, path: &Path) -> Result<ArchiveFile> {
        let changed = self.conn.execute(
            "UPDATE files SET local_path = ?1 WHERE id = ?2",
            params![path.display().to_string(), file_id],
        )?;
        if changed == 0 {
            return Err(StoreError::FileNotFound(file_id));
        }
        self.file(file_id)
    }

    /// Revert a record to its remote URL.
    pub fn clear_local_path(&self, file_id: i64) -> Result<ArchiveFile> {
        let changed = self.conn.execute(
            "UPDATE files SET local_path = NULL WHERE id = ?1",
            params![file_id],
        )?;
        if changed == 0 {
            return Err(StoreError::FileNotFound(file_id));
        }
        self.file(file_id)
    }

    // ── favorite archives ─────────────────────────────────────────────────────

    pub fn add_favorite_archive(&self, metadata: &ArchiveMetadata) -> Result<ArchiveMetadata> {
        if self.is_favorite_archive(&metadata.identifier)? {
            return Err(StoreError::AlreadyFavorite(metadata.identifier.clone()));
        }
        let added_at = metadata.added_at.unwrap_or_else(Utc::now);
        self.conn.execute(
            "INSERT INTO favorite_archives (
                identifier, title, creator, publisher, description, icon_url, added_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metadata.identifier,
                metadata.title,
                metadata.creator,
                metadata.publisher,
                metadata.description,
                metadata.icon_url,
                added_at.timestamp_millis(),
            ],
        )?;
        Ok(ArchiveMetadata {
            added_at: Some(added_at),
            ..metadata.clone()
        })
    }

    pub fn remove_favorite_archive(&self, identifier: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM favorite_archives WHERE identifier = ?1",
            params![identifier],
        )?;
        Ok(removed > 0)
    }

    pub fn is_favorite_archive(&self, identifier: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT identifier FROM favorite_archives WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Newest bookmark first.
    pub fn favorite_archives(&self) -> Result<Vec<ArchiveMetadata>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, title, creator, publisher, description, icon_url, added_at
             FROM favorite_archives ORDER BY added_at DESC, identifier ASC",
        )?;
        let archives = stmt
            .query_map([], |row| {
                Ok(ArchiveMetadata {
                    identifier: row.get(0)?,
                    title: row.get(1)?,
                    creator: row.get(2)?,
                    publisher: row.get(3)?,
                    description: row.get(4)?,
                    icon_url: row.get(5)?,
                    added_at: Some(from_millis(row.get(6)?)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(archives)
    }

    // ── history ───────────────────────────────────────────────────────────────

    /// Log a play.  Repeated plays of the same identifier + name pair bump the
    /// existing entry instead of adding a new one.
    pub fn record_play(&self, file: &ArchiveFile) -> Result<HistoryEntry> {
        self.record_play_at(file, Utc::now())
    }

    pub fn record_play_at(&self, file: &ArchiveFile, at: DateTime<Utc>) -> Result<HistoryEntry> {
        self.conn.execute(
            "INSERT INTO history (
                identifier, name, title, artist, format, track, size, length, last_played, play_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)
            ON CONFLICT(identifier, name) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                format = excluded.format,
                track = excluded.track,
                size = excluded.size,
                length = excluded.length,
                last_played = excluded.last_played,
                play_count = history.play_count + 1",
            params![
                file.identifier,
                file.name,
                file.title,
                file.artist,
                file.format,
                file.track.map(i64::from),
                file.size.map(|s| s as i64),
                file.length,
                at.timestamp_millis(),
            ],
        )?;
        let entry = self.conn.query_row(
            "SELECT id, identifier, name, title, artist, format, track, size, length, last_played, play_count
             FROM history WHERE identifier = ?1 AND name = ?2",
            params![file.identifier, file.name],
            history_from_row,
        )?;
        Ok(entry)
    }

    /// Most recently played first.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identifier, name, title, artist, format, track, size, length, last_played, play_count
             FROM history ORDER BY last_played DESC, id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], history_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(entries)
    }

    pub fn clear_history(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM history", [])?)
    }
}

fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        permanent: row.get(2)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<ArchiveFile> {
    Ok(ArchiveFile {
        id: Some(row.get(0)?),
        identifier: row.get(1)?,
        name: row.get(2)?,
        title: row.get(3)?,
        artist: row.get(4)?,
        format: row.get(5)?,
        track: row.get::<_, Option<i64>>(6)?.map(|t| t as u32),
        size: row.get::<_, Option<i64>>(7)?.map(|s| s as u64),
        length: row.get(8)?,
        local_path: row.get::<_, Option<String>>(9)?.map(PathBuf::from),
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        file: ArchiveFile {
            id: None,
            identifier: row.get(1)?,
            name: row.get(2)?,
            title: row.get(3)?,
            artist: row.get(4)?,
            format: row.get(5)?,
            track: row.get::<_, Option<i64>>(6)?.map(|t| t as u32),
            size: row.get::<_, Option<i64>>(7)?.map(|s| s as u64),
            length: row.get(8)?,
            local_path: None,
        },
        last_played: from_millis(row.get(9)?),
        play_count: row.get::<_, i64>(10)? as u32,
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(identifier: &str, name: &str) -> ArchiveFile {
        let mut f = ArchiveFile::new(identifier, name);
        f.title = Some(name.trim_end_matches(".mp3").to_string());
        f
    }

    #[test]
    fn test_permanent_playlists_exist() {
        let store = Store::open_in_memory().unwrap();
        let playlists = store.playlists().unwrap();
        assert_eq!(playlists.len(), 2);
        assert!(playlists.iter().all(|p| p.permanent));
        assert_eq!(store.main_playlist().unwrap().name, MAIN_PLAYLIST);
        assert_eq!(store.favorites_playlist().unwrap().name, FAVORITES_PLAYLIST);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();

        store.add_file(main.id, &file("item", "a.mp3")).unwrap();
        let err = store.add_file(main.id, &file("item", "a.mp3")).unwrap_err();
        assert!(err.is_duplicate());
        assert!(matches!(err, StoreError::AlreadyInPlaylist { .. }));
        assert_eq!(store.playlist_len(main.id).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_detected_by_resolved_url_even_when_local() {
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();
        let added = store.add_file(main.id, &file("item", "a b.mp3")).unwrap();
        store
            .set_local_path(added.id.unwrap(), Path::new("/tmp/item/a b.mp3"))
            .unwrap();

        // Same file described without a local copy still resolves to the same URL.
        let err = store.add_file(main.id, &file("item", "a b.mp3")).unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn test_file_rows_are_shared_between_playlists() {
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();
        let mix = store.create_playlist("Mix").unwrap();

        let a = store.add_file(main.id, &file("item", "a.mp3")).unwrap();
        let b = store.add_file(mix.id, &file("item", "a.mp3")).unwrap();
        assert_eq!(a.id, b.id);

        store.remove_file(main.id, a.id.unwrap()).unwrap();
        // Still referenced by "Mix".
        assert!(store.file(a.id.unwrap()).is_ok());

        store.remove_file(mix.id, a.id.unwrap()).unwrap();
        assert!(matches!(
            store.file(a.id.unwrap()),
            Err(StoreError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_orphaned_downloads_are_returned() {
        let mut store = Store::open_in_memory().unwrap();
        let mix = store.create_playlist("Mix").unwrap();
        let a = store.add_file(mix.id, &file("item", "a.mp3")).unwrap();
        store.add_file(mix.id, &file("item", "b.mp3")).unwrap();
        store
            .set_local_path(a.id.unwrap(), Path::new("/tmp/item/a.mp3"))
            .unwrap();

        let orphans = store.delete_playlist(mix.id).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].name, "a.mp3");
        assert!(store.downloaded_files().unwrap().is_empty());
    }

    #[test]
    fn test_positions_after_remove_and_move() {
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();
        let ids: Vec<i64> = ["1.mp3", "2.mp3", "3.mp3", "4.mp3"]
            .iter()
            .map(|n| store.add_file(main.id, &file("item", n)).unwrap().id.unwrap())
            .collect();

        store.remove_file(main.id, ids[1]).unwrap();
        let names: Vec<String> = store
            .playlist_files(main.id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["1.mp3", "3.mp3", "4.mp3"]);

        store.move_file(main.id, 2, 0).unwrap();
        let names: Vec<String> = store
            .playlist_files(main.id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["4.mp3", "1.mp3", "3.mp3"]);
        assert_eq!(store.position_of(main.id, ids[3]).unwrap(), Some(0));

        // New entries append after the current tail.
        store.add_file(main.id, &file("item", "5.mp3")).unwrap();
        assert_eq!(store.playlist_files(main.id).unwrap()[3].name, "5.mp3");

        assert!(matches!(
            store.move_file(main.id, 9, 0),
            Err(StoreError::OutOfRange(9))
        ));
    }

    #[test]
    fn test_permanent_playlists_cannot_be_deleted_or_renamed() {
        let mut store = Store::open_in_memory().unwrap();
        let favorites = store.favorites_playlist().unwrap();
        assert!(matches!(
            store.delete_playlist(favorites.id),
            Err(StoreError::PermanentPlaylist(_))
        ));
        assert!(matches!(
            store.rename_playlist(favorites.id, "Faves"),
            Err(StoreError::PermanentPlaylist(_))
        ));
    }

    #[test]
    fn test_create_and_rename_playlist() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(store.create_playlist("  "), Err(StoreError::EmptyName)));
        let p = store.create_playlist("Road trip").unwrap();
        assert!(!p.permanent);
        assert!(matches!(
            store.create_playlist("Road trip"),
            Err(StoreError::PlaylistExists(_))
        ));
        let renamed = store.rename_playlist(p.id, "Late night").unwrap();
        assert_eq!(renamed.name, "Late night");
    }

    #[test]
    fn test_history_increments_play_count() {
        let store = Store::open_in_memory().unwrap();
        let f = file("item", "a.mp3");
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t1 = DateTime::from_timestamp(1_700_000_600, 0).unwrap();

        let first = store.record_play_at(&f, t0).unwrap();
        assert_eq!(first.play_count, 1);
        let second = store.record_play_at(&f, t1).unwrap();
        assert_eq!(second.play_count, 2);
        assert_eq!(second.id, first.id);
        assert_eq!(second.last_played, t1);

        store.record_play_at(&file("item", "b.mp3"), t0).unwrap();
        let history = store.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].file.name, "a.mp3");

        assert_eq!(store.clear_history().unwrap(), 2);
    }

    #[test]
    fn test_favorite_archives() {
        let store = Store::open_in_memory().unwrap();
        let meta = ArchiveMetadata {
            identifier: "gd1977".into(),
            title: Some("Cornell".into()),
            ..Default::default()
        };
        let saved = store.add_favorite_archive(&meta).unwrap();
        assert!(saved.added_at.is_some());
        assert!(store.is_favorite_archive("gd1977").unwrap());
        assert!(matches!(
            store.add_favorite_archive(&meta),
            Err(StoreError::AlreadyFavorite(_))
        ));
        assert_eq!(store.favorite_archives().unwrap().len(), 1);
        assert!(store.remove_favorite_archive("gd1977").unwrap());
        assert!(!store.remove_favorite_archive("gd1977").unwrap());
    }

    #[test]
    fn test_local_path_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        let main = store.main_playlist().unwrap();
        let added = store.add_file(main.id, &file("item", "a.mp3")).unwrap();
        let id = added.id.unwrap();

        let local = store.set_local_path(id, Path::new("/docs/item/a.mp3")).unwrap();
        assert!(local.is_local());
        let remote = store.clear_local_path(id).unwrap();
        assert!(!remote.is_local());
        assert_eq!(remote.playback_url(), added.remote_url());
    }
}
