use archive_proto::model::MediaType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Browse and play the Internet Archive", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the player with the remote-control API until interrupted
    Serve,

    /// Search the catalog
    Search {
        /// Search text; omit with --interactive
        query: Vec<String>,
        #[arg(long, value_parser = parse_media_type, default_value = "audio")]
        media: MediaType,
        /// Only items inside this collection
        #[arg(long)]
        collection: Option<String>,
        /// Number of result pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Read queries from stdin, one per line, searching once typing settles
        #[arg(long)]
        interactive: bool,
    },

    /// List the members of a collection
    Browse {
        collection: String,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Show an item's metadata and playable files
    Show {
        identifier: String,
        /// Also fetch the item's thumbnail into the artwork cache
        #[arg(long)]
        artwork: bool,
    },

    /// Add files of an item to a playlist
    Add {
        identifier: String,
        /// File names inside the item; every playable file when empty
        files: Vec<String>,
        /// Target playlist (defaults to the main queue)
        #[arg(long, short)]
        playlist: Option<String>,
    },

    /// Bookmark an archive
    Favorite { identifier: String },

    /// Remove an archive bookmark
    Unfavorite { identifier: String },

    /// List bookmarked archives
    Favorites,

    #[command(subcommand)]
    Playlist(PlaylistCommands),

    /// Recently played files
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Forget every entry instead of listing
        #[arg(long)]
        clear: bool,
    },

    /// Download stored files for offline playback; lists downloads without arguments
    Download {
        /// Store ids of the files
        file_ids: Vec<i64>,
        /// Download every file of a playlist
        #[arg(long, short, conflicts_with = "from")]
        playlist: Option<String>,
        /// Register an existing local copy instead of downloading
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Delete a downloaded copy and go back to streaming
    Undownload { file_id: i64 },

    #[command(subcommand)]
    Filters(FilterCommands),

    /// Open an arcplay:// link: play it on a running server, or queue it
    Open { link: String },

    /// Print the arcplay:// link for a stored file
    Share { file_id: i64 },

    #[command(subcommand)]
    Remote(RemoteCommands),
}

#[derive(Subcommand, Debug)]
pub enum PlaylistCommands {
    /// List playlists
    List,
    /// Show a playlist's files
    Show { name: String },
    Create { name: String },
    Rename { name: String, new_name: String },
    Delete { name: String },
    /// Remove one file (by store id)
    Remove { name: String, file_id: i64 },
    /// Move the entry at `from` to `to` (zero-based)
    Move { name: String, from: usize, to: usize },
    Clear { name: String },
}

#[derive(Subcommand, Debug)]
pub enum FilterCommands {
    /// Collection shortcuts for a media type (cached)
    List {
        #[arg(long, value_parser = parse_media_type, default_value = "audio")]
        media: MediaType,
    },
    /// Fetch the collection list again regardless of age
    Refresh {
        #[arg(long, value_parser = parse_media_type, default_value = "audio")]
        media: MediaType,
    },
    /// Add a collection of your own
    Add {
        identifier: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_media_type, default_value = "audio")]
        media: MediaType,
    },
    Remove { identifier: String },
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommands {
    /// Print the player state
    State,
    Toggle,
    Next,
    Prev,
    Stop,
    /// Jump to an absolute position in seconds
    Seek { seconds: f64 },
    /// Seek relative to the current position, e.g. -15
    Skip {
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },
    /// Play a stored file by id
    Play { file_id: i64 },
    /// Set volume in percent
    Volume { percent: u8 },
}

fn parse_media_type(value: &str) -> Result<MediaType, String> {
    match value.to_ascii_lowercase().as_str() {
        "audio" => Ok(MediaType::Audio),
        "video" | "movies" => Ok(MediaType::Video),
        other => Err(format!("unknown media type '{}' (audio or video)", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_commands() {
        let cli = Cli::try_parse_from(["arcplay", "playlist", "move", "Mix", "3", "0"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Playlist(PlaylistCommands::Move { from: 3, to: 0, .. })
        ));

        let cli = Cli::try_parse_from(["arcplay", "remote", "skip", "-15"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Remote(RemoteCommands::Skip { delta }) if delta == -15.0
        ));
    }

    #[test]
    fn test_media_type_argument() {
        let cli = Cli::try_parse_from(["arcplay", "search", "--media", "movies", "nosferatu"])
            .unwrap();
        match cli.command {
            Commands::Search { media, query, .. } => {
                assert_eq!(media, MediaType::Video);
                assert_eq!(query, vec!["nosferatu"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["arcplay", "search", "--media", "text", "x"]).is_err());
    }

    #[test]
    fn test_download_sources_conflict() {
        assert!(Cli::try_parse_from([
            "arcplay", "download", "1", "--playlist", "Mix", "--from", "/tmp/x.mp3"
        ])
        .is_err());
    }
}
