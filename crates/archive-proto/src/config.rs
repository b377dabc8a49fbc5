use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Remote-control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Open a video window for movie items.  Audio-only when false.
    #[serde(default = "default_video")]
    pub video: bool,
    /// Step used by skip forward/back.
    #[serde(default = "default_seek_step")]
    pub seek_step_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_rows_per_page")]
    pub rows_per_page: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// How long fetched collection shortcuts stay valid.
    #[serde(default = "default_cache_days")]
    pub cache_days: u32,
    /// Collection tag hidden from browse results.
    #[serde(default = "default_excluded_collection")]
    pub excluded_collection: String,
}

/// User-configurable paths for downloads, cache, and data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for downloaded files, one subdirectory per archive identifier.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            video: default_video(),
            seek_step_secs: default_seek_step(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            rows_per_page: default_rows_per_page(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            cache_days: default_cache_days(),
            excluded_collection: default_excluded_collection(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            database: default_database(),
            state_file: default_state_file(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_volume() -> f32 {
    0.8
}

fn default_video() -> bool {
    true
}

fn default_seek_step() -> f64 {
    15.0
}

fn default_base_url() -> String {
    "https://archive.org".to_string()
}

fn default_rows_per_page() -> u32 {
    50
}

fn default_user_agent() -> String {
    format!("arcplay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_cache_days() -> u32 {
    3
}

fn default_excluded_collection() -> String {
    "stream_only".to_string()
}

fn default_documents_dir() -> PathBuf {
    platform::documents_dir()
}

fn default_database() -> PathBuf {
    platform::data_dir().join("library.sqlite")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_cache_dir() -> PathBuf {
    platform::cache_dir()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            info!("No config at {:?}, writing defaults", config_path);
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {:?}", config_path))?;
        debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn filter_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.filters.cache_days))
    }
}
