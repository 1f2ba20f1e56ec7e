use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

const APP_DIR: &str = "jukebox";

/// A song database and the directory tree it indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongDbConfig {
    /// Identifier used as `songdbid` in events and requests
    pub id: String,

    /// Root of the music tree; song ids are paths relative to it
    pub basedir: PathBuf,

    /// Scan the basedir when the jukebox starts
    #[serde(default = "default_true")]
    pub autoregister: bool,
}

/// How the autoregisterer turns file paths into songs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of songs per `RegisterSongs` event
    pub batch_size: usize,

    /// Regex applied to the file name; group 1 is the track number, group 2 the title
    pub tracknr_and_title_re: String,

    /// File extensions (lower case, without dot) considered songs
    pub extensions: Vec<String>,

    /// Capitalize words of artist, album and title
    pub capitalize: bool,

    /// Move a leading article to the end ("The Who" -> "Who, The")
    pub strip_leading_article: bool,

    /// Articles recognised by `strip_leading_article`
    pub leading_articles: Vec<String>,

    /// Replace accented characters by their base letter
    pub remove_accents: bool,

    /// Wait this long after startup before the first scan
    pub start_delay_ms: u64,

    /// Minutes over which a recent play stops holding a song back in
    /// random orderings
    pub last_played_scale_minutes: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            tracknr_and_title_re: r"^\[?(\d+)\]?\s*[-._ ]\s*(.*)\.\w+$".to_string(),
            extensions: vec!["mp3".into(), "ogg".into(), "flac".into(), "wav".into()],
            capitalize: false,
            strip_leading_article: false,
            leading_articles: vec!["the".into(), "a".into(), "an".into()],
            remove_accents: false,
            start_delay_ms: 0,
            last_played_scale_minutes: 1440.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilelistConfig {
    /// Enter an artist's only album directly
    pub skip_single_albums: bool,
}

impl Default for FilelistConfig {
    fn default() -> Self {
        Self {
            skip_single_albums: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Log directory; `<config dir>/jukebox/logs` when unset
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Song databases served by this jukebox
    #[serde(default)]
    pub databases: Vec<SongDbConfig>,

    /// Maximum time a request waits for its answer
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Number of entries kept in the last-played list
    #[serde(default = "default_playing_stats_length")]
    pub playing_stats_length: usize,

    /// Identifier of the player service
    #[serde(default = "default_player_id")]
    pub player_id: String,

    #[serde(default)]
    pub filelist: FilelistConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_playing_stats_length() -> usize {
    100
}

fn default_player_id() -> String {
    "main".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            scan: ScanConfig::default(),
            playing_stats_length: default_playing_stats_length(),
            player_id: default_player_id(),
            filelist: FilelistConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the platform-specific config directory.
    /// Creates default config if file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing a default file there if it is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.display().to_string(),
                    source: Box::new(e),
                })?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            info!("Created default config at: {}", path.display());
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source,
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| save_failed(Box::new(e)))?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| save_failed(Box::new(e)))?;
        fs::write(path, json).map_err(|e| save_failed(Box::new(e)))?;

        Ok(())
    }

    /// Check settings that would otherwise fail later, inside a service
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for db in &self.databases {
            if db.id.is_empty() {
                return Err(ConfigError::Invalid("database id must not be empty".to_string()));
            }
            if !ids.insert(db.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate database id '{}'", db.id)));
            }
            if !db.basedir.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "basedir '{}' of database {} is not a directory",
                    db.basedir.display(),
                    db.id
                )));
            }
        }
        if self.scan.batch_size == 0 {
            return Err(ConfigError::Invalid("scan.batch_size must be at least 1".to_string()));
        }
        if self.scan.last_played_scale_minutes.is_nan() || self.scan.last_played_scale_minutes <= 0.0 {
            return Err(ConfigError::Invalid(
                "scan.last_played_scale_minutes must be positive".to_string(),
            ));
        }
        if self.player_id.is_empty() {
            return Err(ConfigError::Invalid("player_id must not be empty".to_string()));
        }
        regex::Regex::new(&self.scan.tracknr_and_title_re).map_err(|e| {
            ConfigError::Invalid(format!("scan.tracknr_and_title_re: {}", e))
        })?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn scan_start_delay(&self) -> Duration {
        Duration::from_millis(self.scan.start_delay_ms)
    }

    /// Directory holding `config.json` and the default log directory
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Log directory configured or derived from the config directory
    pub fn log_dir(&self) -> PathBuf {
        self.log.dir.clone().unwrap_or_else(|| {
            Self::config_dir()
                .map(|dir| dir.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("logs"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.databases.is_empty());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.scan.batch_size, 5);
        assert_eq!(config.playing_stats_length, 100);
        assert_eq!(config.player_id, "main");
        assert!(config.filelist.skip_single_albums);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{ "databases": [ { "id": "local", "basedir": "/music" } ] }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.databases[0].id, "local");
        assert!(config.databases[0].autoregister);
        assert_eq!(config.scan, ScanConfig::default());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_load_creates_default_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn test_load_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_databases() {
        let dir = tempfile::tempdir().unwrap();
        let db = |id: &str, basedir: &Path| SongDbConfig {
            id: id.to_string(),
            basedir: basedir.to_path_buf(),
            autoregister: true,
        };

        let mut config = Config::default();
        config.databases = vec![db("a", dir.path()), db("a", dir.path())];
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));

        config.databases = vec![db("a", &dir.path().join("missing"))];
        assert!(config.validate().unwrap_err().to_string().contains("not a directory"));

        config.databases = vec![db("a", dir.path())];
        config.scan.tracknr_and_title_re = "(".to_string();
        assert!(config.validate().is_err());
    }
}
