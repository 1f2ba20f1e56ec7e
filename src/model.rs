/// Library value types carried by events and replies
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A song known to one song database
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Path relative to the database basedir; unique within one database
    pub id: String,
    pub songdbid: String,
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub compilation: bool,
    pub year: Option<u16>,
    pub tracknumber: Option<u32>,
    pub tags: Vec<String>,
    pub rating: Option<u8>,
    pub size: u64,
    pub date_added: Option<SystemTime>,
    pub date_changed: Option<SystemTime>,
    pub date_lastplayed: Option<SystemTime>,
    pub playcount: u32,
}

impl Song {
    /// Create a song with only its identity filled in
    pub fn new(songdbid: impl Into<String>, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            songdbid: songdbid.into(),
            path: path.into(),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            album_artist: None,
            compilation: false,
            year: None,
            tracknumber: None,
            tags: Vec::new(),
            rating: None,
            size: 0,
            date_added: None,
            date_changed: None,
            date_lastplayed: None,
            playcount: 0,
        }
    }

    /// Merge scanned metadata from `other`, keeping identity and play statistics
    pub fn update_metadata(&mut self, other: &Song) {
        self.path = other.path.clone();
        self.title = other.title.clone();
        self.artist = other.artist.clone();
        self.album = other.album.clone();
        self.album_artist = other.album_artist.clone();
        self.compilation = other.compilation;
        self.year = other.year;
        self.tracknumber = other.tracknumber;
        self.tags = other.tags.clone();
        self.size = other.size;
        self.date_changed = Some(SystemTime::now());
    }

    /// Metadata equality, ignoring timestamps and statistics
    pub fn same_metadata(&self, other: &Song) -> bool {
        self.path == other.path
            && self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.album_artist == other.album_artist
            && self.compilation == other.compilation
            && self.year == other.year
            && self.tracknumber == other.tracknumber
            && self.tags == other.tags
            && self.size == other.size
    }

    /// First year of the decade the song was released in
    pub fn decade(&self) -> Option<u16> {
        self.year.map(|year| year - year % 10)
    }

    /// The artist the album is filed under
    pub fn album_artist_or_artist(&self) -> &str {
        self.album_artist.as_deref().unwrap_or(&self.artist)
    }
}

/// A stored playlist; entries are absolute song paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub path: PathBuf,
    pub name: String,
    pub songs: Vec<PathBuf>,
}

impl Playlist {
    pub fn new(path: impl Into<PathBuf>, songs: Vec<PathBuf>) -> Self {
        let path = path.into();
        let name = playlist_name(&path);
        Self { path, name, songs }
    }
}

fn playlist_name(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u") => path.file_stem(),
        _ => path.file_name(),
    }
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub songdbid: String,
    pub name: String,
    pub song_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub songdbid: String,
    pub name: String,
    /// Artists the album is filed under, sorted
    pub artists: Vec<String>,
    pub song_count: usize,
}

impl Album {
    pub fn is_compilation(&self) -> bool {
        self.artists.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub song_count: usize,
}

/// A song together with the time it was played
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedSong {
    pub song: Arc<Song>,
    pub played_at: SystemTime,
}

/// Statistics of one song database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub id: String,
    pub kind: &'static str,
    pub basedir: PathBuf,
    pub songs: usize,
    pub albums: usize,
    pub artists: usize,
    pub tags: usize,
    pub decades: usize,
    pub playlists: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Stopped,
    Playing,
    Paused,
}

impl PlayerStatus {
    pub fn description(&self) -> &'static str {
        match self {
            PlayerStatus::Stopped => "Stopped",
            PlayerStatus::Playing => "Playing",
            PlayerStatus::Paused => "Paused",
        }
    }
}

/// Snapshot of a player's state
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInfo {
    pub playerid: String,
    pub status: PlayerStatus,
    pub song: Option<Arc<Song>>,
    pub position: Option<usize>,
    pub queue_len: usize,
}
