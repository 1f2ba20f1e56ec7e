/// Request types for the jukebox
///
/// A request is delivered to exactly one supplier at a time and yields a
/// single `Reply`, or a denial that lets the hub try the next supplier.
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::filters::FilterSet;
use crate::error::HubError;
use crate::model::{Album, Artist, DbStats, PlaybackInfo, PlayedSong, Playlist, Song, Tag};

/// Jukebox requests
///
/// Requests naming a `songdbid` or `playerid` are routed only to the channel
/// serving that id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Request {
    GetDatabaseStats { songdbid: String },

    /// Return the song stored at `path`, registering it first if necessary
    QueryRegisterSong { songdbid: String, path: PathBuf },

    GetSong { songdbid: String, id: String },

    GetArtist { songdbid: String, artist: String },

    GetAlbum { songdbid: String, album: String },

    GetPlaylist { songdbid: String, path: PathBuf },

    GetSongsInPlaylist {
        songdbid: String,
        path: PathBuf,
        random: bool,
    },

    GetSongs {
        songdbid: String,
        artist: Option<String>,
        album: Option<String>,
        sort: bool,
        random: bool,
        filters: FilterSet,
    },

    GetLastPlayedSongs { songdbid: String, filters: FilterSet },

    GetTopPlayedSongs { songdbid: String, filters: FilterSet },

    GetLastAddedSongs { songdbid: String, filters: FilterSet },

    GetSongsInPlaylists { songdbid: String, random: bool },

    GetArtists { songdbid: String, filters: FilterSet },

    GetAlbums {
        songdbid: String,
        artist: Option<String>,
        filters: FilterSet,
    },

    GetTags { songdbid: String, filters: FilterSet },

    GetRatings { songdbid: String, filters: FilterSet },

    GetDecades { songdbid: String, filters: FilterSet },

    GetPlaylists { songdbid: String },

    GetNumberOfSongs {
        songdbid: String,
        artist: Option<String>,
        album: Option<String>,
        filters: FilterSet,
    },

    GetNumberOfAlbums { songdbid: String, filters: FilterSet },

    GetNumberOfArtists { songdbid: String, filters: FilterSet },

    GetNumberOfTags { songdbid: String, filters: FilterSet },

    GetNumberOfRatings { songdbid: String, filters: FilterSet },

    GetNumberOfDecades { songdbid: String, filters: FilterSet },

    /// Info about the song currently playing on `playerid`
    GetPlaybackInfo { playerid: String },
}

/// Routing key of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    GetDatabaseStats,
    QueryRegisterSong,
    GetSong,
    GetArtist,
    GetAlbum,
    GetPlaylist,
    GetSongsInPlaylist,
    GetSongs,
    GetLastPlayedSongs,
    GetTopPlayedSongs,
    GetLastAddedSongs,
    GetSongsInPlaylists,
    GetArtists,
    GetAlbums,
    GetTags,
    GetRatings,
    GetDecades,
    GetPlaylists,
    GetNumberOfSongs,
    GetNumberOfAlbums,
    GetNumberOfArtists,
    GetNumberOfTags,
    GetNumberOfRatings,
    GetNumberOfDecades,
    GetPlaybackInfo,
}

impl RequestKind {
    /// Every request kind a song database answers
    pub const SONGDB: [RequestKind; 24] = [
        RequestKind::GetDatabaseStats,
        RequestKind::QueryRegisterSong,
        RequestKind::GetSong,
        RequestKind::GetArtist,
        RequestKind::GetAlbum,
        RequestKind::GetPlaylist,
        RequestKind::GetSongsInPlaylist,
        RequestKind::GetSongs,
        RequestKind::GetLastPlayedSongs,
        RequestKind::GetTopPlayedSongs,
        RequestKind::GetLastAddedSongs,
        RequestKind::GetSongsInPlaylists,
        RequestKind::GetArtists,
        RequestKind::GetAlbums,
        RequestKind::GetTags,
        RequestKind::GetRatings,
        RequestKind::GetDecades,
        RequestKind::GetPlaylists,
        RequestKind::GetNumberOfSongs,
        RequestKind::GetNumberOfAlbums,
        RequestKind::GetNumberOfArtists,
        RequestKind::GetNumberOfTags,
        RequestKind::GetNumberOfRatings,
        RequestKind::GetNumberOfDecades,
    ];
}

/// Canonical identity of a request: equal kind and fields give equal keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::GetDatabaseStats { .. } => RequestKind::GetDatabaseStats,
            Request::QueryRegisterSong { .. } => RequestKind::QueryRegisterSong,
            Request::GetSong { .. } => RequestKind::GetSong,
            Request::GetArtist { .. } => RequestKind::GetArtist,
            Request::GetAlbum { .. } => RequestKind::GetAlbum,
            Request::GetPlaylist { .. } => RequestKind::GetPlaylist,
            Request::GetSongsInPlaylist { .. } => RequestKind::GetSongsInPlaylist,
            Request::GetSongs { .. } => RequestKind::GetSongs,
            Request::GetLastPlayedSongs { .. } => RequestKind::GetLastPlayedSongs,
            Request::GetTopPlayedSongs { .. } => RequestKind::GetTopPlayedSongs,
            Request::GetLastAddedSongs { .. } => RequestKind::GetLastAddedSongs,
            Request::GetSongsInPlaylists { .. } => RequestKind::GetSongsInPlaylists,
            Request::GetArtists { .. } => RequestKind::GetArtists,
            Request::GetAlbums { .. } => RequestKind::GetAlbums,
            Request::GetTags { .. } => RequestKind::GetTags,
            Request::GetRatings { .. } => RequestKind::GetRatings,
            Request::GetDecades { .. } => RequestKind::GetDecades,
            Request::GetPlaylists { .. } => RequestKind::GetPlaylists,
            Request::GetNumberOfSongs { .. } => RequestKind::GetNumberOfSongs,
            Request::GetNumberOfAlbums { .. } => RequestKind::GetNumberOfAlbums,
            Request::GetNumberOfArtists { .. } => RequestKind::GetNumberOfArtists,
            Request::GetNumberOfTags { .. } => RequestKind::GetNumberOfTags,
            Request::GetNumberOfRatings { .. } => RequestKind::GetNumberOfRatings,
            Request::GetNumberOfDecades { .. } => RequestKind::GetNumberOfDecades,
            Request::GetPlaybackInfo { .. } => RequestKind::GetPlaybackInfo,
        }
    }

    /// The service instance this request must be answered by
    pub fn target(&self) -> Option<&str> {
        match self {
            Request::GetPlaybackInfo { playerid } => Some(playerid.as_str()),
            Request::GetDatabaseStats { songdbid }
            | Request::QueryRegisterSong { songdbid, .. }
            | Request::GetSong { songdbid, .. }
            | Request::GetArtist { songdbid, .. }
            | Request::GetAlbum { songdbid, .. }
            | Request::GetPlaylist { songdbid, .. }
            | Request::GetSongsInPlaylist { songdbid, .. }
            | Request::GetSongs { songdbid, .. }
            | Request::GetLastPlayedSongs { songdbid, .. }
            | Request::GetTopPlayedSongs { songdbid, .. }
            | Request::GetLastAddedSongs { songdbid, .. }
            | Request::GetSongsInPlaylists { songdbid, .. }
            | Request::GetArtists { songdbid, .. }
            | Request::GetAlbums { songdbid, .. }
            | Request::GetTags { songdbid, .. }
            | Request::GetRatings { songdbid, .. }
            | Request::GetDecades { songdbid, .. }
            | Request::GetPlaylists { songdbid }
            | Request::GetNumberOfSongs { songdbid, .. }
            | Request::GetNumberOfAlbums { songdbid, .. }
            | Request::GetNumberOfArtists { songdbid, .. }
            | Request::GetNumberOfTags { songdbid, .. }
            | Request::GetNumberOfRatings { songdbid, .. }
            | Request::GetNumberOfDecades { songdbid, .. } => Some(songdbid.as_str()),
        }
    }

    /// Canonical key used to detect identical requests.
    ///
    /// Built from the serialized request with object keys in sorted order, so
    /// the key depends only on the kind and the field values.
    pub fn key(&self) -> RequestKey {
        let canonical = serde_json::to_value(self)
            .and_then(|value| serde_json::to_string(&value))
            .unwrap_or_else(|_| format!("{:?}", self));
        RequestKey(canonical)
    }

    /// Whether two identical requests may share one answer until the
    /// database announces a change
    pub fn is_cacheable(&self) -> bool {
        match self {
            Request::QueryRegisterSong { .. } | Request::GetPlaybackInfo { .. } => false,
            Request::GetSongs { random, .. }
            | Request::GetSongsInPlaylist { random, .. }
            | Request::GetSongsInPlaylists { random, .. } => !random,
            _ => true,
        }
    }

    pub fn get_song(songdbid: impl Into<String>, id: impl Into<String>) -> Self {
        Request::GetSong {
            songdbid: songdbid.into(),
            id: id.into(),
        }
    }

    /// All songs matching `filters`, sorted
    pub fn get_songs(songdbid: impl Into<String>, filters: FilterSet) -> Self {
        Request::GetSongs {
            songdbid: songdbid.into(),
            artist: None,
            album: None,
            sort: true,
            random: false,
            filters,
        }
    }

    pub fn get_artists(songdbid: impl Into<String>, filters: FilterSet) -> Self {
        Request::GetArtists {
            songdbid: songdbid.into(),
            filters,
        }
    }

    pub fn get_albums(songdbid: impl Into<String>, artist: Option<String>, filters: FilterSet) -> Self {
        Request::GetAlbums {
            songdbid: songdbid.into(),
            artist,
            filters,
        }
    }

    pub fn get_database_stats(songdbid: impl Into<String>) -> Self {
        Request::GetDatabaseStats {
            songdbid: songdbid.into(),
        }
    }

    pub fn get_playback_info(playerid: impl Into<String>) -> Self {
        Request::GetPlaybackInfo {
            playerid: playerid.into(),
        }
    }
}

/// Answer produced by a supplier
#[derive(Debug, Clone)]
pub enum Reply {
    Song(Option<Arc<Song>>),
    Songs(Vec<Arc<Song>>),
    PlayedSongs(Vec<PlayedSong>),
    Artist(Option<Artist>),
    Artists(Vec<Artist>),
    Album(Option<Album>),
    Albums(Vec<Album>),
    Tags(Vec<Tag>),
    Ratings(Vec<(Option<u8>, usize)>),
    Decades(Vec<(u16, usize)>),
    Playlist(Option<Playlist>),
    Playlists(Vec<Playlist>),
    Count(usize),
    Stats(DbStats),
    PlaybackInfo(PlaybackInfo),
}

impl Reply {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Reply::Song(_) => "Song",
            Reply::Songs(_) => "Songs",
            Reply::PlayedSongs(_) => "PlayedSongs",
            Reply::Artist(_) => "Artist",
            Reply::Artists(_) => "Artists",
            Reply::Album(_) => "Album",
            Reply::Albums(_) => "Albums",
            Reply::Tags(_) => "Tags",
            Reply::Ratings(_) => "Ratings",
            Reply::Decades(_) => "Decades",
            Reply::Playlist(_) => "Playlist",
            Reply::Playlists(_) => "Playlists",
            Reply::Count(_) => "Count",
            Reply::Stats(_) => "Stats",
            Reply::PlaybackInfo(_) => "PlaybackInfo",
        }
    }

    fn unexpected(&self, expected: &'static str) -> HubError {
        HubError::UnexpectedReply {
            expected,
            got: self.variant_name(),
        }
    }

    pub fn into_song(self) -> Result<Option<Arc<Song>>, HubError> {
        match self {
            Reply::Song(song) => Ok(song),
            other => Err(other.unexpected("Song")),
        }
    }

    /// Songs of a `Songs` or `PlayedSongs` reply
    pub fn into_songs(self) -> Result<Vec<Arc<Song>>, HubError> {
        match self {
            Reply::Songs(songs) => Ok(songs),
            Reply::PlayedSongs(played) => Ok(played.into_iter().map(|p| p.song).collect()),
            other => Err(other.unexpected("Songs")),
        }
    }

    pub fn into_artists(self) -> Result<Vec<Artist>, HubError> {
        match self {
            Reply::Artists(artists) => Ok(artists),
            other => Err(other.unexpected("Artists")),
        }
    }

    pub fn into_albums(self) -> Result<Vec<Album>, HubError> {
        match self {
            Reply::Albums(albums) => Ok(albums),
            other => Err(other.unexpected("Albums")),
        }
    }

    pub fn into_playlists(self) -> Result<Vec<Playlist>, HubError> {
        match self {
            Reply::Playlists(playlists) => Ok(playlists),
            other => Err(other.unexpected("Playlists")),
        }
    }

    pub fn into_count(self) -> Result<usize, HubError> {
        match self {
            Reply::Count(count) => Ok(count),
            other => Err(other.unexpected("Count")),
        }
    }

    pub fn into_stats(self) -> Result<DbStats, HubError> {
        match self {
            Reply::Stats(stats) => Ok(stats),
            other => Err(other.unexpected("Stats")),
        }
    }

    pub fn into_playback_info(self) -> Result<PlaybackInfo, HubError> {
        match self {
            Reply::PlaybackInfo(info) => Ok(info),
            other => Err(other.unexpected("PlaybackInfo")),
        }
    }
}

/// What a supplier does with a request
#[derive(Debug, Clone)]
pub enum Outcome {
    Reply(Reply),
    /// Decline; the hub moves on to the next supplier
    Denied,
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Outcome::Reply(reply)
    }
}
