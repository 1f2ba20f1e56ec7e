/// Event types for the jukebox
///
/// Events are fire-and-forget notifications. Every handler subscribed to an
/// event's kind on any live channel receives it; nobody replies.
use std::sync::Arc;

use crate::model::{Playlist, Song};

/// Jukebox events
#[derive(Debug, Clone)]
pub enum Event {
    // --- writes handled by the song database of `songdbid` ---
    /// Register new songs or merge metadata of known ones
    RegisterSongs { songdbid: String, songs: Vec<Song> },

    /// Register playlists, dropping entries that cannot be registered
    RegisterPlaylists { songdbid: String, playlists: Vec<Playlist> },

    /// Replace the stored record of a song
    UpdateSong { songdbid: String, song: Song },

    /// Remove a song
    DelSong { songdbid: String, song_id: String },

    /// Replace a stored playlist
    UpdatePlaylist { songdbid: String, playlist: Playlist },

    /// Remove a playlist
    DelPlaylist { songdbid: String, playlist: Playlist },

    /// A song was played; updates play statistics
    SongPlayed { songdbid: String, song_id: String },

    /// Reset play statistics
    ClearStats { songdbid: String },

    // --- commands for the autoregisterer of `songdbid` ---
    /// Scan the basedir for new and stale songs
    AutoregisterSongs { songdbid: String },

    /// Rescan the given songs from disk
    RescanSongs { songdbid: String, songs: Vec<Arc<Song>> },

    // --- change notifications ---
    /// A song was added or its record changed
    SongChanged { songdbid: String, song: Arc<Song> },

    /// The set of artists of a database changed
    ArtistsChanged { songdbid: String },

    /// The set of albums of a database changed
    AlbumsChanged { songdbid: String },

    /// The set of tags of a database changed
    TagsChanged { songdbid: String },

    /// A playlist was added, changed or removed
    DbPlaylistChanged { songdbid: String, playlist: Playlist },

    /// A basedir scan completed
    AutoregisterFinished {
        songdbid: String,
        songs: usize,
        cancelled: bool,
    },

    // --- player ---
    /// Append songs to the play queue of every player
    PlaylistAddSongs { songs: Vec<Arc<Song>> },

    PlayerPlay { playerid: String },

    PlayerPause { playerid: String },

    PlayerTogglePause { playerid: String },

    PlayerNext { playerid: String },

    PlayerPrevious { playerid: String },

    PlayerStop { playerid: String },

    /// The current song of a player changed
    PlayerSongChanged {
        playerid: String,
        song: Option<Arc<Song>>,
    },

    // --- user interface ---
    /// Move the file list selection to a song
    FilelistJumpToSong { song: Arc<Song> },

    /// The file list selection changed
    SelectionChanged { path: String },
}

/// Routing key of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    RegisterSongs,
    RegisterPlaylists,
    UpdateSong,
    DelSong,
    UpdatePlaylist,
    DelPlaylist,
    SongPlayed,
    ClearStats,
    AutoregisterSongs,
    RescanSongs,
    SongChanged,
    ArtistsChanged,
    AlbumsChanged,
    TagsChanged,
    DbPlaylistChanged,
    AutoregisterFinished,
    PlaylistAddSongs,
    PlayerPlay,
    PlayerPause,
    PlayerTogglePause,
    PlayerNext,
    PlayerPrevious,
    PlayerStop,
    PlayerSongChanged,
    FilelistJumpToSong,
    SelectionChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RegisterSongs { .. } => EventKind::RegisterSongs,
            Event::RegisterPlaylists { .. } => EventKind::RegisterPlaylists,
            Event::UpdateSong { .. } => EventKind::UpdateSong,
            Event::DelSong { .. } => EventKind::DelSong,
            Event::UpdatePlaylist { .. } => EventKind::UpdatePlaylist,
            Event::DelPlaylist { .. } => EventKind::DelPlaylist,
            Event::SongPlayed { .. } => EventKind::SongPlayed,
            Event::ClearStats { .. } => EventKind::ClearStats,
            Event::AutoregisterSongs { .. } => EventKind::AutoregisterSongs,
            Event::RescanSongs { .. } => EventKind::RescanSongs,
            Event::SongChanged { .. } => EventKind::SongChanged,
            Event::ArtistsChanged { .. } => EventKind::ArtistsChanged,
            Event::AlbumsChanged { .. } => EventKind::AlbumsChanged,
            Event::TagsChanged { .. } => EventKind::TagsChanged,
            Event::DbPlaylistChanged { .. } => EventKind::DbPlaylistChanged,
            Event::AutoregisterFinished { .. } => EventKind::AutoregisterFinished,
            Event::PlaylistAddSongs { .. } => EventKind::PlaylistAddSongs,
            Event::PlayerPlay { .. } => EventKind::PlayerPlay,
            Event::PlayerPause { .. } => EventKind::PlayerPause,
            Event::PlayerTogglePause { .. } => EventKind::PlayerTogglePause,
            Event::PlayerNext { .. } => EventKind::PlayerNext,
            Event::PlayerPrevious { .. } => EventKind::PlayerPrevious,
            Event::PlayerStop { .. } => EventKind::PlayerStop,
            Event::PlayerSongChanged { .. } => EventKind::PlayerSongChanged,
            Event::FilelistJumpToSong { .. } => EventKind::FilelistJumpToSong,
            Event::SelectionChanged { .. } => EventKind::SelectionChanged,
        }
    }

    /// The song database this event concerns, if any
    pub fn songdbid(&self) -> Option<&str> {
        match self {
            Event::RegisterSongs { songdbid, .. }
            | Event::RegisterPlaylists { songdbid, .. }
            | Event::UpdateSong { songdbid, .. }
            | Event::DelSong { songdbid, .. }
            | Event::UpdatePlaylist { songdbid, .. }
            | Event::DelPlaylist { songdbid, .. }
            | Event::SongPlayed { songdbid, .. }
            | Event::ClearStats { songdbid }
            | Event::AutoregisterSongs { songdbid }
            | Event::RescanSongs { songdbid, .. }
            | Event::SongChanged { songdbid, .. }
            | Event::ArtistsChanged { songdbid }
            | Event::AlbumsChanged { songdbid }
            | Event::TagsChanged { songdbid }
            | Event::DbPlaylistChanged { songdbid, .. }
            | Event::AutoregisterFinished { songdbid, .. } => Some(songdbid.as_str()),
            _ => None,
        }
    }

    /// True for notifications announcing that database contents changed
    pub fn is_change_notification(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::SongChanged
                | EventKind::ArtistsChanged
                | EventKind::AlbumsChanged
                | EventKind::TagsChanged
                | EventKind::DbPlaylistChanged
        )
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            Event::RegisterSongs { songdbid, songs } => {
                format!("Register {} songs in {}", songs.len(), songdbid)
            }
            Event::RegisterPlaylists { songdbid, playlists } => {
                format!("Register {} playlists in {}", playlists.len(), songdbid)
            }
            Event::UpdateSong { song, .. } => format!("Update song {}", song.id),
            Event::DelSong { song_id, .. } => format!("Delete song {}", song_id),
            Event::UpdatePlaylist { playlist, .. } => format!("Update playlist {}", playlist.name),
            Event::DelPlaylist { playlist, .. } => format!("Delete playlist {}", playlist.name),
            Event::SongPlayed { song_id, .. } => format!("Song played: {}", song_id),
            Event::ClearStats { songdbid } => format!("Clear statistics of {}", songdbid),
            Event::AutoregisterSongs { songdbid } => format!("Scan {} for songs", songdbid),
            Event::RescanSongs { songdbid, songs } => {
                format!("Rescan {} songs in {}", songs.len(), songdbid)
            }
            Event::SongChanged { song, .. } => format!("Song changed: {}", song.id),
            Event::ArtistsChanged { songdbid } => format!("Artists of {} changed", songdbid),
            Event::AlbumsChanged { songdbid } => format!("Albums of {} changed", songdbid),
            Event::TagsChanged { songdbid } => format!("Tags of {} changed", songdbid),
            Event::DbPlaylistChanged { playlist, .. } => {
                format!("Playlist changed: {}", playlist.name)
            }
            Event::AutoregisterFinished { songdbid, songs, cancelled } => {
                if *cancelled {
                    format!("Scan of {} cancelled", songdbid)
                } else {
                    format!("Scan of {} finished: {} songs", songdbid, songs)
                }
            }
            Event::PlaylistAddSongs { songs } => format!("Queue {} songs", songs.len()),
            Event::PlayerPlay { playerid } => format!("Play on {}", playerid),
            Event::PlayerPause { playerid } => format!("Pause {}", playerid),
            Event::PlayerTogglePause { playerid } => format!("Toggle pause on {}", playerid),
            Event::PlayerNext { playerid } => format!("Next song on {}", playerid),
            Event::PlayerPrevious { playerid } => format!("Previous song on {}", playerid),
            Event::PlayerStop { playerid } => format!("Stop {}", playerid),
            Event::PlayerSongChanged { playerid, song } => match song {
                Some(song) => format!("{} now playing {}", playerid, song.title),
                None => format!("{} stopped", playerid),
            },
            Event::FilelistJumpToSong { song } => format!("Jump to {}", song.id),
            Event::SelectionChanged { path } => format!("Selected {}", path),
        }
    }
}
