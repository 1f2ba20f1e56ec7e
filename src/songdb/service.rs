/// Song database service
///
/// Owns a `SongStore` and exposes it on the hub: write events change it,
/// read requests query it. Requests and events naming another `songdbid`
/// are denied or ignored, so several databases can share one hub.
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::scan::SongBuilder;
use super::store::{Changes, SongStore};
use crate::config::{ScanConfig, SongDbConfig};
use crate::error::{ScanError, ServiceError};
use crate::messaging::{Event, EventKind, Hub, Outcome, Reply, Request, RequestKind};
use crate::service::{Service, ServiceState};

/// Write events a song database subscribes to
const WRITE_EVENTS: [EventKind; 8] = [
    EventKind::RegisterSongs,
    EventKind::RegisterPlaylists,
    EventKind::UpdateSong,
    EventKind::DelSong,
    EventKind::UpdatePlaylist,
    EventKind::DelPlaylist,
    EventKind::SongPlayed,
    EventKind::ClearStats,
];

struct SongDbInner {
    id: String,
    hub: Hub,
    store: Mutex<SongStore>,
    builder: SongBuilder,
}

pub struct SongDb {
    inner: Arc<SongDbInner>,
    service: Service,
}

impl SongDb {
    pub fn new(
        hub: &Hub,
        db: &SongDbConfig,
        scan: &ScanConfig,
        playing_stats_length: usize,
    ) -> Result<Self, ScanError> {
        let inner = Arc::new(SongDbInner {
            id: db.id.clone(),
            hub: hub.clone(),
            store: Mutex::new(
                SongStore::new(db.id.clone(), db.basedir.clone(), playing_stats_length)
                    .with_last_played_scale(scan.last_played_scale_minutes),
            ),
            builder: SongBuilder::new(db.id.clone(), db.basedir.clone(), scan)?,
        });
        let service = Service::new(format!("songdb {}", db.id), hub).with_service_id(db.id.clone());

        for kind in WRITE_EVENTS {
            let inner = Arc::clone(&inner);
            service.channel().subscribe(kind, move |event| inner.handle_write(event));
        }
        for kind in RequestKind::SONGDB {
            let inner = Arc::clone(&inner);
            service.channel().supply(kind, move |request| inner.answer(request));
        }

        Ok(Self { inner, service })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        info!(
            songdbid = %self.inner.id,
            basedir = %self.inner.builder.basedir().display(),
            "starting song database"
        );
        self.service.start()
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.service.stop()
    }
}

impl SongDbInner {
    fn handle_write(&self, event: &Event) -> anyhow::Result<()> {
        if event.songdbid() != Some(self.id.as_str()) {
            return Ok(());
        }

        let mut changes = Changes::default();
        {
            let mut store = self.store.lock();
            match event {
                Event::RegisterSongs { songs, .. } => {
                    for song in songs {
                        if let Err(e) = store.register_song(song.clone(), &mut changes) {
                            warn!(songdbid = %self.id, "cannot register song: {}", e);
                        }
                    }
                }
                Event::RegisterPlaylists { playlists, .. } => {
                    for playlist in playlists {
                        if !store.register_playlist(playlist.clone(), &mut changes) {
                            debug!(songdbid = %self.id, playlist = %playlist.name, "empty playlist not stored");
                        }
                    }
                }
                Event::UpdateSong { song, .. } => {
                    store.update_song(song.clone(), &mut changes)?;
                }
                Event::DelSong { song_id, .. } => {
                    if store.delete_song(song_id, &mut changes).is_none() {
                        debug!(songdbid = %self.id, %song_id, "song to delete not found");
                    }
                }
                Event::UpdatePlaylist { playlist, .. } => {
                    if !store.register_playlist(playlist.clone(), &mut changes) {
                        store.delete_playlist(&playlist.path, &mut changes);
                    }
                }
                Event::DelPlaylist { playlist, .. } => {
                    store.delete_playlist(&playlist.path, &mut changes);
                }
                Event::SongPlayed { song_id, .. } => {
                    if store.song_played(song_id, SystemTime::now(), &mut changes).is_none() {
                        debug!(songdbid = %self.id, %song_id, "played song not in database");
                    }
                }
                Event::ClearStats { .. } => store.clear_stats(&mut changes),
                _ => {}
            }
        }

        self.announce(changes);
        Ok(())
    }

    fn announce(&self, changes: Changes) {
        for event in changes.into_events(&self.id) {
            self.hub.notify(event);
        }
    }

    /// Register the file at `path` unless it is known already
    fn query_register_song(&self, path: &std::path::Path) -> Reply {
        if let Some(song) = self.store.lock().song_by_path(path) {
            return Reply::Song(Some(song));
        }
        let song = match self.builder.build(path) {
            Ok(song) => song,
            Err(e) => {
                debug!(songdbid = %self.id, "cannot register {}: {}", path.display(), e);
                return Reply::Song(None);
            }
        };
        let mut changes = Changes::default();
        let registered = self.store.lock().register_song(song, &mut changes);
        self.announce(changes);
        Reply::Song(registered.ok())
    }

    fn answer(&self, request: &Request) -> anyhow::Result<Outcome> {
        if request.target() != Some(self.id.as_str()) {
            return Ok(Outcome::Denied);
        }
        if let Request::QueryRegisterSong { path, .. } = request {
            return Ok(self.query_register_song(path).into());
        }

        let store = self.store.lock();
        let reply = match request {
            Request::GetDatabaseStats { .. } => Reply::Stats(store.stats()),
            Request::GetSong { id, .. } => Reply::Song(store.song(id)),
            Request::GetArtist { artist, .. } => Reply::Artist(store.artist(artist)),
            Request::GetAlbum { album, .. } => Reply::Album(store.album(album)),
            Request::GetPlaylist { path, .. } => Reply::Playlist(store.playlist(path)),
            Request::GetSongsInPlaylist { path, random, .. } => {
                Reply::Songs(store.songs_in_playlist(path, *random).unwrap_or_default())
            }
            Request::GetSongs {
                artist,
                album,
                sort,
                random,
                filters,
                ..
            } => Reply::Songs(store.songs(artist.as_deref(), album.as_deref(), filters, *sort, *random)),
            Request::GetLastPlayedSongs { filters, .. } => Reply::PlayedSongs(store.last_played(filters)),
            Request::GetTopPlayedSongs { filters, .. } => Reply::Songs(store.top_played(filters)),
            Request::GetLastAddedSongs { filters, .. } => Reply::Songs(store.last_added(filters)),
            Request::GetSongsInPlaylists { random, .. } => Reply::Songs(store.songs_in_playlists(*random)),
            Request::GetArtists { filters, .. } => Reply::Artists(store.artists(filters)),
            Request::GetAlbums { artist, filters, .. } => {
                Reply::Albums(store.albums_of(artist.as_deref(), filters))
            }
            Request::GetTags { filters, .. } => Reply::Tags(store.tags(filters)),
            Request::GetRatings { filters, .. } => Reply::Ratings(store.ratings(filters)),
            Request::GetDecades { filters, .. } => Reply::Decades(store.decades(filters)),
            Request::GetPlaylists { .. } => Reply::Playlists(store.playlists()),
            Request::GetNumberOfSongs {
                artist,
                album,
                filters,
                ..
            } => Reply::Count(store.number_of_songs(artist.as_deref(), album.as_deref(), filters)),
            Request::GetNumberOfAlbums { filters, .. } => Reply::Count(store.albums_of(None, filters).len()),
            Request::GetNumberOfArtists { filters, .. } => Reply::Count(store.artists(filters).len()),
            Request::GetNumberOfTags { filters, .. } => Reply::Count(store.tags(filters).len()),
            Request::GetNumberOfRatings { filters, .. } => Reply::Count(store.ratings(filters).len()),
            Request::GetNumberOfDecades { filters, .. } => Reply::Count(store.decades(filters).len()),
            Request::QueryRegisterSong { .. } | Request::GetPlaybackInfo { .. } => return Ok(Outcome::Denied),
        };
        Ok(reply.into())
    }
}
