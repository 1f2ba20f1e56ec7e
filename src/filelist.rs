/// Headless file list
///
/// The browsing model behind the jukebox's main list window: databases,
/// their artists, an artist's albums and an album's songs. It fills itself
/// through cached hub requests, follows database change notifications and
/// shows an empty list when nobody can answer.
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HubError, ServiceError};
use crate::messaging::{Event, EventKind, FilterSet, Hub, Reply, Request, RequestCache};
use crate::model::{Album, Artist, Song};
use crate::service::{Service, ServiceState};

/// Events after which the visible list is reloaded
const REFRESH_EVENTS: [EventKind; 5] = [
    EventKind::ArtistsChanged,
    EventKind::AlbumsChanged,
    EventKind::TagsChanged,
    EventKind::DbPlaylistChanged,
    EventKind::AutoregisterFinished,
];

/// A directory level of the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Databases,
    Artists {
        songdbid: String,
    },
    Albums {
        songdbid: String,
        artist: String,
    },
    Songs {
        songdbid: String,
        artist: Option<String>,
        album: String,
    },
}

impl Location {
    fn songdbid(&self) -> Option<&str> {
        match self {
            Location::Databases => None,
            Location::Artists { songdbid }
            | Location::Albums { songdbid, .. }
            | Location::Songs { songdbid, .. } => Some(songdbid),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Database(String),
    Artist(Artist),
    Album { artist: Option<String>, album: Album },
    Song(Arc<Song>),
}

impl Item {
    /// The level entered from this item, `None` for songs
    pub fn location(&self) -> Option<Location> {
        match self {
            Item::Database(songdbid) => Some(Location::Artists {
                songdbid: songdbid.clone(),
            }),
            Item::Artist(artist) => Some(Location::Albums {
                songdbid: artist.songdbid.clone(),
                artist: artist.name.clone(),
            }),
            Item::Album { artist, album } => Some(Location::Songs {
                songdbid: album.songdbid.clone(),
                artist: artist.clone(),
                album: album.name.clone(),
            }),
            Item::Song(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Item::Database(songdbid) => songdbid.clone(),
            Item::Artist(artist) => artist.name.clone(),
            Item::Album { album, .. } => album.name.clone(),
            Item::Song(song) => match song.tracknumber {
                Some(nr) => format!("{:02} - {}", nr, song.title),
                None => song.title.clone(),
            },
        }
    }

    /// Whether entering or selecting this item is a step towards `song`
    fn leads_to(&self, song: &Song) -> bool {
        match self {
            Item::Database(songdbid) => *songdbid == song.songdbid,
            Item::Artist(artist) => {
                artist.name == song.artist || song.album_artist.as_deref() == Some(artist.name.as_str())
            }
            Item::Album { album, .. } => album.name == song.album,
            Item::Song(candidate) => candidate.id == song.id && candidate.songdbid == song.songdbid,
        }
    }
}

struct ListState {
    location: Location,
    items: Vec<Item>,
    selected: usize,
    /// Locations above the current one and the selection they had
    history: Vec<(Location, usize)>,
    filters: FilterSet,
}

struct FilelistInner {
    hub: Hub,
    cache: RequestCache,
    databases: Vec<String>,
    skip_single_albums: bool,
    state: Mutex<ListState>,
}

pub struct Filelist {
    inner: Arc<FilelistInner>,
    service: Service,
}

impl Filelist {
    pub fn new(hub: &Hub, cache: RequestCache, databases: Vec<String>, skip_single_albums: bool) -> Self {
        let inner = Arc::new(FilelistInner {
            hub: hub.clone(),
            cache,
            state: Mutex::new(ListState {
                location: Location::Databases,
                items: databases.iter().cloned().map(Item::Database).collect(),
                selected: 0,
                history: Vec::new(),
                filters: FilterSet::new(),
            }),
            databases,
            skip_single_albums,
        });
        let service = Service::new("filelist", hub);

        for kind in REFRESH_EVENTS {
            let inner = Arc::clone(&inner);
            service.channel().subscribe(kind, move |event| {
                if let Some(songdbid) = event.songdbid() {
                    inner.cache.invalidate(songdbid);
                }
                inner.refresh_if_showing(event.songdbid());
                Ok(())
            });
        }
        let jumper = Arc::clone(&inner);
        service
            .channel()
            .subscribe(EventKind::FilelistJumpToSong, move |event| {
                if let Event::FilelistJumpToSong { song } = event {
                    jumper.jump_to_song(song);
                }
                Ok(())
            });

        Self { inner, service }
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.service.start()
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.service.stop()
    }

    pub fn location(&self) -> Location {
        self.inner.state.lock().location.clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.inner.state.lock().items.clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.inner.state.lock().items.iter().map(Item::label).collect()
    }

    pub fn selected(&self) -> Option<Item> {
        self.inner.selected()
    }

    pub fn selected_index(&self) -> usize {
        self.inner.state.lock().selected
    }

    /// Header text: the path to the current level plus visible filters
    pub fn title(&self) -> String {
        let state = self.inner.state.lock();
        let path = match &state.location {
            Location::Databases => "Databases".to_string(),
            Location::Artists { songdbid } => songdbid.clone(),
            Location::Albums { songdbid, artist } => format!("{} / {}", songdbid, artist),
            Location::Songs {
                songdbid,
                artist: Some(artist),
                album,
            } => format!("{} / {} / {}", songdbid, artist, album),
            Location::Songs {
                songdbid,
                artist: None,
                album,
            } => format!("{} / {}", songdbid, album),
        };
        format!("{}{}", path, state.filters.display_name())
    }

    /// Move the selection; out-of-range indices are clamped
    pub fn select(&self, index: usize) {
        let label = {
            let mut state = self.inner.state.lock();
            if state.items.is_empty() {
                return;
            }
            state.selected = index.min(state.items.len() - 1);
            state.items[state.selected].label()
        };
        self.inner.hub.notify(Event::SelectionChanged { path: label });
    }

    pub fn set_filters(&self, filters: FilterSet) {
        self.inner.state.lock().filters = filters;
        self.refresh();
    }

    /// Enter the selected item. With `skip_single_albums`, an artist with a
    /// single album opens that album directly.
    pub fn dir_down(&self) -> bool {
        self.inner.dir_down()
    }

    /// Return to the previous level and its selection
    pub fn dir_up(&self) -> bool {
        let Some((location, selected)) = self.inner.state.lock().history.pop() else {
            return false;
        };
        let items = self.inner.fetch(&location);
        let mut state = self.inner.state.lock();
        state.selected = selected.min(items.len().saturating_sub(1));
        state.location = location;
        state.items = items;
        true
    }

    /// Reload the items of the current level, keeping the selection if possible
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Queue every song below the selected item in the players. Returns the
    /// number of songs queued.
    pub fn insert_selected(&self) -> usize {
        let Some(item) = self.selected() else {
            return 0;
        };
        let songs = self.inner.songs_below(&item);
        let count = songs.len();
        if count > 0 {
            self.inner.hub.notify(Event::PlaylistAddSongs { songs });
        }
        count
    }

    /// Ask the autoregisterer to re-read every song below the selected item
    pub fn rescan_selected(&self) -> usize {
        let Some(item) = self.selected() else {
            return 0;
        };
        let songs = self.inner.songs_below(&item);
        let count = songs.len();
        if let Some(song) = songs.first() {
            let songdbid = song.songdbid.clone();
            self.inner.hub.notify(Event::RescanSongs { songdbid, songs });
        }
        count
    }

    /// Navigate to the album of `song` and select it
    pub fn jump_to_song(&self, song: &Song) {
        self.inner.jump_to_song(song);
    }
}

impl FilelistInner {
    fn selected(&self) -> Option<Item> {
        let state = self.state.lock();
        state.items.get(state.selected).cloned()
    }

    fn filters(&self) -> FilterSet {
        self.state.lock().filters.clone()
    }

    /// Ask through the cache; denial, failure or timeout leave the list empty
    fn ask(&self, request: Request) -> Option<Reply> {
        match self.cache.request(request) {
            Ok(reply) => Some(reply),
            Err(e @ HubError::NoSupplier { .. }) => {
                debug!("list stays empty: {}", e);
                None
            }
            Err(e) => {
                warn!("list request failed: {}", e);
                None
            }
        }
    }

    fn fetch(&self, location: &Location) -> Vec<Item> {
        let filters = self.filters();
        match location {
            Location::Databases => self.databases.iter().cloned().map(Item::Database).collect(),
            Location::Artists { songdbid } => self
                .ask(Request::get_artists(songdbid.clone(), filters))
                .and_then(|reply| reply.into_artists().ok())
                .unwrap_or_default()
                .into_iter()
                .map(Item::Artist)
                .collect(),
            Location::Albums { songdbid, artist } => self
                .ask(Request::get_albums(songdbid.clone(), Some(artist.clone()), filters))
                .and_then(|reply| reply.into_albums().ok())
                .unwrap_or_default()
                .into_iter()
                .map(|album| Item::Album {
                    artist: Some(artist.clone()),
                    album,
                })
                .collect(),
            Location::Songs {
                songdbid,
                artist,
                album,
            } => self
                .ask(Request::GetSongs {
                    songdbid: songdbid.clone(),
                    artist: artist.clone(),
                    album: Some(album.clone()),
                    sort: true,
                    random: false,
                    filters,
                })
                .and_then(|reply| reply.into_songs().ok())
                .unwrap_or_default()
                .into_iter()
                .map(Item::Song)
                .collect(),
        }
    }

    fn songs_below(&self, item: &Item) -> Vec<Arc<Song>> {
        let filters = self.filters();
        let request = match item {
            Item::Song(song) => return vec![Arc::clone(song)],
            Item::Database(songdbid) => Request::get_songs(songdbid.clone(), filters),
            Item::Artist(artist) => Request::GetSongs {
                songdbid: artist.songdbid.clone(),
                artist: Some(artist.name.clone()),
                album: None,
                sort: true,
                random: false,
                filters,
            },
            Item::Album { artist, album } => Request::GetSongs {
                songdbid: album.songdbid.clone(),
                artist: artist.clone(),
                album: Some(album.name.clone()),
                sort: true,
                random: false,
                filters,
            },
        };
        self.ask(request)
            .and_then(|reply| reply.into_songs().ok())
            .unwrap_or_default()
    }

    fn dir_down(&self) -> bool {
        let Some(location) = self.selected().and_then(|item| item.location()) else {
            return false;
        };
        let mut location = location;
        let mut items = self.fetch(&location);

        if self.skip_single_albums {
            let single = match (&location, items.as_slice()) {
                (Location::Albums { .. }, [only]) => only.location(),
                _ => None,
            };
            if let Some(album) = single {
                items = self.fetch(&album);
                location = album;
            }
        }

        let mut state = self.state.lock();
        let previous = (state.location.clone(), state.selected);
        state.history.push(previous);
        state.location = location;
        state.items = items;
        state.selected = 0;
        true
    }

    fn refresh(&self) {
        let (location, selected_item) = {
            let state = self.state.lock();
            (state.location.clone(), state.items.get(state.selected).cloned())
        };
        let items = self.fetch(&location);

        let mut state = self.state.lock();
        if state.location != location {
            // navigated away meanwhile
            return;
        }
        let selected = selected_item
            .and_then(|old| items.iter().position(|item| item.label() == old.label()))
            .unwrap_or(state.selected);
        state.selected = selected.min(items.len().saturating_sub(1));
        state.items = items;
    }

    fn refresh_if_showing(&self, songdbid: Option<&str>) {
        let showing = self.state.lock().location.songdbid().map(str::to_owned);
        match (showing.as_deref(), songdbid) {
            (Some(showing), Some(changed)) if showing != changed => {}
            _ => self.refresh(),
        }
    }

    fn jump_to_song(&self, song: &Song) {
        let mut history = Vec::new();
        let mut location = Location::Databases;
        let mut items = self.fetch(&location);
        let mut selected = 0;

        while let Some(index) = items.iter().position(|item| item.leads_to(song)) {
            match items[index].location() {
                Some(next) => {
                    history.push((location, index));
                    items = self.fetch(&next);
                    location = next;
                }
                None => {
                    selected = index;
                    break;
                }
            }
        }

        let mut state = self.state.lock();
        state.history = history;
        state.location = location;
        state.items = items;
        state.selected = selected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScanConfig, SongDbConfig};
    use crate::songdb::SongDb;
    use std::path::Path;
    use std::time::Duration;

    fn song(basedir: &Path, artist: &str, album: &str, nr: u32, title: &str) -> Song {
        let id = format!("{}/{}/{:02}.mp3", artist, album, nr);
        let mut song = Song::new("local", id.clone(), basedir.join(&id));
        song.artist = artist.to_string();
        song.album = album.to_string();
        song.title = title.to_string();
        song.tracknumber = Some(nr);
        song
    }

    fn library(hub: &Hub, basedir: &Path) -> SongDb {
        let db = SongDb::new(
            hub,
            &SongDbConfig {
                id: "local".to_string(),
                basedir: basedir.to_path_buf(),
                autoregister: false,
            },
            &ScanConfig::default(),
            10,
        )
        .unwrap();
        db.start().unwrap();
        hub.notify(Event::RegisterSongs {
            songdbid: "local".to_string(),
            songs: vec![
                song(basedir, "Queen", "Innuendo", 1, "Innuendo"),
                song(basedir, "Queen", "Innuendo", 2, "Headlong"),
                song(basedir, "Queen", "Jazz", 1, "Mustapha"),
                song(basedir, "Bowie", "Low", 1, "Speed of Life"),
            ],
        });
        db
    }

    #[test]
    fn test_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let _db = library(&hub, dir.path());
        let list = Filelist::new(&hub, RequestCache::new(hub.clone()), vec!["local".into()], true);

        assert_eq!(list.labels(), vec!["local"]);
        assert!(list.dir_down());
        assert_eq!(list.labels(), vec!["Bowie", "Queen"]);

        // Bowie has a single album: straight to its songs
        list.select(0);
        assert!(list.dir_down());
        assert_eq!(list.title(), "local / Bowie / Low");
        assert_eq!(list.labels(), vec!["01 - Speed of Life"]);
        assert!(!list.dir_down());

        assert!(list.dir_up());
        assert_eq!(list.selected_index(), 0);
        list.select(1);
        assert!(list.dir_down());
        assert_eq!(list.labels(), vec!["Innuendo", "Jazz"]);
        assert!(list.dir_down());
        assert_eq!(list.labels(), vec!["01 - Innuendo", "02 - Headlong"]);

        assert!(list.dir_up());
        assert!(list.dir_up());
        assert_eq!(list.selected_index(), 1);
        assert!(list.dir_up());
        assert_eq!(list.location(), Location::Databases);
        assert!(!list.dir_up());
    }

    #[test]
    fn test_insert_and_jump() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let _db = library(&hub, dir.path());
        let list = Filelist::new(&hub, RequestCache::new(hub.clone()), vec!["local".into()], false);

        list.dir_down();
        list.select(1);
        assert_eq!(list.insert_selected(), 3);

        let target = song(dir.path(), "Queen", "Jazz", 1, "Mustapha");
        list.jump_to_song(&target);
        assert_eq!(list.title(), "local / Queen / Jazz");
        match list.selected() {
            Some(Item::Song(song)) => assert_eq!(song.title, "Mustapha"),
            other => panic!("unexpected selection {:?}", other),
        }
        assert!(list.dir_up());
        assert_eq!(list.selected_index(), 1);
    }

    #[test]
    fn test_unknown_database_shows_empty_list() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let list = Filelist::new(&hub, RequestCache::new(hub.clone()), vec!["offline".into()], true);
        assert!(list.dir_down());
        assert!(list.items().is_empty());
        assert!(list.selected().is_none());
        assert_eq!(list.insert_selected(), 0);
        assert!(!list.dir_down());
    }
}
