/// In-memory song store
///
/// Holds the songs, playlists and play statistics of one song database and
/// answers the filtered queries behind the songdb requests. Every write
/// reports what it changed so the owning service can announce it.
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rand::Rng;

use crate::error::ScanError;
use crate::messaging::{Event, Filter, FilterSet};
use crate::model::{Album, Artist, DbStats, PlayedSong, Playlist, Song, Tag};

/// What a write changed
#[derive(Debug, Default)]
pub struct Changes {
    /// Songs added or modified, in write order
    pub songs: Vec<Arc<Song>>,
    pub artists: bool,
    pub albums: bool,
    pub tags: bool,
    /// Playlists added, modified or removed
    pub playlists: Vec<Playlist>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
            && !self.artists
            && !self.albums
            && !self.tags
            && self.playlists.is_empty()
    }

    /// Change notifications to publish for `songdbid`
    pub fn into_events(self, songdbid: &str) -> Vec<Event> {
        let mut events = Vec::new();
        for song in self.songs {
            events.push(Event::SongChanged {
                songdbid: songdbid.to_string(),
                song,
            });
        }
        if self.artists {
            events.push(Event::ArtistsChanged {
                songdbid: songdbid.to_string(),
            });
        }
        if self.albums {
            events.push(Event::AlbumsChanged {
                songdbid: songdbid.to_string(),
            });
        }
        if self.tags {
            events.push(Event::TagsChanged {
                songdbid: songdbid.to_string(),
            });
        }
        for playlist in self.playlists {
            events.push(Event::DbPlaylistChanged {
                songdbid: songdbid.to_string(),
                playlist,
            });
        }
        events
    }
}

#[derive(Clone, Copy)]
enum Delta {
    Add,
    Remove,
}

/// Reference counts of names; reports when a name appears or disappears
#[derive(Default)]
struct NameIndex(HashMap<String, usize>);

impl NameIndex {
    fn apply(&mut self, name: &str, delta: Delta) -> bool {
        if name.is_empty() {
            return false;
        }
        match delta {
            Delta::Add => {
                let count = self.0.entry(name.to_string()).or_insert(0);
                *count += 1;
                *count == 1
            }
            Delta::Remove => match self.0.get_mut(name) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    self.0.remove(name);
                    true
                }
                None => false,
            },
        }
    }

    fn count(&self, name: &str) -> usize {
        self.0.get(name).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

pub struct SongStore {
    id: String,
    basedir: PathBuf,
    playing_stats_length: usize,
    /// Minutes over which a recent play fades out of the random weight
    last_played_scale: f64,
    songs: BTreeMap<String, Arc<Song>>,
    playlists: BTreeMap<PathBuf, Playlist>,
    last_played: VecDeque<PlayedSong>,
    artists: NameIndex,
    albums: NameIndex,
    tags: NameIndex,
}

impl SongStore {
    pub fn new(id: impl Into<String>, basedir: impl Into<PathBuf>, playing_stats_length: usize) -> Self {
        Self {
            id: id.into(),
            basedir: basedir.into(),
            playing_stats_length,
            last_played_scale: 1440.0,
            songs: BTreeMap::new(),
            playlists: BTreeMap::new(),
            last_played: VecDeque::new(),
            artists: NameIndex::default(),
            albums: NameIndex::default(),
            tags: NameIndex::default(),
        }
    }

    pub fn with_last_played_scale(mut self, minutes: f64) -> Self {
        self.last_played_scale = minutes;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Song id for `path`: its location relative to the basedir, with `/`
    /// separators. Relative paths are taken as relative to the basedir.
    pub fn song_id(&self, path: &Path) -> Result<String, ScanError> {
        song_id(&self.basedir, path)
    }

    /// Absolute path of a song id
    pub fn song_path(&self, id: &str) -> PathBuf {
        self.basedir.join(id)
    }

    // --- writes ---

    fn index(&mut self, song: &Song, delta: Delta, changes: &mut Changes) {
        changes.artists |= self.artists.apply(&song.artist, delta);
        if let Some(album_artist) = song.album_artist.as_deref() {
            if album_artist != song.artist {
                changes.artists |= self.artists.apply(album_artist, delta);
            }
        }
        changes.albums |= self.albums.apply(&song.album, delta);
        for tag in &song.tags {
            changes.tags |= self.tags.apply(tag, delta);
        }
    }

    fn insert(&mut self, song: Song, changes: &mut Changes) -> Arc<Song> {
        self.index(&song, Delta::Add, changes);
        let song = Arc::new(song);
        self.songs.insert(song.id.clone(), Arc::clone(&song));
        changes.songs.push(Arc::clone(&song));
        song
    }

    /// Swap a stored record for `song`. New names are counted before old ones
    /// are released so a name kept by both is not reported.
    fn replace(&mut self, old: &Song, song: Song, changes: &mut Changes) -> Arc<Song> {
        self.index(&song, Delta::Add, changes);
        self.index(old, Delta::Remove, changes);
        let song = Arc::new(song);
        self.songs.insert(song.id.clone(), Arc::clone(&song));
        changes.songs.push(Arc::clone(&song));
        song
    }

    fn take(&mut self, id: &str, changes: &mut Changes) -> Option<Arc<Song>> {
        let song = self.songs.remove(id)?;
        self.index(&song, Delta::Remove, changes);
        Some(song)
    }

    /// Add a song, or merge its metadata into the stored record keeping the
    /// play statistics. Registering identical metadata changes nothing.
    pub fn register_song(&mut self, mut song: Song, changes: &mut Changes) -> Result<Arc<Song>, ScanError> {
        song.id = self.song_id(&song.path)?;
        song.path = self.song_path(&song.id);
        song.songdbid = self.id.clone();

        if let Some(stored) = self.songs.get(&song.id) {
            if stored.same_metadata(&song) {
                return Ok(Arc::clone(stored));
            }
            let stored = Arc::clone(stored);
            let mut merged = (*stored).clone();
            merged.update_metadata(&song);
            return Ok(self.replace(&stored, merged, changes));
        }

        let now = SystemTime::now();
        song.date_added = song.date_added.or(Some(now));
        song.date_changed = song.date_changed.or(Some(now));
        Ok(self.insert(song, changes))
    }

    /// Replace the stored record of a song, statistics included
    pub fn update_song(&mut self, mut song: Song, changes: &mut Changes) -> Result<Arc<Song>, ScanError> {
        song.id = self.song_id(&song.path)?;
        song.path = self.song_path(&song.id);
        song.songdbid = self.id.clone();
        match self.songs.get(&song.id).cloned() {
            Some(stored) if *stored == song => Ok(stored),
            Some(stored) => Ok(self.replace(&stored, song, changes)),
            None => Ok(self.insert(song, changes)),
        }
    }

    /// Remove a song; its entries in playlists and play statistics go with it
    pub fn delete_song(&mut self, id: &str, changes: &mut Changes) -> Option<Arc<Song>> {
        let song = self.take(id, changes)?;
        self.last_played.retain(|played| played.song.id != id);

        let path = self.song_path(id);
        let affected: Vec<PathBuf> = self
            .playlists
            .values()
            .filter(|playlist| playlist.songs.contains(&path))
            .map(|playlist| playlist.path.clone())
            .collect();
        for playlist_path in affected {
            if let Some(mut playlist) = self.playlists.remove(&playlist_path) {
                playlist.songs.retain(|entry| *entry != path);
                if !playlist.songs.is_empty() {
                    self.playlists.insert(playlist_path, playlist.clone());
                }
                changes.playlists.push(playlist);
            }
        }
        Some(song)
    }

    /// Store a playlist, dropping entries that are not registered songs.
    /// Returns false (and stores nothing) when no entry survives.
    pub fn register_playlist(&mut self, playlist: Playlist, changes: &mut Changes) -> bool {
        let songs: Vec<PathBuf> = playlist
            .songs
            .iter()
            .filter_map(|entry| self.song_id(entry).ok())
            .filter(|id| self.songs.contains_key(id))
            .map(|id| self.song_path(&id))
            .collect();
        if songs.is_empty() {
            return false;
        }

        let playlist = Playlist {
            songs,
            ..playlist
        };
        if self.playlists.get(&playlist.path) == Some(&playlist) {
            return true;
        }
        self.playlists.insert(playlist.path.clone(), playlist.clone());
        changes.playlists.push(playlist);
        true
    }

    pub fn delete_playlist(&mut self, path: &Path, changes: &mut Changes) -> bool {
        match self.playlists.remove(path) {
            Some(playlist) => {
                changes.playlists.push(playlist);
                true
            }
            None => false,
        }
    }

    /// Count a play of `id` and put it on top of the last-played list
    pub fn song_played(&mut self, id: &str, at: SystemTime, changes: &mut Changes) -> Option<Arc<Song>> {
        let stored = self.songs.get(id)?;
        let mut song = (**stored).clone();
        song.playcount += 1;
        song.date_lastplayed = Some(at);
        let song = Arc::new(song);
        self.songs.insert(id.to_string(), Arc::clone(&song));

        self.last_played.push_front(PlayedSong {
            song: Arc::clone(&song),
            played_at: at,
        });
        self.last_played.truncate(self.playing_stats_length);
        changes.songs.push(Arc::clone(&song));
        Some(song)
    }

    /// Reset play counts and the last-played list
    pub fn clear_stats(&mut self, changes: &mut Changes) {
        self.last_played.clear();
        for song in self.songs.values_mut() {
            if song.playcount == 0 && song.date_lastplayed.is_none() {
                continue;
            }
            let mut cleared = (**song).clone();
            cleared.playcount = 0;
            cleared.date_lastplayed = None;
            *song = Arc::new(cleared);
            changes.songs.push(Arc::clone(song));
        }
    }

    // --- reads ---

    pub fn song(&self, id: &str) -> Option<Arc<Song>> {
        self.songs.get(id).cloned()
    }

    pub fn song_by_path(&self, path: &Path) -> Option<Arc<Song>> {
        self.song_id(path).ok().and_then(|id| self.song(&id))
    }

    /// Every stored song, in id order
    pub fn all_songs(&self) -> Vec<Arc<Song>> {
        self.songs.values().cloned().collect()
    }

    fn matching<'a>(
        &'a self,
        artist: Option<&'a str>,
        album: Option<&'a str>,
        filters: &'a FilterSet,
    ) -> impl Iterator<Item = &'a Arc<Song>> + 'a {
        self.songs.values().filter(move |song| {
            artist.map_or(true, |artist| by_artist(song, artist))
                && album.map_or(true, |album| song.album == album)
                && song_matches(song, filters)
        })
    }

    /// Random order where each song draws `uniform * 2^weight` and the
    /// highest draws come first
    fn shuffle(&self, songs: &mut Vec<Arc<Song>>) {
        let now = SystemTime::now();
        let mut rng = rand::thread_rng();
        let mut drawn: Vec<(f64, Arc<Song>)> = songs
            .drain(..)
            .map(|song| {
                let weight = random_weight(&song, now, self.last_played_scale);
                (rng.gen::<f64>() * 2f64.powf(weight), song)
            })
            .collect();
        drawn.sort_by(|a, b| b.0.total_cmp(&a.0));
        songs.extend(drawn.into_iter().map(|(_, song)| song));
    }

    pub fn songs(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
        filters: &FilterSet,
        sort: bool,
        random: bool,
    ) -> Vec<Arc<Song>> {
        let mut songs: Vec<Arc<Song>> = self.matching(artist, album, filters).cloned().collect();
        if random {
            self.shuffle(&mut songs);
        } else if sort {
            songs.sort_by(|a, b| {
                a.artist
                    .to_lowercase()
                    .cmp(&b.artist.to_lowercase())
                    .then_with(|| a.album.to_lowercase().cmp(&b.album.to_lowercase()))
                    .then_with(|| a.tracknumber.cmp(&b.tracknumber))
                    .then_with(|| a.title.cmp(&b.title))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        songs
    }

    pub fn number_of_songs(&self, artist: Option<&str>, album: Option<&str>, filters: &FilterSet) -> usize {
        self.matching(artist, album, filters).count()
    }

    pub fn artist(&self, name: &str) -> Option<Artist> {
        match self.artists.count(name) {
            0 => None,
            song_count => Some(Artist {
                songdbid: self.id.clone(),
                name: name.to_string(),
                song_count,
            }),
        }
    }

    /// Artists of the matching songs, album artists included, sorted by name
    pub fn artists(&self, filters: &FilterSet) -> Vec<Artist> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for song in self.matching(None, None, filters) {
            let mut names = vec![song.artist.as_str()];
            if let Some(album_artist) = song.album_artist.as_deref() {
                if album_artist != song.artist {
                    names.push(album_artist);
                }
            }
            for name in names.into_iter().filter(|name| !name.is_empty()) {
                *counts.entry(name.to_string()).or_insert(0) += 1;
            }
        }
        let mut artists: Vec<Artist> = counts
            .into_iter()
            .map(|(name, song_count)| Artist {
                songdbid: self.id.clone(),
                name,
                song_count,
            })
            .collect();
        artists.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        artists
    }

    pub fn album(&self, name: &str) -> Option<Album> {
        self.albums_of(None, &FilterSet::new().with(Filter::Album(name.to_string())))
            .into_iter()
            .next()
    }

    /// Albums of the matching songs, optionally only those `artist` appears on
    pub fn albums_of(&self, artist: Option<&str>, filters: &FilterSet) -> Vec<Album> {
        let mut albums: BTreeMap<String, (BTreeSet<String>, usize)> = BTreeMap::new();
        for song in self.matching(artist, None, filters) {
            if song.album.is_empty() {
                continue;
            }
            let entry = albums.entry(song.album.clone()).or_default();
            entry.0.insert(song.album_artist_or_artist().to_string());
            entry.1 += 1;
        }
        let mut albums: Vec<Album> = albums
            .into_iter()
            .map(|(name, (artists, song_count))| Album {
                songdbid: self.id.clone(),
                name,
                artists: artists.into_iter().collect(),
                song_count,
            })
            .collect();
        albums.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        albums
    }

    pub fn tags(&self, filters: &FilterSet) -> Vec<Tag> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for song in self.matching(None, None, filters) {
            for tag in &song.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .map(|(name, song_count)| Tag { name, song_count })
            .collect()
    }

    /// Song counts per rating, highest rating first, unrated last
    pub fn ratings(&self, filters: &FilterSet) -> Vec<(Option<u8>, usize)> {
        let mut counts: BTreeMap<Option<u8>, usize> = BTreeMap::new();
        for song in self.matching(None, None, filters) {
            *counts.entry(song.rating).or_insert(0) += 1;
        }
        let mut ratings: Vec<(Option<u8>, usize)> = counts.into_iter().collect();
        ratings.sort_by(|a, b| match (a.0, b.0) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(x), Some(y)) => y.cmp(&x),
        });
        ratings
    }

    pub fn decades(&self, filters: &FilterSet) -> Vec<(u16, usize)> {
        let mut counts: BTreeMap<u16, usize> = BTreeMap::new();
        for song in self.matching(None, None, filters) {
            if let Some(decade) = song.decade() {
                *counts.entry(decade).or_insert(0) += 1;
            }
        }
        counts.into_iter().collect()
    }

    pub fn playlist(&self, path: &Path) -> Option<Playlist> {
        self.playlists.get(path).cloned()
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.playlists.values().cloned().collect()
    }

    pub fn songs_in_playlist(&self, path: &Path, random: bool) -> Option<Vec<Arc<Song>>> {
        let playlist = self.playlists.get(path)?;
        let mut songs: Vec<Arc<Song>> = playlist
            .songs
            .iter()
            .filter_map(|entry| self.song_by_path(entry))
            .collect();
        if random {
            self.shuffle(&mut songs);
        }
        Some(songs)
    }

    /// Songs appearing in any playlist, each once
    pub fn songs_in_playlists(&self, random: bool) -> Vec<Arc<Song>> {
        let ids: BTreeSet<String> = self
            .playlists
            .values()
            .flat_map(|playlist| playlist.songs.iter())
            .filter_map(|entry| self.song_id(entry).ok())
            .collect();
        let mut songs: Vec<Arc<Song>> = ids.iter().filter_map(|id| self.song(id)).collect();
        if random {
            self.shuffle(&mut songs);
        }
        songs
    }

    pub fn last_played(&self, filters: &FilterSet) -> Vec<PlayedSong> {
        self.last_played
            .iter()
            .filter(|played| song_matches(&played.song, filters))
            .cloned()
            .collect()
    }

    /// Most played songs, at most `playing_stats_length`
    pub fn top_played(&self, filters: &FilterSet) -> Vec<Arc<Song>> {
        let mut songs: Vec<Arc<Song>> = self
            .matching(None, None, filters)
            .filter(|song| song.playcount > 0)
            .cloned()
            .collect();
        songs.sort_by(|a, b| b.playcount.cmp(&a.playcount).then_with(|| a.id.cmp(&b.id)));
        songs.truncate(self.playing_stats_length);
        songs
    }

    /// Most recently added songs, at most `playing_stats_length`
    pub fn last_added(&self, filters: &FilterSet) -> Vec<Arc<Song>> {
        let mut songs: Vec<Arc<Song>> = self.matching(None, None, filters).cloned().collect();
        songs.sort_by(|a, b| b.date_added.cmp(&a.date_added).then_with(|| a.id.cmp(&b.id)));
        songs.truncate(self.playing_stats_length);
        songs
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            id: self.id.clone(),
            kind: "memory",
            basedir: self.basedir.clone(),
            songs: self.songs.len(),
            albums: self.albums.len(),
            artists: self.artists.len(),
            tags: self.tags.len(),
            decades: self.decades(&FilterSet::new()).len(),
            playlists: self.playlists.len(),
        }
    }
}

/// Song id for `path` below `basedir`
pub fn song_id(basedir: &Path, path: &Path) -> Result<String, ScanError> {
    let relative = if path.is_absolute() {
        path.strip_prefix(basedir).map_err(|_| ScanError::OutsideBasedir {
            path: path.display().to_string(),
            basedir: basedir.display().to_string(),
        })?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(ScanError::OutsideBasedir {
                    path: path.display().to_string(),
                    basedir: basedir.display().to_string(),
                })
            }
        }
    }
    if parts.is_empty() {
        return Err(ScanError::OutsideBasedir {
            path: path.display().to_string(),
            basedir: basedir.display().to_string(),
        });
    }
    Ok(parts.join("/"))
}

/// Exponent of a song's random weight: its rating (unrated counts as 3),
/// lowered by up to 2 right after a play and never below 1
fn random_weight(song: &Song, now: SystemTime, last_played_scale: f64) -> f64 {
    let mut weight = f64::from(song.rating.unwrap_or(3));
    if let Some(played) = song.date_lastplayed {
        let minutes = now.duration_since(played).unwrap_or_default().as_secs_f64() / 60.0;
        weight -= 2.0 * (-minutes / last_played_scale).exp();
        weight = weight.max(1.0);
    }
    weight
}

fn by_artist(song: &Song, artist: &str) -> bool {
    song.artist == artist || song.album_artist.as_deref() == Some(artist)
}

fn song_matches(song: &Song, filters: &FilterSet) -> bool {
    filters.iter().all(|filter| match filter {
        Filter::Artist(artist) => by_artist(song, artist),
        Filter::Album(album) => song.album == *album,
        Filter::Compilation(compilation) => song.compilation == *compilation,
        Filter::Search(text) => {
            let text = text.to_lowercase();
            [&song.title, &song.album, &song.artist]
                .iter()
                .any(|field| field.to_lowercase().contains(&text))
        }
        Filter::Tag { name, inverted } => song.tags.contains(name) != *inverted,
        Filter::Rating(rating) => song.rating == *rating,
        Filter::Decade(decade) => song.decade() == Some(*decade),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::EventKind;

    fn song(path: &str, artist: &str, album: &str, title: &str) -> Song {
        let mut song = Song::new("", "", format!("/music/{}", path));
        song.artist = artist.to_string();
        song.album = album.to_string();
        song.title = title.to_string();
        song
    }

    fn store_with_songs() -> SongStore {
        let mut store = SongStore::new("local", "/music", 3);
        let mut changes = Changes::default();
        let mut first = song("Queen/Innuendo/01.mp3", "Queen", "Innuendo", "Innuendo");
        first.tags = vec!["Rock".into()];
        first.year = Some(1991);
        let mut second = song("Queen/Innuendo/02.mp3", "Queen", "Innuendo", "I'm Going Slightly Mad");
        second.tracknumber = Some(2);
        second.rating = Some(4);
        let mut third = song("Bowie/Low/01.mp3", "David Bowie", "Low", "Speed of Life");
        third.tags = vec!["Rock".into(), "Instrumental".into()];
        third.year = Some(1977);
        for song in [first, second, third] {
            store.register_song(song, &mut changes).unwrap();
        }
        store
    }

    #[test]
    fn test_song_id_is_relative_to_basedir() {
        let basedir = Path::new("/music");
        assert_eq!(
            song_id(basedir, Path::new("/music/Queen/Innuendo/01.mp3")).unwrap(),
            "Queen/Innuendo/01.mp3"
        );
        assert_eq!(song_id(basedir, Path::new("Queen/01.mp3")).unwrap(), "Queen/01.mp3");
        assert!(song_id(basedir, Path::new("/elsewhere/01.mp3")).is_err());
        assert!(song_id(basedir, Path::new("../01.mp3")).is_err());
    }

    #[test]
    fn test_register_reports_new_names_once() {
        let mut store = SongStore::new("local", "/music", 10);
        let mut changes = Changes::default();
        store
            .register_song(song("Queen/Innuendo/01.mp3", "Queen", "Innuendo", "Innuendo"), &mut changes)
            .unwrap();
        assert!(changes.artists && changes.albums);
        assert_eq!(changes.songs.len(), 1);

        let mut changes = Changes::default();
        store
            .register_song(song("Queen/Innuendo/02.mp3", "Queen", "Innuendo", "Mad"), &mut changes)
            .unwrap();
        assert!(!changes.artists && !changes.albums);
        assert_eq!(changes.songs.len(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut store = store_with_songs();
        let mut changes = Changes::default();
        store
            .register_song(song("Bowie/Low/01.mp3", "David Bowie", "Low", "Speed of Life"), &mut changes)
            .unwrap();
        // tags differ from the stored record, so this is a metadata update
        assert_eq!(changes.songs.len(), 1);

        let again = (*store.song("Bowie/Low/01.mp3").unwrap()).clone();
        let mut changes = Changes::default();
        store.register_song(again, &mut changes).unwrap();
        assert!(changes.is_empty());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_register_merge_keeps_statistics() {
        let mut store = store_with_songs();
        let mut changes = Changes::default();
        store.song_played("Queen/Innuendo/01.mp3", SystemTime::now(), &mut changes);

        let renamed = song("Queen/Innuendo/01.mp3", "Queen", "Innuendo", "Innuendo (Remaster)");
        store.register_song(renamed, &mut changes).unwrap();
        let stored = store.song("Queen/Innuendo/01.mp3").unwrap();
        assert_eq!(stored.title, "Innuendo (Remaster)");
        assert_eq!(stored.playcount, 1);
    }

    #[test]
    fn test_outside_basedir_is_refused() {
        let mut store = SongStore::new("local", "/music", 10);
        let mut changes = Changes::default();
        let mut stray = Song::new("local", "", "/tmp/stray.mp3");
        stray.title = "Stray".into();
        assert!(matches!(
            store.register_song(stray, &mut changes),
            Err(ScanError::OutsideBasedir { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_reports_vanished_names() {
        let mut store = store_with_songs();
        let mut changes = Changes::default();
        store.delete_song("Queen/Innuendo/01.mp3", &mut changes).unwrap();
        assert!(!changes.artists);
        assert!(!changes.tags);

        let mut changes = Changes::default();
        store.delete_song("Bowie/Low/01.mp3", &mut changes).unwrap();
        assert!(changes.artists && changes.albums && changes.tags);
        assert!(store.delete_song("Bowie/Low/01.mp3", &mut changes).is_none());
    }

    #[test]
    fn test_filtered_queries() {
        let store = store_with_songs();
        let rock = FilterSet::new().with(Filter::Tag { name: "Rock".into(), inverted: false });
        assert_eq!(store.number_of_songs(None, None, &rock), 2);

        let not_rock = FilterSet::new().with(Filter::Tag { name: "Rock".into(), inverted: true });
        let songs = store.songs(None, None, &not_rock, true, false);
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title, "I'm Going Slightly Mad");

        let names: Vec<String> = store.artists(&rock).into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["David Bowie", "Queen"]);

        assert_eq!(store.decades(&FilterSet::new()), vec![(1970, 1), (1990, 1)]);
        assert_eq!(store.ratings(&FilterSet::new()), vec![(Some(4), 1), (None, 2)]);

        let search = FilterSet::new().with(Filter::Search("speed".into()));
        assert_eq!(store.number_of_songs(None, None, &search), 1);

        let albums = store.albums_of(Some("Queen"), &FilterSet::new());
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].song_count, 2);
        assert!(!albums[0].is_compilation());
        assert_eq!(store.album("Low").unwrap().artists, vec!["David Bowie"]);
    }

    #[test]
    fn test_last_played_is_bounded() {
        let mut store = store_with_songs();
        let mut changes = Changes::default();
        for _ in 0..5 {
            store.song_played("Queen/Innuendo/02.mp3", SystemTime::now(), &mut changes);
        }
        assert_eq!(store.last_played(&FilterSet::new()).len(), 3);
        assert_eq!(store.top_played(&FilterSet::new())[0].playcount, 5);

        let mut changes = Changes::default();
        store.clear_stats(&mut changes);
        assert_eq!(changes.songs.len(), 1);
        assert!(store.last_played(&FilterSet::new()).is_empty());
        assert!(store.top_played(&FilterSet::new()).is_empty());
    }

    #[test]
    fn test_playlists_drop_unknown_entries() {
        let mut store = store_with_songs();
        let mut changes = Changes::default();

        let empty = Playlist::new(
            "/music/lists/empty.m3u",
            vec![PathBuf::from("/music/unknown.mp3"), PathBuf::from("/elsewhere/x.mp3")],
        );
        assert!(!store.register_playlist(empty, &mut changes));
        assert!(store.playlists().is_empty());

        let mixed = Playlist::new(
            "/music/lists/mixed.m3u",
            vec![
                PathBuf::from("/music/Queen/Innuendo/01.mp3"),
                PathBuf::from("/music/unknown.mp3"),
                PathBuf::from("/music/Bowie/Low/01.mp3"),
            ],
        );
        assert!(store.register_playlist(mixed, &mut changes));
        let stored = store.playlist(Path::new("/music/lists/mixed.m3u")).unwrap();
        assert_eq!(stored.songs.len(), 2);
        assert_eq!(store.songs_in_playlists(false).len(), 2);

        let mut changes = Changes::default();
        store.delete_song("Bowie/Low/01.mp3", &mut changes);
        assert_eq!(changes.playlists.len(), 1);
        let songs = store
            .songs_in_playlist(Path::new("/music/lists/mixed.m3u"), false)
            .unwrap();
        assert_eq!(songs.len(), 1);
    }

    #[test]
    fn test_changes_into_events() {
        let mut store = SongStore::new("local", "/music", 10);
        let mut changes = Changes::default();
        let mut tagged = song("Queen/Innuendo/01.mp3", "Queen", "Innuendo", "Innuendo");
        tagged.tags = vec!["Rock".into()];
        store.register_song(tagged, &mut changes).unwrap();

        let kinds: Vec<EventKind> = changes.into_events("local").iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SongChanged,
                EventKind::ArtistsChanged,
                EventKind::AlbumsChanged,
                EventKind::TagsChanged
            ]
        );
    }

    #[test]
    fn test_random_order_favours_high_ratings() {
        let mut store = SongStore::new("local", "/music", 10);
        let mut changes = Changes::default();
        let mut loved = song("a/x/01.mp3", "a", "x", "Loved");
        loved.rating = Some(5);
        let mut skipped = song("a/x/02.mp3", "a", "x", "Skipped");
        skipped.rating = Some(1);
        store.register_song(loved, &mut changes).unwrap();
        store.register_song(skipped, &mut changes).unwrap();

        let draws = 400;
        let loved_first = (0..draws)
            .filter(|_| store.songs(None, None, &FilterSet::new(), false, true)[0].title == "Loved")
            .count();
        // 2^5 against 2^1: loved leads about 31 times in 32
        assert!(loved_first > draws * 3 / 4, "loved first only {} of {}", loved_first, draws);
    }

    #[test]
    fn test_recent_play_lowers_random_weight() {
        let now = SystemTime::now();
        let mut fresh = song("a/x/01.mp3", "a", "x", "Fresh");
        assert_eq!(random_weight(&fresh, now, 60.0), 3.0);

        fresh.date_lastplayed = Some(now);
        assert_eq!(random_weight(&fresh, now, 60.0), 1.0);

        fresh.date_lastplayed = Some(now - std::time::Duration::from_secs(60 * 60 * 24));
        assert!(random_weight(&fresh, now, 60.0) > 2.99);

        fresh.rating = Some(1);
        fresh.date_lastplayed = Some(now);
        assert_eq!(random_weight(&fresh, now, 60.0), 1.0);
    }
}
