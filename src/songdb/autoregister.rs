/// Background registration of the songs below a database's basedir
///
/// Runs on its own service so a long scan never blocks the database. Scans
/// stay responsive by handling pending messages between directories and stop
/// early when the service is stopped.
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

use anyhow::Context;

use super::scan::SongBuilder;
use crate::config::{ScanConfig, SongDbConfig};
use crate::error::{HubError, ScanError, ServiceError};
use crate::messaging::{Channel, Event, EventKind, FilterSet, Hub, Priority, Reply, Request};
use crate::model::Song;
use crate::service::{Service, ServiceState};

struct ScanInner {
    songdbid: String,
    hub: Hub,
    builder: SongBuilder,
    batch_size: usize,
    channel: Weak<Channel>,
}

/// Outcome of one basedir walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Song files found
    pub found: usize,
    /// Songs sent for registration (new or changed)
    pub registered: usize,
    /// Known songs whose file is gone
    pub removed: usize,
    pub cancelled: bool,
}

pub struct Autoregisterer {
    service: Service,
}

impl Autoregisterer {
    pub fn new(hub: &Hub, db: &SongDbConfig, scan: &ScanConfig) -> Result<Self, ScanError> {
        let service = Service::new(format!("autoregisterer {}", db.id), hub).with_service_id(db.id.clone());
        let inner = Arc::new(ScanInner {
            songdbid: db.id.clone(),
            hub: hub.clone(),
            builder: SongBuilder::new(db.id.clone(), db.basedir.clone(), scan)?,
            batch_size: scan.batch_size.max(1),
            channel: Arc::downgrade(service.channel()),
        });

        let scanner = Arc::clone(&inner);
        service.channel().subscribe(EventKind::AutoregisterSongs, move |event| {
            if event.songdbid() != Some(scanner.songdbid.as_str()) {
                return Ok(());
            }
            let summary = scanner.autoregister()?;
            scanner.hub.notify(Event::AutoregisterFinished {
                songdbid: scanner.songdbid.clone(),
                songs: summary.found,
                cancelled: summary.cancelled,
            });
            Ok(())
        });

        let rescanner = Arc::clone(&inner);
        service.channel().subscribe(EventKind::RescanSongs, move |event| match event {
            Event::RescanSongs { songdbid, songs } if *songdbid == rescanner.songdbid => {
                rescanner.rescan(songs.iter().map(|song| song.as_ref()))?;
                Ok(())
            }
            _ => Ok(()),
        });

        Ok(Self { service })
    }

    pub fn service(&self) -> &Service {
        &self.service
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
}

impl ScanInner {
    /// Handle queued messages; false once the service is stopping
    fn keep_going(&self) -> bool {
        match self.channel.upgrade() {
            Some(channel) => {
                channel.process();
                !channel.is_stopping()
            }
            None => false,
        }
    }

    fn autoregister(&self) -> anyhow::Result<ScanSummary> {
        let started = Instant::now();
        let basedir = self.builder.basedir().to_path_buf();
        info!(songdbid = %self.songdbid, basedir = %basedir.display(), "scanning for songs");

        let mut known: HashMap<String, Arc<Song>> = self
            .request(Request::GetSongs {
                songdbid: self.songdbid.clone(),
                artist: None,
                album: None,
                sort: false,
                random: false,
                filters: FilterSet::new(),
            })
            .context("fetching known songs")?
            .into_songs()?
            .into_iter()
            .map(|song| (song.id.clone(), song))
            .collect();

        let mut summary = ScanSummary::default();
        let mut pending = vec![basedir];

        while let Some(dir) = pending.pop() {
            if !self.keep_going() {
                summary.cancelled = true;
                break;
            }

            let (subdirs, files) = match self.read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(songdbid = %self.songdbid, "skipping directory: {}", e);
                    continue;
                }
            };
            pending.extend(subdirs.into_iter().rev());

            let songs: Vec<Song> = files
                .par_iter()
                .filter_map(|path| match self.builder.build(path) {
                    Ok(song) => Some(song),
                    Err(e) => {
                        debug!(songdbid = %self.songdbid, "skipping file: {}", e);
                        None
                    }
                })
                .collect();
            summary.found += songs.len();

            let changed: Vec<Song> = songs
                .into_iter()
                .filter(|song| match known.remove(&song.id) {
                    Some(stored) => !stored.same_metadata(song),
                    None => true,
                })
                .collect();
            summary.registered += changed.len();
            self.register(changed)?;
        }

        if !summary.cancelled && !known.is_empty() {
            debug!(songdbid = %self.songdbid, stale = known.len(), "rescanning songs not found");
            summary.removed = self.rescan(known.values().map(|song| song.as_ref()))?;
        }

        info!(
            songdbid = %self.songdbid,
            found = summary.found,
            registered = summary.registered,
            removed = summary.removed,
            cancelled = summary.cancelled,
            elapsed = ?started.elapsed(),
            "scan finished"
        );
        Ok(summary)
    }

    /// Subdirectories and song files of `dir`, both sorted
    fn read_dir(&self, dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), ScanError> {
        let io_error = |source: std::io::Error| ScanError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(io_error)?;
            if file_type.is_dir() {
                subdirs.push(path);
            } else if self.builder.is_song_file(&path) {
                files.push(path);
            }
        }
        subdirs.sort();
        files.sort();
        Ok((subdirs, files))
    }

    /// Re-read songs from disk: changed files are registered again, missing
    /// ones deleted. Returns the number of deletions.
    fn rescan<'a>(&self, songs: impl Iterator<Item = &'a Song>) -> anyhow::Result<usize> {
        let mut updated = Vec::new();
        let mut removed = 0;
        for song in songs {
            if song.path.is_file() {
                match self.builder.build(&song.path) {
                    Ok(fresh) if !fresh.same_metadata(song) => updated.push(fresh),
                    Ok(_) => {}
                    Err(e) => debug!(songdbid = %self.songdbid, "cannot rescan: {}", e),
                }
            } else {
                self.hub.notify_with(
                    Event::DelSong {
                        songdbid: self.songdbid.clone(),
                        song_id: song.id.clone(),
                    },
                    Priority::BACKGROUND,
                );
                removed += 1;
            }
        }
        if updated.is_empty() && removed > 0 {
            self.request(Request::get_database_stats(self.songdbid.clone()))
                .context("waiting for the song database")?;
        }
        self.register(updated)?;
        Ok(removed)
    }

    /// Send songs in batches, waiting after each batch until the database
    /// has caught up
    fn register(&self, songs: Vec<Song>) -> anyhow::Result<()> {
        for batch in songs.chunks(self.batch_size) {
            self.hub.notify_with(
                Event::RegisterSongs {
                    songdbid: self.songdbid.clone(),
                    songs: batch.to_vec(),
                },
                Priority::BACKGROUND,
            );
            self.request(Request::get_database_stats(self.songdbid.clone()))
                .context("waiting for the song database")?;
        }
        Ok(())
    }

    fn request(&self, request: Request) -> Result<Reply, HubError> {
        self.hub
            .request_with(request, Priority::BACKGROUND, self.hub.default_timeout())
    }
}
