/// Player service
///
/// Keeps the play queue and the playback status. There is no audio output:
/// starting a song announces it and counts the play in its database.
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::messaging::{Event, EventKind, Hub, Outcome, Reply, Request, RequestKind};
use crate::model::{PlaybackInfo, PlayerStatus, Song};
use crate::service::{Service, ServiceState};

const PLAYER_EVENTS: [EventKind; 7] = [
    EventKind::PlaylistAddSongs,
    EventKind::PlayerPlay,
    EventKind::PlayerPause,
    EventKind::PlayerTogglePause,
    EventKind::PlayerNext,
    EventKind::PlayerPrevious,
    EventKind::PlayerStop,
];

#[derive(Debug)]
struct PlayerState {
    status: PlayerStatus,
    queue: Vec<Arc<Song>>,
    position: Option<usize>,
}

struct PlayerInner {
    id: String,
    hub: Hub,
    state: Mutex<PlayerState>,
}

pub struct Player {
    inner: Arc<PlayerInner>,
    service: Service,
}

impl Player {
    pub fn new(hub: &Hub, playerid: impl Into<String>) -> Self {
        let id = playerid.into();
        let inner = Arc::new(PlayerInner {
            id: id.clone(),
            hub: hub.clone(),
            state: Mutex::new(PlayerState {
                status: PlayerStatus::Stopped,
                queue: Vec::new(),
                position: None,
            }),
        });
        let service = Service::new(format!("player {}", id), hub).with_service_id(id);

        for kind in PLAYER_EVENTS {
            let inner = Arc::clone(&inner);
            service.channel().subscribe(kind, move |event| {
                inner.handle(event);
                Ok(())
            });
        }
        let answering = Arc::clone(&inner);
        service
            .channel()
            .supply(RequestKind::GetPlaybackInfo, move |request| match request {
                Request::GetPlaybackInfo { playerid } if *playerid == answering.id => {
                    Ok(Outcome::Reply(Reply::PlaybackInfo(answering.info())))
                }
                _ => Ok(Outcome::Denied),
            });

        Self { inner, service }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current playback snapshot
    pub fn info(&self) -> PlaybackInfo {
        self.inner.info()
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

impl PlayerInner {
    fn info(&self) -> PlaybackInfo {
        let state = self.state.lock();
        PlaybackInfo {
            playerid: self.id.clone(),
            status: state.status,
            song: state.position.and_then(|p| state.queue.get(p).cloned()),
            position: state.position,
            queue_len: state.queue.len(),
        }
    }

    fn handle(&self, event: &Event) {
        match event {
            Event::PlaylistAddSongs { songs } => {
                self.state.lock().queue.extend(songs.iter().cloned());
                debug!(player = %self.id, added = songs.len(), "songs queued");
            }
            Event::PlayerPlay { playerid } if *playerid == self.id => self.play(),
            Event::PlayerPause { playerid } if *playerid == self.id => {
                let mut state = self.state.lock();
                if state.status == PlayerStatus::Playing {
                    state.status = PlayerStatus::Paused;
                }
            }
            Event::PlayerTogglePause { playerid } if *playerid == self.id => {
                let status = self.state.lock().status;
                match status {
                    PlayerStatus::Playing => self.state.lock().status = PlayerStatus::Paused,
                    PlayerStatus::Paused => self.state.lock().status = PlayerStatus::Playing,
                    PlayerStatus::Stopped => self.play(),
                }
            }
            Event::PlayerNext { playerid } if *playerid == self.id => {
                let next = {
                    let state = self.state.lock();
                    state.position.map_or(0, |p| p + 1)
                };
                if !self.start_song(next) {
                    self.halt();
                }
            }
            Event::PlayerPrevious { playerid } if *playerid == self.id => {
                let previous = self.state.lock().position.and_then(|p| p.checked_sub(1));
                if let Some(previous) = previous {
                    self.start_song(previous);
                }
            }
            Event::PlayerStop { playerid } if *playerid == self.id => self.halt(),
            _ => {}
        }
    }

    fn play(&self) {
        let (status, position) = {
            let state = self.state.lock();
            (state.status, state.position)
        };
        match status {
            PlayerStatus::Playing => {}
            PlayerStatus::Paused => self.state.lock().status = PlayerStatus::Playing,
            PlayerStatus::Stopped => {
                self.start_song(position.unwrap_or(0));
            }
        }
    }

    /// Start the song at `position` of the queue; false if there is none
    fn start_song(&self, position: usize) -> bool {
        let song = {
            let mut state = self.state.lock();
            let Some(song) = state.queue.get(position).cloned() else {
                return false;
            };
            state.position = Some(position);
            state.status = PlayerStatus::Playing;
            song
        };

        info!(player = %self.id, song = %song.id, "playing");
        self.hub.notify(Event::PlayerSongChanged {
            playerid: self.id.clone(),
            song: Some(Arc::clone(&song)),
        });
        self.hub.notify(Event::SongPlayed {
            songdbid: song.songdbid.clone(),
            song_id: song.id.clone(),
        });
        true
    }

    fn halt(&self) {
        let was_stopped = {
            let mut state = self.state.lock();
            let was_stopped = state.status == PlayerStatus::Stopped;
            state.status = PlayerStatus::Stopped;
            was_stopped
        };
        if !was_stopped {
            self.hub.notify(Event::PlayerSongChanged {
                playerid: self.id.clone(),
                song: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn songs(ids: &[&str]) -> Vec<Arc<Song>> {
        ids.iter()
            .map(|id| Arc::new(Song::new("local", *id, format!("/music/{}", id))))
            .collect()
    }

    fn info(hub: &Hub) -> PlaybackInfo {
        hub.request(Request::get_playback_info("main"))
            .unwrap()
            .into_playback_info()
            .unwrap()
    }

    #[test]
    fn test_queue_and_navigation() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let player = Player::new(&hub, "main");
        player.start().unwrap();

        hub.notify(Event::PlaylistAddSongs {
            songs: songs(&["a.mp3", "b.mp3"]),
        });
        hub.notify(Event::PlayerPlay {
            playerid: "main".to_string(),
        });
        let now = info(&hub);
        assert_eq!(now.status, PlayerStatus::Playing);
        assert_eq!(now.song.unwrap().id, "a.mp3");
        assert_eq!(now.queue_len, 2);

        hub.notify(Event::PlayerNext {
            playerid: "main".to_string(),
        });
        assert_eq!(info(&hub).position, Some(1));

        hub.notify(Event::PlayerTogglePause {
            playerid: "main".to_string(),
        });
        assert_eq!(info(&hub).status, PlayerStatus::Paused);

        hub.notify(Event::PlayerPrevious {
            playerid: "main".to_string(),
        });
        let now = info(&hub);
        assert_eq!(now.status, PlayerStatus::Playing);
        assert_eq!(now.position, Some(0));

        // Past the end of the queue the player stops
        for _ in 0..2 {
            hub.notify(Event::PlayerNext {
                playerid: "main".to_string(),
            });
        }
        assert_eq!(info(&hub).status, PlayerStatus::Stopped);
        assert_eq!(player.info().status, PlayerStatus::Stopped);
    }

    #[test]
    fn test_other_player_ids_are_ignored() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let player = Player::new(&hub, "main");
        player.start().unwrap();

        hub.notify(Event::PlaylistAddSongs { songs: songs(&["a.mp3"]) });
        hub.notify(Event::PlayerPlay {
            playerid: "secondary".to_string(),
        });
        assert_eq!(info(&hub).status, PlayerStatus::Stopped);
        assert!(hub
            .request(Request::get_playback_info("secondary"))
            .unwrap_err()
            .is_no_supplier());
    }
}
