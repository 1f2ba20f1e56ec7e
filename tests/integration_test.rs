// Integration tests for the jukebox hub
// These tests drive several services through one hub the way the binary does

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use jukebox::config::{ScanConfig, SongDbConfig};
use jukebox::messaging::{Channel, Event, EventKind, FilterSet, Hub, Outcome, Priority, Reply, Request, RequestCache, RequestKind};
use jukebox::model::Song;
use jukebox::{Autoregisterer, Filelist, HubError, Player, Service, SongDb};

fn song(songdbid: &str, id: &str) -> Arc<Song> {
    Arc::new(Song::new(songdbid, id, format!("/music/{}", id)))
}

fn counting_service(hub: &Hub, name: &str, kind: EventKind, counter: &Arc<AtomicUsize>) -> Service {
    let service = Service::new(name, hub);
    let counter = Arc::clone(counter);
    service.channel().subscribe(kind, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    service.start().unwrap();
    service
}

/// Poll `done` until it holds or five seconds pass
fn eventually(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

#[test]
fn test_routing_delivers_once_per_subscriber() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let changed = Arc::new(AtomicUsize::new(0));
    let played = Arc::new(AtomicUsize::new(0));
    let a = counting_service(&hub, "a", EventKind::SongChanged, &changed);
    let b = counting_service(&hub, "b", EventKind::SongChanged, &changed);
    let c = counting_service(&hub, "c", EventKind::SongPlayed, &played);

    let deliveries = hub.notify(Event::SongChanged {
        songdbid: "local".to_string(),
        song: song("local", "x.mp3"),
    });
    assert_eq!(deliveries, 2);
    assert!(eventually(|| changed.load(Ordering::SeqCst) == 2));

    // Stopping drops anything still queued, so a stray delivery would have
    // shown up by now
    thread::sleep(Duration::from_millis(100));
    for service in [a, b, c] {
        service.stop().unwrap();
    }
    assert_eq!(changed.load(Ordering::SeqCst), 2);
    assert_eq!(played.load(Ordering::SeqCst), 0);
}

#[test]
fn test_scenario_a_handler_sees_same_song() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let (tx, rx) = unbounded();
    let logger = Service::new("logger", &hub);
    logger.channel().subscribe(EventKind::SongChanged, move |event| {
        if let Event::SongChanged { song, .. } = event {
            tx.send(Arc::clone(song)).ok();
        }
        Ok(())
    });
    logger.start().unwrap();

    let x = song("local", "x.mp3");
    hub.notify(Event::SongChanged {
        songdbid: "local".to_string(),
        song: Arc::clone(&x),
    });

    let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(Arc::ptr_eq(&received, &x));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_scenario_b_targeted_request_reaches_one_database() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut services = Vec::new();
    for id in ["a", "b"] {
        let service = Service::new(format!("songdb {}", id), &hub).with_service_id(id);
        let calls = Arc::clone(&calls);
        service.channel().supply(RequestKind::GetSong, move |request| {
            calls.lock().push(id);
            match request {
                Request::GetSong { id: song_id, .. } => Ok(Outcome::Reply(Reply::Song(Some(song(id, song_id))))),
                _ => Ok(Outcome::Denied),
            }
        });
        service.start().unwrap();
        services.push(service);
    }

    let found = hub
        .request(Request::get_song("a", "42"))
        .unwrap()
        .into_song()
        .unwrap()
        .unwrap();
    assert_eq!(found.songdbid, "a");
    assert_eq!(*calls.lock(), vec!["a"]);
}

#[test]
fn test_denial_falls_through_to_next_supplier() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let denier = Service::new("denier", &hub);
    denier
        .channel()
        .supply(RequestKind::GetPlaybackInfo, |_| Ok(Outcome::Denied));
    let failing = Service::new("failing", &hub);
    failing
        .channel()
        .supply(RequestKind::GetPlaybackInfo, |_| anyhow::bail!("not ready"));
    denier.start().unwrap();
    failing.start().unwrap();
    let player = Player::new(&hub, "main");
    player.start().unwrap();

    let info = hub
        .request(Request::get_playback_info("main"))
        .unwrap()
        .into_playback_info()
        .unwrap();
    assert_eq!(info.playerid, "main");
}

#[test]
fn test_scenario_c_no_supplier_fails_immediately() {
    let hub = Hub::with_timeout(Duration::from_secs(30));
    let bystander = Service::new("bystander", &hub);
    bystander.start().unwrap();

    let started = Instant::now();
    let err = hub.request(Request::get_song("local", "x.mp3")).unwrap_err();
    assert!(err.is_no_supplier());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_silent_supplier_times_out() {
    let hub = Hub::new();
    let slow = Service::new("slow", &hub);
    slow.channel().supply(RequestKind::GetDatabaseStats, |_| {
        thread::sleep(Duration::from_secs(2));
        Ok(Outcome::Denied)
    });
    slow.start().unwrap();

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = hub
        .request_with(Request::get_database_stats("local"), Priority::DEFAULT, Some(timeout))
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, HubError::Timeout { .. }));
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_millis(1500));
}

#[test]
fn test_priority_order_within_channel() {
    let hub = Hub::new();
    let channel = Channel::new("ordered", None);
    hub.attach(&channel);
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    channel.subscribe(EventKind::PlayerPlay, move |event| {
        if let Event::PlayerPlay { playerid } = event {
            seen.lock().push(playerid.clone());
        }
        Ok(())
    });

    for (label, priority) in [("five", 5), ("one", 1), ("three", 3), ("three again", 3)] {
        hub.notify_with(
            Event::PlayerPlay {
                playerid: label.to_string(),
            },
            Priority(priority),
        );
    }
    assert_eq!(channel.process(), 4);
    assert_eq!(*order.lock(), vec!["one", "three", "three again", "five"]);
}

#[test]
fn test_equal_requests_share_key() {
    let first = Request::GetSongs {
        songdbid: "local".to_string(),
        artist: Some("Queen".to_string()),
        album: None,
        sort: true,
        random: false,
        filters: FilterSet::new(),
    };
    let second = Request::GetSongs {
        filters: FilterSet::new(),
        random: false,
        sort: true,
        album: None,
        artist: Some("Queen".to_string()),
        songdbid: "local".to_string(),
    };
    assert_eq!(first.key(), second.key());
    assert_ne!(first.key(), Request::get_songs("local", FilterSet::new()).key());
}

#[test]
fn test_stopped_service_is_never_invoked() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let invoked = Arc::new(AtomicUsize::new(0));
    let service = counting_service(&hub, "short lived", EventKind::ArtistsChanged, &invoked);
    let asked = Arc::clone(&invoked);
    service.channel().supply(RequestKind::GetArtists, move |_| {
        asked.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Reply(Reply::Artists(Vec::new())))
    });
    service.stop().unwrap();

    let deliveries = hub.notify(Event::ArtistsChanged {
        songdbid: "local".to_string(),
    });
    assert_eq!(deliveries, 0);
    assert!(hub
        .request(Request::get_artists("local", FilterSet::new()))
        .unwrap_err()
        .is_no_supplier());
    drop(service);
    assert_eq!(hub.notify(Event::ArtistsChanged { songdbid: "local".to_string() }), 0);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cache_coalesces_concurrent_requests() {
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let answered = Arc::new(AtomicUsize::new(0));
    let db = Service::new("songdb local", &hub).with_service_id("local");
    let count = Arc::clone(&answered);
    db.channel().supply(RequestKind::GetArtists, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
        Ok(Outcome::Reply(Reply::Artists(Vec::new())))
    });
    db.start().unwrap();

    let cache = RequestCache::new(hub.clone());
    let watcher = Service::new("cache", &hub);
    cache.watch(watcher.channel());
    watcher.start().unwrap();

    let askers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || cache.request(Request::get_artists("local", FilterSet::new())))
        })
        .collect();
    for asker in askers {
        assert!(asker.join().unwrap().is_ok());
    }
    assert_eq!(answered.load(Ordering::SeqCst), 1);

    hub.notify(Event::ArtistsChanged {
        songdbid: "local".to_string(),
    });
    assert!(eventually(|| cache.stats().entries == 0));
    cache.request(Request::get_artists("local", FilterSet::new())).unwrap();
    assert_eq!(answered.load(Ordering::SeqCst), 2);
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"x").unwrap();
}

#[test]
fn test_scan_browse_and_play() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("Queen/Innuendo/01 - Innuendo.mp3"));
    touch(&dir.path().join("Queen/Innuendo/02 - Headlong.mp3"));
    touch(&dir.path().join("Queen/Jazz/01 - Mustapha.mp3"));
    touch(&dir.path().join("Bowie/Low/01 - Speed of Life.flac"));

    let db_config = SongDbConfig {
        id: "local".to_string(),
        basedir: dir.path().to_path_buf(),
        autoregister: true,
    };
    let scan = ScanConfig::default();
    let hub = Hub::with_timeout(Duration::from_secs(5));
    let db = SongDb::new(&hub, &db_config, &scan, 10).unwrap();
    let autoregisterer = Autoregisterer::new(&hub, &db_config, &scan).unwrap();
    let player = Player::new(&hub, "main");
    let cache = RequestCache::new(hub.clone());
    let filelist = Filelist::new(&hub, cache.clone(), vec!["local".to_string()], true);

    let (tx, rx) = unbounded();
    let monitor = Service::new("monitor", &hub);
    monitor
        .channel()
        .subscribe(EventKind::AutoregisterFinished, move |event| {
            if let Event::AutoregisterFinished { songs, .. } = event {
                tx.send(*songs).ok();
            }
            Ok(())
        });
    for started in [
        monitor.start(),
        db.start(),
        autoregisterer.start(),
        player.start(),
        filelist.start(),
    ] {
        started.unwrap();
    }

    hub.notify(Event::AutoregisterSongs {
        songdbid: "local".to_string(),
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 4);

    assert!(filelist.dir_down());
    assert_eq!(filelist.labels(), vec!["Bowie", "Queen"]);
    filelist.select(1);
    assert_eq!(filelist.insert_selected(), 3);

    hub.notify(Event::PlayerPlay {
        playerid: "main".to_string(),
    });
    let info = hub
        .request(Request::get_playback_info("main"))
        .unwrap()
        .into_playback_info()
        .unwrap();
    assert_eq!(info.queue_len, 3);
    assert_eq!(info.song.unwrap().title, "Innuendo");

    // The play is counted by the database
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let played = hub
            .request(Request::GetLastPlayedSongs {
                songdbid: "local".to_string(),
                filters: FilterSet::new(),
            })
            .unwrap();
        if let Reply::PlayedSongs(played) = played {
            if !played.is_empty() {
                assert_eq!(played[0].song.title, "Innuendo");
                break;
            }
        }
        assert!(Instant::now() < deadline, "play never counted");
        thread::sleep(Duration::from_millis(20));
    }

    filelist.stop().unwrap();
    player.stop().unwrap();
    autoregisterer.stop().unwrap();
    db.stop().unwrap();
    monitor.stop().unwrap();
}
