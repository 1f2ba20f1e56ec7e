use anyhow::Context;
use crossbeam_channel::unbounded;
use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use jukebox::config::Config;
use jukebox::logging::initialize_tracing;
use jukebox::messaging::{Event, EventKind, Hub, Request, RequestCache};
use jukebox::{AppResult, Autoregisterer, Filelist, Player, Service, SongDb};

/// How long to wait for all initial scans before giving up
const SCAN_WAIT: Duration = Duration::from_secs(600);

fn main() -> AppResult<()> {
    println!("===========================================");
    println!("  Jukebox");
    println!("===========================================\n");

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(&PathBuf::from(path)),
        None => Config::load(),
    }
    .context("loading configuration")?;
    config.validate().context("invalid configuration")?;

    initialize_tracing(&config.log, &config.log_dir());
    tracing::info!("Starting jukebox v{}", env!("CARGO_PKG_VERSION"));
    println!("✓ Configuration loaded");
    println!("  Databases: {}", config.databases.len());
    println!("  Request timeout: {}ms\n", config.request_timeout_ms);

    let hub = Hub::with_timeout(config.request_timeout());

    // Cache invalidation runs on its own service
    let cache = RequestCache::new(hub.clone());
    let cache_service = Service::new("request cache", &hub);
    cache.watch(cache_service.channel());
    cache_service.start()?;

    let (finished_tx, finished_rx) = unbounded();
    let monitor = Service::new("scan monitor", &hub);
    monitor
        .channel()
        .subscribe(EventKind::AutoregisterFinished, move |event| {
            if let Event::AutoregisterFinished {
                songdbid,
                songs,
                cancelled,
            } = event
            {
                finished_tx.send((songdbid.clone(), *songs, *cancelled)).ok();
            }
            Ok(())
        });
    monitor.start()?;

    let mut databases = Vec::new();
    let mut autoregisterers = Vec::new();
    for db in &config.databases {
        let songdb = SongDb::new(&hub, db, &config.scan, config.playing_stats_length)
            .with_context(|| format!("creating song database {}", db.id))?;
        songdb.start()?;
        databases.push(songdb);

        let autoregisterer = Autoregisterer::new(&hub, db, &config.scan)
            .with_context(|| format!("creating autoregisterer for {}", db.id))?;
        autoregisterer.start()?;
        autoregisterers.push(autoregisterer);
        println!("✓ Database {} at {}", db.id, db.basedir.display());
    }

    let player = Player::new(&hub, config.player_id.clone());
    player.start()?;

    let filelist = Filelist::new(
        &hub,
        cache.clone(),
        config.databases.iter().map(|db| db.id.clone()).collect(),
        config.filelist.skip_single_albums,
    );
    filelist.start()?;

    thread::sleep(config.scan_start_delay());
    let mut scanning: HashSet<String> = HashSet::new();
    for db in config.databases.iter().filter(|db| db.autoregister) {
        hub.notify(Event::AutoregisterSongs {
            songdbid: db.id.clone(),
        });
        scanning.insert(db.id.clone());
    }

    let deadline = Instant::now() + SCAN_WAIT;
    while !scanning.is_empty() {
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            tracing::warn!(pending = scanning.len(), "initial scans still running");
            break;
        };
        let Ok((songdbid, songs, cancelled)) = finished_rx.recv_timeout(left) else {
            continue;
        };
        if scanning.remove(&songdbid) {
            println!(
                "✓ Scanned {}: {} songs{}",
                songdbid,
                songs,
                if cancelled { " (cancelled)" } else { "" }
            );
        }
    }

    println!();
    for db in &config.databases {
        match cache
            .request(Request::get_database_stats(db.id.clone()))
            .and_then(|reply| reply.into_stats())
        {
            Ok(stats) => println!(
                "{}: {} songs, {} artists, {} albums, {} tags, {} playlists",
                db.id, stats.songs, stats.artists, stats.albums, stats.tags, stats.playlists
            ),
            Err(e) => eprintln!("✗ {}: {}", db.id, e),
        }
    }

    if filelist.dir_down() {
        println!("\n{}", filelist.title());
        for label in filelist.labels() {
            println!("  {}", label);
        }
    }

    let stats = cache.stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        coalesced = stats.coalesced,
        "request cache"
    );

    filelist.stop()?;
    player.stop()?;
    for autoregisterer in &autoregisterers {
        autoregisterer.stop()?;
    }
    for songdb in &databases {
        songdb.stop()?;
    }
    monitor.stop()?;
    cache_service.stop()?;
    tracing::info!("Shut down");
    Ok(())
}
