/// Request de-duplication and caching
///
/// Identical cacheable requests (same `RequestKey`) share one answer until the
/// database they target announces a change. While an answer is being computed,
/// further identical callers wait for it instead of issuing their own call.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::channel::Channel;
use super::events::{Event, EventKind};
use super::hub::Hub;
use super::requests::{Reply, Request, RequestKey};
use crate::error::HubError;

/// Events after which cached answers for the event's database are dropped
const INVALIDATING_EVENTS: [EventKind; 6] = [
    EventKind::SongChanged,
    EventKind::ArtistsChanged,
    EventKind::AlbumsChanged,
    EventKind::TagsChanged,
    EventKind::DbPlaylistChanged,
    EventKind::AutoregisterFinished,
];

/// One call in progress; every waiter gets a copy of its result
struct Flight {
    result: Mutex<Option<Result<Reply, HubError>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    fn wait(&self) -> Result<Reply, HubError> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut result);
        }
    }

    fn finish(&self, result: Result<Reply, HubError>) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }
}

enum Slot {
    InFlight(Arc<Flight>),
    Ready(Reply),
}

struct Entry {
    songdbid: Option<String>,
    slot: Slot,
    /// Set when the database changed while the answer was being computed
    stale: bool,
}

enum Lookup {
    Hit(Reply),
    Join(Arc<Flight>),
    /// No entry yet; the caller makes the call for everyone
    Lead(Arc<Flight>),
}

/// Counters reported by `RequestCache::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub entries: usize,
}

struct CacheInner {
    entries: Mutex<HashMap<RequestKey, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Caching front end for `Hub::request`
#[derive(Clone)]
pub struct RequestCache {
    hub: Hub,
    inner: Arc<CacheInner>,
}

impl RequestCache {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe invalidation handlers on `channel`, usually the channel of a
    /// service dedicated to the cache
    pub fn watch(&self, channel: &Channel) {
        for kind in INVALIDATING_EVENTS {
            let cache = self.clone();
            channel.subscribe(kind, move |event: &Event| {
                if let Some(songdbid) = event.songdbid() {
                    cache.invalidate(songdbid);
                }
                Ok(())
            });
        }
    }

    /// Answer `request`, from cache when possible
    pub fn request(&self, request: Request) -> Result<Reply, HubError> {
        if !request.is_cacheable() {
            return self.hub.request(request);
        }

        let key = request.key();
        let flight = match self.lookup(&key, &request) {
            Lookup::Hit(reply) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "cache hit");
                return Ok(reply);
            }
            Lookup::Join(flight) => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "joining in-flight request");
                return flight.wait();
            }
            Lookup::Lead(flight) => flight,
        };

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let result = self.hub.request(request);

        {
            let mut entries = self.inner.entries.lock();
            let keep = matches!(entries.get(&key), Some(entry) if !entry.stale) && result.is_ok();
            match (&result, keep) {
                (Ok(reply), true) => {
                    if let Some(entry) = entries.get_mut(&key) {
                        entry.slot = Slot::Ready(reply.clone());
                    }
                }
                _ => {
                    entries.remove(&key);
                }
            }
        }
        flight.finish(result.clone());
        result
    }

    fn lookup(&self, key: &RequestKey, request: &Request) -> Lookup {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get(key) {
            return match &entry.slot {
                Slot::Ready(reply) => Lookup::Hit(reply.clone()),
                Slot::InFlight(flight) => Lookup::Join(Arc::clone(flight)),
            };
        }
        let flight = Flight::new();
        entries.insert(
            key.clone(),
            Entry {
                songdbid: request.target().map(str::to_owned),
                slot: Slot::InFlight(Arc::clone(&flight)),
                stale: false,
            },
        );
        Lookup::Lead(flight)
    }

    /// Drop every answer concerning `songdbid`
    pub fn invalidate(&self, songdbid: &str) {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            if entry.songdbid.as_deref() != Some(songdbid) {
                return true;
            }
            match entry.slot {
                Slot::Ready(_) => false,
                Slot::InFlight(_) => {
                    entry.stale = true;
                    true
                }
            }
        });
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(songdbid, dropped, "cache invalidated");
        }
    }

    pub fn clear(&self) {
        self.inner
            .entries
            .lock()
            .retain(|_, entry| matches!(entry.slot, Slot::InFlight(_)));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            entries: self
                .inner
                .entries
                .lock()
                .values()
                .filter(|entry| matches!(entry.slot, Slot::Ready(_)))
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::filters::FilterSet;
    use crate::messaging::requests::{Outcome, RequestKind};
    use std::thread;
    use std::time::Duration;

    fn counting_supplier(hub: &Hub, calls: &Arc<AtomicU64>) -> (Arc<Channel>, thread::JoinHandle<()>) {
        let channel = Channel::new("songdb local", Some("local".to_string()));
        let counter = Arc::clone(calls);
        channel.supply(RequestKind::GetNumberOfArtists, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(Outcome::Reply(Reply::Count(7)))
        });
        hub.attach(&channel);
        let worker = Arc::clone(&channel);
        let handle = thread::spawn(move || {
            worker.bind_dispatch_thread();
            while let Some(message) = worker.dequeue() {
                worker.dispatch(message);
            }
        });
        (channel, handle)
    }

    fn artist_count() -> Request {
        Request::GetNumberOfArtists {
            songdbid: "local".to_string(),
            filters: FilterSet::new(),
        }
    }

    #[test]
    fn test_hit_after_miss_and_invalidation() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let calls = Arc::new(AtomicU64::new(0));
        let (channel, handle) = counting_supplier(&hub, &calls);
        let cache = RequestCache::new(hub.clone());

        assert_eq!(cache.request(artist_count()).unwrap().into_count().unwrap(), 7);
        assert_eq!(cache.request(artist_count()).unwrap().into_count().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate("other");
        assert_eq!(cache.stats().entries, 1);
        cache.invalidate("local");
        assert_eq!(cache.stats().entries, 0);
        cache.request(artist_count()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);

        hub.detach(&channel);
        channel.close();
        handle.join().unwrap();
    }

    #[test]
    fn test_concurrent_identical_requests_share_one_call() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let calls = Arc::new(AtomicU64::new(0));
        let (channel, handle) = counting_supplier(&hub, &calls);
        let cache = RequestCache::new(hub.clone());

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.request(artist_count()).unwrap().into_count().unwrap())
            })
            .collect();
        for caller in callers {
            assert_eq!(caller.join().unwrap(), 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 3);

        hub.detach(&channel);
        channel.close();
        handle.join().unwrap();
    }

    #[test]
    fn test_errors_are_not_cached() {
        let hub = Hub::new();
        let cache = RequestCache::new(hub);
        assert!(cache.request(artist_count()).unwrap_err().is_no_supplier());
        assert_eq!(cache.stats().entries, 0);
    }
}
