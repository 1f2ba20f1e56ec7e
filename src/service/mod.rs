/// Services: one channel, one dispatch thread
///
/// Concrete services (song databases, the autoregisterer, the player, list
/// views) register their handlers on the channel of a `Service` and start it.
/// From then on their handlers run one at a time on the service's own thread.
pub mod state;

pub use state::{ServiceState, ServiceStateMachine};

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::messaging::{Channel, Hub};

pub struct Service {
    name: String,
    hub: Hub,
    channel: Arc<Channel>,
    state: Mutex<ServiceStateMachine>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Create a service answering requests for any target
    pub fn new(name: impl Into<String>, hub: &Hub) -> Self {
        let name = name.into();
        Self {
            channel: Channel::new(name.clone(), None),
            name,
            hub: hub.clone(),
            state: Mutex::new(ServiceStateMachine::new()),
            thread: Mutex::new(None),
        }
    }

    /// Restrict targeted requests to those naming `service_id`. Must be called
    /// before handlers are registered.
    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.channel = Channel::new(self.name.clone(), Some(service_id.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn state(&self) -> ServiceState {
        self.state.lock().state()
    }

    fn invalid(&self, action: &'static str, state: ServiceState) -> ServiceError {
        ServiceError::InvalidTransition {
            service: self.name.clone(),
            action,
            state,
        }
    }

    /// Attach the channel to the hub and spawn the dispatch thread
    pub fn start(&self) -> Result<(), ServiceError> {
        self.state
            .lock()
            .start()
            .map_err(|state| self.invalid("start", state))?;

        self.hub.attach(&self.channel);

        let channel = Arc::clone(&self.channel);
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || dispatch_loop(channel, name));

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!(service = %self.name, "service started");
                Ok(())
            }
            Err(source) => {
                self.hub.detach(&self.channel);
                self.channel.close();
                self.state.lock().force_stop();
                Err(ServiceError::ThreadSpawnFailed {
                    service: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Stop the dispatch loop, detach and close the channel, then join the
    /// thread. Messages still queued are dropped; their requesters see a
    /// denial. Called from one of the service's own handlers, the loop exits
    /// once that handler returns and no join takes place.
    pub fn stop(&self) -> Result<(), ServiceError> {
        {
            let mut state = self.state.lock();
            if state.state() == ServiceState::Created {
                state.force_stop();
                self.channel.close();
                debug!(service = %self.name, "service stopped before it was started");
                return Ok(());
            }
            state.stop().map_err(|state| self.invalid("stop", state))?;
        }

        self.channel.request_stop();
        self.hub.detach(&self.channel);
        self.channel.close();

        let handle = self.thread.lock().take();
        let mut panicked = false;
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!(service = %self.name, "stop requested from the dispatch thread");
            } else if handle.join().is_err() {
                panicked = true;
            }
        }

        self.state
            .lock()
            .mark_stopped()
            .map_err(|state| self.invalid("finish stopping", state))?;

        if panicked {
            return Err(ServiceError::ThreadPanicked(self.name.clone()));
        }
        info!(service = %self.name, "service stopped");
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if self.state().is_running() {
            if let Err(e) = self.stop() {
                warn!(service = %self.name, "failed to stop service on drop: {}", e);
            }
        }
    }
}

fn dispatch_loop(channel: Arc<Channel>, name: String) {
    channel.bind_dispatch_thread();
    debug!(service = %name, "dispatch loop started");

    while let Some(message) = channel.dequeue() {
        channel.dispatch(message);
    }

    debug!(service = %name, "dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Event, EventKind, Outcome, Reply, Request, RequestKind};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_lifecycle() {
        let hub = Hub::new();
        let service = Service::new("player main", &hub).with_service_id("main");
        assert_eq!(service.state(), ServiceState::Created);
        assert_eq!(hub.channel_count(), 0);

        service.start().unwrap();
        assert!(service.state().is_running());
        assert_eq!(hub.channel_count(), 1);
        assert!(service.start().is_err());

        service.stop().unwrap();
        assert!(service.state().is_stopped());
        assert_eq!(hub.channel_count(), 0);
        assert!(service.channel().is_closed());

        let err = service.stop().unwrap_err();
        assert_eq!(err.to_string(), "Service player main cannot stop while Stopped");
    }

    #[test]
    fn test_handlers_run_on_service_thread() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let service = Service::new("songdb local", &hub).with_service_id("local");
        let (tx, rx) = unbounded();
        service.channel().subscribe(EventKind::TagsChanged, move |_| {
            let name = thread::current().name().map(str::to_owned);
            tx.send(name).ok();
            Ok(())
        });
        service
            .channel()
            .supply(RequestKind::GetNumberOfTags, |_| Ok(Outcome::Reply(Reply::Count(2))));
        service.start().unwrap();

        hub.notify(Event::TagsChanged {
            songdbid: "local".to_string(),
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("songdb local"));

        let request = Request::GetNumberOfTags {
            songdbid: "local".to_string(),
            filters: Default::default(),
        };
        assert_eq!(hub.request(request).unwrap().into_count().unwrap(), 2);
    }

    #[test]
    fn test_handler_failure_does_not_stop_loop() {
        let hub = Hub::with_timeout(Duration::from_secs(5));
        let service = Service::new("flaky", &hub);
        let (tx, rx) = unbounded();
        service.channel().subscribe(EventKind::ClearStats, |_| panic!("handler bug"));
        service.channel().subscribe(EventKind::ClearStats, |_| anyhow::bail!("handler error"));
        service.channel().subscribe(EventKind::ClearStats, move |_| {
            tx.send(()).ok();
            Ok(())
        });
        service.start().unwrap();

        for _ in 0..2 {
            hub.notify(Event::ClearStats {
                songdbid: "local".to_string(),
            });
        }
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(service.state().is_running());
    }

    #[test]
    fn test_process_from_another_thread_runs_nothing() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hub = Hub::with_timeout(Duration::from_secs(5));
        let service = Service::new("songdb local", &hub);
        let running = Arc::new(AtomicUsize::new(0));
        let most = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = unbounded();
        for _ in 0..2 {
            let (running, most, tx) = (Arc::clone(&running), Arc::clone(&most), tx.clone());
            service.channel().subscribe(EventKind::TagsChanged, move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                most.fetch_max(now, Ordering::SeqCst);
                tx.send(()).ok();
                thread::sleep(Duration::from_millis(200));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        service.start().unwrap();

        hub.notify(Event::TagsChanged {
            songdbid: "local".to_string(),
        });
        // First handler is running on the service thread
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(service.channel().process(), 0);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(most.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let hub = Hub::new();
        {
            let service = Service::new("short lived", &hub);
            service.start().unwrap();
            assert_eq!(hub.channel_count(), 1);
        }
        assert_eq!(hub.channel_count(), 0);
    }
}
