use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::RwLock;
/// Process-wide message router
///
/// The hub knows the live channels and nothing else: events fan out to every
/// subscribed handler, requests go to the first supplier that does not deny.
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::channel::{Channel, ChannelId};
use super::events::{Event, EventKind};
use super::message::{Answer, HandlerId, Message, Priority};
use super::requests::{Outcome, Reply, Request, RequestKind};
use crate::error::HubError;

struct HubInner {
    /// Attached channels in registration order
    channels: RwLock<Vec<(ChannelId, Weak<Channel>)>>,
    default_timeout: Option<Duration>,
}

/// Handle to a hub; clones share the same registry
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub whose requests wait for an answer without time limit
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a hub applying `timeout` to every `request` call
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(default_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: RwLock::new(Vec::new()),
                default_timeout,
            }),
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    /// Make a channel reachable. Attaching twice is a no-op.
    pub fn attach(&self, channel: &Arc<Channel>) {
        let mut channels = self.inner.channels.write();
        channels.retain(|(_, weak)| weak.strong_count() > 0);
        if channels.iter().any(|(id, _)| *id == channel.id()) {
            return;
        }
        channels.push((channel.id(), Arc::downgrade(channel)));
        debug!(channel = %channel.name(), id = %channel.id(), "channel attached");
    }

    /// Remove a channel from the registry; later notifies and requests skip it
    pub fn detach(&self, channel: &Channel) {
        let mut channels = self.inner.channels.write();
        let before = channels.len();
        channels.retain(|(id, weak)| *id != channel.id() && weak.strong_count() > 0);
        if channels.len() != before {
            debug!(channel = %channel.name(), id = %channel.id(), "channel detached");
        }
    }

    /// Snapshot of the live channels in registration order
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.inner
            .channels
            .read()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    pub fn is_attached(&self, channel: &Channel) -> bool {
        self.inner
            .channels
            .read()
            .iter()
            .any(|(id, weak)| *id == channel.id() && weak.strong_count() > 0)
    }

    // --- registration pass-throughs ---

    pub fn subscribe<F>(&self, channel: &Channel, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        channel.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, channel: &Channel, kind: EventKind, id: HandlerId) -> bool {
        channel.unsubscribe(kind, id)
    }

    pub fn supply<F>(&self, channel: &Channel, kind: RequestKind, handler: F) -> HandlerId
    where
        F: Fn(&Request) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        channel.supply(kind, handler)
    }

    // --- events ---

    /// Deliver `event` to every subscribed handler at default priority.
    /// Returns the number of deliveries queued.
    pub fn notify(&self, event: Event) -> usize {
        self.notify_with(event, Priority::DEFAULT)
    }

    pub fn notify_with(&self, event: Event, priority: Priority) -> usize {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut deliveries = 0;

        for channel in self.channels() {
            for handler in channel.subscriber_ids(kind) {
                let message = Message::event(Arc::clone(&event), handler, priority);
                if channel.enqueue(message).is_ok() {
                    deliveries += 1;
                }
            }
        }

        trace!(?kind, deliveries, "event queued");
        deliveries
    }

    // --- requests ---

    /// Ask the first willing supplier, waiting at most the hub's default timeout
    pub fn request(&self, request: Request) -> Result<Reply, HubError> {
        self.request_with(request, Priority::DEFAULT, self.inner.default_timeout)
    }

    /// Ask the suppliers of the request's kind one after another until one
    /// replies.
    ///
    /// Only channels serving the request's target are candidates, minus the
    /// caller's own channel; asking only yourself is a `SelfRequest`. A denial, a
    /// failing handler or a channel that closed meanwhile moves on to the next
    /// candidate. With a `timeout`, the whole call gives up after that long;
    /// the supplier still runs to completion.
    pub fn request_with(
        &self,
        request: Request,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Reply, HubError> {
        let kind = request.kind();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let (own, candidates): (Vec<Arc<Channel>>, Vec<Arc<Channel>>) = self
            .channels()
            .into_iter()
            .filter(|channel| channel.supplies(kind) && channel.serves(request.target()))
            .partition(|channel| channel.is_dispatch_thread());
        if let (Some(channel), true) = (own.first(), candidates.is_empty()) {
            return Err(HubError::SelfRequest {
                kind,
                service: channel.name().to_string(),
            });
        }
        let target = request.target().map(str::to_owned);
        let request = Arc::new(request);

        for channel in candidates {
            let (reply_tx, reply_rx) = bounded(1);
            let message = Message::request(Arc::clone(&request), reply_tx, priority);
            if channel.enqueue(message).is_err() {
                trace!(channel = %channel.name(), ?kind, "candidate closed");
                continue;
            }

            let answer = match deadline {
                Some(deadline) => match reply_rx.recv_deadline(deadline) {
                    Ok(answer) => answer,
                    Err(RecvTimeoutError::Timeout) => {
                        debug!(channel = %channel.name(), ?kind, "request timed out");
                        return Err(HubError::Timeout {
                            kind,
                            after: timeout.unwrap_or_default(),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => Answer::Denied,
                },
                None => reply_rx.recv().unwrap_or(Answer::Denied),
            };

            match answer {
                Answer::Reply(reply) => return Ok(reply),
                Answer::Denied => {
                    trace!(channel = %channel.name(), ?kind, "request denied");
                }
                Answer::Failed(reason) => {
                    debug!(channel = %channel.name(), ?kind, %reason, "supplier failed, trying next");
                }
            }
        }

        Err(HubError::NoSupplier { kind, target })
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("channels", &self.channel_count())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}
