/// Per-service mailbox
///
/// A channel owns the priority queue of messages waiting for its service and
/// the tables mapping event kinds to subscribed handlers and request kinds to
/// the supplier answering them. Only the owning service's dispatch thread runs
/// handlers; every other method is safe to call from any thread.
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use super::events::{Event, EventKind};
use super::message::{Answer, HandlerId, Message, Payload};
use super::requests::{Outcome, Request, RequestKind};

/// Callback run for each delivered event
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Callback answering a request
pub type RequestHandler = Arc<dyn Fn(&Request) -> anyhow::Result<Outcome> + Send + Sync>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returned when enqueueing on a channel that has been closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

impl fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel is closed")
    }
}

impl std::error::Error for ChannelClosed {}

struct QueueState {
    heap: BinaryHeap<Message>,
    next_seq: u64,
    stopping: bool,
    closed: bool,
}

pub struct Channel {
    id: ChannelId,
    name: String,
    service_id: Option<String>,
    queue: Mutex<QueueState>,
    available: Condvar,
    subscriptions: RwLock<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
    suppliers: RwLock<HashMap<RequestKind, (HandlerId, RequestHandler)>>,
    next_handler: AtomicU64,
    dispatch_thread: Mutex<Option<ThreadId>>,
    /// Handlers currently running on the dispatch thread, innermost last
    active: Mutex<Vec<HandlerId>>,
}

impl Channel {
    /// Create a channel. `service_id` names the service instance (a song
    /// database id, a player id) whose targeted requests this channel answers;
    /// `None` makes the channel a candidate for every target.
    pub fn new(name: impl Into<String>, service_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            service_id,
            queue: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                stopping: false,
                closed: false,
            }),
            available: Condvar::new(),
            subscriptions: RwLock::new(HashMap::new()),
            suppliers: RwLock::new(HashMap::new()),
            next_handler: AtomicU64::new(0),
            dispatch_thread: Mutex::new(None),
            active: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    /// Whether a request naming `target` may be delivered here
    pub fn serves(&self, target: Option<&str>) -> bool {
        match (target, self.service_id.as_deref()) {
            (Some(target), Some(id)) => target == id,
            _ => true,
        }
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed))
    }

    // --- subscription and supplier tables ---

    /// Append a handler for `kind`. Handlers of one kind run in subscription order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_handler_id();
        self.subscriptions
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(channel = %self.name, ?kind, ?id, "subscribed");
        id
    }

    /// Remove one handler; returns false if it was not subscribed
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(handlers) = subscriptions.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subscriptions.remove(&kind);
        }
        removed
    }

    /// Register the supplier for `kind`, replacing any previous one
    pub fn supply<F>(&self, kind: RequestKind, handler: F) -> HandlerId
    where
        F: Fn(&Request) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        let id = self.next_handler_id();
        let previous = self.suppliers.write().insert(kind, (id, Arc::new(handler)));
        if previous.is_some() {
            warn!(channel = %self.name, ?kind, "supplier replaced; check for double registration");
        }
        id
    }

    /// Remove the supplier for `kind`; returns false if there was none
    pub fn withdraw(&self, kind: RequestKind) -> bool {
        self.suppliers.write().remove(&kind).is_some()
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscriptions
            .read()
            .get(&kind)
            .map_or(false, |handlers| !handlers.is_empty())
    }

    /// Ids of the handlers subscribed to `kind`, in subscription order
    pub fn subscriber_ids(&self, kind: EventKind) -> Vec<HandlerId> {
        self.subscriptions
            .read()
            .get(&kind)
            .map(|handlers| handlers.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    pub fn supplies(&self, kind: RequestKind) -> bool {
        self.suppliers.read().contains_key(&kind)
    }

    fn event_handler(&self, kind: EventKind, id: HandlerId) -> Option<EventHandler> {
        self.subscriptions.read().get(&kind).and_then(|handlers| {
            handlers
                .iter()
                .find(|(handler_id, _)| *handler_id == id)
                .map(|(_, handler)| Arc::clone(handler))
        })
    }

    fn supplier(&self, kind: RequestKind) -> Option<(HandlerId, RequestHandler)> {
        self.suppliers
            .read()
            .get(&kind)
            .map(|(id, handler)| (*id, Arc::clone(handler)))
    }

    // --- queue ---

    /// Push a message; most urgent first, then oldest first
    pub fn enqueue(&self, mut message: Message) -> Result<(), ChannelClosed> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(ChannelClosed);
        }
        message.seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(message);
        drop(queue);
        self.available.notify_one();
        Ok(())
    }

    /// Put back messages that were taken off the queue without running,
    /// keeping their original position
    fn requeue(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.closed {
            return;
        }
        queue.heap.extend(messages);
        drop(queue);
        self.available.notify_one();
    }

    /// Block until a message is available. Returns `None` once the channel
    /// has been asked to stop.
    pub fn dequeue(&self) -> Option<Message> {
        let mut queue = self.queue.lock();
        loop {
            if queue.stopping {
                return None;
            }
            if let Some(message) = queue.heap.pop() {
                return Some(message);
            }
            self.available.wait(&mut queue);
        }
    }

    /// Pop the next message without blocking
    pub(crate) fn try_dequeue(&self) -> Option<Message> {
        let mut queue = self.queue.lock();
        if queue.stopping {
            return None;
        }
        queue.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the messages queued at the time of the call, without blocking.
    ///
    /// Meant for long-running handlers that must stay responsive. Messages for
    /// a handler that is currently running further up the stack are left in
    /// the queue. Returns the number of messages dispatched.
    ///
    /// Once a dispatch thread is bound, only that thread may run handlers;
    /// calls from any other thread return 0 and leave the queue alone.
    pub fn process(&self) -> usize {
        if self.is_bound_elsewhere() {
            debug!(channel = %self.name, "process called off the dispatch thread");
            return 0;
        }
        let pending = self.len();
        let mut deferred = Vec::new();
        let mut handled = 0;

        for _ in 0..pending {
            let Some(message) = self.try_dequeue() else {
                break;
            };
            if self.is_running(&message) {
                deferred.push(message);
                continue;
            }
            self.dispatch(message);
            handled += 1;
        }

        self.requeue(deferred);
        handled
    }

    fn is_running(&self, message: &Message) -> bool {
        let handler = match &message.payload {
            Payload::Event { handler, .. } => Some(*handler),
            Payload::Request { request, .. } => self.supplier(request.kind()).map(|(id, _)| id),
        };
        match handler {
            Some(id) => self.active.lock().contains(&id),
            None => false,
        }
    }

    // --- lifecycle ---

    /// Make `dequeue` return `None`; queued messages stay until `close`
    pub fn request_stop(&self) {
        self.queue.lock().stopping = true;
        self.available.notify_all();
    }

    /// Refuse further messages and drop the queued ones. Requesters waiting on
    /// a dropped request observe it as a denial.
    pub fn close(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            queue.stopping = true;
            queue.closed = true;
            std::mem::take(&mut queue.heap)
        };
        self.available.notify_all();
        if !dropped.is_empty() {
            debug!(channel = %self.name, count = dropped.len(), "dropping undelivered messages");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.queue.lock().stopping
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Record the calling thread as this channel's dispatch thread
    pub fn bind_dispatch_thread(&self) {
        *self.dispatch_thread.lock() = Some(thread::current().id());
    }

    pub fn is_dispatch_thread(&self) -> bool {
        *self.dispatch_thread.lock() == Some(thread::current().id())
    }

    fn is_bound_elsewhere(&self) -> bool {
        matches!(*self.dispatch_thread.lock(), Some(id) if id != thread::current().id())
    }

    // --- dispatch ---

    /// Run the handler a message is addressed to. Handler errors and panics
    /// are logged here and never propagate.
    pub(crate) fn dispatch(&self, message: Message) {
        trace!(channel = %self.name, message = %message.label(), age = ?message.age(), "dispatching");

        match message.payload {
            Payload::Event { event, handler } => {
                let kind = event.kind();
                let Some(callback) = self.event_handler(kind, handler) else {
                    trace!(channel = %self.name, ?kind, "handler unsubscribed before delivery");
                    return;
                };
                match self.run_handler(handler, || callback(&event)) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(channel = %self.name, ?kind, "event handler failed: {:#}", err);
                    }
                    Err(panic_message) => {
                        error!(channel = %self.name, ?kind, "event handler panicked: {}", panic_message);
                    }
                }
            }
            Payload::Request { request, reply_tx } => {
                let kind = request.kind();
                let answer = match self.supplier(kind) {
                    None => Answer::Denied,
                    Some((id, callback)) => match self.run_handler(id, || callback(&request)) {
                        Ok(Ok(Outcome::Reply(reply))) => Answer::Reply(reply),
                        Ok(Ok(Outcome::Denied)) => Answer::Denied,
                        Ok(Err(err)) => {
                            warn!(channel = %self.name, ?kind, "request handler failed: {:#}", err);
                            Answer::Failed(format!("{:#}", err))
                        }
                        Err(panic_message) => {
                            error!(channel = %self.name, ?kind, "request handler panicked: {}", panic_message);
                            Answer::Failed(panic_message)
                        }
                    },
                };
                if reply_tx.send(answer).is_err() {
                    debug!(channel = %self.name, ?kind, "requester stopped waiting before the reply");
                }
            }
        }
    }

    fn run_handler<T>(&self, id: HandlerId, f: impl FnOnce() -> T) -> Result<T, String> {
        self.active.lock().push(id);
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let mut active = self.active.lock();
        if let Some(position) = active.iter().rposition(|running| *running == id) {
            active.remove(position);
        }
        drop(active);
        result.map_err(|payload| panic_message(payload.as_ref()))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("service_id", &self.service_id)
            .field("queued", &self.len())
            .finish()
    }
}
