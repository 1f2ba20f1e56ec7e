/// Queued message envelope
///
/// Everything a channel queues is a `Message`: an event delivery addressed to
/// one subscribed handler, a request waiting for its supplier, with a priority
/// and an enqueue sequence number that fixes the order among equal priorities.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::events::Event;
use super::requests::{Reply, Request};

/// Delivery priority; lower values are dispatched first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(pub i32);

impl Priority {
    /// Time-critical deliveries that should overtake regular traffic
    pub const URGENT: Priority = Priority(-100);
    pub const DEFAULT: Priority = Priority(0);
    /// Bulk work (library scans) that must not delay interactive requests
    pub const BACKGROUND: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one registered handler on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

/// What a supplier's dispatch produced for a waiting requester
#[derive(Debug, Clone)]
pub(crate) enum Answer {
    Reply(Reply),
    Denied,
    /// The handler returned an error or panicked
    Failed(String),
}

pub(crate) enum Payload {
    Event {
        event: Arc<Event>,
        handler: HandlerId,
    },
    Request {
        request: Arc<Request>,
        reply_tx: Sender<Answer>,
    },
}

/// A message queued on a channel
pub struct Message {
    pub(crate) priority: Priority,
    pub(crate) seq: u64,
    pub(crate) enqueued_at: Instant,
    pub(crate) payload: Payload,
}

impl Message {
    pub(crate) fn event(event: Arc<Event>, handler: HandlerId, priority: Priority) -> Self {
        Self {
            priority,
            seq: 0,
            enqueued_at: Instant::now(),
            payload: Payload::Event { event, handler },
        }
    }

    pub(crate) fn request(request: Arc<Request>, reply_tx: Sender<Answer>, priority: Priority) -> Self {
        Self {
            priority,
            seq: 0,
            enqueued_at: Instant::now(),
            payload: Payload::Request { request, reply_tx },
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Time spent waiting since the message was created
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Short label for logging
    pub fn label(&self) -> String {
        match &self.payload {
            Payload::Event { event, .. } => format!("event {:?}", event.kind()),
            Payload::Request { request, .. } => format!("request {:?}", request.kind()),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("payload", &self.label())
            .finish()
    }
}

// `BinaryHeap` is a max-heap: the message that should run next compares greatest.
impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Message {}
