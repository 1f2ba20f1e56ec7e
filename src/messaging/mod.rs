/// Messaging module for the Event/Request hub
///
/// This module implements the two message flavours services use to talk:
/// - **Events**: notifications, delivered to every subscribed handler
/// - **Requests**: questions, answered by exactly one supplier (or denied)
///
/// ## Architecture
///
/// ```text
/// ┌─────────┐  notify / request  ┌─────┐  enqueue  ┌─────────┐  dispatch  ┌──────────┐
/// │ Caller  │ ─────────────────> │ Hub │ ────────> │ Channel │ ─────────> │ Handlers │
/// │ (any    │                    │     │           │ (queue) │            │ (service │
/// │ thread) │ <───── Reply ───── │     │ <──────── │         │ <───────── │  thread) │
/// └─────────┘                    └─────┘  answer   └─────────┘            └──────────┘
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let hub = Hub::with_timeout(Duration::from_secs(5));
///
/// // A service owns one channel and registers its handlers on it
/// let service = Service::new("songdb local", &hub).with_service_id("local");
/// service.channel().supply(RequestKind::GetSong, move |request| { ... });
/// service.start()?;
///
/// // Anyone holding the hub can ask
/// let song = hub.request(Request::get_song("local", "Queen/Innuendo/01.mp3"))?.into_song()?;
/// ```

pub mod cache;
pub mod channel;
pub mod events;
pub mod filters;
pub mod hub;
pub mod message;
pub mod requests;

// Re-export commonly used types
pub use cache::{CacheStats, RequestCache};
pub use channel::{Channel, ChannelClosed, ChannelId, EventHandler, RequestHandler};
pub use events::{Event, EventKind};
pub use filters::{Filter, FilterSet};
pub use hub::Hub;
pub use message::{HandlerId, Message, Priority};
pub use requests::{Outcome, Reply, Request, RequestKey, RequestKind};
