/// Song databases
///
/// Each configured database runs two services: the database itself, which
/// owns the song store, and an autoregisterer that scans the basedir and feeds
/// the database through write events.
pub mod autoregister;
pub mod scan;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use autoregister::{Autoregisterer, ScanSummary};
pub use scan::SongBuilder;
pub use service::SongDb;
pub use store::{Changes, SongStore};
