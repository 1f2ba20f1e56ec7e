//! Jukebox core
//!
//! Services talk to each other only through a [`messaging::Hub`]: song
//! databases answer queries and apply write events, autoregisterers scan the
//! music directories, the player keeps the play queue and the file list
//! browses it all.

pub mod config;
pub mod error;
pub mod filelist;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod player;
pub mod service;
pub mod songdb;

pub use config::Config;
pub use error::{AppResult, ConfigError, HubError, ScanError, ServiceError};
pub use filelist::Filelist;
pub use messaging::{Event, EventKind, Hub, Priority, Reply, Request, RequestCache, RequestKind};
pub use player::Player;
pub use service::{Service, ServiceState};
pub use songdb::{Autoregisterer, SongDb};
