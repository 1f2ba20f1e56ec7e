use std::time::Duration;

use thiserror::Error;

use crate::messaging::RequestKind;
use crate::service::ServiceState;

/// Errors a caller of the hub can observe.
///
/// Handler failures never show up here directly: the dispatch loop converts
/// them into denials, so a request whose every supplier failed or declined
/// surfaces as `NoSupplier`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("No supplier for {kind:?}{}", target.as_ref().map(|t| format!(" (target {t})")).unwrap_or_default())]
    NoSupplier {
        kind: RequestKind,
        target: Option<String>,
    },

    #[error("Request {kind:?} timed out after {after:?}")]
    Timeout { kind: RequestKind, after: Duration },

    #[error("Service {service} requested {kind:?} from its own dispatch thread")]
    SelfRequest { kind: RequestKind, service: String },

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
}

impl HubError {
    /// True for failures that mean "nobody answered", as opposed to "the
    /// answer is unknown" (timeout) or a programming error.
    pub fn is_no_supplier(&self) -> bool {
        matches!(self, HubError::NoSupplier { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HubError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service {service} cannot {action} while {state}")]
    InvalidTransition {
        service: String,
        action: &'static str,
        state: ServiceState,
    },

    #[error("Failed to spawn dispatch thread for {service}")]
    ThreadSpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dispatch thread of {0} panicked")]
    ThreadPanicked(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}")]
    LoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to save configuration to {path}")]
    SaveFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Path {path} is not located in basedir {basedir}")]
    OutsideBasedir { path: String, basedir: String },

    #[error("Failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid track number/title pattern")]
    InvalidPattern(#[from] regex::Error),
}

/// Type alias for application Results using anyhow for context chaining
pub type AppResult<T> = anyhow::Result<T>;
