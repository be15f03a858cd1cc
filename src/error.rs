//! Unified error handling for the servbase crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors into a single `Error` enum.
//!
//! # Architecture
//!
//! - [`ServbaseErrorTrait`] - Common interface implemented by the error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use servbase::error::{Error, ErrorCategory, ServbaseErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::Startup => std::process::exit(1),
//!         _ if err.is_recoverable() => tracing::warn!(error = %err, "will retry"),
//!         _ => tracing::error!(error = %err, "call failed"),
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::idgen::IdError;
pub use crate::store::StoreError;

/// Common trait for all servbase error types
pub trait ServbaseErrorTrait: std::error::Error {
    /// Check if this error is transient and may succeed on a later attempt
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transient coordination-store errors (network, timeout, unavailable)
    Store,
    /// Lost a conditional write race
    Conflict,
    /// Failure that must abort process startup
    Startup,
    /// Payload could not be encoded or decoded
    Serialization,
    /// Malformed static configuration
    Config,
    /// Other/unknown errors
    Other,
}

impl ServbaseErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        StoreError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NodeExists { .. } | Self::CompareFailed { .. } => ErrorCategory::Conflict,
            Self::Decode(_) => ErrorCategory::Serialization,
            Self::InvalidEndpoint(_) => ErrorCategory::Config,
            _ => ErrorCategory::Store,
        }
    }
}

/// Unified error type for the servbase crate
#[derive(Error, Debug)]
pub enum Error {
    /// Coordination store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Instance id claim and generator errors
    #[error("Id error: {0}")]
    Id(#[from] IdError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Startup could not complete
    #[error("Startup failed: {0}")]
    Startup(String),

    /// The runtime has been stopped; no new registrations are accepted
    #[error("Service is stopping")]
    Stopped,

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServbaseErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Id(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Json(_) => false,
            Self::Startup(_) => false,
            Self::Stopped => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => ServbaseErrorTrait::category(e),
            Self::Id(e) => match e {
                IdError::ClaimExhausted { .. } | IdError::WorkerIdOutOfRange { .. } => {
                    ErrorCategory::Startup
                }
                IdError::MalformedCounter { .. } => ErrorCategory::Serialization,
                IdError::Store(inner) => ServbaseErrorTrait::category(inner),
            },
            Self::Config(_) => ErrorCategory::Config,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Startup(_) => ErrorCategory::Startup,
            Self::Stopped | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a startup error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
