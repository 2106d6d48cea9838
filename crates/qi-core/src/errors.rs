//! Error taxonomy for the Qi robot SDK.
//!
//! Every failure a consumer can observe is a [`QiError`]. The variants map
//! onto the recovery policy of the resolution engine:
//!
//! - [`QiError::Resolution`]: upstream or fetch step failed, retried on the
//!   next `satisfy()`
//! - [`QiError::Cancelled`]: treated like a failure for caching purposes
//! - [`QiError::ServiceUnavailable`]: a bounded wait expired or focus is not held
//! - [`QiError::UnknownService`]: programmer error, never retried
//! - [`QiError::AlreadySettled`]: a promise was completed twice

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the Qi crates.
pub type Result<T> = std::result::Result<T, QiError>;

/// Top-level error type for the Qi robot SDK.
///
/// Cloneable so that one settled asynchronous result can hand the same
/// failure to every reader.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QiError {
    /// The asynchronous pipeline producing a value failed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The asynchronous result was cancelled before it produced a value.
    #[error("cancelled")]
    Cancelled,

    /// A service could not be obtained in time, or focus is not held.
    #[error("Service {service} is unavailable")]
    ServiceUnavailable {
        /// Name of the requested service.
        service: String,
    },

    /// The registry holds no entry for the requested service name.
    #[error("Unknown service {service}")]
    UnknownService {
        /// Name of the requested service.
        service: String,
    },

    /// A promise was settled more than once.
    #[error("promise already settled")]
    AlreadySettled,

    /// A blocking wait exceeded its bound.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A blocking wait was attempted on the UI thread.
    #[error("blocking wait on the UI thread")]
    BlockingOnUiThread,

    /// Unexpected internal failure (panicking task, poisoned pipeline).
    #[error("internal error: {0}")]
    Internal(String),
}

impl QiError {
    /// Build a resolution failure from any displayable cause.
    pub fn resolution(cause: impl std::fmt::Display) -> Self {
        Self::Resolution(cause.to_string())
    }

    /// Build a service-unavailable fault for `service`.
    pub fn service_unavailable(service: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
        }
    }

    /// Build an unknown-service fault for `service`.
    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService {
            service: service.into(),
        }
    }

    /// Whether calling `satisfy()` again may produce a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_) | Self::Cancelled | Self::ServiceUnavailable { .. } | Self::Timeout(_)
        )
    }

    /// Whether this is a programming or protocol error rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownService { .. } | Self::AlreadySettled | Self::BlockingOnUiThread
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Cancelled => "cancelled",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::UnknownService { .. } => "unknown_service",
            Self::AlreadySettled => "already_settled",
            Self::Timeout(_) => "timeout",
            Self::BlockingOnUiThread => "blocking_on_ui_thread",
            Self::Internal(_) => "internal",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
