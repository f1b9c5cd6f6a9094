//! Error taxonomy shared by the cache and the protocol engine.
//!
//! The taxonomy separates recoverable from terminal failures so callers
//! can decide whether a retry affordance is appropriate:
//! - [`FlowError::is_retryable`] - retry-eligible kinds (network faults,
//!   transient server codes)
//! - [`FlowError::is_security_sensitive`] - kinds that must never be
//!   retried and should be logged at high severity
//!
//! Layers translate upward to the most specific kind available; a
//! security-sensitive kind is never collapsed into a generic one.

use thiserror::Error;

use crate::store::StoreError;

/// Server error codes that are safe to retry with backoff.
///
/// Everything else returned in a well-formed error body is terminal for
/// the request that produced it.
const TRANSIENT_SERVER_CODES: &[&str] = &["temporarily_unavailable", "server_error", "request_timeout"];

/// A well-formed error body returned by the token service.
#[derive(Debug, Clone, Error)]
#[error("server error {code}: {description} (correlation id: {correlation_id})")]
pub struct ServerError {
    /// Protocol error code (e.g. `invalid_grant`).
    pub code: String,

    /// Human-readable description from the server.
    pub description: String,

    /// Correlation id echoed from the request, for support lookups.
    pub correlation_id: String,
}

impl ServerError {
    /// Whether this code is on the transient allow-list.
    pub fn is_transient(&self) -> bool {
        TRANSIENT_SERVER_CODES.contains(&self.code.as_str())
    }
}

/// Error type for token cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A persisted record is malformed - a corruption signal, surfaced
    /// rather than silently healed.
    #[error("invalid cache record at {key}: {message}")]
    InvalidRecord { key: String, message: String },

    /// A write transaction aborted; no partial state was persisted.
    #[error("cache write failed: {message}")]
    WriteFailed { message: String },

    /// A record could not be encoded before writing.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Error type for credential acquisition flows.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The request failed client-side validation and never reached the
    /// network.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The authorization response's state does not belong to the
    /// originating request. Possible interception; never retried.
    #[error("authorization state mismatch for context {context_id}")]
    StateMismatch { context_id: String },

    /// The server returned a well-formed error body.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The transport failed before a well-formed response arrived.
    #[error("network error: {message}")]
    Network { message: String },

    /// The server replied 2xx but the body fails cloud-specific
    /// validation (missing claims, issuer mismatch, undecodable token).
    #[error("malformed token response: {message}")]
    MalformedResponse { message: String },

    /// Nothing cached can satisfy the request silently; an interactive
    /// flow is needed.
    #[error("interaction required: {message}")]
    InteractionRequired { message: String },

    /// The user dismissed the interactive flow.
    #[error("authorization cancelled by user")]
    Cancelled,

    /// The interactive flow timed out without a response.
    #[error("authorization timed out")]
    TimedOut,

    /// Cache failure while persisting or reading the exchange.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl FlowError {
    /// Whether a caller may reasonably retry this failure (with backoff).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::TimedOut => true,
            Self::Server(e) => e.is_transient(),
            Self::InvalidRequest { .. }
            | Self::StateMismatch { .. }
            | Self::MalformedResponse { .. }
            | Self::InteractionRequired { .. }
            | Self::Cancelled
            | Self::Cache(_) => false,
        }
    }

    /// Whether this failure indicates a possible attack and must surface
    /// distinctly (and loudly) rather than being retried.
    pub fn is_security_sensitive(&self) -> bool {
        matches!(self, Self::StateMismatch { .. })
    }
}

/// Top-level error type encompassing all Keywarden core errors.
#[derive(Debug, Error)]
pub enum KeywardenError {
    /// Error from token cache operations.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Error from a credential acquisition flow.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),

    /// Error from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}
