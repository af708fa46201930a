//! Error types for picoquery.
//!
//! Every failure a query can end in is a distinct [`QueryError`] variant so
//! callers can route on them: fall back to a local heuristic on [`Offline`],
//! surface [`Remote`] statuses to the user, and so on. The library returns
//! these as typed results and never panics on remote data.
//!
//! [`Offline`]: QueryError::Offline
//! [`Remote`]: QueryError::Remote

use thiserror::Error;

/// Unified error type for query and cache operations.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The device reports no network connectivity; the call was skipped.
    #[error("offline: no network connectivity, query skipped")]
    Offline,

    /// The remote service answered with a non-retryable HTTP status.
    #[error("remote service returned HTTP {status}")]
    Remote {
        /// The HTTP status code the service answered with.
        status: u16,
    },

    /// The request never produced an HTTP status (DNS, connect, TLS, ...).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A successful response carried a body that was not decodable as JSON.
    #[error("undecodable response body: {0}")]
    Decode(String),

    /// The query was cancelled while waiting out a warmup retry.
    #[error("query cancelled")]
    Cancelled,

    /// The cache blob could not be written by the persistence backend.
    #[error("cache storage: {0}")]
    Storage(String),

    /// Invalid or missing configuration.
    #[error("config: {0}")]
    Config(String),
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, QueryError>;
