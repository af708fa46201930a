//! # picoquery
//!
//! Resilient, cache-backed client for hosted text-inference APIs.
//!
//! A query is one POST of `{"inputs": "<text>"}` to `{endpoint}{model}`
//! with a bearer credential. Around that single call the client layers
//! the resilience a metered, sometimes-cold, sometimes-unreachable
//! endpoint needs:
//!
//! - a bounded, 24-hour response cache keyed by `(model, input prefix)`,
//!   persisted across restarts, so repeated queries never spend quota
//! - a retry loop for the service's "model warming up" (HTTP 503) reply
//! - a fail-fast offline path when the device has no connectivity
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use picoquery::{ClientConfig, QueryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(
//!         "https://api-inference.huggingface.co/models/",
//!         std::env::var("PICOQUERY_TOKEN")?,
//!     );
//!     let client = QueryClient::with_defaults(config)?;
//!     let value = client.query("I dreamed of flying", "sentiment-model").await?;
//!     println!("{value}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;

pub use cache::{CacheStats, CacheStorage, FileStorage, MemoryStorage, ResponseCache};
pub use client::{
    AssumeOnline, ConnectivityProbe, HttpTransport, InferenceTransport, QueryClient, WireReply,
};
pub use config::{CacheConfig, ClientConfig};
pub use error::{QueryError, Result};
