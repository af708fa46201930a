//! Connectivity probe collaborator.
//!
//! A synchronous "is the device online" signal consulted once before the
//! first network attempt of a query. Injected as a trait so tests and
//! embedders with a platform-specific signal can supply their own.

#[cfg(test)]
use mockall::automock;

/// Boolean connectivity signal.
#[cfg_attr(test, automock)]
pub trait ConnectivityProbe: Send + Sync {
    /// `true` when the runtime believes a network path exists.
    fn is_online(&self) -> bool;
}

/// Probe for environments without a meaningful offline signal: always
/// reports online, so every query proceeds to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

impl ConnectivityProbe for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}
