//! The producer interface a host implements per bundle.

use std::fmt;

/// Outcome of a [`Factory::create`] call.
#[derive(Debug)]
pub enum FactoryResult {
    /// The factory produced a value, to be stored under the key it was asked for.
    Produced(Vec<u8>),
    /// The key is not producible right now. Treated as a non-fatal miss: not
    /// cached, not an error.
    NotAvailable,
    /// The factory failed outright.
    Error(FactoryError),
}

/// A factory failure, opaque beyond a message (factories own their own
/// underlying error types; this crate only needs to log and propagate).
#[derive(Debug)]
pub struct FactoryError(pub String);

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FactoryError {}

/// Produces the value for a key within one bundle. Implemented by whatever
/// system knows how to materialise that bundle's artifacts (decoding,
/// rendering, remote fetch, ...). Must be safe to call concurrently from
/// multiple Prefetcher threads and from the facade's own calling thread.
pub trait Factory: Send + Sync {
    fn create(&self, key: &str) -> FactoryResult;
}
