//! Error taxonomy for the cache engine.
//!
//! Mirrors the distinction the source plugin makes between caller mistakes
//! (bad sequencing of `register`/`access` calls), environment failures
//! (filesystem, database), and data corruption detected by the optional
//! sanity check.

/// Errors that can be returned by [`crate::CacheManager`] and [`crate::CacheScheduler`].
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("blob store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("bad sequence of calls: {0}")]
    BadSequenceOfCalls(String),

    #[error("invalid configuration: {0}")]
    BadConfiguration(String),

    #[error("cache invariant violated: {0}")]
    Corruption(String),

    #[error("factory error: {0}")]
    Factory(#[from] crate::factory::FactoryError),
}

pub type Result<T> = ::std::result::Result<T, CacheError>;
