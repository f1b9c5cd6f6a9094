//! Persistence abstraction the token cache is built on.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for credential material that prevents accidental logging
//! - [`KeyValueStore`] - Trait for the backing key-value store
//! - [`MemoryStore`] - In-memory implementation for testing and embedding
//!
//! The cache owns all key construction (see [`crate::cache::key`]); a
//! backing store only ever sees opaque string keys and JSON string values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

mod memory;

pub use memory::MemoryStore;

/// Credential material that must never appear in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the
/// value, and the buffer is zeroed on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for backing-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the store was denied.
    #[error("access denied to key: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Abstraction over the key-value store backing a token cache.
///
/// Values are opaque strings; the cache serializes records to JSON
/// before they reach the store and parses them on the way out.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value at the given key.
    ///
    /// Overwrites any existing value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    ///
    /// An empty prefix returns every key.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Snapshot every entry in the store.
    ///
    /// The returned pairs are a point-in-time copy; mutations after the
    /// call are not reflected in them.
    async fn get_all(&self) -> Result<Vec<(String, String)>, StoreError>;
}
