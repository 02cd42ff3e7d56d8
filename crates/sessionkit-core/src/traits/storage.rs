//! Key-value storage capability.

use crate::error::StorageError;

/// A string key-value store.
///
/// Implementations may be ephemeral (scoped to one session) or durable.
/// Callers that must not fail treat any error as an absent value.
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
