use std::time::Duration;

use async_trait::async_trait;

use crate::batch::WriteBatch;
use crate::error::StateError;
use crate::key::StateKey;

/// Trait for the backing key-value store.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Multi-key operations ([`get_many`](Self::get_many) and
/// [`execute`](Self::execute)) must be atomic with respect to each other:
/// a snapshot never observes half of a batch.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Read several keys as one consistent snapshot, in the order given.
    async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<Option<String>>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Check if a key exists; if not, set it atomically with an optional TTL.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Atomically increment a counter by `delta`. Returns the new value.
    /// Creates the counter at 0 if it doesn't exist before incrementing.
    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError>;

    /// Whether `member` belongs to the set stored at `set`.
    async fn set_contains(&self, set: &StateKey, member: &str) -> Result<bool, StateError>;

    /// Apply every operation of `batch` atomically and in order.
    async fn execute(&self, batch: WriteBatch) -> Result<(), StateError>;
}
