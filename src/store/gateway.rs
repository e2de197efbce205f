//! Narrow interface over the shared key-value store
//!
//! Every process serving contests goes through this trait; the store is the
//! only consistency boundary between them.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Shared key-value store operations used by the engine
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, optionally with a time-to-live
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write a string value only if the key does not exist. Returns true when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Remove a key of any type
    async fn delete(&self, key: &str) -> Result<()>;

    /// Set a time-to-live on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Read every field of a hash. Missing keys read as an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Read a single hash field
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Write several hash fields
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Atomically create a hash with all `fields` if `key` does not exist yet.
    /// Returns true for the caller that created it.
    async fn hash_create(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Atomically add `by` to an integer hash field, returning the new value
    async fn hash_increment(&self, key: &str, field: &str, by: i64) -> Result<i64>;

    /// Add a member to a set. Returns true if the member was not present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove a member from a set. Returns true if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Append values to the tail of a list, returning the new length
    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize>;

    /// Pop from the head of a list
    async fn list_pop(&self, key: &str) -> Result<Option<String>>;

    /// Add or update a sorted-set member
    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<()>;

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Members with `min <= score <= max`, ascending by score
    async fn sorted_range_by_score(&self, key: &str, min: i64, max: i64)
        -> Result<Vec<(String, i64)>>;

    /// Connectivity probe for health checks
    async fn ping(&self) -> Result<()>;
}
