use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Expiring key-value capability backing [`super::SessionStore`].
///
/// Keys are independent: there is no multi-key atomicity, and each key
/// carries its own TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete every key in `keys`; missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// One page of keys starting with `prefix`. A returned cursor of `0`
    /// ends the iteration; pages may repeat keys.
    async fn scan(&self, prefix: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;

    async fn ping(&self) -> Result<()>;
}
