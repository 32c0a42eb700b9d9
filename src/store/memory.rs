use super::KvStore;
use crate::{clock::Clock, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, (String, DateTime<Utc>)>,
    fail_writes_containing: Option<String>,
}

/// In-process store whose TTLs follow the injected [`Clock`].
#[derive(Clone)]
pub struct MemoryKvStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// Make every `set` on a key containing `pattern` fail. Used to exercise
    /// partial-write cleanup.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_writes_containing(&self, pattern: Option<&str>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes_containing = pattern.map(str::to_string);
        }
    }

    /// Live keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .entries
                    .iter()
                    .filter(|(_, (_, expires))| *expires > now)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::server("kv store lock poisoned", anyhow::anyhow!("poisoned lock")))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| Error::server("invalid kv ttl", err))?;
        let expires = self.clock.now() + ttl;
        let mut inner = self.lock()?;
        if inner
            .fail_writes_containing
            .as_deref()
            .is_some_and(|pattern| key.contains(pattern))
        {
            return Err(Error::server(
                "failed to write kv key",
                anyhow::anyhow!("injected write failure for {key}"),
            ));
        }
        inner
            .entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let expired = match inner.entries.get(key) {
            Some((value, expires)) if *expires > now => return Ok(Some(value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut inner = self.lock()?;
        for key in keys {
            inner.entries.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, prefix: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let now = self.clock.now();
        let inner = self.lock()?;
        let matching: Vec<&String> = inner
            .entries
            .iter()
            .filter(|(key, (_, expires))| key.starts_with(prefix) && *expires > now)
            .map(|(key, _)| key)
            .collect();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(matching.len());
        let end = start.saturating_add(count.max(1)).min(matching.len());
        let page = matching[start..end].iter().map(|key| (*key).clone()).collect();
        let next = if end >= matching.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let clock = ManualClock::default();
        let kv = MemoryKvStore::new(Arc::new(clock.clone()));

        kv.set("a", "1", Duration::from_secs(10)).await.expect("set");
        assert_eq!(kv.get("a").await.expect("get"), Some("1".to_string()));

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(kv.get("a").await.expect("get"), None);
        assert!(!kv.exists("a").await.expect("exists"));
    }

    #[tokio::test]
    async fn scan_pages_through_prefix() {
        let kv = MemoryKvStore::new(Arc::new(ManualClock::default()));
        for i in 0..5 {
            kv.set(&format!("p:session:{i}"), "x", Duration::from_secs(60))
                .await
                .expect("set");
        }
        kv.set("p:state:z", "x", Duration::from_secs(60)).await.expect("set");

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, page) = kv.scan("p:session:", cursor, 2).await.expect("scan");
            seen.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|key| key.starts_with("p:session:")));
    }

    #[tokio::test]
    async fn injected_failures_only_hit_matching_keys() {
        let kv = MemoryKvStore::new(Arc::new(ManualClock::default()));
        kv.fail_writes_containing(Some("refreshToken"));
        assert!(kv.set("p:accessToken:x", "1", Duration::from_secs(5)).await.is_ok());
        assert!(kv.set("p:refreshToken:x", "1", Duration::from_secs(5)).await.is_err());
        kv.fail_writes_containing(None);
        assert!(kv.set("p:refreshToken:x", "1", Duration::from_secs(5)).await.is_ok());
    }
}
