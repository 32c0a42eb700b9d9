use super::KvStore;
use crate::{Error, Result};
use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult};
use std::{future::Future, time::Duration};
use tracing::{info_span, Instrument};

/// Redis-backed store. The connection manager reconnects on its own; every
/// command runs under the configured per-operation timeout.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisKvStore {
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid kv dsn")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("failed to connect to kv store")?;
        Ok(Self { conn, timeout })
    }

    async fn run<T, F>(&self, operation: &'static str, context: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let span = info_span!("kv.command", db.system = "redis", db.operation = operation);
        match tokio::time::timeout(self.timeout, fut).instrument(span).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::server(context, err)),
            Err(_) => Err(Error::TemporarilyUnavailable(format!(
                "kv {operation} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        self.run("PSETEX", "failed to write kv key", async move {
            let reply: RedisResult<()> = conn.pset_ex(key, value, millis).await;
            reply
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.run("GET", "failed to read kv key", async move {
            let reply: RedisResult<Option<String>> = conn.get(key).await;
            reply
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        self.run("DEL", "failed to delete kv keys", async move {
            let reply: RedisResult<()> = conn.del(keys).await;
            reply
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.run("EXISTS", "failed to check kv key", async move {
            let reply: RedisResult<bool> = conn.exists(key).await;
            reply
        })
        .await
    }

    async fn scan(&self, prefix: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(format!("{prefix}*"))
            .arg("COUNT")
            .arg(count.max(1));
        self.run("SCAN", "failed to scan kv keys", async move {
            let reply: RedisResult<(u64, Vec<String>)> = cmd.query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        self.run("PING", "kv ping failed", async move {
            let reply: RedisResult<String> = cmd.query_async(&mut conn).await;
            reply.map(|_| ())
        })
        .await
    }
}
