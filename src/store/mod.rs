//! Expiring store for pending authorization states and sessions.
//!
//! A session occupies four keys written with the same TTL: the session
//! document, the provider-subject index, the access token and the refresh
//! token. A fifth key, the active marker, slides with the idle timeout.
//! Writes are not atomic across keys: a failed or canceled
//! [`SessionStore::store_session`] deletes whatever it wrote, and readers
//! treat any missing key as "no session". [`SessionStore::update_session`]
//! rewrites a live session in place and never deletes.

mod keys;
mod kv;
mod memory;
mod model;
mod redis;

pub use self::keys::{KeySpace, ObjectType};
pub use self::kv::KvStore;
pub use self::memory::MemoryKvStore;
pub use self::model::{AuthState, Claims, Session};
pub use self::redis::RedisKvStore;

use crate::{clock::Clock, Error, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_PREFIX: &str = "sessiond";
const SCAN_BATCH: usize = 100;
const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    cleanup_grace: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            keys,
            clock,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
        }
    }

    /// Deadline for the compensating delete after a failed session write.
    #[must_use]
    pub const fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    #[must_use]
    pub const fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// # Errors
    /// Returns an error when the store cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.kv.ping().await
    }

    /// Remaining lifetime of `expiry`, or `None` when it has passed.
    fn ttl_until(&self, expiry: DateTime<Utc>) -> Option<Duration> {
        (expiry - self.clock.now())
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
    }

    /// # Errors
    /// `StateExpired` when `state.expiry` is not in the future.
    #[instrument(skip_all)]
    pub async fn store_state(&self, state: &AuthState) -> Result<()> {
        let ttl = self.ttl_until(state.expiry).ok_or(Error::StateExpired)?;
        let value = serde_json::to_string(state)
            .map_err(|err| Error::server("failed to encode authorization state", err))?;
        self.kv
            .set(&self.keys.key(ObjectType::State, &state.id), &value, ttl)
            .await
    }

    /// # Errors
    /// `NotFound` when the state is unknown or already consumed.
    #[instrument(skip_all)]
    pub async fn load_state(&self, state_id: &str) -> Result<AuthState> {
        let value = self
            .kv
            .get(&self.keys.key(ObjectType::State, state_id))
            .await?
            .ok_or_else(|| Error::not_found("authorization state not found"))?;
        serde_json::from_str(&value)
            .map_err(|err| Error::server("failed to decode authorization state", err))
    }

    /// Idempotent.
    ///
    /// # Errors
    /// Storage failures only.
    pub async fn delete_state(&self, state_id: &str) -> Result<()> {
        self.kv
            .delete(&[self.keys.key(ObjectType::State, state_id)])
            .await
    }

    fn session_keys(&self, session: &Session) -> [String; 4] {
        [
            self.keys.key(ObjectType::Session, &session.id),
            self.keys
                .key(ObjectType::ProviderSession, &session.provider_id),
            self.keys.key(ObjectType::AccessToken, &session.id),
            self.keys.key(ObjectType::RefreshToken, &session.id),
        ]
    }

    /// Write the session and its three companions with TTL
    /// `session.expiry - now`. On failure or cancellation every key is
    /// deleted again, bounded by the cleanup grace period.
    ///
    /// # Errors
    /// `Canceled` on cancellation, a server error on a failed write.
    #[instrument(skip_all)]
    pub async fn store_session(&self, session: &Session, cancel: &CancellationToken) -> Result<()> {
        let ttl = self
            .ttl_until(session.expiry)
            .ok_or_else(|| Error::invalid_request("session expiry is not in the future"))?;
        let document = serde_json::to_string(session)
            .map_err(|err| Error::server("failed to encode session", err))?;

        let [session_key, provider_key, access_key, refresh_key] = self.session_keys(session);
        let writes = [
            (session_key, document),
            (provider_key, session.id.clone()),
            (access_key, session.access_token.clone()),
            (refresh_key, session.refresh_token.clone().unwrap_or_default()),
        ];

        let mut guard = CleanupGuard::new(
            self.kv.clone(),
            writes.iter().map(|(key, _)| key.clone()).collect(),
            self.cleanup_grace,
        );

        let outcome = cancel
            .run_until_cancelled(async {
                for (key, value) in &writes {
                    self.kv.set(key, value, ttl).await?;
                }
                Ok::<(), Error>(())
            })
            .await;

        match outcome {
            Some(Ok(())) => {
                guard.disarm();
                Ok(())
            }
            Some(Err(err)) => {
                error!("Failed to store session, removing partial writes: {err}");
                Err(Error::Server(anyhow::Error::new(err).context("failed to store session")))
            }
            None => {
                warn!("Session write canceled, removing partial writes");
                Err(Error::Canceled)
            }
        }
    }

    /// Rewrite an existing session: token keys first, the document last. A
    /// failed write leaves the previous values of the remaining keys in
    /// place, so the session stays loadable.
    ///
    /// # Errors
    /// `InvalidRequest` when the session has expired, a server error on a
    /// failed write.
    #[instrument(skip_all)]
    pub async fn update_session(&self, session: &Session) -> Result<()> {
        let ttl = self
            .ttl_until(session.expiry)
            .ok_or_else(|| Error::invalid_request("session expiry is not in the future"))?;
        let document = serde_json::to_string(session)
            .map_err(|err| Error::server("failed to encode session", err))?;

        let [session_key, provider_key, access_key, refresh_key] = self.session_keys(session);
        let writes = [
            (refresh_key, session.refresh_token.clone().unwrap_or_default()),
            (access_key, session.access_token.clone()),
            (provider_key, session.id.clone()),
            (session_key, document),
        ];
        for (key, value) in &writes {
            if let Err(err) = self.kv.set(key, value, ttl).await {
                error!("Failed to update session: {err}");
                return Err(Error::Server(
                    anyhow::Error::new(err).context("failed to update session"),
                ));
            }
        }
        Ok(())
    }

    /// # Errors
    /// `NotFound` unless the session and both token keys are present.
    #[instrument(skip_all)]
    pub async fn load_session(&self, session_id: &str) -> Result<Session> {
        let missing = || Error::not_found("session not found");

        let document = self
            .kv
            .get(&self.keys.key(ObjectType::Session, session_id))
            .await?
            .ok_or_else(missing)?;
        let access_token = self
            .kv
            .get(&self.keys.key(ObjectType::AccessToken, session_id))
            .await?
            .ok_or_else(missing)?;
        let refresh_token = self
            .kv
            .get(&self.keys.key(ObjectType::RefreshToken, session_id))
            .await?
            .ok_or_else(missing)?;

        let mut session: Session = serde_json::from_str(&document)
            .map_err(|err| Error::server("failed to decode session", err))?;
        session.access_token = access_token;
        session.refresh_token = Some(refresh_token).filter(|token| !token.is_empty());
        Ok(session)
    }

    /// # Errors
    /// `NotFound` when the subject has no live session.
    pub async fn load_session_by_provider(&self, provider_id: &str) -> Result<Session> {
        let session_id = self
            .kv
            .get(&self.keys.key(ObjectType::ProviderSession, provider_id))
            .await?
            .ok_or_else(|| Error::not_found("no session for provider subject"))?;
        self.load_session(&session_id).await
    }

    /// Delete the session, its companions and its active marker. Missing
    /// keys are not errors.
    ///
    /// # Errors
    /// Storage failures only.
    #[instrument(skip_all)]
    pub async fn delete_session(&self, session: &Session) -> Result<()> {
        let mut keys: Vec<String> = self.session_keys(session).into();
        keys.push(self.keys.key(ObjectType::Active, &session.id));
        self.kv.delete(&keys).await
    }

    /// Lazily walk every stored session. Sessions that vanish mid-walk are
    /// skipped; order is unspecified and a new call starts over.
    #[must_use]
    pub fn list_sessions(&self) -> BoxStream<'static, Result<Session>> {
        let state = ScanState {
            store: self.clone(),
            prefix: self.keys.scan_prefix(ObjectType::Session),
            cursor: 0,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            exhausted: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.pending.pop_front() {
                    let Some(id) = state
                        .store
                        .keys
                        .id_from_key(ObjectType::Session, &key)
                        .map(str::to_string)
                    else {
                        continue;
                    };
                    if !state.seen.insert(id.clone()) {
                        continue;
                    }
                    match state.store.load_session(&id).await {
                        Ok(session) => return Some((Ok(session), state)),
                        Err(err) if err.is_not_found() => {
                            debug!("session vanished during scan");
                        }
                        Err(err) => return Some((Err(err), state)),
                    }
                    continue;
                }

                if state.exhausted {
                    return None;
                }

                match state
                    .store
                    .kv
                    .scan(&state.prefix, state.cursor, SCAN_BATCH)
                    .await
                {
                    Ok((next, keys)) => {
                        state.pending.extend(keys);
                        state.cursor = next;
                        state.exhausted = next == 0;
                    }
                    Err(err) => {
                        state.exhausted = true;
                        return Some((Err(err), state));
                    }
                }
            }
        })
        .boxed()
    }

    /// # Errors
    /// Storage failures only.
    pub async fn is_active(&self, session_id: &str) -> Result<bool> {
        self.kv
            .exists(&self.keys.key(ObjectType::Active, session_id))
            .await
    }

    /// Timestamp of the last bump, if the marker is still alive.
    ///
    /// # Errors
    /// Storage failures only.
    pub async fn last_active(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        let value = self
            .kv
            .get(&self.keys.key(ObjectType::Active, session_id))
            .await?;
        Ok(value.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|err| warn!("Ignoring malformed active marker: {err}"))
                .ok()
        }))
    }

    /// Set or slide the active marker.
    ///
    /// # Errors
    /// Storage failures only.
    pub async fn bump_active(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        self.kv
            .set(
                &self.keys.key(ObjectType::Active, session_id),
                &now,
                ttl.max(Duration::from_millis(1)),
            )
            .await
    }
}

struct ScanState {
    store: SessionStore,
    prefix: String,
    cursor: u64,
    pending: VecDeque<String>,
    seen: HashSet<String>,
    exhausted: bool,
}

/// Deletes the written keys on drop unless disarmed. Runs on a spawned task
/// so it also fires when the writing future itself is dropped.
struct CleanupGuard {
    kv: Arc<dyn KvStore>,
    keys: Vec<String>,
    grace: Duration,
    armed: bool,
}

impl CleanupGuard {
    fn new(kv: Arc<dyn KvStore>, keys: Vec<String>, grace: Duration) -> Self {
        Self {
            kv,
            keys,
            grace,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("No runtime available to remove partial session writes");
            return;
        };

        let kv = self.kv.clone();
        let keys = std::mem::take(&mut self.keys);
        let grace = self.grace;
        handle.spawn(async move {
            match tokio::time::timeout(grace, kv.delete(&keys)).await {
                Ok(Ok(())) => debug!("Removed partial session writes"),
                Ok(Err(err)) => error!("Failed to remove partial session writes: {err}"),
                Err(_) => warn!("Partial session cleanup timed out, keys will expire by TTL"),
            }
        });
    }
}
