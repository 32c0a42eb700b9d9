//! Background maintenance: idle eviction and proactive token refresh.
//!
//! Each tick lists every session and fans it out to `concurrency_limit`
//! workers. Sessions are bucketed by provider subject so two sessions of the
//! same subject are always handled by the same worker, one after the other.

use crate::{
    clock::Clock,
    session::{RefreshOutcome, SessionManager},
    store::Session,
    Error, Result,
};
use futures::StreamExt;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TRIGGER_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TOKEN_REFRESH_TRIGGER_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;

const WORKER_QUEUE: usize = 64;

#[derive(Clone, Copy, Debug)]
pub struct HousekeeperConfig {
    /// Time between two ticks.
    pub trigger_interval: Duration,
    /// Refresh access tokens expiring within this window.
    pub token_refresh_trigger_interval: Duration,
    pub concurrency_limit: usize,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            trigger_interval: DEFAULT_TRIGGER_INTERVAL,
            token_refresh_trigger_interval: DEFAULT_TOKEN_REFRESH_TRIGGER_INTERVAL,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl HousekeeperConfig {
    #[must_use]
    pub const fn with_trigger_interval(mut self, interval: Duration) -> Self {
        self.trigger_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_token_refresh_trigger_interval(mut self, interval: Duration) -> Self {
        self.token_refresh_trigger_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

/// Counters for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub listed: usize,
    pub evicted: usize,
    pub refreshed: usize,
    pub failed: usize,
}

impl TickStats {
    fn merge(&mut self, other: Self) {
        self.listed += other.listed;
        self.evicted += other.evicted;
        self.refreshed += other.refreshed;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct Housekeeper {
    manager: SessionManager,
    clock: Arc<dyn Clock>,
    config: HousekeeperConfig,
}

impl Housekeeper {
    #[must_use]
    pub fn new(manager: SessionManager, clock: Arc<dyn Clock>, config: HousekeeperConfig) -> Self {
        Self {
            manager,
            clock,
            config,
        }
    }

    /// Run on a background task until `cancel` fires.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval = ?self.config.trigger_interval,
            workers = self.config.concurrency_limit,
            "Housekeeper started"
        );
        let mut ticker = tokio::time::interval(self.config.trigger_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once(&cancel).await {
                Ok(stats) => debug!(?stats, "Housekeeper tick finished"),
                Err(Error::Canceled) => break,
                Err(err) => error!("Housekeeper tick failed: {err}"),
            }
        }
        info!("Housekeeper stopped");
    }

    /// One full pass over every stored session.
    ///
    /// # Errors
    /// `Canceled` when `cancel` fires; workers are aborted and the listing is
    /// not resumed. Listing failures end the pass early and are returned.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<TickStats> {
        let limit = self.config.concurrency_limit.max(1);
        let mut senders = Vec::with_capacity(limit);
        let mut workers = JoinSet::new();
        for _ in 0..limit {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE);
            senders.push(tx);
            workers.spawn(self.clone().work(rx, cancel.clone()));
        }

        let mut sessions = self.manager.store().list_sessions();
        let mut listing_error = None;
        let mut listed = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(Error::Canceled);
                }
                next = sessions.next() => next,
            };
            let session = match next {
                None => break,
                Some(Ok(session)) => session,
                Some(Err(err)) => {
                    listing_error = Some(err);
                    break;
                }
            };
            listed += 1;

            let sender = &senders[bucket(&session.provider_id, limit)];
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(Error::Canceled);
                }
                sent = sender.send(session) => {
                    if sent.is_err() {
                        warn!("Housekeeper worker exited early");
                    }
                }
            }
        }
        drop(senders);

        let mut stats = TickStats {
            listed,
            ..TickStats::default()
        };
        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(Error::Canceled);
                }
                joined = workers.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok(worker_stats)) => stats.merge(worker_stats),
                Some(Err(err)) => error!("Housekeeper worker panicked: {err}"),
            }
        }

        match listing_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    async fn work(self, mut queue: mpsc::Receiver<Session>, cancel: CancellationToken) -> TickStats {
        let mut stats = TickStats::default();
        while let Some(session) = queue.recv().await {
            self.maintain(&session, &cancel, &mut stats).await;
        }
        stats
    }

    async fn maintain(&self, session: &Session, cancel: &CancellationToken, stats: &mut TickStats) {
        let idle_timeout = self.manager.config().idle_timeout;
        match self.manager.evict_idle(session, idle_timeout, cancel).await {
            Ok(true) => {
                stats.evicted += 1;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(tenant_id = %session.tenant_id, "Idle check failed: {err}");
                stats.failed += 1;
                return;
            }
        }

        if !self.refresh_due(session) {
            return;
        }
        if session.refresh_token.is_none() {
            debug!(tenant_id = %session.tenant_id, "Token expiring but no refresh token");
            return;
        }

        match self.manager.refresh(session, cancel).await {
            Ok(RefreshOutcome::Refreshed) => stats.refreshed += 1,
            Ok(RefreshOutcome::Evicted) => stats.evicted += 1,
            Err(err) => {
                warn!(tenant_id = %session.tenant_id, "Token refresh failed: {err}");
                stats.failed += 1;
            }
        }
    }

    /// Inclusive: a token expiring exactly at the trigger boundary is due.
    fn refresh_due(&self, session: &Session) -> bool {
        let window = chrono::Duration::from_std(self.config.token_refresh_trigger_interval)
            .unwrap_or(chrono::Duration::MAX);
        session.access_token_expiry - self.clock.now() <= window
    }
}

/// Worker index for a provider subject.
fn bucket(provider_id: &str, buckets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    provider_id.hash(&mut hasher);
    usize::try_from(hasher.finish() % buckets as u64).unwrap_or(0)
}
