//! Recently-active account state, kept in a bounded LFU cache.
//!
//! Whatever ingests firehose activity records a [`TimedEvent`] per event;
//! the cache upserts the account and accumulates per-category counts. When
//! the cache saturates, the least-frequently-seen account is evicted and
//! its accumulated state is flushed through the eviction hook.

pub mod lfu;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics::SharedMetricsPublisher;
use lfu::LfuCache;

/// One category of account activity.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    Post { path: String },
    Repost { path: String },
    Like { path: String },
    Follow { subject: String },
    Block { subject: String },
    Profile,
    Delete { path: String },
}

/// An account event stamped with its repository and arrival time.
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub did: String,
    pub recorded_at: DateTime<Utc>,
    pub event: AccountEvent,
}

/// Accumulated activity for one account.
#[derive(Debug, Clone)]
pub struct Account {
    pub did: String,
    pub posts: u64,
    pub reposts: u64,
    pub likes: u64,
    pub follows: u64,
    pub blocks: u64,
    pub profile_updates: u64,
    pub deletes: u64,
    pub last_seen: DateTime<Utc>,
}

impl Account {
    fn new(did: String, first_seen: DateTime<Utc>) -> Self {
        Self {
            did,
            posts: 0,
            reposts: 0,
            likes: 0,
            follows: 0,
            blocks: 0,
            profile_updates: 0,
            deletes: 0,
            last_seen: first_seen,
        }
    }

    /// Event-specific augmentation of the account record.
    fn apply(&mut self, event: &TimedEvent) {
        self.last_seen = event.recorded_at;
        match &event.event {
            AccountEvent::Post { .. } => self.posts += 1,
            AccountEvent::Repost { .. } => self.reposts += 1,
            AccountEvent::Like { .. } => self.likes += 1,
            AccountEvent::Follow { .. } => self.follows += 1,
            AccountEvent::Block { .. } => self.blocks += 1,
            AccountEvent::Profile => self.profile_updates += 1,
            AccountEvent::Delete { .. } => self.deletes += 1,
        }
    }

    pub fn event_total(&self) -> u64 {
        self.posts
            + self.reposts
            + self.likes
            + self.follows
            + self.blocks
            + self.profile_updates
            + self.deletes
    }
}

type AccountHandle = Arc<Mutex<Account>>;

/// LFU-bounded map of recently-active accounts.
pub struct EventCache {
    cache: Mutex<LfuCache<String, AccountHandle>>,
    evicted: Arc<AtomicU64>,
    reported_evictions: AtomicU64,
    metrics: SharedMetricsPublisher,
}

impl EventCache {
    pub fn new(max_accounts: usize, metrics: SharedMetricsPublisher) -> Self {
        let evicted = Arc::new(AtomicU64::new(0));
        let hook_evicted = evicted.clone();
        // The hook runs under the cache lock and must not call back into
        // the cache. It flushes the derived state into the log before the
        // record is dropped.
        let cache = LfuCache::with_eviction_hook(
            max_accounts,
            Box::new(move |did: &String, handle: &AccountHandle| {
                if let Ok(account) = handle.try_lock() {
                    debug!(
                        did = %did,
                        events = account.event_total(),
                        last_seen = %account.last_seen,
                        "evicting account activity"
                    );
                } else {
                    debug!(did = %did, "evicting account activity (record busy)");
                }
                hook_evicted.fetch_add(1, Ordering::Relaxed);
            }),
        );
        Self {
            cache: Mutex::new(cache),
            evicted,
            reported_evictions: AtomicU64::new(0),
            metrics,
        }
    }

    /// Upsert the account for `event.did` and apply the event.
    pub async fn record(&self, event: TimedEvent) {
        let handle = {
            let mut cache = self.cache.lock().await;
            match cache.get(&event.did) {
                Some(handle) => handle.clone(),
                None => {
                    let handle: AccountHandle = Arc::new(Mutex::new(Account::new(
                        event.did.clone(),
                        event.recorded_at,
                    )));
                    cache.insert(event.did.clone(), handle.clone());
                    handle
                }
            }
        };
        {
            let mut account = handle.lock().await;
            account.apply(&event);
        }

        // Evictions happen synchronously under the cache lock; the counter
        // delta is emitted here where awaiting is allowed
        let evicted = self.evicted.load(Ordering::Relaxed);
        let reported = self.reported_evictions.swap(evicted, Ordering::Relaxed);
        if evicted > reported {
            self.metrics.count("accounts.evicted", evicted - reported).await;
        }
    }

    /// Shared handle onto an account's record, bumping its frequency.
    pub async fn get_account(&self, did: &str) -> Option<AccountHandle> {
        let mut cache = self.cache.lock().await;
        cache.get(did).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
