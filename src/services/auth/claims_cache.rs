//! Verified-claims cache keyed by SHA-256 of the raw token.
//!
//! Backed by a `moka` sync cache (sharded, LRU-bounded). Each entry carries
//! its own `expires_at` which is checked against the injected clock on every
//! read; `sweep` removes whatever has expired without blocking lookups.
use std::{sync::Arc, time::Duration};

use moka::{policy::EvictionPolicy, sync::Cache};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::services::auth::{claims::Claims, clock::Clock};

/// Default maximum number of cached tokens.
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Default ceiling on how long a verification result is reused.
pub const DEFAULT_CACHE_MAX_TTL: Duration = Duration::from_secs(300);

type TokenDigest = [u8; 32];

#[derive(Debug)]
struct CacheEntry {
    claims: Claims,
    expires_at: u64,
}

pub struct ClaimsCache {
    entries: Cache<TokenDigest, Arc<CacheEntry>>,
    max_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClaimsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCache")
            .field("entries", &self.entries.entry_count())
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl ClaimsCache {
    pub fn new(max_entries: u64, max_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let entries: Cache<TokenDigest, Arc<CacheEntry>> = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            // Wall-clock backstop; the authoritative check is `expires_at`.
            .time_to_live(max_ttl.max(Duration::from_secs(1)))
            .build();

        Self {
            entries,
            max_ttl,
            clock,
        }
    }

    fn digest(token: &str) -> TokenDigest {
        Sha256::digest(token.as_bytes()).into()
    }

    /// Cached claims for `token`, or `None` on a miss or an expired entry.
    pub fn lookup(&self, token: &str) -> Option<Claims> {
        let key = Self::digest(token);
        let entry = self.entries.get(&key)?;

        if self.clock.now() >= entry.expires_at {
            self.entries.invalidate(&key);
            return None;
        }
        Some(entry.claims.clone())
    }

    /// Cache `claims` until `min(exp, now + max_ttl)`. No-op when that is not in the future.
    pub fn store(&self, token: &str, claims: &Claims) {
        let now = self.clock.now();
        let expires_at = claims.exp.min(now.saturating_add(self.max_ttl.as_secs()));
        if expires_at <= now {
            return;
        }

        self.entries.insert(
            Self::digest(token),
            Arc::new(CacheEntry {
                claims: claims.clone(),
                expires_at,
            }),
        );
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.invalidate(&Self::digest(token));
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        // moka iteration does not lock out concurrent readers.
        for (key, entry) in self.entries.iter() {
            if now >= entry.expires_at {
                self.entries.invalidate(&*key);
                removed += 1;
            }
        }
        self.entries.run_pending_tasks();
        if removed > 0 {
            debug!(removed, "swept expired claims cache entries");
        }
        removed
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `sweep` every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("claims cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
        })
    }
}
