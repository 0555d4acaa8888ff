//! Per-(identity, kind) windowed rate limiting.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};

use crate::kinds;

/// One quota bucket: events counted since the window opened.
#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Windowed quota tracker keyed by (pubkey, kind).
///
/// Buckets live in a sharded concurrent map so `allow` calls on one bucket
/// are globally ordered with respect to each other while different buckets
/// proceed in parallel. State is in-process only; it is a fairness control,
/// not a ledger, so it resets on restart.
pub struct RateLimiter {
    buckets: DashMap<(String, u32), Bucket>,
    /// Identities that bypass limiting unconditionally.
    authorized: DashSet<String>,
    window: Duration,
    default_limit: u32,
    overrides: HashMap<u32, u32>,
}

impl RateLimiter {
    /// Build a limiter with the given window and per-kind overrides on top
    /// of the built-in defaults.
    pub fn new(window: Duration, default_limit: u32, overrides: HashMap<u32, u32>) -> Self {
        Self {
            buckets: DashMap::new(),
            authorized: DashSet::new(),
            window,
            default_limit,
            overrides,
        }
    }

    /// Configured per-window maximum for a kind, falling back to the default
    /// for unrecognized kinds.
    pub fn limit_for(&self, kind: u32) -> u32 {
        if let Some(&limit) = self.overrides.get(&kind) {
            return limit;
        }
        let built_in = kinds::default_limit(kind);
        if built_in == kinds::DEFAULT_LIMIT {
            self.default_limit
        } else {
            built_in
        }
    }

    /// Add an identity to the bypass allow-list.
    pub fn authorize(&self, pubkey: &str) {
        self.authorized.insert(pubkey.to_string());
    }

    /// Count one publication attempt. Returns false once the window quota is
    /// exhausted.
    pub fn allow(&self, pubkey: &str, kind: u32) -> bool {
        if self.authorized.contains(pubkey) {
            return true;
        }
        let limit = self.limit_for(kind);
        let now = Instant::now();
        // The entry guard holds the shard lock, so the read-reset-increment
        // below is atomic with respect to concurrent calls on this bucket.
        let mut bucket = self
            .buckets
            .entry((pubkey.to_string(), kind))
            .or_insert(Bucket {
                count: 0,
                window_start: now,
            });
        if now.duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        if bucket.count < limit {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for at least two windows, bounding memory
    /// independent of how many (identity, kind) pairs have been seen.
    pub fn sweep(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < horizon);
    }

    /// Number of live buckets, for the sweeper log line and tests.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Run `sweep` forever at the given interval.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            // First tick completes immediately; skip it so the task idles
            // a full interval before the first sweep.
            tick.tick().await;
            loop {
                tick.tick().await;
                self.sweep();
                tracing::debug!(buckets = self.bucket_count(), "rate limiter swept");
            }
        })
    }
}
