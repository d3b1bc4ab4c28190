//! Fingerprint-keyed response cache.
//!
//! Maps a SHA-256 fingerprint of the output-affecting request fields to a
//! previously computed response. Entries expire passively on read and are
//! swept periodically. Concurrent identical misses may both write; the last
//! write wins.

use bridge_core::{CanonicalRequest, CanonicalResponse, Message};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry time-to-live
    pub ttl: Duration,
    /// Maximum number of entries
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live entries (expired entries not yet swept are included)
    pub size: usize,
    /// Lookups served from the cache
    pub hit_count: u64,
    /// Lookups that missed
    pub miss_count: u64,
}

/// Fields that affect model output, in fixed order
#[derive(Debug, Serialize)]
struct FingerprintKey<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature_bits: u32,
    system: Option<&'a str>,
}

#[derive(Debug)]
struct CacheEntry {
    response: CanonicalResponse,
    model: String,
    inserted_at: Instant,
    ttl: Duration,
    hits: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// In-memory response cache
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Configured time-to-live
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Stable fingerprint of a request.
    ///
    /// Covers model, messages, max tokens, temperature and system preamble.
    /// Correlation id and stop sequences are excluded.
    #[must_use]
    pub fn fingerprint(request: &CanonicalRequest) -> String {
        let key = FingerprintKey {
            model: request.model(),
            messages: request.messages(),
            max_tokens: request.max_tokens(),
            temperature_bits: request.temperature_value().to_bits(),
            system: request.system(),
        };
        let bytes =
            serde_json::to_vec(&key).unwrap_or_else(|_| format!("{key:?}").into_bytes());
        hex::encode(Sha256::digest(&bytes))
    }

    /// Look up a response; an expired entry is removed and counts as a miss
    pub fn get(&self, request: &CanonicalRequest) -> Option<CanonicalResponse> {
        let key = Self::fingerprint(request);
        let now = Instant::now();
        let mut entries = self.entries.write();

        let hit = match entries.get_mut(&key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                Some(entry.response.clone())
            }
            _ => None,
        };
        if hit.is_none() {
            entries.remove(&key);
        }
        drop(entries);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %request.id(), fingerprint = &key[..12], "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store a response, overwriting any entry with the same fingerprint
    pub fn put(&self, request: &CanonicalRequest, response: CanonicalResponse) {
        if self.config.max_entries == 0 {
            return;
        }
        let key = Self::fingerprint(request);
        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            Self::evict(&mut entries, now, self.config.max_entries);
        }

        entries.insert(
            key,
            CacheEntry {
                response,
                model: request.model().to_string(),
                inserted_at: now,
                ttl: self.config.ttl,
                hits: 0,
            },
        );
    }

    /// Expired entries first, then least-hit and oldest, until one slot is free
    fn evict(entries: &mut HashMap<String, CacheEntry>, now: Instant, max_entries: usize) {
        entries.retain(|_, entry| !entry.is_expired(now));
        if entries.len() < max_entries {
            return;
        }

        let to_remove = entries.len() + 1 - max_entries;
        let mut ranked: Vec<(String, u64, Instant)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.hits, v.inserted_at))
            .collect();
        ranked.sort_by_key(|(_, hits, inserted_at)| (*hits, *inserted_at));

        for (key, _, _) in ranked.into_iter().take(to_remove) {
            entries.remove(&key);
        }
    }

    /// Remove the entry for a request; returns whether one existed
    pub fn remove(&self, request: &CanonicalRequest) -> bool {
        self.entries
            .write()
            .remove(&Self::fingerprint(request))
            .is_some()
    }

    /// Remove every entry produced for `model`
    pub fn invalidate_model(&self, model: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.model != model);
        before - entries.len()
    }

    /// Remove every entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Drop expired entries; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.read().len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}
