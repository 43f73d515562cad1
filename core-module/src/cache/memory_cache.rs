//! Bounded, byte-budgeted in-memory cache of A/AAAA records.
//!
//! Two structures are kept in sync under a single reader-writer lock: a
//! hash map from a 32-bit name digest to the cached record, and an
//! expiry-sorted deadline list used for O(1) amortized earliest-eviction
//! and O(k) reaping on garbage collection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use metrics::increment_counter;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::protocols::protocol::{DnsRecord, QueryType};

/// Byte cost charged against the capacity budget for every entry,
/// independent of its actual in-memory size.
const ENTRY_COST: u64 = 50;

/// TTL handed back on a cache hit. The spec fixes this to a constant
/// rather than returning the record's remaining time-to-live.
const CACHE_HIT_TTL: u32 = 60;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(DnsRecord),
    Miss,
}

#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Total byte budget across all entries.
    pub capacity_bytes: u64,
    /// Minimum TTL a fed record must carry (or be raised to).
    pub min_ttl: u32,
    /// When true, records below `min_ttl` are raised to it instead of
    /// being dropped.
    pub force_min_ttl: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity_bytes: 1_048_576,
            min_ttl: 60,
            force_min_ttl: false,
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    record: DnsRecord,
}

struct Deadline {
    expiry: Instant,
    key: u32,
}

struct Inner {
    map: HashMap<u32, CachedEntry>,
    deadlines: Vec<Deadline>,
    remaining: u64,
}

/// The bounded DNS record cache. Callers share one instance behind their
/// own `Arc`; the lock here guards both the map and the deadline list
/// together so they never observe each other out of sync.
pub struct Cache {
    config: CacheConfig,
    inner: RwLock<Inner>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Cache {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                deadlines: Vec::new(),
                remaining: config.capacity_bytes,
            }),
            config,
        }
    }

    /// Looks up an A record for `name`.
    pub async fn resolve_v4(&self, name: &str) -> CacheLookup {
        self.resolve(name, QueryType::A).await
    }

    /// Looks up an AAAA record for `name`.
    pub async fn resolve_v6(&self, name: &str) -> CacheLookup {
        self.resolve(name, QueryType::AAAA).await
    }

    async fn resolve(&self, name: &str, qtype: QueryType) -> CacheLookup {
        let key = cache_key(name, qtype);
        let inner = self.inner.read().await;
        match inner.map.get(&key) {
            Some(entry) => {
                trace!(name, ?qtype, "cache hit");
                increment_counter!("dns_cache_hits_total");
                CacheLookup::Hit(entry.record.with_ttl(CACHE_HIT_TTL))
            }
            None => {
                increment_counter!("dns_cache_misses_total");
                CacheLookup::Miss
            }
        }
    }

    /// Inserts an A or AAAA record, subject to the TTL-floor policy.
    /// Records of any other type are ignored. The first write for a given
    /// key wins: a duplicate insert is a silent no-op.
    pub async fn feed(&self, record: DnsRecord) {
        let (name, qtype, ttl) = match &record {
            DnsRecord::A { domain, ttl, .. } => (domain.clone(), QueryType::A, *ttl),
            DnsRecord::AAAA { domain, ttl, .. } => (domain.clone(), QueryType::AAAA, *ttl),
            DnsRecord::Other { .. } => return,
        };

        let record = if ttl < self.config.min_ttl {
            if !self.config.force_min_ttl {
                debug!(name, ttl, min_ttl = self.config.min_ttl, "dropping record below TTL floor");
                return;
            }
            record.with_ttl(self.config.min_ttl)
        } else {
            record
        };

        let key = cache_key(&name, qtype);
        let mut inner = self.inner.write().await;

        if inner.map.contains_key(&key) {
            trace!(name, "duplicate cache key, first write wins");
            return;
        }

        if inner.remaining < ENTRY_COST {
            evict_earliest(&mut inner);
        }

        let expiry = Instant::now() + Duration::from_secs(record.ttl() as u64);
        insert_deadline(&mut inner.deadlines, Deadline { expiry, key });
        inner.map.insert(key, CachedEntry { record });
        inner.remaining = inner.remaining.saturating_sub(ENTRY_COST);
    }

    /// Removes every entry and deadline, restoring the full capacity.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.map.clear();
        inner.deadlines.clear();
        inner.remaining = self.config.capacity_bytes;
    }

    /// Reaps all entries whose deadline has passed. Intended to be driven
    /// by a fixed-interval supervisor task (default once a minute).
    pub async fn reap_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        let mut removed = 0usize;
        while let Some(front) = inner.deadlines.first() {
            if front.expiry > now {
                break;
            }
            let key = inner.deadlines.remove(0).key;
            inner.map.remove(&key);
            removed += 1;
        }

        if removed > 0 {
            inner.remaining = inner
                .remaining
                .saturating_add(ENTRY_COST * removed as u64)
                .min(self.config.capacity_bytes);
            debug!(removed, "reaped expired cache entries");
            metrics::counter!("dns_cache_reaped_total", removed as u64);
        }

        removed
    }
}

/// Evicts the single earliest-expiring entry to make room for a new one.
/// Caller already holds the write lock.
fn evict_earliest(inner: &mut Inner) {
    if inner.deadlines.is_empty() {
        warn!("cache over budget with no entries to evict");
        return;
    }
    let victim = inner.deadlines.remove(0);
    inner.map.remove(&victim.key);
    inner.remaining = inner.remaining.saturating_add(ENTRY_COST);
}

/// Inserts a deadline preserving non-decreasing expiry order. Insertions
/// are almost always monotonically increasing (a fixed TTL applied to a
/// burst of inserts), so a scan from the tail finds the insertion point
/// in close to O(1) in the common case.
fn insert_deadline(deadlines: &mut Vec<Deadline>, deadline: Deadline) {
    let idx = match deadlines.binary_search_by(|d| d.expiry.cmp(&deadline.expiry)) {
        Ok(i) | Err(i) => i,
    };
    deadlines.insert(idx, deadline);
}

/// FNV-1a 32-bit hash of the canonical `name+family` string. Collisions
/// are accepted: a collided key silently aliases two names onto one
/// cache slot, trading a vanishingly rare wrong cache hit for a fixed
/// 4-byte key instead of storing the name text itself.
fn cache_key(name: &str, qtype: QueryType) -> u32 {
    let suffix = match qtype {
        QueryType::A => "4",
        QueryType::AAAA => "6",
        QueryType::Other(_) => "?",
    };

    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in name.to_ascii_lowercase().bytes().chain(suffix.bytes()) {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn a_record(name: &str, ttl: u32) -> DnsRecord {
        DnsRecord::A {
            domain: name.to_string(),
            addr: Ipv4Addr::new(10, 0, 0, 1),
            ttl,
        }
    }

    #[tokio::test]
    async fn feed_then_resolve_returns_hit_with_constant_ttl() {
        let cache = Cache::new(CacheConfig::default());
        cache.feed(a_record("example.com", 300)).await;

        match cache.resolve_v4("example.com").await {
            CacheLookup::Hit(DnsRecord::A { ttl, .. }) => assert_eq!(ttl, CACHE_HIT_TTL),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_miss_for_unknown_name() {
        let cache = Cache::new(CacheConfig::default());
        assert_eq!(cache.resolve_v4("nowhere.example").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn feed_drops_record_below_ttl_floor_when_not_forcing() {
        let cache = Cache::new(CacheConfig {
            min_ttl: 120,
            force_min_ttl: false,
            ..CacheConfig::default()
        });
        cache.feed(a_record("short.example", 10)).await;
        assert_eq!(cache.resolve_v4("short.example").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn feed_raises_ttl_to_floor_when_forcing() {
        let cache = Cache::new(CacheConfig {
            min_ttl: 120,
            force_min_ttl: true,
            ..CacheConfig::default()
        });
        cache.feed(a_record("short.example", 10)).await;
        assert!(matches!(
            cache.resolve_v4("short.example").await,
            CacheLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_feed_keeps_first_write() {
        let cache = Cache::new(CacheConfig::default());
        cache.feed(a_record("dup.example", 300)).await;
        cache
            .feed(DnsRecord::A {
                domain: "dup.example".to_string(),
                addr: Ipv4Addr::new(192, 168, 1, 1),
                ttl: 300,
            })
            .await;

        match cache.resolve_v4("dup.example").await {
            CacheLookup::Hit(DnsRecord::A { addr, .. }) => {
                assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 1))
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let cache = Cache::new(CacheConfig::default());
        cache.feed(a_record("a.example", 300)).await;
        cache.clear().await;
        assert_eq!(cache.resolve_v4("a.example").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn eviction_makes_room_when_over_budget() {
        let cache = Cache::new(CacheConfig {
            capacity_bytes: ENTRY_COST,
            ..CacheConfig::default()
        });
        cache.feed(a_record("first.example", 300)).await;
        cache.feed(a_record("second.example", 300)).await;

        assert_eq!(cache.resolve_v4("first.example").await, CacheLookup::Miss);
        assert!(matches!(
            cache.resolve_v4("second.example").await,
            CacheLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn reap_expired_removes_only_past_deadlines() {
        let cache = Cache::new(CacheConfig {
            min_ttl: 0,
            ..CacheConfig::default()
        });
        cache.feed(a_record("zero.example", 0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.feed(a_record("long.example", 300)).await;

        let removed = cache.reap_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.resolve_v4("zero.example").await, CacheLookup::Miss);
        assert!(matches!(
            cache.resolve_v4("long.example").await,
            CacheLookup::Hit(_)
        ));
    }
}
