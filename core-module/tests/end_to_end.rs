//! End-to-end scenarios built directly on the public chain/cache/source
//! API, without a bound socket — exercising the same composition the
//! supervisor assembles at startup.

use std::net::Ipv4Addr;
use std::sync::Arc;

use core_module::cache::{Cache, CacheConfig, CacheLookup};
use core_module::protocols::{DnsPacket, DnsQuestion, DnsRecord, QueryType, ResultCode};
use core_module::resolvers::{CacheFeeder, Chain};
use core_module::sources::blocker::Blocker;
use core_module::sources::cache_source::CacheSource;
use core_module::sources::static_map::StaticMap;
use core_module::sources::{Source, SourceError};

fn a_query(name: &str) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = 7;
    packet.header.questions = 1;
    packet
        .questions
        .push(DnsQuestion::new(name.to_string(), QueryType::A));
    packet
}

fn aaaa_query(name: &str) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = 7;
    packet.header.questions = 1;
    packet
        .questions
        .push(DnsQuestion::new(name.to_string(), QueryType::AAAA));
    packet
}

struct UnreachableUpstream;

#[async_trait::async_trait]
impl Source for UnreachableUpstream {
    async fn resolve_v4(&self, _name: &str) -> Result<DnsRecord, SourceError> {
        Err(SourceError::TransportError(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "unreachable",
        )))
    }

    async fn resolve_v6(&self, _name: &str) -> Result<DnsRecord, SourceError> {
        Err(SourceError::TransportError(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "unreachable",
        )))
    }
}

/// Scenario 1: blocked name answers `0.0.0.0`/TTL 60 regardless of the
/// (unreachable) upstream.
#[tokio::test]
async fn blocked_name_answers_sinkhole_even_with_unreachable_upstream() {
    let blocker = Arc::new(Blocker::new());
    blocker.insert("ads.example").await;
    let cache = Arc::new(Cache::new(CacheConfig::default()));

    let chain = Chain::new(vec![
        blocker.clone(),
        Arc::new(StaticMap::new(std::iter::empty())),
        Arc::new(CacheSource::new(cache.clone())),
        Arc::new(CacheFeeder::new(UnreachableUpstream, cache)),
    ]);

    let reply = chain.resolve(&a_query("ads.example")).await;
    assert_eq!(reply.header.rescode, ResultCode::NOERROR);
    assert_eq!(
        reply.answers[0],
        DnsRecord::A {
            domain: "ads.example".to_string(),
            addr: Ipv4Addr::UNSPECIFIED,
            ttl: 60,
        }
    );
}

/// Scenario 6: blocked AAAA query answers `::`.
#[tokio::test]
async fn blocked_name_answers_sinkhole_for_aaaa() {
    let blocker = Arc::new(Blocker::new());
    blocker.insert("ads.example").await;

    let chain = Chain::new(vec![blocker]);
    let reply = chain.resolve(&aaaa_query("ads.example")).await;

    assert_eq!(reply.header.rescode, ResultCode::NOERROR);
    assert_eq!(
        reply.answers[0],
        DnsRecord::AAAA {
            domain: "ads.example".to_string(),
            addr: std::net::Ipv6Addr::UNSPECIFIED,
            ttl: 60,
        }
    );
}

/// Scenario 2: a static override answers ahead of everything downstream.
#[tokio::test]
async fn static_override_answers_router_lan() {
    let chain = Chain::new(vec![
        Arc::new(Blocker::new()),
        Arc::new(StaticMap::new([(
            "router.lan".to_string(),
            std::net::IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
        )])),
    ]);

    let reply = chain.resolve(&a_query("router.lan")).await;
    assert_eq!(reply.header.rescode, ResultCode::NOERROR);
    assert_eq!(
        reply.answers[0],
        DnsRecord::A {
            domain: "router.lan".to_string(),
            addr: Ipv4Addr::new(192, 168, 1, 1),
            ttl: 60,
        }
    );
}

/// Scenario 4: a 2-entry capacity cache keeps only the most recent entries.
#[tokio::test]
async fn cache_capacity_keeps_only_two_entries() {
    let cache = Cache::new(CacheConfig {
        capacity_bytes: 100,
        ..CacheConfig::default()
    });

    for (name, octet) in [("a.test", 1), ("b.test", 2), ("c.test", 3)] {
        cache
            .feed(DnsRecord::A {
                domain: name.to_string(),
                addr: Ipv4Addr::new(octet, octet, octet, octet),
                ttl: 300,
            })
            .await;
    }

    assert_eq!(cache.resolve_v4("a.test").await, CacheLookup::Miss);
    assert!(matches!(cache.resolve_v4("b.test").await, CacheLookup::Hit(_)));
    assert!(matches!(cache.resolve_v4("c.test").await, CacheLookup::Hit(_)));
}

/// Scenario 5: an upstream hit is fed into the cache, so a second query
/// for the same name answers from the cache instead.
#[tokio::test]
async fn upstream_hit_populates_cache_for_next_query() {
    struct StubUpstream;

    #[async_trait::async_trait]
    impl Source for StubUpstream {
        async fn resolve_v4(&self, name: &str) -> Result<DnsRecord, SourceError> {
            Ok(DnsRecord::A {
                domain: name.to_string(),
                addr: Ipv4Addr::new(93, 184, 216, 34),
                ttl: 120,
            })
        }
        async fn resolve_v6(&self, _name: &str) -> Result<DnsRecord, SourceError> {
            Err(SourceError::NotFound)
        }
    }

    let cache = Arc::new(Cache::new(CacheConfig::default()));
    let chain = Chain::new(vec![
        Arc::new(Blocker::new()),
        Arc::new(StaticMap::new(std::iter::empty())),
        Arc::new(CacheSource::new(cache.clone())),
        Arc::new(CacheFeeder::new(StubUpstream, cache.clone())),
    ]);

    let first = chain.resolve(&a_query("example.com")).await;
    assert_eq!(
        first.answers[0],
        DnsRecord::A {
            domain: "example.com".to_string(),
            addr: Ipv4Addr::new(93, 184, 216, 34),
            ttl: 120,
        }
    );

    assert!(matches!(
        cache.resolve_v4("example.com").await,
        CacheLookup::Hit(_)
    ));

    let second = chain.resolve(&a_query("example.com")).await;
    assert_eq!(
        second.answers[0],
        DnsRecord::A {
            domain: "example.com".to_string(),
            addr: Ipv4Addr::new(93, 184, 216, 34),
            ttl: 60,
        }
    );
}

/// Boundary: a query arriving while the blocklist is still "loading" (no
/// entries inserted yet) is not blocked — no false positives.
#[tokio::test]
async fn query_before_blocklist_loaded_is_not_blocked() {
    let blocker = Arc::new(Blocker::new());
    let chain = Chain::new(vec![blocker]);

    let reply = chain.resolve(&a_query("ads.example")).await;
    assert_eq!(reply.header.rescode, ResultCode::NXDOMAIN);
}
