//! Pluggable resolution sources: blocker, static overrides, cache, upstream.
//!
//! Every source implements the same uniform interface so the resolver
//! chain (`resolvers::chain`) can treat them polymorphically.

pub mod blocker;
pub mod cache_source;
pub mod static_map;
pub mod upstream_doh;
pub mod upstream_udp;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use derive_more::{Display, Error, From};

use crate::protocols::protocol::DnsRecord;

#[derive(Debug, Display, From, Error)]
pub enum SourceError {
    #[display(fmt = "no record found")]
    NotFound,
    #[display(fmt = "upstream transport error: {}", _0)]
    TransportError(std::io::Error),
    #[display(fmt = "upstream reply did not parse as a valid message")]
    UpstreamCorrupt,
    #[display(fmt = "upstream request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// The default TTL stamped onto records this server constructs itself
/// (blocklist hits, static overrides) rather than copying from upstream.
pub const DEFAULT_TTL: u32 = 60;

/// Uniform resolution interface implemented by every source in the chain.
/// `feed` is a no-op for read-only sources; only the cache-feeder
/// decorator and the cache source itself give it a real body.
#[async_trait]
pub trait Source: Send + Sync {
    async fn resolve_v4(&self, name: &str) -> Result<DnsRecord>;
    async fn resolve_v6(&self, name: &str) -> Result<DnsRecord>;

    async fn feed(&self, _record: DnsRecord) {}
}

/// Lets an `Arc<dyn Source>` (or `Arc` of any concrete source, e.g. the
/// upstream clients, which hand out `Arc<Self>` to share their background
/// receive loop) be wrapped by a decorator that owns its inner source by
/// value, such as `CacheFeeder`.
#[async_trait]
impl<T: Source + ?Sized> Source for Arc<T> {
    async fn resolve_v4(&self, name: &str) -> Result<DnsRecord> {
        (**self).resolve_v4(name).await
    }

    async fn resolve_v6(&self, name: &str) -> Result<DnsRecord> {
        (**self).resolve_v6(name).await
    }

    async fn feed(&self, record: DnsRecord) {
        (**self).feed(record).await
    }
}

pub(crate) fn a_record(name: &str, addr: Ipv4Addr, ttl: u32) -> DnsRecord {
    DnsRecord::A {
        domain: name.to_string(),
        addr,
        ttl,
    }
}

pub(crate) fn aaaa_record(name: &str, addr: Ipv6Addr, ttl: u32) -> DnsRecord {
    DnsRecord::AAAA {
        domain: name.to_string(),
        addr,
        ttl,
    }
}
