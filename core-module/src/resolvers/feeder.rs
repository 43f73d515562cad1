//! Cache-feeder decorator: wraps a source, and on a successful resolution
//! writes the record into the cache before returning it. Feed failures
//! (capacity, TTL floor) are silent — caching is best-effort and must
//! never affect the resolution result itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::protocols::protocol::DnsRecord;
use crate::sources::{Source, SourceError};

pub struct CacheFeeder<S: Source> {
    inner: S,
    cache: Arc<Cache>,
}

impl<S: Source> CacheFeeder<S> {
    pub fn new(inner: S, cache: Arc<Cache>) -> Self {
        CacheFeeder { inner, cache }
    }
}

#[async_trait]
impl<S: Source> Source for CacheFeeder<S> {
    async fn resolve_v4(&self, name: &str) -> Result<DnsRecord, SourceError> {
        let record = self.inner.resolve_v4(name).await?;
        self.cache.feed(record.clone()).await;
        Ok(record)
    }

    async fn resolve_v6(&self, name: &str) -> Result<DnsRecord, SourceError> {
        let record = self.inner.resolve_v6(name).await?;
        self.cache.feed(record.clone()).await;
        Ok(record)
    }

    async fn feed(&self, record: DnsRecord) {
        self.inner.feed(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct StubUpstream;

    #[async_trait]
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

    #[tokio::test]
    async fn successful_resolution_is_written_to_the_cache() {
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        let feeder = CacheFeeder::new(StubUpstream, cache.clone());

        let record = feeder.resolve_v4("example.com").await.unwrap();
        assert_eq!(record.domain(), "example.com");

        assert!(matches!(
            cache.resolve_v4("example.com").await,
            crate::cache::CacheLookup::Hit(_)
        ));
    }
}
