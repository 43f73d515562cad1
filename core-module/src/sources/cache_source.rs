//! Thin adapter that exposes the bounded cache (`crate::cache`) as a
//! resolution source in the chain.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Source, SourceError};
use crate::cache::{Cache, CacheLookup};
use crate::protocols::protocol::DnsRecord;

pub struct CacheSource {
    cache: Arc<Cache>,
}

impl CacheSource {
    pub fn new(cache: Arc<Cache>) -> Self {
        CacheSource { cache }
    }
}

#[async_trait]
impl Source for CacheSource {
    async fn resolve_v4(&self, name: &str) -> super::Result<DnsRecord> {
        match self.cache.resolve_v4(name).await {
            CacheLookup::Hit(record) => Ok(record),
            CacheLookup::Miss => Err(SourceError::NotFound),
        }
    }

    async fn resolve_v6(&self, name: &str) -> super::Result<DnsRecord> {
        match self.cache.resolve_v6(name).await {
            CacheLookup::Hit(record) => Ok(record),
            CacheLookup::Miss => Err(SourceError::NotFound),
        }
    }

    async fn feed(&self, record: DnsRecord) {
        self.cache.feed(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn feed_then_resolve_round_trips_through_the_cache() {
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        let source = CacheSource::new(cache);

        source
            .feed(DnsRecord::A {
                domain: "example.com".to_string(),
                addr: Ipv4Addr::new(1, 1, 1, 1),
                ttl: 300,
            })
            .await;

        assert!(source.resolve_v4("example.com").await.is_ok());
        assert!(matches!(
            source.resolve_v4("nowhere.example").await,
            Err(SourceError::NotFound)
        ));
    }
}
