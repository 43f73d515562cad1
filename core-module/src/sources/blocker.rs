//! Blocklist source: a set of blocked names populated asynchronously at
//! startup by the blocklist loader (`crate::blocklist`).

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{aaaa_record, a_record, Source, SourceError, DEFAULT_TTL};
use crate::protocols::protocol::DnsRecord;

/// `0.0.0.0` is returned for blocked A queries, `::` for blocked AAAA
/// queries, matching most ad-blocking resolvers' "sinkhole" convention.
const SINKHOLE_V4: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
const SINKHOLE_V6: Ipv6Addr = Ipv6Addr::UNSPECIFIED;

#[derive(Default)]
pub struct Blocker {
    names: RwLock<HashSet<String>>,
}

impl Blocker {
    pub fn new() -> Self {
        Blocker {
            names: RwLock::new(HashSet::new()),
        }
    }

    /// Inserts a single name. Called by the blocklist loader as it streams
    /// lines in; a query arriving mid-load simply doesn't see the name yet
    /// (no false positives, per the spec's boundary behavior).
    pub async fn insert(&self, name: &str) {
        self.names.write().await.insert(normalize(name));
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.names.read().await.contains(&normalize(name))
    }

    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl Source for Blocker {
    async fn resolve_v4(&self, name: &str) -> super::Result<DnsRecord> {
        if self.contains(name).await {
            Ok(a_record(name, SINKHOLE_V4, DEFAULT_TTL))
        } else {
            Err(SourceError::NotFound)
        }
    }

    async fn resolve_v6(&self, name: &str) -> super::Result<DnsRecord> {
        if self.contains(name).await {
            Ok(aaaa_record(name, SINKHOLE_V6, DEFAULT_TTL))
        } else {
            Err(SourceError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocked_name_returns_sinkhole_address() {
        let blocker = Blocker::new();
        blocker.insert("ads.example").await;

        let record = blocker.resolve_v4("ads.example").await.unwrap();
        assert_eq!(
            record,
            DnsRecord::A {
                domain: "ads.example".to_string(),
                addr: SINKHOLE_V4,
                ttl: DEFAULT_TTL,
            }
        );

        let record = blocker.resolve_v6("ads.example").await.unwrap();
        assert_eq!(
            record,
            DnsRecord::AAAA {
                domain: "ads.example".to_string(),
                addr: SINKHOLE_V6,
                ttl: DEFAULT_TTL,
            }
        );
    }

    #[tokio::test]
    async fn unblocked_name_falls_through() {
        let blocker = Blocker::new();
        assert!(matches!(
            blocker.resolve_v4("example.com").await,
            Err(SourceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn lookup_is_case_and_trailing_dot_insensitive() {
        let blocker = Blocker::new();
        blocker.insert("Ads.Example.").await;
        assert!(blocker.contains("ads.example").await);
    }
}
