//! Static name → address overrides loaded once from configuration.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;

use super::{aaaa_record, a_record, Source, SourceError, DEFAULT_TTL};
use crate::protocols::protocol::DnsRecord;

/// Immutable once built: static overrides never change after startup, so
/// no lock is needed.
pub struct StaticMap {
    v4: HashMap<String, Ipv4Addr>,
    v6: HashMap<String, Ipv6Addr>,
}

impl StaticMap {
    pub fn new(entries: impl IntoIterator<Item = (String, std::net::IpAddr)>) -> Self {
        let mut v4 = HashMap::new();
        let mut v6 = HashMap::new();

        for (name, addr) in entries {
            let key = name.trim().trim_end_matches('.').to_ascii_lowercase();
            match addr {
                std::net::IpAddr::V4(ip) => {
                    v4.insert(key, ip);
                }
                std::net::IpAddr::V6(ip) => {
                    v6.insert(key, ip);
                }
            }
        }

        StaticMap { v4, v6 }
    }
}

#[async_trait]
impl Source for StaticMap {
    async fn resolve_v4(&self, name: &str) -> super::Result<DnsRecord> {
        let key = name.trim_end_matches('.').to_ascii_lowercase();
        self.v4
            .get(&key)
            .map(|addr| a_record(name, *addr, DEFAULT_TTL))
            .ok_or(SourceError::NotFound)
    }

    async fn resolve_v6(&self, name: &str) -> super::Result<DnsRecord> {
        let key = name.trim_end_matches('.').to_ascii_lowercase();
        self.v6
            .get(&key)
            .map(|addr| aaaa_record(name, *addr, DEFAULT_TTL))
            .ok_or(SourceError::NotFound)
    }
}
