//! DNS-over-HTTPS upstream resolver: the query is serialized to wire
//! format and POSTed as the request body; the response body is parsed
//! the same way replies off a UDP socket would be.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;

use super::{Source, SourceError};
use crate::protocols::protocol::{DnsPacket, DnsQuestion, QueryType, DnsRecord};

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

pub struct UpstreamDoh {
    client: Client,
    endpoint: String,
}

impl UpstreamDoh {
    pub fn new(endpoint: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(QUERY_TIMEOUT).build()?;
        Ok(UpstreamDoh {
            client,
            endpoint: endpoint.into(),
        })
    }

    #[instrument(skip(self))]
    async fn query(&self, qname: &str, qtype: QueryType) -> super::Result<DnsPacket> {
        let mut packet = DnsPacket::new();
        packet.header.id = rand::random();
        packet.header.questions = 1;
        packet.header.recursion_desired = true;
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));

        let body = packet
            .serialize(512)
            .map_err(|_| SourceError::UpstreamCorrupt)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::TransportError(std::io::Error::new(std::io::ErrorKind::Other, err))
                }
            })?;

        let bytes = response.bytes().await.map_err(|err| {
            SourceError::TransportError(std::io::Error::new(std::io::ErrorKind::Other, err))
        })?;

        DnsPacket::parse(&bytes).map_err(|_| SourceError::UpstreamCorrupt)
    }
}

fn first_answer(packet: &DnsPacket, qtype: QueryType) -> super::Result<DnsRecord> {
    packet
        .answers
        .iter()
        .find(|record| record.query_type() == qtype)
        .cloned()
        .ok_or(SourceError::NotFound)
}

#[async_trait]
impl Source for UpstreamDoh {
    async fn resolve_v4(&self, name: &str) -> super::Result<DnsRecord> {
        let reply = self.query(name, QueryType::A).await?;
        first_answer(&reply, QueryType::A)
    }

    async fn resolve_v6(&self, name: &str) -> super::Result<DnsRecord> {
        let reply = self.query(name, QueryType::AAAA).await?;
        first_answer(&reply, QueryType::AAAA)
    }
}
