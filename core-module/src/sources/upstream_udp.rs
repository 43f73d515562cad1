//! Plain UDP upstream resolver: sends a freshly-id'd query to a configured
//! `host:port` and matches the reply by transaction id.
//!
//! Queries and the datagram receiver run concurrently, so a background
//! task owns the socket's read half and dispatches replies to whichever
//! `query` call is waiting on that id; `query` itself only ever writes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{Source, SourceError};
use crate::protocols::protocol::{DnsPacket, DnsQuestion, QueryType, DnsRecord};

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const READ_BUF_SIZE: usize = 4096;

pub struct UpstreamUdp {
    socket: Arc<UdpSocket>,
    next_id: AtomicU16,
    pending: Mutex<HashMap<u16, oneshot::Sender<DnsPacket>>>,
}

impl UpstreamUdp {
    /// Binds an ephemeral local socket, connects it to `server`, and spawns
    /// the background receive loop that feeds replies back to `query`
    /// callers. The loop runs until `cancel` fires.
    pub async fn new(server: SocketAddr, cancel: CancellationToken) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(server).await?;

        let this = Arc::new(UpstreamUdp {
            socket: Arc::new(socket),
            next_id: AtomicU16::new(0),
            pending: Mutex::new(HashMap::new()),
        });

        tokio::spawn(Self::receive_loop(this.clone(), cancel));
        Ok(this)
    }

    async fn receive_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return;
                }
                result = self.socket.recv(&mut buf) => {
                    match result {
                        Ok(len) => self.dispatch_reply(&buf[..len]).await,
                        Err(err) => {
                            warn!(error = %err, "upstream udp receive loop exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_reply(&self, bytes: &[u8]) {
        let packet = match DnsPacket::parse(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "discarding unparsable upstream reply");
                return;
            }
        };

        if let Some(tx) = self.pending.lock().await.remove(&packet.header.id) {
            let _ = tx.send(packet);
        }
    }

    #[instrument(skip(self))]
    async fn query(&self, qname: &str, qtype: QueryType) -> super::Result<DnsPacket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.questions = 1;
        packet.header.recursion_desired = true;
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));

        let bytes = packet
            .serialize(512)
            .map_err(|_| SourceError::UpstreamCorrupt)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(err) = self.socket.send(&bytes).await {
            self.pending.lock().await.remove(&id);
            return Err(SourceError::TransportError(err));
        }

        match time::timeout(QUERY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.pending.lock().await.remove(&id);
                Err(SourceError::Timeout)
            }
        }
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
impl Source for UpstreamUdp {
    async fn resolve_v4(&self, name: &str) -> super::Result<DnsRecord> {
        let reply = self.query(name, QueryType::A).await?;
        first_answer(&reply, QueryType::A)
    }

    async fn resolve_v6(&self, name: &str) -> super::Result<DnsRecord> {
        let reply = self.query(name, QueryType::AAAA).await?;
        first_answer(&reply, QueryType::AAAA)
    }
}
