//! UDP endpoint: N receive workers and one send worker, decoupled by a
//! bounded channel so one slow or blackholed client never stalls the
//! receivers (`spec.md` §4.5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use crate::resolvers::Chain;

/// Number of concurrent receive workers.
pub const RECEIVE_WORKERS: usize = 10;
const READ_DEADLINE: Duration = Duration::from_millis(200);
const WRITE_DEADLINE: Duration = Duration::from_millis(200);
const READ_BUF_SIZE: usize = 4096;
const SEND_CHANNEL_CAPACITY: usize = 1024;

/// Owns the bound UDP socket, a swappable reference to the active resolver
/// chain, and its own cancellation token. The endpoint's socket and worker
/// pool outlive any single resolver-chain generation: `set_chain` lets the
/// supervisor hot-swap the chain on reconfigure without rebuilding the
/// socket or worker pool, and `shutdown` is the only thing that stops the
/// workers — no per-generation token ever reaches them, so replacing the
/// chain can never silently cancel a receive/send worker.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    chain: RwLock<Arc<Chain>>,
    cancel: CancellationToken,
}

impl Endpoint {
    pub async fn bind(addr: SocketAddr, chain: Arc<Chain>) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(Endpoint {
            socket: Arc::new(socket),
            chain: RwLock::new(chain),
            cancel: CancellationToken::new(),
        }))
    }

    pub async fn set_chain(&self, chain: Arc<Chain>) {
        *self.chain.write().await = chain;
    }

    /// Cancels the endpoint's own token, stopping every receive/send
    /// worker within one read/write deadline. Only the supervisor's full
    /// shutdown calls this — a chain reconfigure never does.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawns the worker pool and returns their join handles so the
    /// supervisor can await a clean drain on shutdown. Must be called on
    /// an `Arc<Endpoint>` since each worker holds its own clone.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(SEND_CHANNEL_CAPACITY);

        let mut handles: Vec<JoinHandle<()>> = (0..RECEIVE_WORKERS)
            .map(|worker_id| {
                let endpoint = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move { endpoint.receive_worker(worker_id, tx).await })
            })
            .collect();

        // Drop the template sender so the channel closes once every
        // receive worker's clone is dropped, letting the send worker exit.
        drop(tx);

        let endpoint = self.clone();
        handles.push(tokio::spawn(async move { endpoint.send_worker(rx).await }));

        handles
    }

    #[instrument(skip(self, tx))]
    async fn receive_worker(
        self: Arc<Self>,
        worker_id: usize,
        tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    ) {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match time::timeout(READ_DEADLINE, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, client))) => {
                    let datagram = buf[..len].to_vec();
                    let endpoint = self.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        endpoint.handle_datagram(datagram, client, tx).await;
                    });
                }
                Ok(Err(err)) => {
                    error!(worker_id, error = %err, "receive worker exiting on socket error");
                    return;
                }
                Err(_) => {
                    // Read deadline elapsed; re-check cancellation and loop.
                    if self.cancel.is_cancelled() {
                        return;
                    }
                }
            }
        }
    }

    async fn send_worker(self: Arc<Self>, mut rx: mpsc::Receiver<(Vec<u8>, SocketAddr)>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = rx.recv() => item,
            };

            let Some((bytes, addr)) = next else {
                return;
            };

            match time::timeout(WRITE_DEADLINE, self.socket.send_to(&bytes, addr)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "send worker exiting on socket error");
                    return;
                }
                Err(_) => {
                    warn!(%addr, "write deadline exceeded, dropping reply");
                }
            }
        }
    }

    /// Parses a single datagram, resolves it through the current chain,
    /// and enqueues the reply for the send worker. A datagram that fails
    /// to parse is dropped silently: the chain never surfaces a parse
    /// error to the client as a non-DNS reply.
    async fn handle_datagram(
        &self,
        datagram: Vec<u8>,
        client: SocketAddr,
        tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    ) {
        let request = match crate::protocols::protocol::DnsPacket::parse(&datagram) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%client, error = %err, "dropping unparsable datagram");
                return;
            }
        };

        let reply = {
            let chain = self.chain.read().await;
            chain.resolve(&request).await
        };

        let bytes = match reply.serialize(512) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(%client, error = %err, "failed to serialize reply");
                return;
            }
        };

        if tx.send((bytes, client)).await.is_err() {
            warn!(%client, "send channel closed, dropping reply");
        }
    }
}
