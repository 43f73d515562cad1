//! Builds the cache, sources, chain and endpoint from configuration and
//! owns their lifetimes (`spec.md` §4.6). Installs the interrupt/terminate
//! signal handler and the cache GC ticker; `reconfigure` replaces the
//! whole chain atomically, after draining the previous worker pool.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::blocklist;
use crate::cache::{Cache, CacheConfig};
use crate::config::{Config, ExternalKind};
use crate::resolvers::{CacheFeeder, Chain};
use crate::server::Endpoint;
use crate::sources::blocker::Blocker;
use crate::sources::cache_source::CacheSource;
use crate::sources::static_map::StaticMap;
use crate::sources::upstream_doh::UpstreamDoh;
use crate::sources::upstream_udp::UpstreamUdp;
use crate::sources::Source;

/// Fixed GC tick interval. `cache.basettl == 0` disables the ticker
/// entirely rather than shortening it (`spec.md` §6).
const GC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to bind UDP endpoint: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to construct upstream resolver: {0}")]
    Upstream(String),
}

/// A single running generation of the resolution pipeline: the chain's own
/// background tasks (the upstream client's receive loop, the cache GC
/// ticker, the blocklist loader) — everything that depends on the chain
/// and its cache, but *not* the endpoint's socket workers, which outlive
/// every generation. `Supervisor::reconfigure` tears this whole struct
/// down and builds a fresh one without touching the endpoint.
struct Generation {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Generation {
    /// Cancels every task in this generation and waits for them to drain.
    /// Bounded by each worker's own deadline, so this always completes.
    async fn stop(self) {
        self.cancel.cancel();
        for handle in self.workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task exited with a panic");
            }
        }
    }
}

/// Owns the blocker and endpoint across reconfigurations; the cache, the
/// chain built from it, and the chain's own background tasks are
/// rebuilt wholesale as a fresh [`Generation`] on every reconfigure. The
/// endpoint's socket and worker pool are bound once in `start` and never
/// rebuilt — a reconfigure only calls `Endpoint::set_chain`.
pub struct Supervisor {
    blocker: Arc<Blocker>,
    endpoint: Arc<Endpoint>,
    endpoint_workers: Mutex<Vec<JoinHandle<()>>>,
    generation: Mutex<Generation>,
    memdump_path: Option<std::path::PathBuf>,
    metrics_installed: AtomicBool,
}

impl Supervisor {
    /// Builds the full pipeline from `config` and binds the UDP socket.
    pub async fn start(config: Config) -> Result<Arc<Self>, SupervisorError> {
        let cache = Arc::new(Cache::new(CacheConfig {
            capacity_bytes: config.cache.size,
            min_ttl: config.cache.basettl,
            force_min_ttl: config.cache.force_basettl,
        }));
        let blocker = Arc::new(Blocker::new());

        let cancel = CancellationToken::new();
        let chain = Arc::new(build_chain(&config, &cache, &blocker, cancel.clone()).await?);

        let endpoint = Endpoint::bind(config.endpoint.address, chain)
            .await
            .map_err(SupervisorError::Bind)?;
        let endpoint_workers = endpoint.spawn_workers();

        let workers = spawn_background_tasks(&config, &cache, &blocker, cancel.clone());

        let supervisor = Arc::new(Supervisor {
            blocker,
            endpoint,
            endpoint_workers: Mutex::new(endpoint_workers),
            generation: Mutex::new(Generation { cancel, workers }),
            memdump_path: config.memdump.clone(),
            metrics_installed: AtomicBool::new(false),
        });

        supervisor.install_metrics_exporter();
        Ok(supervisor)
    }

    /// Installs the Prometheus exporter once. Best-effort: a failure to
    /// bind the exporter (e.g. the metrics port is already taken) is
    /// logged but never fatal to serving DNS traffic.
    fn install_metrics_exporter(&self) {
        if self.metrics_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = PrometheusBuilder::new().install() {
            warn!(error = %err, "failed to install prometheus metrics exporter");
        }
    }

    /// Installs the interrupt/terminate handler and runs until it fires,
    /// then performs an orderly shutdown. Writes the memdump first, if
    /// configured.
    pub async fn run_until_signal(self: &Arc<Self>) -> std::io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }

        self.write_memdump().await;
        self.stop().await;
        Ok(())
    }

    /// Writes a small plain-text summary of record counts per source to
    /// `memdump`, if configured. A deliberately minimal stand-in for the
    /// heap-profiling output `spec.md` §1 places out of scope.
    async fn write_memdump(&self) {
        let Some(path) = &self.memdump_path else {
            return;
        };

        let summary = format!(
            "blocklist_entries={}\n",
            self.blocker.len().await,
        );

        if let Err(err) = write_memdump_file(path, &summary) {
            error!(path = %path.display(), error = %err, "failed to write memdump");
        } else {
            info!(path = %path.display(), "wrote memdump");
        }
    }

    /// Cancels the active generation's tasks and the endpoint's own
    /// worker pool, and waits for all of them to drain. Unlike
    /// `reconfigure`, this is a full shutdown: the socket workers are
    /// meant to stop here.
    pub async fn stop(&self) {
        let mut guard = self.generation.lock().await;
        let empty = Generation {
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        };
        let current = std::mem::replace(&mut *guard, empty);
        drop(guard);
        current.stop().await;

        self.endpoint.shutdown();
        let mut workers_guard = self.endpoint_workers.lock().await;
        let handles = std::mem::take(&mut *workers_guard);
        drop(workers_guard);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "endpoint worker task exited with a panic");
            }
        }
    }

    /// Builds a fresh chain and its own generation of background tasks
    /// (the upstream client's receive loop, the cache GC ticker, the
    /// blocklist loader) from `config`, installs it into the endpoint via
    /// `set_chain`, and only then cancels and drains the *previous*
    /// generation's tasks — the lifecycle contract `spec.md` §1 calls out
    /// explicitly. The endpoint's socket and worker pool are never
    /// touched: `Endpoint::spawn_workers` runs exactly once, in `start`,
    /// so reconfiguring can never cancel an in-flight receive or send
    /// worker.
    pub async fn reconfigure(&self, config: Config) -> Result<(), SupervisorError> {
        let new_cache = Arc::new(Cache::new(CacheConfig {
            capacity_bytes: config.cache.size,
            min_ttl: config.cache.basettl,
            force_min_ttl: config.cache.force_basettl,
        }));

        let cancel = CancellationToken::new();
        let chain = Arc::new(build_chain(&config, &new_cache, &self.blocker, cancel.clone()).await?);
        let workers = spawn_background_tasks(&config, &new_cache, &self.blocker, cancel.clone());

        self.endpoint.set_chain(chain).await;

        let mut guard = self.generation.lock().await;
        let previous = std::mem::replace(&mut *guard, Generation { cancel, workers });
        drop(guard);
        previous.stop().await;

        Ok(())
    }
}

fn write_memdump_file(path: &std::path::Path, summary: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(summary.as_bytes())
}

/// Assembles `[Blocker, Static, CacheSource, CacheFeeder(Upstream)]`
/// (`spec.md` §4.4). When `allow_external` is false, no upstream is
/// constructed and the chain ends at the cache source.
async fn build_chain(
    config: &Config,
    cache: &Arc<Cache>,
    blocker: &Arc<Blocker>,
    cancel: CancellationToken,
) -> Result<Chain, SupervisorError> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    sources.push(blocker.clone());
    sources.push(Arc::new(StaticMap::new(
        config
            .custom
            .iter()
            .map(|entry| (entry.name.clone(), entry.ip)),
    )));
    sources.push(Arc::new(CacheSource::new(cache.clone())));

    if config.allow_external {
        let upstream: Arc<dyn Source> = match config.external.kind {
            ExternalKind::Udp => {
                let addr = config
                    .external
                    .endpoint
                    .as_ref()
                    .ok_or_else(|| SupervisorError::Upstream("missing external.endpoint".into()))?
                    .parse::<std::net::SocketAddr>()
                    .map_err(|err| SupervisorError::Upstream(format!("{err}")))?;
                UpstreamUdp::new(addr, cancel)
                    .await
                    .map_err(|err| SupervisorError::Upstream(err.to_string()))?
            }
            ExternalKind::Doh => {
                let endpoint = config
                    .external
                    .endpoint
                    .clone()
                    .ok_or_else(|| SupervisorError::Upstream("missing external.endpoint".into()))?;
                Arc::new(
                    UpstreamDoh::new(endpoint).map_err(|err| SupervisorError::Upstream(err.to_string()))?,
                )
            }
        };

        sources.push(Arc::new(CacheFeeder::new(upstream, cache.clone())));
    }

    Ok(Chain::new(sources))
}

/// Spawns the cache GC ticker and the blocklist loader for one generation.
fn spawn_background_tasks(
    config: &Config,
    cache: &Arc<Cache>,
    blocker: &Arc<Blocker>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.cache.basettl > 0 {
        let cache = cache.clone();
        let gc_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            gc_ticker(cache, gc_cancel).await;
        }));
    }

    let blocker = blocker.clone();
    let sources = config.blocking_lists.clone();
    handles.push(tokio::spawn(async move {
        blocklist::load_all(&blocker, &sources).await;
    }));

    handles
}

async fn gc_ticker(cache: Arc<Cache>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(GC_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                cache.reap_expired().await;
            }
        }
    }
}
