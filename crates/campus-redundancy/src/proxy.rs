//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Stable front address for brokers.
//!
//! The listening socket stays bound for the proxy's lifetime. Only the backend
//! target changes, so a failover never opens a window where the front address
//! refuses connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::metrics::FailoverMetrics;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_CONNECTIONS: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub connect_timeout: Duration,
    pub max_connections: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Shared handle to the proxy's backend target.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    backend: Arc<watch::Sender<SocketAddr>>,
    metrics: Option<FailoverMetrics>,
}

impl ProxyRoute {
    pub fn current(&self) -> SocketAddr {
        *self.backend.borrow()
    }

    /// Point new connections at `target` and close relays to the old one.
    /// Returns `false` when `target` already was the backend.
    pub fn redirect(&self, target: SocketAddr) -> bool {
        let mut previous = target;
        let changed = self.backend.send_if_modified(|current| {
            if *current == target {
                return false;
            }
            previous = std::mem::replace(current, target);
            true
        });
        if changed {
            info!(from = %previous, to = %target, "proxy backend redirected");
            if let Some(metrics) = &self.metrics {
                metrics.record_redirect();
            }
        }
        changed
    }
}

/// Accept loop forwarding every connection to the current backend.
#[derive(Debug)]
pub struct FailoverProxy {
    addr: SocketAddr,
    route: ProxyRoute,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl FailoverProxy {
    pub async fn bind(
        listen: SocketAddr,
        backend: SocketAddr,
        settings: ProxySettings,
        metrics: Option<FailoverMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind failover proxy {listen}"))?;
        let addr = listener
            .local_addr()
            .context("failed to read failover proxy address")?;

        let (backend_tx, _) = watch::channel(backend);
        let route = ProxyRoute {
            backend: Arc::new(backend_tx),
            metrics: metrics.clone(),
        };
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(
            listener,
            route.clone(),
            settings,
            shutdown_rx,
            metrics,
        ));
        info!(address = %addr, %backend, "failover proxy listening");
        Ok(Self {
            addr,
            route,
            shutdown,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn route(&self) -> ProxyRoute {
        self.route.clone()
    }

    pub fn redirect(&self, target: SocketAddr) -> bool {
        self.route.redirect(target)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "proxy task join error");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    route: ProxyRoute,
    settings: ProxySettings,
    mut shutdown: broadcast::Receiver<()>,
    metrics: Option<FailoverMetrics>,
) {
    let permits = Arc::new(Semaphore::new(settings.max_connections.max(1)));
    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "proxy accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            warn!(%peer, "proxy connection rejected: max connections reached");
            if let Some(metrics) = &metrics {
                metrics.record_connection("rejected");
            }
            continue;
        };
        let backend = route.backend.subscribe();
        let metrics = metrics.clone();
        let connect_timeout = settings.connect_timeout;
        let shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            relay(stream, peer, backend, connect_timeout, shutdown, metrics).await;
            drop(permit);
        });
    }
    debug!("proxy accept loop stopped");
}

async fn relay(
    mut inbound: TcpStream,
    peer: SocketAddr,
    mut backend: watch::Receiver<SocketAddr>,
    connect_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
    metrics: Option<FailoverMetrics>,
) {
    let target = *backend.borrow_and_update();
    let mut outbound = match timeout(connect_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            debug!(%peer, %target, error = %err, "backend unreachable");
            if let Some(metrics) = &metrics {
                metrics.record_connection("backend_unreachable");
            }
            return;
        }
        Err(_) => {
            debug!(%peer, %target, "backend connect timed out");
            if let Some(metrics) = &metrics {
                metrics.record_connection("backend_unreachable");
            }
            return;
        }
    };
    let _ = outbound.set_nodelay(true);
    if let Some(metrics) = &metrics {
        metrics.record_connection("relayed");
    }

    tokio::select! {
        copied = copy_bidirectional(&mut inbound, &mut outbound) => match copied {
            Ok((sent, received)) => debug!(%peer, %target, sent, received, "relay finished"),
            Err(err) => debug!(%peer, %target, error = %err, "relay ended with error"),
        },
        _ = backend.changed() => debug!(%peer, %target, "backend changed; relay closed"),
        _ = shutdown.recv() => {}
    }
}
