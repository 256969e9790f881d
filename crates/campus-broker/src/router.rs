//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use campus_common::BrokerConfig;
use campus_msg::{read_frame, write_frame, MessagingError, Reply};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::BrokerMetrics;
use crate::service::AllocationService;

const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// Sizing for one router instance.
#[derive(Debug, Clone, Copy)]
pub struct RouterSettings {
    pub workers: usize,
    pub max_frame_bytes: usize,
    pub queue_depth: usize,
}

impl RouterSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            workers,
            max_frame_bytes: config.max_frame_bytes,
            queue_depth: workers * QUEUE_DEPTH_PER_WORKER,
        }
    }
}

struct Job {
    frame: String,
    reply: oneshot::Sender<Reply>,
}

/// Running router: accept loop, connection tasks, and worker pool.
#[derive(Debug)]
pub struct RouterHandle {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl RouterHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close open connections, and wait for the workers.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.accept_task.await {
            error!(error = %err, "router accept task join error");
        }
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "router worker join error");
            }
        }
        info!(address = %self.addr, "router stopped");
    }
}

/// Bind `addr` and start serving frames through `service`.
pub async fn spawn_router(
    addr: SocketAddr,
    service: AllocationService,
    settings: RouterSettings,
    metrics: Option<BrokerMetrics>,
) -> Result<RouterHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind broker listener {addr}"))?;
    let bound = listener
        .local_addr()
        .context("failed to read broker listener address")?;

    let (shutdown_tx, _) = broadcast::channel(4);
    let (job_tx, job_rx) = mpsc::channel::<Job>(settings.queue_depth.max(1));
    let job_rx = Arc::new(Mutex::new(job_rx));
    let service = Arc::new(service);

    let workers = (0..settings.workers.max(1))
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&job_rx),
                Arc::clone(&service),
            ))
        })
        .collect();

    let accept_shutdown = shutdown_tx.subscribe();
    let accept_task = tokio::spawn(accept_loop(
        listener,
        job_tx,
        settings.max_frame_bytes,
        (shutdown_tx.clone(), accept_shutdown),
        metrics,
    ));

    info!(address = %bound, workers = settings.workers, "router listening");
    Ok(RouterHandle {
        addr: bound,
        shutdown: shutdown_tx,
        accept_task,
        workers,
    })
}

async fn accept_loop(
    listener: TcpListener,
    jobs: mpsc::Sender<Job>,
    max_frame_bytes: usize,
    (shutdown, mut shutdown_rx): (broadcast::Sender<()>, broadcast::Receiver<()>),
    metrics: Option<BrokerMetrics>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    if let Some(metrics) = &metrics {
                        metrics.connection_opened();
                    }
                    let jobs = jobs.clone();
                    let shutdown_rx = shutdown.subscribe();
                    let metrics = metrics.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, peer, jobs, max_frame_bytes, shutdown_rx).await;
                        if let Some(metrics) = &metrics {
                            metrics.connection_closed();
                        }
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    jobs: mpsc::Sender<Job>,
    max_frame_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let _ = stream.set_nodelay(true);
    let mut stream = BufReader::new(stream);
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = read_frame(&mut stream, max_frame_bytes) => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(MessagingError::FrameTooLarge { limit }) => {
                warn!(%peer, limit, "oversize frame, closing connection");
                let reply = Reply::error(format!("frame exceeds {limit} bytes"));
                let _ = write_frame(stream.get_mut(), &reply).await;
                break;
            }
            Err(err) => {
                debug!(%peer, error = %err, "connection read failed");
                break;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if jobs
            .send(Job {
                frame,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            break;
        }
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => Reply::error("request was not served"),
        };
        if let Err(err) = write_frame(stream.get_mut(), &reply).await {
            debug!(%peer, error = %err, "reply write failed");
            break;
        }
    }
    debug!(%peer, "connection closed");
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    service: Arc<AllocationService>,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(Job { frame, reply }) = job else {
            break;
        };
        let service = Arc::clone(&service);
        let outcome = tokio::task::spawn_blocking(move || service.handle(&frame)).await;
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                error!(worker, error = %err, "worker failed while serving a frame");
                Reply::error("internal error")
            }
        };
        let _ = reply.send(response);
    }
    debug!(worker, "worker exiting");
}
