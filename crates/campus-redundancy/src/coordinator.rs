//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! External health coordinator.
//!
//! Owns the failover proxy, probes the primary, and once the failure threshold
//! is reached keeps sending `activate` to the standby until it is acknowledged.
//! The proxy is redirected only after that acknowledgement.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use campus_common::AppConfig;
use campus_msg::{BrokerState, CommandMessage, Connection, Reply};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::metrics::FailoverMetrics;
use crate::prober::PrimaryProber;
use crate::proxy::{FailoverProxy, ProxyRoute, ProxySettings};
use crate::supervisor::{FailoverState, FailoverSupervisor};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub primary: SocketAddr,
    pub standby_service: SocketAddr,
    pub standby_control: SocketAddr,
    pub proxy: SocketAddr,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
    /// Deadline for one `activate` exchange with the standby.
    pub activation_timeout: Duration,
    pub proxy_settings: ProxySettings,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            primary: config.endpoints.primary,
            standby_service: config.endpoints.standby_service,
            standby_control: config.endpoints.standby_control,
            proxy: config.endpoints.proxy,
            probe_interval: config.health.probe_interval,
            probe_timeout: config.health.probe_timeout,
            failure_threshold: config.health.failure_threshold,
            activation_timeout: config.client.request_timeout,
            proxy_settings: ProxySettings {
                connect_timeout: config.client.connect_timeout,
                ..ProxySettings::default()
            },
        }
    }
}

/// Entry point for the `health-check` role.
#[derive(Debug)]
pub struct HealthCoordinator;

impl HealthCoordinator {
    /// Bind the proxy in front of the primary and start probing.
    pub async fn start(
        settings: CoordinatorSettings,
        metrics: Option<FailoverMetrics>,
    ) -> Result<CoordinatorHandle> {
        let proxy = FailoverProxy::bind(
            settings.proxy,
            settings.primary,
            settings.proxy_settings,
            metrics.clone(),
        )
        .await?;
        let supervisor = Arc::new(FailoverSupervisor::new(settings.failure_threshold));
        let (failed_over, _) = watch::channel(false);
        let failed_over = Arc::new(failed_over);
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(run(
            settings.clone(),
            Arc::clone(&supervisor),
            proxy.route(),
            Arc::clone(&failed_over),
            metrics,
            shutdown_rx,
        ));
        info!(
            proxy = %proxy.addr(),
            primary = %settings.primary,
            standby = %settings.standby_control,
            "health coordinator started"
        );

        Ok(CoordinatorHandle {
            proxy,
            supervisor,
            failed_over,
            shutdown,
            task,
        })
    }
}

#[derive(Debug)]
pub struct CoordinatorHandle {
    proxy: FailoverProxy,
    supervisor: Arc<FailoverSupervisor>,
    failed_over: Arc<watch::Sender<bool>>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy.addr()
    }

    /// Current proxy backend.
    pub fn backend(&self) -> SocketAddr {
        self.proxy.route().current()
    }

    pub fn state(&self) -> FailoverState {
        self.supervisor.state()
    }

    /// Resolves once the standby acknowledged activation and the proxy moved.
    pub async fn wait_for_failover(&self) {
        let mut failed_over = self.failed_over.subscribe();
        let _ = failed_over.wait_for(|done| *done).await;
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "coordinator task join error");
        }
        self.proxy.shutdown().await;
        info!("health coordinator stopped");
    }
}

async fn run(
    settings: CoordinatorSettings,
    supervisor: Arc<FailoverSupervisor>,
    route: ProxyRoute,
    failed_over: Arc<watch::Sender<bool>>,
    metrics: Option<FailoverMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut prober = PrimaryProber::new(settings.primary, settings.probe_timeout);
    let mut ticker = interval(settings.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        if supervisor.state() == FailoverState::Passive {
            let healthy = match prober.probe().await {
                Ok(_) => true,
                Err(err) => {
                    debug!(endpoint = %settings.primary, error = %err, "primary probe error");
                    false
                }
            };
            if let Some(metrics) = &metrics {
                metrics.record_probe(healthy);
            }
            match supervisor.record_probe(healthy) {
                Some(event) => {
                    warn!(
                        failures = event.consecutive_failures,
                        primary = %settings.primary,
                        "primary declared down; activating standby"
                    );
                    if let Some(metrics) = &metrics {
                        metrics.record_promotion(event.reason);
                    }
                }
                None => continue,
            }
        }

        match request_activation(settings.standby_control, settings.activation_timeout).await {
            Ok(()) => {
                route.redirect(settings.standby_service);
                failed_over.send_replace(true);
                info!(standby = %settings.standby_service, "failover complete");
                break;
            }
            Err(err) => warn!(
                standby = %settings.standby_control,
                error = %err,
                "standby activation not acknowledged; retrying"
            ),
        }
    }
    debug!("coordinator loop stopped");
}

async fn request_activation(control: SocketAddr, deadline: Duration) -> Result<()> {
    let mut connection = Connection::connect(control, deadline).await?;
    let reply: Reply = connection.request(&CommandMessage::ACTIVATE, deadline).await?;
    match reply {
        Reply::State(state) if state.state == BrokerState::Activated => Ok(()),
        Reply::Error(err) => bail!("standby refused activation: {}", err.error),
        other => bail!("unexpected activation reply: {other:?}"),
    }
}
