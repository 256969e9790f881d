//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use campus_broker::{spawn_router, AllocationService, BrokerMetrics, RouterHandle, RouterSettings};
use campus_common::AppConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::control::serve_control;
use crate::metrics::FailoverMetrics;
use crate::prober::PrimaryProber;
use crate::proxy::{FailoverProxy, ProxyRoute, ProxySettings};
use crate::supervisor::{FailoverEvent, FailoverReason, FailoverState, FailoverSupervisor};

/// Addresses and timings for one standby broker.
#[derive(Debug, Clone)]
pub struct StandbySettings {
    pub primary: SocketAddr,
    pub service: SocketAddr,
    pub control: SocketAddr,
    /// Front address of the failover proxy, when this standby runs it.
    pub proxy: Option<SocketAddr>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
    pub max_frame_bytes: usize,
    pub router: RouterSettings,
    pub proxy_settings: ProxySettings,
}

impl StandbySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            primary: config.endpoints.primary,
            service: config.endpoints.standby_service,
            control: config.endpoints.standby_control,
            proxy: config
                .health
                .standby_runs_proxy
                .then_some(config.endpoints.proxy),
            probe_interval: config.health.probe_interval,
            probe_timeout: config.health.probe_timeout,
            failure_threshold: config.health.failure_threshold,
            max_frame_bytes: config.broker.max_frame_bytes,
            router: RouterSettings::from_config(&config.broker),
            proxy_settings: ProxySettings {
                connect_timeout: config.client.connect_timeout,
                ..ProxySettings::default()
            },
        }
    }
}

/// State shared by the monitor task and the control endpoint.
#[derive(Debug)]
pub(crate) struct StandbyCore {
    settings: StandbySettings,
    supervisor: FailoverSupervisor,
    service: AllocationService,
    route: Option<ProxyRoute>,
    router: Mutex<Option<RouterHandle>>,
    serving: watch::Sender<Option<SocketAddr>>,
    metrics: Option<FailoverMetrics>,
    broker_metrics: Option<BrokerMetrics>,
}

impl StandbyCore {
    pub(crate) fn state(&self) -> FailoverState {
        self.supervisor.state()
    }

    fn serving_addr(&self) -> Option<SocketAddr> {
        *self.serving.borrow()
    }

    /// Promote on request. Idempotent: once serving, returns the service address.
    pub(crate) async fn activate(&self, reason: FailoverReason) -> Result<SocketAddr> {
        if let Some(event) = self.supervisor.activate(reason) {
            self.on_transition(&event);
        }
        self.ensure_serving().await
    }

    fn on_transition(&self, event: &FailoverEvent) {
        info!(
            reason = event.reason.as_str(),
            failures = event.consecutive_failures,
            primary = %self.settings.primary,
            "standby promotion started"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_promotion(event.reason);
            metrics.set_state(FailoverState::Active);
        }
    }

    /// Reload the durable store, then start serving and redirect the proxy.
    async fn ensure_serving(&self) -> Result<SocketAddr> {
        let mut router = self.router.lock().await;
        if let Some(handle) = router.as_ref() {
            return Ok(handle.addr());
        }

        let allocator = Arc::clone(self.service.allocator());
        match tokio::task::spawn_blocking(move || allocator.reload()).await {
            Ok(Ok(report)) => info!(
                records = report.records,
                units_restored = report.units_restored,
                "durable store reloaded before serving"
            ),
            Ok(Err(err)) => error!(
                error = %err,
                "durable store reload failed; serving from in-memory state"
            ),
            Err(err) => error!(error = %err, "durable store reload task failed"),
        }

        let handle = spawn_router(
            self.settings.service,
            self.service.clone(),
            self.settings.router,
            self.broker_metrics.clone(),
        )
        .await
        .context("standby could not start serving")?;
        let addr = handle.addr();
        *router = Some(handle);

        if let Some(route) = &self.route {
            route.redirect(addr);
        }
        self.serving.send_replace(Some(addr));
        info!(address = %addr, "standby active; serving allocation traffic");
        Ok(addr)
    }
}

/// Passive broker that watches the primary and takes over its traffic.
#[derive(Debug)]
pub struct StandbyBroker {
    core: Arc<StandbyCore>,
    control_addr: SocketAddr,
    proxy: Option<FailoverProxy>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl StandbyBroker {
    /// Bind the control endpoint (and proxy, if configured) and start probing.
    pub async fn start(
        settings: StandbySettings,
        service: AllocationService,
        metrics: Option<FailoverMetrics>,
        broker_metrics: Option<BrokerMetrics>,
    ) -> Result<Self> {
        let proxy = match settings.proxy {
            Some(listen) => Some(
                FailoverProxy::bind(
                    listen,
                    settings.primary,
                    settings.proxy_settings,
                    metrics.clone(),
                )
                .await?,
            ),
            None => None,
        };
        let listener = TcpListener::bind(settings.control)
            .await
            .with_context(|| format!("failed to bind standby control endpoint {}", settings.control))?;
        let control_addr = listener
            .local_addr()
            .context("failed to read control endpoint address")?;

        if let Some(metrics) = &metrics {
            metrics.set_state(FailoverState::Passive);
        }
        let (serving, _) = watch::channel(None);
        let core = Arc::new(StandbyCore {
            supervisor: FailoverSupervisor::new(settings.failure_threshold),
            route: proxy.as_ref().map(FailoverProxy::route),
            router: Mutex::new(None),
            serving,
            service,
            metrics,
            broker_metrics,
            settings,
        });

        let (shutdown, _) = broadcast::channel(1);
        let control_task = tokio::spawn(serve_control(
            listener,
            Arc::clone(&core),
            core.settings.max_frame_bytes,
            shutdown.subscribe(),
        ));
        let monitor_task = tokio::spawn(monitor(Arc::clone(&core), shutdown.subscribe()));
        info!(
            primary = %core.settings.primary,
            control = %control_addr,
            proxy = ?proxy.as_ref().map(FailoverProxy::addr),
            "standby passive; monitoring primary"
        );

        Ok(Self {
            core,
            control_addr,
            proxy,
            shutdown,
            tasks: vec![control_task, monitor_task],
        })
    }

    pub fn state(&self) -> FailoverState {
        self.core.state()
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        self.proxy.as_ref().map(FailoverProxy::addr)
    }

    /// Service address once promoted.
    pub fn serving_addr(&self) -> Option<SocketAddr> {
        self.core.serving_addr()
    }

    /// Resolves once the standby is serving allocation traffic.
    pub async fn wait_until_serving(&self) -> Option<SocketAddr> {
        let mut serving = self.core.serving.subscribe();
        let addr = serving.wait_for(Option::is_some).await.ok()?;
        *addr
    }

    /// Promote immediately, as an `activate` command would.
    pub async fn activate(&self) -> Result<SocketAddr> {
        self.core.activate(FailoverReason::Manual).await
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "standby task join error");
            }
        }
        if let Some(router) = self.core.router.lock().await.take() {
            router.shutdown().await;
        }
        if let Some(proxy) = self.proxy {
            proxy.shutdown().await;
        }
        info!("standby stopped");
    }
}

async fn monitor(core: Arc<StandbyCore>, mut shutdown: broadcast::Receiver<()>) {
    let mut prober = PrimaryProber::new(core.settings.primary, core.settings.probe_timeout);
    let mut ticker = interval(core.settings.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }
        if core.serving_addr().is_some() {
            break;
        }
        if core.state() == FailoverState::Active {
            // Promotion was decided but serving failed to start; retry.
            if let Err(err) = core.ensure_serving().await {
                error!(error = %err, "standby promotion retry failed");
            }
            continue;
        }

        let healthy = match prober.probe().await {
            Ok(_) => true,
            Err(err) => {
                debug!(endpoint = %prober.endpoint(), error = %err, "primary probe error");
                false
            }
        };
        if let Some(metrics) = &core.metrics {
            metrics.record_probe(healthy);
        }
        if let Some(event) = core.supervisor.record_probe(healthy) {
            core.on_transition(&event);
            if let Err(err) = core.ensure_serving().await {
                error!(error = %err, "standby promotion failed");
            }
        }
    }
    debug!("primary monitor stopped");
}
