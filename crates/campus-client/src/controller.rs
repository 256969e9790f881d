//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Client-side broker failover and faculty simulation."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use campus_common::AppConfig;
use campus_msg::{ping, AllocationRequest, AllocationResponse, Connection, MessagingError, Reply};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::metrics::ClientMetrics;
use crate::{Result, SendError};

/// Which broker address requests currently go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Backup,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Primary => "primary",
            Route::Backup => "backup",
        }
    }

    fn other(self) -> Self {
        match self {
            Route::Primary => Route::Backup,
            Route::Backup => Route::Primary,
        }
    }
}

/// Addresses, deadlines, and retry bounds for one controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub primary: SocketAddr,
    pub backup: SocketAddr,
    /// Deadline for one request/reply exchange.
    pub request_timeout: Duration,
    /// Pause between attempts of the same send.
    pub retry_interval: Duration,
    pub max_attempts: u32,
    /// Consecutive failures that move the route to the other broker.
    pub max_failures: u32,
    pub reconcile_interval: Duration,
    /// Deadline for the reconciliation ping against the primary.
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl ControllerSettings {
    /// `via_proxy` sends failover traffic to the proxy instead of the standby
    /// service address.
    pub fn from_config(config: &AppConfig, via_proxy: bool) -> Self {
        let backup = if via_proxy {
            config.endpoints.proxy
        } else {
            config.endpoints.standby_service
        };
        Self {
            primary: config.endpoints.primary,
            backup,
            request_timeout: config.client.request_timeout,
            retry_interval: config.client.retry_interval,
            max_attempts: config.client.max_attempts,
            max_failures: config.client.max_failures,
            reconcile_interval: config.client.reconcile_interval,
            probe_timeout: config.client.probe_timeout,
            connect_timeout: config.client.connect_timeout,
            max_frame_bytes: config.broker.max_frame_bytes,
        }
    }

    fn endpoint(&self, route: Route) -> SocketAddr {
        match route {
            Route::Primary => self.primary,
            Route::Backup => self.backup,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), false)
    }
}

/// Route and connection state. Only touched while holding the gate.
#[derive(Debug)]
struct Gate {
    route: Route,
    failures: u32,
    connection: Option<Connection>,
}

/// Sends allocation requests to whichever broker is active from this client's
/// point of view, switching on repeated failures.
#[derive(Debug)]
pub struct FailoverController {
    settings: ControllerSettings,
    gate: Mutex<Gate>,
    metrics: Option<ClientMetrics>,
}

impl FailoverController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            gate: Mutex::new(Gate {
                route: Route::Primary,
                failures: 0,
                connection: None,
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub async fn route(&self) -> Route {
        self.gate.lock().await.route
    }

    /// Consecutive failures on the current route.
    pub async fn failures(&self) -> u32 {
        self.gate.lock().await.failures
    }

    /// Send one request with bounded retries.
    ///
    /// Timeouts and transport errors count toward `max_failures`; reaching it
    /// switches the route and resets the count. An error reply from a broker
    /// is returned as [`SendError::Rejected`] without retrying.
    pub async fn send(&self, request: &AllocationRequest) -> Result<AllocationResponse> {
        let mut gate = self.gate.lock().await;
        let attempts = self.settings.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            let route = gate.route;
            let endpoint = self.settings.endpoint(route);
            match self.exchange(&mut gate, request).await {
                Ok(Reply::Allocation(response)) => {
                    gate.failures = 0;
                    debug!(%endpoint, attempt, request_id = %response.request_id, "request served");
                    self.record_send("ok");
                    return Ok(response);
                }
                Ok(Reply::Error(reply)) => {
                    gate.failures = 0;
                    warn!(%endpoint, reason = %reply.error, "broker rejected request");
                    self.record_send("rejected");
                    return Err(SendError::Rejected(reply.error));
                }
                Ok(Reply::State(reply)) => {
                    gate.connection = None;
                    last = Some(MessagingError::Protocol(format!(
                        "state reply {:?} to an allocation request",
                        reply.state
                    )));
                }
                Err(err) => {
                    warn!(%endpoint, attempt, error = %err, "send attempt failed");
                    gate.connection = None;
                    gate.failures += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failed_attempt(route);
                    }
                    if gate.failures >= self.settings.max_failures.max(1) {
                        self.switch(&mut gate, route.other());
                    }
                    last = Some(err);
                }
            }
            if attempt < attempts {
                sleep(self.settings.retry_interval).await;
            }
        }

        let last = last.unwrap_or(MessagingError::Closed);
        error!(
            faculty = %request.faculty,
            program = %request.program,
            attempts,
            error = %last,
            "request failed on every attempt"
        );
        self.record_send("exhausted");
        Err(SendError::Exhausted { attempts, last })
    }

    /// Move back to the primary if it answers a ping. Returns `true` on a switch.
    pub async fn reconcile_once(&self) -> bool {
        if self.route().await != Route::Backup {
            return false;
        }
        // The gate is held only for the switch, not the probe.
        if let Err(err) = ping(self.settings.primary, self.settings.probe_timeout).await {
            debug!(endpoint = %self.settings.primary, error = %err, "primary still unreachable");
            return false;
        }
        let mut gate = self.gate.lock().await;
        if gate.route != Route::Backup {
            return false;
        }
        self.switch(&mut gate, Route::Primary);
        true
    }

    async fn exchange(
        &self,
        gate: &mut Gate,
        request: &AllocationRequest,
    ) -> std::result::Result<Reply, MessagingError> {
        if gate.connection.is_none() {
            let endpoint = self.settings.endpoint(gate.route);
            let connection = Connection::connect(endpoint, self.settings.connect_timeout)
                .await?
                .with_max_frame_bytes(self.settings.max_frame_bytes);
            gate.connection = Some(connection);
        }
        let Some(connection) = gate.connection.as_mut() else {
            return Err(MessagingError::Closed);
        };
        connection
            .request(request, self.settings.request_timeout)
            .await
    }

    fn switch(&self, gate: &mut Gate, to: Route) {
        let from = gate.route;
        gate.route = to;
        gate.failures = 0;
        gate.connection = None;
        info!(
            from = from.as_str(),
            to = to.as_str(),
            endpoint = %self.settings.endpoint(to),
            "client route switched"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_switch(to);
        }
    }

    fn record_send(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_send(outcome);
        }
    }
}

/// Background task returning the controller to the primary.
#[derive(Debug)]
pub struct Reconciler {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Reconciler {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "reconciler join error");
        }
    }
}

/// Run [`FailoverController::reconcile_once`] every `reconcile_interval`.
pub fn spawn_reconciler(controller: Arc<FailoverController>) -> Reconciler {
    let (shutdown, mut shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move {
        let mut ticker = interval(controller.settings().reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }
            controller.reconcile_once().await;
        }
        debug!("reconciler stopped");
    });
    Reconciler { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_msg::DEFAULT_MAX_FRAME_BYTES;

    #[test]
    fn backup_follows_the_proxy_flag() {
        let config = AppConfig::default();
        let direct = ControllerSettings::from_config(&config, false);
        let proxied = ControllerSettings::from_config(&config, true);
        assert_eq!(direct.backup, config.endpoints.standby_service);
        assert_eq!(proxied.backup, config.endpoints.proxy);
        assert_eq!(direct.primary, proxied.primary);
    }

    #[tokio::test]
    async fn new_controller_starts_on_the_primary() {
        let controller = FailoverController::new(ControllerSettings::default());
        assert_eq!(controller.route().await, Route::Primary);
        assert_eq!(controller.failures().await, 0);
        // Nothing to reconcile while on the primary.
        assert!(!controller.reconcile_once().await);
    }

    #[test]
    fn default_frame_limit_matches_the_wire_default() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }
}
