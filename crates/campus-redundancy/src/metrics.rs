//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::supervisor::{FailoverReason, FailoverState};

/// Probe, promotion, and proxy metrics.
#[derive(Clone)]
pub struct FailoverMetrics {
    probes: IntCounterVec,
    promotions: IntCounterVec,
    redirects: IntCounter,
    proxied_connections: IntCounterVec,
    standby_active: IntGauge,
}

impl FailoverMetrics {
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let probes = IntCounterVec::new(
            Opts::new("campus_failover_probes_total", "Primary probes, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(probes.clone()))?;

        let promotions = IntCounterVec::new(
            Opts::new(
                "campus_failover_promotions_total",
                "Standby promotions, by trigger",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(promotions.clone()))?;

        let redirects = IntCounter::with_opts(Opts::new(
            "campus_proxy_redirects_total",
            "Failover proxy backend changes",
        ))?;
        registry.register(Box::new(redirects.clone()))?;

        let proxied_connections = IntCounterVec::new(
            Opts::new(
                "campus_proxy_connections_total",
                "Connections handled by the failover proxy, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(proxied_connections.clone()))?;

        let standby_active = IntGauge::with_opts(Opts::new(
            "campus_standby_active",
            "1 once the standby has been promoted",
        ))?;
        registry.register(Box::new(standby_active.clone()))?;

        Ok(Self {
            probes,
            promotions,
            redirects,
            proxied_connections,
            standby_active,
        })
    }

    pub(crate) fn record_probe(&self, healthy: bool) {
        let outcome = if healthy { "ok" } else { "failed" };
        self.probes.with_label_values(&[outcome]).inc();
    }

    pub(crate) fn record_promotion(&self, reason: FailoverReason) {
        self.promotions.with_label_values(&[reason.as_str()]).inc();
    }

    pub(crate) fn record_redirect(&self) {
        self.redirects.inc();
    }

    pub(crate) fn record_connection(&self, outcome: &str) {
        self.proxied_connections.with_label_values(&[outcome]).inc();
    }

    pub(crate) fn set_state(&self, state: FailoverState) {
        self.standby_active
            .set(i64::from(state == FailoverState::Active));
    }
}

impl std::fmt::Debug for FailoverMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverMetrics").finish_non_exhaustive()
    }
}
