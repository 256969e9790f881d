//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Router and request-handling metrics.
#[derive(Clone)]
pub struct BrokerMetrics {
    requests: IntCounterVec,
    protocol_issues: IntCounterVec,
    connections: IntCounter,
    open_connections: IntGauge,
    handle_seconds: Histogram,
}

impl BrokerMetrics {
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("campus_broker_requests_total", "Frames served, by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let protocol_issues = IntCounterVec::new(
            Opts::new(
                "campus_broker_protocol_issues_total",
                "Request fields that were missing or malformed and defaulted",
            ),
            &["field"],
        )?;
        registry.register(Box::new(protocol_issues.clone()))?;

        let connections = IntCounter::with_opts(Opts::new(
            "campus_broker_connections_total",
            "Connections accepted by the router",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let open_connections = IntGauge::with_opts(Opts::new(
            "campus_broker_open_connections",
            "Connections currently open",
        ))?;
        registry.register(Box::new(open_connections.clone()))?;

        let handle_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "campus_broker_handle_seconds",
                "Time a worker spends serving one frame",
            )
            .buckets(prometheus::exponential_buckets(0.0001, 2.0, 14)?),
        )?;
        registry.register(Box::new(handle_seconds.clone()))?;

        Ok(Self {
            requests,
            protocol_issues,
            connections,
            open_connections,
            handle_seconds,
        })
    }

    pub(crate) fn record_request(&self, kind: &str, seconds: f64) {
        self.requests.with_label_values(&[kind]).inc();
        self.handle_seconds.observe(seconds);
    }

    pub(crate) fn record_issue(&self, field: &str) {
        self.protocol_issues.with_label_values(&[field]).inc();
    }

    pub(crate) fn connection_opened(&self) {
        self.connections.inc();
        self.open_connections.inc();
    }

    pub(crate) fn connection_closed(&self) {
        self.open_connections.dec();
    }
}

impl std::fmt::Debug for BrokerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerMetrics").finish_non_exhaustive()
    }
}
