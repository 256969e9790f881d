//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Client-side broker failover and faculty simulation."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;

use prometheus::{IntCounterVec, Opts, Registry};

use crate::controller::Route;

/// Send outcomes and route switches for one faculty process.
#[derive(Clone)]
pub struct ClientMetrics {
    sends: IntCounterVec,
    failed_attempts: IntCounterVec,
    route_switches: IntCounterVec,
}

impl ClientMetrics {
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let sends = IntCounterVec::new(
            Opts::new("campus_client_sends_total", "Client sends, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sends.clone()))?;

        let failed_attempts = IntCounterVec::new(
            Opts::new(
                "campus_client_failed_attempts_total",
                "Send attempts that timed out or lost the connection, by route",
            ),
            &["route"],
        )?;
        registry.register(Box::new(failed_attempts.clone()))?;

        let route_switches = IntCounterVec::new(
            Opts::new(
                "campus_client_route_switches_total",
                "Active broker changes, by destination",
            ),
            &["to"],
        )?;
        registry.register(Box::new(route_switches.clone()))?;

        Ok(Self {
            sends,
            failed_attempts,
            route_switches,
        })
    }

    pub(crate) fn record_send(&self, outcome: &str) {
        self.sends.with_label_values(&[outcome]).inc();
    }

    pub(crate) fn record_failed_attempt(&self, route: Route) {
        self.failed_attempts
            .with_label_values(&[route.as_str()])
            .inc();
    }

    pub(crate) fn record_switch(&self, to: Route) {
        self.route_switches.with_label_values(&[to.as_str()]).inc();
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}
