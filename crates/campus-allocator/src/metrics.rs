//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Resource pools and the allocation engine."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;

use campus_msg::{AllocationStatus, ResourceKind};
use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::pool::PoolStatus;
use crate::Result;

/// Allocation outcome metrics.
#[derive(Clone)]
pub struct AllocatorMetrics {
    allocations: IntCounterVec,
    units_assigned: IntCounterVec,
    shortfall_units: IntCounterVec,
    labs_converted: IntCounter,
    persistence_failures: IntCounter,
    available_units: IntGaugeVec,
}

impl AllocatorMetrics {
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let allocations = IntCounterVec::new(
            Opts::new(
                "campus_allocations_total",
                "Allocation requests processed, by outcome",
            ),
            &["status"],
        )?;
        registry.register(Box::new(allocations.clone()))?;

        let units_assigned = IntCounterVec::new(
            Opts::new(
                "campus_units_assigned_total",
                "Units handed out, by category",
            ),
            &["category"],
        )?;
        registry.register(Box::new(units_assigned.clone()))?;

        let shortfall_units = IntCounterVec::new(
            Opts::new(
                "campus_shortfall_units_total",
                "Requested units that could not be fulfilled, by category",
            ),
            &["category"],
        )?;
        registry.register(Box::new(shortfall_units.clone()))?;

        let labs_converted = IntCounter::with_opts(Opts::new(
            "campus_labs_converted_total",
            "Mobile units consumed to cover laboratory deficits",
        ))?;
        registry.register(Box::new(labs_converted.clone()))?;

        let persistence_failures = IntCounter::with_opts(Opts::new(
            "campus_allocation_persistence_failures_total",
            "Allocations that were served but could not be persisted",
        ))?;
        registry.register(Box::new(persistence_failures.clone()))?;

        let available_units = IntGaugeVec::new(
            Opts::new(
                "campus_available_units",
                "Units currently available, by category",
            ),
            &["category"],
        )?;
        registry.register(Box::new(available_units.clone()))?;

        Ok(Self {
            allocations,
            units_assigned,
            shortfall_units,
            labs_converted,
            persistence_failures,
            available_units,
        })
    }

    pub(crate) fn record_allocation(&self, status: AllocationStatus) {
        self.allocations.with_label_values(&[status.as_str()]).inc();
    }

    pub(crate) fn record_units(&self, kind: ResourceKind, assigned: usize, missing: u32) {
        if assigned > 0 {
            self.units_assigned
                .with_label_values(&[kind.as_str()])
                .inc_by(assigned as u64);
        }
        if missing > 0 {
            self.shortfall_units
                .with_label_values(&[kind.as_str()])
                .inc_by(u64::from(missing));
        }
    }

    pub(crate) fn record_labs_converted(&self, converted: u32) {
        self.labs_converted.inc_by(u64::from(converted));
    }

    pub(crate) fn record_persistence_failure(&self) {
        self.persistence_failures.inc();
    }

    pub(crate) fn observe_pool(&self, status: &PoolStatus) {
        self.available_units
            .with_label_values(&[status.kind.as_str()])
            .set(status.available as i64);
    }
}

impl std::fmt::Debug for AllocatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorMetrics").finish_non_exhaustive()
    }
}
