//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Failover control plane for the campus broker.

mod control;
mod coordinator;
mod metrics;
mod prober;
mod proxy;
mod standby;
mod supervisor;

pub use coordinator::{CoordinatorHandle, CoordinatorSettings, HealthCoordinator};
pub use metrics::FailoverMetrics;
pub use prober::PrimaryProber;
pub use proxy::{FailoverProxy, ProxyRoute, ProxySettings};
pub use standby::{StandbyBroker, StandbySettings};
pub use supervisor::{FailoverEvent, FailoverReason, FailoverState, FailoverSupervisor};
