//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Broker front end. A listener accepts connections, each connection feeds
//! frames into one bounded queue, and a fixed set of workers drains it into a
//! shared [`AllocationService`]. Workers hold no state of their own.

pub mod metrics;
pub mod notify;
pub mod router;
pub mod service;

pub use metrics::BrokerMetrics;
pub use notify::{topic_for, ProgramNotice, ProgramNotifier, ProgramSubscription};
pub use router::{spawn_router, RouterHandle, RouterSettings};
pub use service::AllocationService;
