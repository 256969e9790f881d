//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Resource pools and the allocation engine."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Campus inventory allocation.
//!
//! One [`Allocator`] owns every pool. Pools are locked individually, always in
//! the order classrooms, labs, mobile units.

pub mod allocator;
pub mod metrics;
pub mod pool;

pub use allocator::{Allocator, InventoryStatus, RecoveryReport};
pub use metrics::AllocatorMetrics;
pub use pool::{PoolStatus, ResourcePool};

/// Result alias for allocator setup and recovery.
pub type Result<T> = std::result::Result<T, AllocatorError>;

/// Failures that prevent an allocator from starting or reloading.
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    #[error("durable store error: {0}")]
    Persistence(#[from] campus_persistence::PersistenceError),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
