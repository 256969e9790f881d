//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Client-side broker failover and faculty simulation."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Faculty-side view of the broker pair.
//!
//! [`FailoverController`] decides which broker address a request goes to and
//! retries across failures; [`FacultyAgent`] drives it with simulated demand.

mod controller;
mod faculty;
mod metrics;

pub use controller::{spawn_reconciler, ControllerSettings, FailoverController, Reconciler, Route};
pub use faculty::{FacultyAgent, FacultySummary};
pub use metrics::ClientMetrics;

use campus_msg::MessagingError;

/// Result alias for client sends.
pub type Result<T> = std::result::Result<T, SendError>;

/// Failures reported to the caller of [`FailoverController::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Every attempt failed; the request was not served.
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: MessagingError,
    },
    /// A broker answered with an error reply.
    #[error("broker rejected the request: {0}")]
    Rejected(String),
}
