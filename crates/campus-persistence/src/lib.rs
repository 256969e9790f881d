//! ---
//! campus_section: "03-persistence-logging"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Persistence abstractions and storage bindings."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
#![warn(missing_docs)]
//! Durable allocation history.
//!
//! Two JSON documents, allocation records and shortfall alerts, each keyed by
//! id and rewritten in full on every update.

use std::path::PathBuf;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing documents.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The configured document path cannot hold a file.
    #[error("invalid document path: {}", .0.display())]
    InvalidPath(PathBuf),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod document;
pub mod metrics;
pub mod records;

pub use document::{load_document, write_document, Document};
pub use metrics::PersistenceMetrics;
pub use records::{AllocationRecord, DurableStore, ShortfallAlert, StoreContents};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_path_names_the_path() {
        let err = PersistenceError::InvalidPath(PathBuf::from("/"));
        assert_eq!(format!("{err}"), "invalid document path: /");
    }
}
