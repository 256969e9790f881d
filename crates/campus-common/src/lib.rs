//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Shared primitives and utilities for the broker runtime."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
//! Shared primitives for the campus resource broker workspace.
//! This crate exposes configuration loading and logging setup consumed by
//! every deployable role.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BrokerConfig, ClientConfig, EndpointsConfig, FacultyConfig, HealthConfig,
    InventoryConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, PersistenceConfig,
};
pub use logging::{init_tracing, log_file_name, LogFormat};
