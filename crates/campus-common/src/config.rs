//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Shared primitives and utilities for the broker runtime."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_primary() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5555))
}

fn default_standby_service() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5556))
}

fn default_standby_control() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5557))
}

fn default_proxy() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5558))
}

fn default_classrooms() -> u32 {
    380
}

fn default_labs() -> u32 {
    60
}

fn default_mobile_units() -> u32 {
    5
}

fn default_classroom_prefix() -> String {
    "C".to_owned()
}

fn default_lab_prefix() -> String {
    "L".to_owned()
}

fn default_mobile_prefix() -> String {
    "M".to_owned()
}

fn default_workers() -> usize {
    5
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_records_path() -> PathBuf {
    PathBuf::from("data/allocations.json")
}

fn default_alerts_path() -> PathBuf {
    PathBuf::from("data/shortfall_alerts.json")
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_failures() -> u32 {
    3
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_faculty_name() -> String {
    "engineering".to_owned()
}

fn default_programs() -> Vec<String> {
    ["systems", "civil", "medicine", "law", "biology"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_min_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_classroom_range() -> (u32, u32) {
    (1, 5)
}

fn default_lab_range() -> (u32, u32) {
    (0, 3)
}

fn default_mobile_range() -> (u32, u32) {
    (0, 2)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Primary configuration object shared by every broker role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub faculty: FacultyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "CAMPUS_CONFIG";

    /// Load configuration from disk, respecting the `CAMPUS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.endpoints.validate()?;
        if self.broker.workers == 0 {
            return Err(anyhow!("broker.workers must be at least 1"));
        }
        if self.broker.max_frame_bytes < 64 {
            return Err(anyhow!("broker.max_frame_bytes must be at least 64"));
        }
        if self.persistence.records_path == self.persistence.alerts_path {
            return Err(anyhow!(
                "persistence.records_path and persistence.alerts_path must differ"
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(anyhow!("health.failure_threshold must be at least 1"));
        }
        if self.health.probe_timeout >= self.client.request_timeout {
            return Err(anyhow!(
                "health.probe_timeout ({:?}) must be shorter than client.request_timeout ({:?})",
                self.health.probe_timeout,
                self.client.request_timeout
            ));
        }
        self.client.validate()?;
        self.faculty.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Network addresses of every broker-facing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_primary")]
    pub primary: SocketAddr,
    #[serde(default = "default_standby_service")]
    pub standby_service: SocketAddr,
    #[serde(default = "default_standby_control")]
    pub standby_control: SocketAddr,
    #[serde(default = "default_proxy")]
    pub proxy: SocketAddr,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            standby_service: default_standby_service(),
            standby_control: default_standby_control(),
            proxy: default_proxy(),
        }
    }
}

impl EndpointsConfig {
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("primary", self.primary),
            ("standby_service", self.standby_service),
            ("standby_control", self.standby_control),
            ("proxy", self.proxy),
        ];
        let mut seen = HashSet::new();
        for (name, addr) in named {
            if addr.port() != 0 && !seen.insert(addr) {
                return Err(anyhow!(
                    "endpoint '{}' reuses address {} already assigned to another endpoint",
                    name,
                    addr
                ));
            }
        }
        Ok(())
    }
}

/// Fixed inventory sizes per resource category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_classrooms")]
    pub classrooms: u32,
    #[serde(default = "default_labs")]
    pub labs: u32,
    #[serde(default = "default_mobile_units")]
    pub mobile_units: u32,
    #[serde(default = "default_classroom_prefix")]
    pub classroom_prefix: String,
    #[serde(default = "default_lab_prefix")]
    pub lab_prefix: String,
    #[serde(default = "default_mobile_prefix")]
    pub mobile_prefix: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            classrooms: default_classrooms(),
            labs: default_labs(),
            mobile_units: default_mobile_units(),
            classroom_prefix: default_classroom_prefix(),
            lab_prefix: default_lab_prefix(),
            mobile_prefix: default_mobile_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
    #[serde(default = "default_alerts_path")]
    pub alerts_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            alerts_path: default_alerts_path(),
        }
    }
}

/// Standby-side probing of the primary broker.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_interval: Duration,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_timeout: Duration,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Run the failover proxy inside the standby process.
    #[serde(default = "default_true")]
    pub standby_runs_proxy: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            standby_runs_proxy: true,
        }
    }
}

/// Faculty-side request, retry, and reconciliation policy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_reconcile_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconcile_interval: Duration,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_timeout: Duration,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            retry_interval: default_retry_interval(),
            max_attempts: default_max_attempts(),
            max_failures: default_max_failures(),
            reconcile_interval: default_reconcile_interval(),
            probe_timeout: default_probe_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("client.max_attempts must be at least 1"));
        }
        if self.max_failures == 0 {
            return Err(anyhow!("client.max_failures must be at least 1"));
        }
        if self.probe_timeout >= self.request_timeout {
            return Err(anyhow!(
                "client.probe_timeout ({:?}) must be shorter than client.request_timeout ({:?})",
                self.probe_timeout,
                self.request_timeout
            ));
        }
        if self.reconcile_interval.is_zero() {
            return Err(anyhow!("client.reconcile_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Request generator settings for the faculty simulator.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacultyConfig {
    #[serde(default = "default_faculty_name")]
    pub name: String,
    #[serde(default = "default_programs")]
    pub programs: Vec<String>,
    #[serde(default = "default_min_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    #[serde(default = "default_classroom_range")]
    pub classrooms: (u32, u32),
    #[serde(default = "default_lab_range")]
    pub labs: (u32, u32),
    #[serde(default = "default_mobile_range")]
    pub mobile_units: (u32, u32),
    /// Stop after this many requests; unlimited when absent.
    #[serde(default)]
    pub max_requests: Option<u64>,
}

impl Default for FacultyConfig {
    fn default() -> Self {
        Self {
            name: default_faculty_name(),
            programs: default_programs(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            classrooms: default_classroom_range(),
            labs: default_lab_range(),
            mobile_units: default_mobile_range(),
            max_requests: None,
        }
    }
}

impl FacultyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.programs.is_empty() {
            return Err(anyhow!("faculty.programs must list at least one program"));
        }
        if self.min_delay > self.max_delay {
            return Err(anyhow!("faculty.min_delay must not exceed faculty.max_delay"));
        }
        for (name, (low, high)) in [
            ("classrooms", self.classrooms),
            ("labs", self.labs),
            ("mobile_units", self.mobile_units),
        ] {
            if low > high {
                return Err(anyhow!(
                    "faculty.{} range is inverted ({} > {})",
                    name,
                    low,
                    high
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter used when neither `CAMPUS_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write the rolling JSON file next to stdout.
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            file: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.inventory.classrooms, 380);
        assert_eq!(config.inventory.labs, 60);
        assert_eq!(config.inventory.mobile_units, 5);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.client.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: AppConfig = r#"
            [endpoints]
            primary = "10.0.0.5:7000"

            [client]
            retry_interval = 250
        "#
        .parse()
        .unwrap();
        assert_eq!(config.endpoints.primary.port(), 7000);
        assert_eq!(config.endpoints.proxy, default_proxy());
        assert_eq!(config.client.retry_interval, Duration::from_millis(250));
        assert_eq!(config.client.max_attempts, 3);
    }

    #[test]
    fn rejects_duplicate_endpoints() {
        let err = r#"
            [endpoints]
            primary = "127.0.0.1:6000"
            proxy = "127.0.0.1:6000"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("proxy"));
    }

    #[test]
    fn rejects_probe_timeout_not_shorter_than_request_timeout() {
        let mut config = AppConfig::default();
        config.health.probe_timeout = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.broker.workers = 0;
        assert!(config.validate().is_err());
    }
}
