//! ---
//! campus_section: "15-testing-qa-runbook"
//! campus_subsection: "integration-tests"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Integration and validation tests for the campus broker stack."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use campus_common::AppConfig;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_parses_and_validates() {
    let config: AppConfig = read("configs/campus.example.toml").parse().unwrap();
    assert_eq!(config.inventory.classrooms, 380);
    assert_eq!(config.inventory.labs, 60);
    assert_eq!(config.inventory.mobile_units, 5);
    assert_eq!(config.broker.workers, 5);
    assert_eq!(config.health.failure_threshold, 3);
    assert_eq!(config.client.request_timeout, Duration::from_secs(5));
    assert_eq!(config.client.retry_interval, Duration::from_secs(3));
    assert_eq!(config.client.reconcile_interval, Duration::from_secs(10));
    assert!(config.health.probe_timeout < config.client.request_timeout);
}

#[test]
fn example_config_keeps_every_endpoint_distinct() {
    let config: AppConfig = read("configs/campus.example.toml").parse().unwrap();
    let endpoints = [
        config.endpoints.primary,
        config.endpoints.standby_service,
        config.endpoints.standby_control,
        config.endpoints.proxy,
    ];
    for (index, endpoint) in endpoints.iter().enumerate() {
        assert!(
            !endpoints[index + 1..].contains(endpoint),
            "endpoint {endpoint} configured twice"
        );
    }
}

#[test]
fn manifests_and_config_use_frontmatter() {
    for file in [
        "Cargo.toml",
        "configs/campus.example.toml",
        "bin/campusd/Cargo.toml",
        "tests/Cargo.toml",
    ] {
        let content = read(file);
        assert!(
            content.starts_with("# ---"),
            "{file} must include frontmatter header"
        );
        assert!(
            content.contains("campus_section:"),
            "{file} frontmatter must name its section"
        );
    }
}
