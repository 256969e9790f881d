//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Client-side broker failover and faculty simulation."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use campus_client::{
    spawn_reconciler, ClientMetrics, ControllerSettings, FacultyAgent, FailoverController, Route,
    SendError,
};
use campus_common::FacultyConfig;
use campus_msg::{AllocationRequest, ResourceCounts};
use prometheus::Registry;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Loopback broker stand-in. While `responsive` is false it reads frames and
/// never answers, which the client observes as timeouts.
struct FakeBroker {
    addr: SocketAddr,
    responsive: Arc<AtomicBool>,
    served: Arc<AtomicUsize>,
}

impl FakeBroker {
    async fn start(name: &'static str, responsive: bool) -> Self {
        Self::start_with(name, responsive, false).await
    }

    async fn start_with(name: &'static str, responsive: bool, reject: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let responsive = Arc::new(AtomicBool::new(responsive));
        let served = Arc::new(AtomicUsize::new(0));
        let (flag, count) = (Arc::clone(&responsive), Arc::clone(&served));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (flag, count) = (Arc::clone(&flag), Arc::clone(&count));
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let mut line = String::new();
                    while stream.read_line(&mut line).await.unwrap_or(0) > 0 {
                        if !flag.load(Ordering::SeqCst) {
                            line.clear();
                            continue;
                        }
                        let frame: Value = serde_json::from_str(&line).unwrap();
                        let reply = if frame["command"] == "ping" {
                            json!({"state": "active"})
                        } else if reject {
                            json!({"error": "inventory offline"})
                        } else {
                            count.fetch_add(1, Ordering::SeqCst);
                            json!({
                                "request_id": name,
                                "faculty": frame["faculty"],
                                "program": frame["program"],
                                "timestamp": "2026-01-05T09:00:00Z",
                                "result": {"classrooms": ["C1"], "shortfall": null}
                            })
                        };
                        let mut bytes = serde_json::to_vec(&reply).unwrap();
                        bytes.push(b'\n');
                        if stream.get_mut().write_all(&bytes).await.is_err() {
                            break;
                        }
                        line.clear();
                    }
                });
            }
        });
        Self {
            addr,
            responsive,
            served,
        }
    }

    fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }
}

fn settings(primary: SocketAddr, backup: SocketAddr) -> ControllerSettings {
    ControllerSettings {
        primary,
        backup,
        request_timeout: Duration::from_millis(150),
        retry_interval: Duration::from_millis(10),
        max_attempts: 3,
        max_failures: 2,
        reconcile_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(200),
        max_frame_bytes: 4096,
    }
}

fn request() -> AllocationRequest {
    AllocationRequest::new("engineering", "systems", ResourceCounts::new(1, 0, 0))
}

fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn switches_to_backup_after_max_failures_and_back_after_a_good_probe() {
    let primary = FakeBroker::start("primary", false).await;
    let backup = FakeBroker::start("backup", true).await;
    let registry = Arc::new(Registry::new());
    let controller = FailoverController::new(settings(primary.addr, backup.addr))
        .with_metrics(ClientMetrics::new(Arc::clone(&registry)).unwrap());

    // Two timeouts against the primary move the third attempt to the backup.
    let response = controller.send(&request()).await.unwrap();
    assert_eq!(response.request_id, "backup");
    assert_eq!(controller.route().await, Route::Backup);
    assert_eq!(controller.failures().await, 0);

    // Primary still silent: stay on the backup.
    assert!(!controller.reconcile_once().await);
    assert_eq!(controller.send(&request()).await.unwrap().request_id, "backup");

    primary.set_responsive(true);
    assert!(controller.reconcile_once().await);
    assert_eq!(controller.route().await, Route::Primary);
    assert_eq!(controller.send(&request()).await.unwrap().request_id, "primary");
    assert_eq!(primary.served.load(Ordering::SeqCst), 1);
    assert_eq!(backup.served.load(Ordering::SeqCst), 2);

    let switches: u64 = registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == "campus_client_route_switches_total")
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum();
    assert_eq!(switches, 2);
}

#[tokio::test]
async fn exhausted_attempts_are_reported() {
    let controller = FailoverController::new(settings(refused_addr(), refused_addr()));
    match controller.send(&request()).await {
        Err(SendError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(last.is_transport() || last.is_timeout());
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn error_replies_are_not_retried() {
    let primary = FakeBroker::start_with("primary", true, true).await;
    let controller = FailoverController::new(settings(primary.addr, refused_addr()));
    match controller.send(&request()).await {
        Err(SendError::Rejected(reason)) => assert_eq!(reason, "inventory offline"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(controller.route().await, Route::Primary);
    assert_eq!(controller.failures().await, 0);
}

#[tokio::test]
async fn reconciler_returns_to_the_primary_in_the_background() {
    let primary = FakeBroker::start("primary", false).await;
    let backup = FakeBroker::start("backup", true).await;
    let controller = Arc::new(FailoverController::new(settings(primary.addr, backup.addr)));
    controller.send(&request()).await.unwrap();
    assert_eq!(controller.route().await, Route::Backup);

    let reconciler = spawn_reconciler(Arc::clone(&controller));
    primary.set_responsive(true);
    tokio::time::timeout(Duration::from_secs(2), async {
        while controller.route().await != Route::Primary {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconciler did not switch back");
    reconciler.shutdown().await;
}

#[tokio::test]
async fn faculty_agent_stops_after_max_requests() {
    let primary = FakeBroker::start("primary", true).await;
    let controller = Arc::new(FailoverController::new(settings(primary.addr, refused_addr())));
    let config = FacultyConfig {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_requests: Some(4),
        ..FacultyConfig::default()
    };
    let (_shutdown, shutdown_rx) = broadcast::channel(1);
    let summary = FacultyAgent::new(config, controller)
        .with_seed(3)
        .run(shutdown_rx)
        .await;
    assert_eq!(summary.served, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(primary.served.load(Ordering::SeqCst), 4);
}
