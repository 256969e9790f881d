//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use campus_allocator::Allocator;
use campus_broker::{spawn_router, AllocationService, RouterHandle, RouterSettings};
use campus_common::InventoryConfig;
use campus_msg::{BrokerState, Connection, Reply};
use campus_persistence::DurableStore;
use serde_json::json;
use tempfile::TempDir;

const DEADLINE: Duration = Duration::from_secs(2);

async fn start(classrooms: u32, workers: usize) -> (RouterHandle, Arc<Allocator>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let inventory = InventoryConfig {
        classrooms,
        labs: 4,
        mobile_units: 2,
        ..InventoryConfig::default()
    };
    let store = DurableStore::new(dir.path().join("records.json"), dir.path().join("alerts.json"));
    let allocator = Arc::new(Allocator::new(&inventory, store));
    let settings = RouterSettings {
        workers,
        max_frame_bytes: 1024,
        queue_depth: 8,
    };
    let router = spawn_router(
        "127.0.0.1:0".parse().unwrap(),
        AllocationService::new(Arc::clone(&allocator)),
        settings,
        None,
    )
    .await
    .unwrap();
    (router, allocator, dir)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_clients_receive_disjoint_units() {
    let (router, allocator, _dir) = start(40, 4).await;
    let addr = router.addr();

    let clients: Vec<_> = (0..10)
        .map(|client| {
            tokio::spawn(async move {
                let mut connection = Connection::connect(addr, DEADLINE).await.unwrap();
                let mut units = Vec::new();
                for _ in 0..3 {
                    let reply: Reply = connection
                        .request(
                            &json!({
                                "faculty": format!("faculty-{client}"),
                                "program": "systems",
                                "num_classrooms": 2,
                                "num_labs": 0,
                                "num_mobile_units": 0
                            }),
                            DEADLINE,
                        )
                        .await
                        .unwrap();
                    let Reply::Allocation(response) = reply else {
                        panic!("unexpected reply");
                    };
                    units.extend(response.result.classrooms);
                }
                units
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for client in clients {
        for unit in client.await.unwrap() {
            assert!(seen.insert(unit.clone()), "{unit} assigned twice");
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(allocator.status().records, 30);
    router.shutdown().await;
}

#[tokio::test]
async fn ping_answers_active_without_mutating_state() {
    let (router, allocator, _dir) = start(5, 2).await;
    let mut connection = Connection::connect(router.addr(), DEADLINE).await.unwrap();
    for _ in 0..10 {
        let reply: Reply = connection
            .request(&json!({"command": "ping"}), DEADLINE)
            .await
            .unwrap();
        assert_eq!(reply, Reply::state(BrokerState::Active));
    }
    let status = allocator.status();
    assert_eq!(status.records, 0);
    assert!(status.pools.iter().all(|pool| pool.assigned == 0));
    router.shutdown().await;
}

#[tokio::test]
async fn bad_frames_do_not_take_down_the_connection() {
    let (router, _allocator, _dir) = start(5, 1).await;
    let mut connection = Connection::connect(router.addr(), DEADLINE).await.unwrap();

    let reply: Reply = connection.request(&json!("just a string"), DEADLINE).await.unwrap();
    assert!(matches!(reply, Reply::Error(_)));

    let reply: Reply = connection
        .request(&json!({"faculty": "law", "num_classrooms": -1}), DEADLINE)
        .await
        .unwrap();
    let Reply::Allocation(response) = reply else {
        panic!("expected allocation");
    };
    assert_eq!(response.result.shortfall, None);
    assert!(response.result.classrooms.is_empty());

    let reply: Reply = connection
        .request(&json!({"command": "ping"}), DEADLINE)
        .await
        .unwrap();
    assert_eq!(reply, Reply::state(BrokerState::Active));
    router.shutdown().await;
}

#[tokio::test]
async fn oversize_frame_closes_only_that_connection() {
    let (router, _allocator, _dir) = start(5, 1).await;
    let mut noisy = Connection::connect(router.addr(), DEADLINE).await.unwrap();
    let huge = json!({"faculty": "x".repeat(4096)});
    // The error reply may be lost to the reset when unread bytes are discarded.
    match noisy.request::<_, Reply>(&huge, DEADLINE).await {
        Ok(Reply::Error(_)) | Err(_) => {}
        Ok(other) => panic!("unexpected reply {other:?}"),
    }

    let reply = campus_msg::ping(router.addr(), DEADLINE).await.unwrap();
    assert_eq!(reply.state, BrokerState::Active);
    router.shutdown().await;
}
