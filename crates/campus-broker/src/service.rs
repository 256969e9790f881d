//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;
use std::time::Instant;

use campus_allocator::Allocator;
use campus_msg::{decode_inbound, AllocationResponse, BrokerState, Command, Inbound, Reply};
use tracing::{debug, info, warn};

use crate::metrics::BrokerMetrics;
use crate::notify::ProgramNotifier;

/// Turns one inbound frame into exactly one reply.
#[derive(Debug, Clone)]
pub struct AllocationService {
    allocator: Arc<Allocator>,
    notifier: Option<ProgramNotifier>,
    metrics: Option<BrokerMetrics>,
}

impl AllocationService {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self {
            allocator,
            notifier: None,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: ProgramNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: BrokerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Serve a raw frame. Blocks on allocator locks and disk writes, so async
    /// callers run it on the blocking pool.
    pub fn handle(&self, raw: &str) -> Reply {
        let started = Instant::now();
        let (kind, reply) = match decode_inbound(raw) {
            Ok(Inbound::Command(Command::Ping)) => ("ping", Reply::state(BrokerState::Active)),
            Ok(Inbound::Command(Command::Activate)) => (
                "unknown_command",
                Reply::error("activate is only accepted on the standby control endpoint"),
            ),
            Ok(Inbound::UnknownCommand(command)) => {
                debug!(%command, "unknown command");
                ("unknown_command", Reply::error(format!("unknown command {command}")))
            }
            Ok(Inbound::Allocation { request, issues }) => {
                for issue in &issues {
                    warn!(
                        faculty = %request.faculty,
                        field = issue.field,
                        reason = %issue.reason,
                        "request field defaulted"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_issue(issue.field);
                    }
                }
                let record = self.allocator.allocate(&request);
                info!(
                    request_id = %record.id,
                    faculty = %record.faculty,
                    program = %record.program,
                    status = record.status.as_str(),
                    "allocation served"
                );
                if let Some(notifier) = &self.notifier {
                    notifier.publish(&record.id, &request);
                }
                (
                    "allocation",
                    Reply::Allocation(AllocationResponse {
                        request_id: record.id,
                        faculty: record.faculty,
                        program: record.program,
                        timestamp: record.timestamp,
                        result: record.result,
                    }),
                )
            }
            Err(err) => {
                warn!(error = %err, "rejected frame");
                ("invalid", Reply::error(err.to_string()))
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_request(kind, started.elapsed().as_secs_f64());
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_common::InventoryConfig;
    use campus_persistence::DurableStore;
    use tempfile::tempdir;

    fn service() -> (AllocationService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DurableStore::new(dir.path().join("r.json"), dir.path().join("a.json"));
        let allocator = Allocator::new(&InventoryConfig::default(), store);
        (AllocationService::new(Arc::new(allocator)), dir)
    }

    #[test]
    fn ping_never_touches_the_pools() {
        let (service, _dir) = service();
        for _ in 0..5 {
            assert_eq!(
                service.handle(r#"{"command":"ping"}"#),
                Reply::state(BrokerState::Active)
            );
        }
        let status = service.allocator().status();
        assert_eq!(status.records, 0);
        assert!(status.pools.iter().all(|pool| pool.assigned == 0));
    }

    #[test]
    fn garbled_request_is_served_with_defaults() {
        let (service, _dir) = service();
        let reply = service.handle(r#"{"faculty":"law","num_classrooms":"two","num_labs":1}"#);
        let Reply::Allocation(response) = reply else {
            panic!("expected allocation reply");
        };
        assert_eq!(response.program, "unknown");
        assert!(response.result.classrooms.is_empty());
        assert_eq!(response.result.labs, ["L1"]);
        assert!(service.allocator().record(&response.request_id).is_some());
    }

    #[test]
    fn activate_is_refused_on_the_service_endpoint() {
        let (service, _dir) = service();
        assert!(matches!(
            service.handle(r#"{"command":"activate"}"#),
            Reply::Error(_)
        ));
        assert!(matches!(service.handle("42"), Reply::Error(_)));
    }

    #[tokio::test]
    async fn served_requests_are_announced_to_the_program_topic() {
        let (service, _dir) = service();
        let notifier = ProgramNotifier::default();
        let mut civil = notifier.subscribe("civil");
        let service = service.with_notifier(notifier);

        let reply = service.handle(
            r#"{"faculty":"engineering","program":"civil","num_classrooms":1,"num_labs":0,"num_mobile_units":0}"#,
        );
        let Reply::Allocation(response) = reply else {
            panic!("expected allocation reply");
        };
        let notice = civil.next().await.unwrap();
        assert_eq!(notice.request_id, response.request_id);
        assert_eq!(notice.request.num_classrooms, 1);
    }
}
