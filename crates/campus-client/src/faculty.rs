//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Client-side broker failover and faculty simulation."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;
use std::time::Duration;

use campus_common::FacultyConfig;
use campus_msg::{AllocationRequest, AllocationStatus, ResourceCounts};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::controller::FailoverController;

const FALLBACK_PROGRAM: &str = "general";

/// Totals reported when an agent stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FacultySummary {
    /// Requests answered with an allocation.
    pub served: u64,
    /// Served requests with a shortfall.
    pub partial: u64,
    /// Requests that were rejected or exhausted their retries.
    pub failed: u64,
}

/// Simulated faculty issuing random requests at random intervals.
#[derive(Debug)]
pub struct FacultyAgent {
    config: FacultyConfig,
    controller: Arc<FailoverController>,
    rng: StdRng,
}

impl FacultyAgent {
    pub fn new(config: FacultyConfig, controller: Arc<FailoverController>) -> Self {
        Self {
            config,
            controller,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the RNG for reproducible demand.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Draw the next request from the configured program list and ranges.
    pub fn next_request(&mut self) -> AllocationRequest {
        let program = self
            .config
            .programs
            .choose(&mut self.rng)
            .map(String::as_str)
            .unwrap_or(FALLBACK_PROGRAM)
            .to_owned();
        let counts = ResourceCounts::new(
            draw(&mut self.rng, self.config.classrooms),
            draw(&mut self.rng, self.config.labs),
            draw(&mut self.rng, self.config.mobile_units),
        );
        AllocationRequest::new(self.config.name.clone(), program, counts)
    }

    fn next_delay(&mut self) -> Duration {
        let low = self.config.min_delay.as_millis() as u64;
        let high = (self.config.max_delay.as_millis() as u64).max(low);
        Duration::from_millis(self.rng.gen_range(low..=high))
    }

    /// Keep requesting until shutdown or `max_requests`.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> FacultySummary {
        let mut summary = FacultySummary::default();
        let mut issued = 0u64;
        info!(faculty = %self.config.name, "faculty agent started");
        loop {
            if self.config.max_requests.is_some_and(|max| issued >= max) {
                break;
            }
            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(delay) => {}
            }

            let request = self.next_request();
            issued += 1;
            let outcome = tokio::select! {
                _ = shutdown.recv() => break,
                outcome = self.controller.send(&request) => outcome,
            };
            match outcome {
                Ok(response) => {
                    summary.served += 1;
                    let result = &response.result;
                    info!(
                        request_id = %response.request_id,
                        program = %response.program,
                        classrooms = ?result.classrooms,
                        labs = ?result.labs,
                        mobile_units = ?result.mobile_units,
                        labs_converted = result.labs_converted,
                        "allocation received"
                    );
                    if result.status() == AllocationStatus::Partial {
                        summary.partial += 1;
                        warn!(
                            request_id = %response.request_id,
                            shortfall = ?result.shortfall,
                            "allocation partially fulfilled"
                        );
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(program = %request.program, error = %err, "allocation request failed");
                }
            }
        }
        info!(
            faculty = %self.config.name,
            served = summary.served,
            partial = summary.partial,
            failed = summary.failed,
            "faculty agent stopped"
        );
        summary
    }
}

fn draw(rng: &mut StdRng, (low, high): (u32, u32)) -> u32 {
    rng.gen_range(low.min(high)..=low.max(high))
}
