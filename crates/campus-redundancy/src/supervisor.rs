//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Standby lifecycle. `Passive -> Active` happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Passive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverReason {
    /// Consecutive failed probes reached the threshold.
    ProbeThreshold,
    /// An `activate` command arrived on the control channel.
    Manual,
}

impl FailoverReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverReason::ProbeThreshold => "probe_threshold",
            FailoverReason::Manual => "manual",
        }
    }
}

/// Emitted exactly once, on the passive to active transition.
#[derive(Debug, Clone)]
pub struct FailoverEvent {
    pub triggered_at: DateTime<Utc>,
    pub reason: FailoverReason,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct SupervisorInner {
    state: FailoverState,
    consecutive_failures: u32,
    event: Option<FailoverEvent>,
}

/// Counts consecutive probe failures against the primary and decides when
/// the standby takes over.
#[derive(Debug)]
pub struct FailoverSupervisor {
    failure_threshold: u32,
    inner: Mutex<SupervisorInner>,
}

impl FailoverSupervisor {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            inner: Mutex::new(SupervisorInner {
                state: FailoverState::Passive,
                consecutive_failures: 0,
                event: None,
            }),
        }
    }

    pub fn state(&self) -> FailoverState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn event(&self) -> Option<FailoverEvent> {
        self.inner.lock().event.clone()
    }

    /// Feed one probe outcome. Returns the failover event when this failure
    /// is the one that reaches the threshold.
    pub fn record_probe(&self, healthy: bool) -> Option<FailoverEvent> {
        let mut inner = self.inner.lock();
        if inner.state == FailoverState::Active {
            return None;
        }
        if healthy {
            if inner.consecutive_failures > 0 {
                debug!(
                    failures = inner.consecutive_failures,
                    "primary reachable again; failure count reset"
                );
            }
            inner.consecutive_failures = 0;
            return None;
        }
        inner.consecutive_failures += 1;
        warn!(
            failures = inner.consecutive_failures,
            threshold = self.failure_threshold,
            "primary probe failed"
        );
        if inner.consecutive_failures >= self.failure_threshold {
            return Some(Self::transition_locked(
                &mut inner,
                FailoverReason::ProbeThreshold,
            ));
        }
        None
    }

    /// Force the transition. Returns `None` when already active.
    pub fn activate(&self, reason: FailoverReason) -> Option<FailoverEvent> {
        let mut inner = self.inner.lock();
        if inner.state == FailoverState::Active {
            return None;
        }
        Some(Self::transition_locked(&mut inner, reason))
    }

    fn transition_locked(inner: &mut SupervisorInner, reason: FailoverReason) -> FailoverEvent {
        inner.state = FailoverState::Active;
        let event = FailoverEvent {
            triggered_at: Utc::now(),
            reason,
            consecutive_failures: inner.consecutive_failures,
        };
        inner.event = Some(event.clone());
        info!(reason = reason.as_str(), failures = event.consecutive_failures, "failover triggered");
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_failures_trigger_once() {
        let supervisor = FailoverSupervisor::new(3);
        assert!(supervisor.record_probe(false).is_none());
        assert!(supervisor.record_probe(false).is_none());
        let event = supervisor.record_probe(false).unwrap();
        assert_eq!(event.reason, FailoverReason::ProbeThreshold);
        assert_eq!(event.consecutive_failures, 3);
        assert_eq!(supervisor.state(), FailoverState::Active);
        assert!(supervisor.record_probe(false).is_none());
        assert!(supervisor.activate(FailoverReason::Manual).is_none());
    }

    #[test]
    fn success_resets_the_count() {
        let supervisor = FailoverSupervisor::new(3);
        supervisor.record_probe(false);
        supervisor.record_probe(false);
        supervisor.record_probe(true);
        assert_eq!(supervisor.consecutive_failures(), 0);
        supervisor.record_probe(false);
        supervisor.record_probe(false);
        assert_eq!(supervisor.state(), FailoverState::Passive);
    }

    #[test]
    fn manual_activation_wins_while_passive() {
        let supervisor = FailoverSupervisor::new(3);
        supervisor.record_probe(false);
        let event = supervisor.activate(FailoverReason::Manual).unwrap();
        assert_eq!(event.reason, FailoverReason::Manual);
        assert_eq!(supervisor.event().unwrap().reason, FailoverReason::Manual);
        assert!(supervisor.record_probe(false).is_none());
    }
}
