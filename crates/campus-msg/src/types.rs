//! ---
//! campus_section: "02-messaging-ipc-data-model"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Message schema helpers and protocol codecs."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource categories managed by the allocator, in global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// General-purpose classrooms.
    Classrooms,
    /// Laboratories.
    Labs,
    /// Mobile units, which can also stand in for laboratories.
    MobileUnits,
}

impl ResourceKind {
    /// Every category, ordered the way pool locks must be acquired.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Classrooms,
        ResourceKind::Labs,
        ResourceKind::MobileUnits,
    ];

    /// Stable label used in logs, metrics, and the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Classrooms => "classrooms",
            ResourceKind::Labs => "labs",
            ResourceKind::MobileUnits => "mobile_units",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Missing units per category. Only categories with a nonzero deficit appear.
pub type Shortfall = BTreeMap<ResourceKind, u32>;

/// Unit counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    /// Classroom count.
    #[serde(default)]
    pub classrooms: u32,
    /// Laboratory count.
    #[serde(default)]
    pub labs: u32,
    /// Mobile unit count.
    #[serde(default)]
    pub mobile_units: u32,
}

impl ResourceCounts {
    /// Construct counts from explicit values.
    pub fn new(classrooms: u32, labs: u32, mobile_units: u32) -> Self {
        Self {
            classrooms,
            labs,
            mobile_units,
        }
    }

    /// Count for a single category.
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Classrooms => self.classrooms,
            ResourceKind::Labs => self.labs,
            ResourceKind::MobileUnits => self.mobile_units,
        }
    }
}

/// One inbound allocation ask from a faculty on behalf of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Requesting faculty.
    pub faculty: String,
    /// Academic program the resources are for.
    pub program: String,
    /// Requested classrooms.
    #[serde(default)]
    pub num_classrooms: u32,
    /// Requested laboratories.
    #[serde(default)]
    pub num_labs: u32,
    /// Requested mobile units.
    #[serde(default)]
    pub num_mobile_units: u32,
    /// Local receive time; not part of the wire format. Persisted with the
    /// allocation record as `requested_at`.
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl AllocationRequest {
    /// Construct a request stamped with the current time.
    pub fn new(
        faculty: impl Into<String>,
        program: impl Into<String>,
        counts: ResourceCounts,
    ) -> Self {
        Self {
            faculty: faculty.into(),
            program: program.into(),
            num_classrooms: counts.classrooms,
            num_labs: counts.labs,
            num_mobile_units: counts.mobile_units,
            received_at: Utc::now(),
        }
    }

    /// Requested counts as a [`ResourceCounts`] value.
    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts::new(self.num_classrooms, self.num_labs, self.num_mobile_units)
    }
}

/// Whether every requested unit was fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    /// Everything requested was assigned (possibly via substitution).
    Complete,
    /// At least one category fell short.
    Partial,
}

impl AllocationStatus {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Complete => "complete",
            AllocationStatus::Partial => "partial",
        }
    }
}

/// Outcome of one allocation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Assigned classroom identifiers.
    #[serde(default)]
    pub classrooms: Vec<String>,
    /// Assigned laboratory identifiers.
    #[serde(default)]
    pub labs: Vec<String>,
    /// Every mobile unit handed out, substitutes for labs first.
    #[serde(default)]
    pub mobile_units: Vec<String>,
    /// How many of `mobile_units` were consumed to cover a laboratory deficit.
    #[serde(default)]
    pub labs_converted: u32,
    /// Unfilled quantities, `None` when the request was fully served.
    #[serde(default)]
    pub shortfall: Option<Shortfall>,
}

impl AllocationResult {
    /// Complete unless a shortfall was recorded.
    pub fn status(&self) -> AllocationStatus {
        match &self.shortfall {
            Some(map) if map.values().any(|missing| *missing > 0) => AllocationStatus::Partial,
            _ => AllocationStatus::Complete,
        }
    }

    /// Missing units for one category.
    pub fn shortfall_of(&self, kind: ResourceKind) -> u32 {
        self.shortfall
            .as_ref()
            .and_then(|map| map.get(&kind).copied())
            .unwrap_or(0)
    }

    /// Assigned identifiers for one category.
    pub fn units(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::Classrooms => &self.classrooms,
            ResourceKind::Labs => &self.labs,
            ResourceKind::MobileUnits => &self.mobile_units,
        }
    }

    /// Number of identifiers assigned per category.
    pub fn assigned_counts(&self) -> ResourceCounts {
        ResourceCounts::new(
            self.classrooms.len() as u32,
            self.labs.len() as u32,
            self.mobile_units.len() as u32,
        )
    }
}

/// Envelope returned to the requester for an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResponse {
    /// Identifier of the persisted allocation record.
    pub request_id: String,
    /// Echo of the requesting faculty.
    pub faculty: String,
    /// Echo of the program.
    pub program: String,
    /// Time the broker produced the result.
    pub timestamp: DateTime<Utc>,
    /// Assigned units and shortfall.
    pub result: AllocationResult,
}

/// Lifecycle state reported by liveness probes and the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    /// Serving allocation traffic.
    Active,
    /// Standby acknowledging an activation command.
    Activated,
    /// Standby still monitoring the primary.
    Passive,
}

/// `{ "state": ... }` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReply {
    /// Reported state.
    pub state: BrokerState,
}

/// `{ "error": ... }` reply for frames that could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Human-readable reason.
    pub error: String,
}

/// Any reply a broker or standby can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// Allocation outcome.
    Allocation(AllocationResponse),
    /// Probe or control acknowledgement.
    State(StateReply),
    /// Frame rejected.
    Error(ErrorReply),
}

impl Reply {
    /// Shorthand for a state reply.
    pub fn state(state: BrokerState) -> Self {
        Reply::State(StateReply { state })
    }

    /// Shorthand for an error reply.
    pub fn error(reason: impl Into<String>) -> Self {
        Reply::Error(ErrorReply {
            error: reason.into(),
        })
    }
}

/// Control verbs carried in the `command` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Liveness probe.
    Ping,
    /// Promote a standby.
    Activate,
}

/// `{ "command": ... }` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Requested verb.
    pub command: Command,
}

impl CommandMessage {
    /// Liveness probe frame.
    pub const PING: CommandMessage = CommandMessage {
        command: Command::Ping,
    };
    /// Standby activation frame.
    pub const ACTIVATE: CommandMessage = CommandMessage {
        command: Command::Activate,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_result_serializes_null_shortfall() {
        let result = AllocationResult {
            classrooms: vec!["C1".into()],
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["shortfall"], serde_json::Value::Null);
        assert_eq!(result.status(), AllocationStatus::Complete);
    }

    #[test]
    fn shortfall_keys_use_category_labels() {
        let mut shortfall = Shortfall::new();
        shortfall.insert(ResourceKind::Classrooms, 17);
        let result = AllocationResult {
            shortfall: Some(shortfall),
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["shortfall"], json!({"classrooms": 17}));
        assert_eq!(result.status(), AllocationStatus::Partial);
        assert_eq!(result.shortfall_of(ResourceKind::Classrooms), 17);
        assert_eq!(result.shortfall_of(ResourceKind::Labs), 0);
    }

    #[test]
    fn replies_are_distinguished_by_shape() {
        let ping: Reply = serde_json::from_value(json!({"state": "active"})).unwrap();
        assert_eq!(ping, Reply::state(BrokerState::Active));

        let err: Reply = serde_json::from_value(json!({"error": "bad frame"})).unwrap();
        assert_eq!(err, Reply::error("bad frame"));

        let alloc: Reply = serde_json::from_value(json!({
            "request_id": "r-1",
            "faculty": "science",
            "program": "biology",
            "timestamp": "2026-01-01T00:00:00Z",
            "result": {"classrooms": ["C1"], "labs": [], "mobile_units": [], "shortfall": null}
        }))
        .unwrap();
        assert!(matches!(alloc, Reply::Allocation(ref resp) if resp.result.classrooms == ["C1"]));
    }

    #[test]
    fn command_frames_match_wire_contract() {
        assert_eq!(
            serde_json::to_value(CommandMessage::PING).unwrap(),
            json!({"command": "ping"})
        );
        assert_eq!(
            serde_json::to_value(CommandMessage::ACTIVATE).unwrap(),
            json!({"command": "activate"})
        );
    }
}
