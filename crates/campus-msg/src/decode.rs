//! ---
//! campus_section: "02-messaging-ipc-data-model"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Message schema helpers and protocol codecs."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::fmt;

use serde_json::{Map, Value};

use crate::types::{AllocationRequest, Command, ResourceCounts};
use crate::{MessagingError, Result};

/// Placeholder used when a requester omits its faculty or program.
pub const UNKNOWN_PARTY: &str = "unknown";

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Recognised control verb.
    Command(Command),
    /// A `command` field carrying a verb this endpoint does not know.
    UnknownCommand(String),
    /// Allocation ask, along with any fields that had to be defaulted.
    Allocation {
        /// Decoded request; garbled fields are already replaced by defaults.
        request: AllocationRequest,
        /// Fields that were missing or malformed.
        issues: Vec<ProtocolIssue>,
    },
}

/// One field that could not be decoded as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolIssue {
    /// Name of the offending field.
    pub field: &'static str,
    /// What was wrong with it.
    pub reason: String,
}

impl fmt::Display for ProtocolIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Classify a raw frame.
///
/// Only a frame that is not a JSON object is rejected; everything else is
/// served, with missing or malformed counts decoded as zero.
pub fn decode_inbound(raw: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| MessagingError::Protocol(format!("frame is not valid json: {err}")))?;
    let Value::Object(fields) = value else {
        return Err(MessagingError::Protocol(
            "frame must be a json object".to_owned(),
        ));
    };

    if let Some(command) = fields.get("command") {
        return Ok(match command.as_str() {
            Some("ping") => Inbound::Command(Command::Ping),
            Some("activate") => Inbound::Command(Command::Activate),
            Some(other) => Inbound::UnknownCommand(other.to_owned()),
            None => Inbound::UnknownCommand(command.to_string()),
        });
    }

    let mut issues = Vec::new();
    let faculty = party(&fields, "faculty", &mut issues);
    let program = party(&fields, "program", &mut issues);
    let counts = ResourceCounts::new(
        count(&fields, "num_classrooms", &mut issues),
        count(&fields, "num_labs", &mut issues),
        count(&fields, "num_mobile_units", &mut issues),
    );
    Ok(Inbound::Allocation {
        request: AllocationRequest::new(faculty, program, counts),
        issues,
    })
}

fn party(fields: &Map<String, Value>, field: &'static str, issues: &mut Vec<ProtocolIssue>) -> String {
    match fields.get(field) {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(other) => {
            issues.push(ProtocolIssue {
                field,
                reason: format!("expected a non-empty string, got {other}"),
            });
            UNKNOWN_PARTY.to_owned()
        }
        None => {
            issues.push(ProtocolIssue {
                field,
                reason: "missing".to_owned(),
            });
            UNKNOWN_PARTY.to_owned()
        }
    }
}

fn count(fields: &Map<String, Value>, field: &'static str, issues: &mut Vec<ProtocolIssue>) -> u32 {
    let Some(value) = fields.get(field) else {
        issues.push(ProtocolIssue {
            field,
            reason: "missing".to_owned(),
        });
        return 0;
    };
    let decoded = match value {
        Value::Number(number) => {
            if let Some(unsigned) = number.as_u64() {
                u32::try_from(unsigned).map_err(|_| format!("{unsigned} exceeds the u32 range"))
            } else if let Some(signed) = number.as_i64() {
                Err(format!("negative count {signed}"))
            } else {
                match number.as_f64() {
                    Some(float) if float >= 0.0 && float.fract() == 0.0 && float <= u32::MAX as f64 => {
                        Ok(float as u32)
                    }
                    _ => Err(format!("{number} is not a whole nonnegative number")),
                }
            }
        }
        other => Err(format!("expected an integer, got {other}")),
    };
    decoded.unwrap_or_else(|reason| {
        issues.push(ProtocolIssue { field, reason });
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_and_activate_are_commands() {
        assert_eq!(
            decode_inbound(r#"{"command":"ping"}"#).unwrap(),
            Inbound::Command(Command::Ping)
        );
        assert_eq!(
            decode_inbound(r#"{"command":"activate"}"#).unwrap(),
            Inbound::Command(Command::Activate)
        );
        assert_eq!(
            decode_inbound(r#"{"command":"reboot"}"#).unwrap(),
            Inbound::UnknownCommand("reboot".into())
        );
    }

    #[test]
    fn well_formed_request_has_no_issues() {
        let Inbound::Allocation { request, issues } = decode_inbound(
            r#"{"faculty":"science","program":"biology","num_classrooms":3,"num_labs":1,"num_mobile_units":0}"#,
        )
        .unwrap() else {
            panic!("expected allocation");
        };
        assert!(issues.is_empty());
        assert_eq!(request.faculty, "science");
        assert_eq!(request.counts(), ResourceCounts::new(3, 1, 0));
    }

    #[test]
    fn garbled_counts_default_to_zero() {
        let Inbound::Allocation { request, issues } = decode_inbound(
            r#"{"faculty":"arts","num_classrooms":"lots","num_labs":-2,"num_mobile_units":1.5}"#,
        )
        .unwrap() else {
            panic!("expected allocation");
        };
        assert_eq!(request.counts(), ResourceCounts::default());
        assert_eq!(request.program, UNKNOWN_PARTY);
        let fields: Vec<_> = issues.iter().map(|issue| issue.field).collect();
        assert_eq!(
            fields,
            vec!["program", "num_classrooms", "num_labs", "num_mobile_units"]
        );
    }

    #[test]
    fn whole_float_counts_are_accepted() {
        let Inbound::Allocation { request, issues } = decode_inbound(
            r#"{"faculty":"a","program":"b","num_classrooms":2.0,"num_labs":0,"num_mobile_units":0}"#,
        )
        .unwrap() else {
            panic!("expected allocation");
        };
        assert!(issues.is_empty());
        assert_eq!(request.num_classrooms, 2);
    }

    #[test]
    fn non_object_frames_are_rejected() {
        assert!(matches!(
            decode_inbound("[1,2,3]"),
            Err(MessagingError::Protocol(_))
        ));
        assert!(matches!(
            decode_inbound("not json"),
            Err(MessagingError::Protocol(_))
        ));
    }
}
