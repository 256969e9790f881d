//! ---
//! campus_section: "03-persistence-logging"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Persistence abstractions and storage bindings."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::path::{Path, PathBuf};
use std::time::Instant;

use campus_msg::{
    AllocationRequest, AllocationResult, AllocationStatus, ResourceCounts, ResourceKind, Shortfall,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{load_document, write_document, Document};
use crate::metrics::PersistenceMetrics;
use crate::Result;

const RECORDS_DOCUMENT: &str = "records";
const ALERTS_DOCUMENT: &str = "alerts";

/// Durable history entry written for every processed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Record identifier, also returned to the requester as `request_id`.
    pub id: String,
    /// Time the allocation was committed.
    pub timestamp: DateTime<Utc>,
    /// Time the broker received the request. Absent in records written
    /// before it was tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    /// Requesting faculty.
    pub faculty: String,
    /// Target program.
    pub program: String,
    /// Counts as requested.
    pub request: ResourceCounts,
    /// Outcome as returned to the requester.
    pub result: AllocationResult,
    /// Complete or partial.
    pub status: AllocationStatus,
}

impl AllocationRecord {
    /// Build a record for `request` and its `result`.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        request: &AllocationRequest,
        result: AllocationResult,
    ) -> Self {
        let status = result.status();
        Self {
            id: id.into(),
            timestamp,
            requested_at: Some(request.received_at),
            faculty: request.faculty.clone(),
            program: request.program.clone(),
            request: request.counts(),
            result,
            status,
        }
    }

    /// Every unit identifier this record holds, with its pool.
    pub fn units(&self) -> impl Iterator<Item = (ResourceKind, &str)> + '_ {
        ResourceKind::ALL.into_iter().flat_map(move |kind| {
            self.result
                .units(kind)
                .iter()
                .map(move |unit| (kind, unit.as_str()))
        })
    }

    /// Per-category counts that were fulfilled. Mobile units converted into
    /// labs count towards labs as well as towards the mobile units handed out.
    pub fn fulfilled(&self) -> ResourceCounts {
        let assigned = self.result.assigned_counts();
        ResourceCounts::new(
            assigned.classrooms,
            assigned.labs + self.result.labs_converted,
            assigned.mobile_units,
        )
    }
}

/// Warning written alongside a partial [`AllocationRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortfallAlert {
    /// Identifier of the record this alert belongs to.
    pub id: String,
    /// Time the shortfall was observed.
    pub timestamp: DateTime<Utc>,
    /// Missing units per category.
    pub shortfall: Shortfall,
    /// Counts as requested.
    pub requested: ResourceCounts,
    /// Counts actually fulfilled.
    pub assigned: ResourceCounts,
}

impl ShortfallAlert {
    /// Derive the alert for `record`, or `None` when it was fully served.
    pub fn for_record(record: &AllocationRecord) -> Option<Self> {
        if record.status != AllocationStatus::Partial {
            return None;
        }
        let shortfall: Shortfall = record
            .result
            .shortfall
            .iter()
            .flatten()
            .filter(|(_, missing)| **missing > 0)
            .map(|(kind, missing)| (*kind, *missing))
            .collect();
        Some(Self {
            id: record.id.clone(),
            timestamp: record.timestamp,
            shortfall,
            requested: record.request,
            assigned: record.fulfilled(),
        })
    }
}

/// Both documents as read from disk.
#[derive(Debug, Clone, Default)]
pub struct StoreContents {
    /// Allocation records keyed by id.
    pub records: Document<AllocationRecord>,
    /// Shortfall alerts keyed by id.
    pub alerts: Document<ShortfallAlert>,
}

/// Location of the two persisted documents.
#[derive(Debug, Clone)]
pub struct DurableStore {
    records_path: PathBuf,
    alerts_path: PathBuf,
    metrics: Option<PersistenceMetrics>,
}

impl DurableStore {
    /// Store backed by `records_path` and `alerts_path`.
    pub fn new(records_path: impl Into<PathBuf>, alerts_path: impl Into<PathBuf>) -> Self {
        Self {
            records_path: records_path.into(),
            alerts_path: alerts_path.into(),
            metrics: None,
        }
    }

    /// Attach metrics collection.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Path of the allocation records document.
    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    /// Path of the shortfall alerts document.
    pub fn alerts_path(&self) -> &Path {
        &self.alerts_path
    }

    /// Read both documents. Missing files load as empty.
    pub fn load(&self) -> Result<StoreContents> {
        let records = load_document(&self.records_path)?;
        let alerts = load_document(&self.alerts_path)?;
        debug!(
            records = records.len(),
            alerts = alerts.len(),
            path = %self.records_path.display(),
            "durable store loaded"
        );
        Ok(StoreContents { records, alerts })
    }

    /// Rewrite the allocation records document.
    pub fn save_records(&self, records: &Document<AllocationRecord>) -> Result<()> {
        self.save(RECORDS_DOCUMENT, &self.records_path, records)
    }

    /// Rewrite the shortfall alerts document.
    pub fn save_alerts(&self, alerts: &Document<ShortfallAlert>) -> Result<()> {
        self.save(ALERTS_DOCUMENT, &self.alerts_path, alerts)
    }

    fn save<T: Serialize>(&self, label: &str, path: &Path, document: &Document<T>) -> Result<()> {
        let started = Instant::now();
        match write_document(path, document) {
            Ok(bytes) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_write(label, bytes, started.elapsed().as_secs_f64());
                }
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(label);
                }
                Err(err)
            }
        }
    }
}
