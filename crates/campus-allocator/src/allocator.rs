//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Resource pools and the allocation engine."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use campus_common::InventoryConfig;
use campus_msg::{AllocationRequest, AllocationResult, ResourceKind, Shortfall};
use campus_persistence::{AllocationRecord, Document, DurableStore, ShortfallAlert};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::AllocatorMetrics;
use crate::pool::{PoolStatus, ResourcePool};
use crate::Result;

#[derive(Debug, Default)]
struct History {
    records: Document<AllocationRecord>,
    alerts: Document<ShortfallAlert>,
    /// Alerts hold entries the alerts document on disk is missing.
    alerts_dirty: bool,
}

/// Outcome of merging the durable store into a running allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records present in the store.
    pub records: usize,
    /// Alerts present in the store.
    pub alerts: usize,
    /// Units that were available in memory and are now marked assigned.
    pub units_restored: usize,
    /// Unit ids in the store that no configured pool contains.
    pub unknown_units: usize,
}

/// Inventory and history totals.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryStatus {
    pub pools: Vec<PoolStatus>,
    pub records: usize,
    pub alerts: usize,
}

/// Sole owner of all pool state.
///
/// Each pool sits behind its own lock. `allocate` acquires them in
/// [`ResourceKind::ALL`] order; the lab step holds the lab and mobile-unit
/// locks together so a substitution and the direct mobile-unit request see
/// one consistent pool.
#[derive(Debug)]
pub struct Allocator {
    classrooms: Mutex<ResourcePool>,
    labs: Mutex<ResourcePool>,
    mobile_units: Mutex<ResourcePool>,
    history: Mutex<History>,
    store: DurableStore,
    metrics: Option<AllocatorMetrics>,
}

impl Allocator {
    /// Allocator with every unit available and an empty history.
    pub fn new(inventory: &InventoryConfig, store: DurableStore) -> Self {
        Self {
            classrooms: Mutex::new(ResourcePool::new(
                ResourceKind::Classrooms,
                &inventory.classroom_prefix,
                inventory.classrooms,
            )),
            labs: Mutex::new(ResourcePool::new(
                ResourceKind::Labs,
                &inventory.lab_prefix,
                inventory.labs,
            )),
            mobile_units: Mutex::new(ResourcePool::new(
                ResourceKind::MobileUnits,
                &inventory.mobile_prefix,
                inventory.mobile_units,
            )),
            history: Mutex::new(History::default()),
            store,
            metrics: None,
        }
    }

    /// Build an allocator and restore assigned units from the durable store.
    ///
    /// An unreadable store is an error: serving from a blank inventory would
    /// re-offer units that earlier runs committed.
    pub fn open(inventory: &InventoryConfig, store: DurableStore) -> Result<Self> {
        let allocator = Self::new(inventory, store);
        let report = allocator.reload()?;
        info!(
            records = report.records,
            alerts = report.alerts,
            units_restored = report.units_restored,
            "allocator recovered from durable store"
        );
        Ok(allocator)
    }

    pub fn with_metrics(mut self, metrics: AllocatorMetrics) -> Self {
        for status in self.pool_statuses() {
            metrics.observe_pool(&status);
        }
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// Serve one request, commit the assignment, and persist the outcome.
    ///
    /// Always returns a record. A persistence failure is logged and counted;
    /// the in-memory commit stands.
    pub fn allocate(&self, request: &AllocationRequest) -> AllocationRecord {
        let result = self.assign(request);
        let record = AllocationRecord::new(
            Uuid::new_v4().to_string(),
            Utc::now(),
            request,
            result,
        );
        let alert = ShortfallAlert::for_record(&record);
        if let Some(alert) = &alert {
            warn!(
                request_id = %record.id,
                faculty = %record.faculty,
                program = %record.program,
                shortfall = ?alert.shortfall,
                "allocation partially fulfilled"
            );
        }

        if let Err(err) = self.persist(&record, alert) {
            error!(request_id = %record.id, error = %err, "failed to persist allocation");
            if let Some(metrics) = &self.metrics {
                metrics.record_persistence_failure();
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_allocation(record.status);
        }
        record
    }

    fn assign(&self, request: &AllocationRequest) -> AllocationResult {
        let wanted = request.counts();
        let mut shortfall = Shortfall::new();

        let classrooms = {
            let mut pool = self.classrooms.lock();
            let taken = pool.take(wanted.classrooms);
            note_missing(&mut shortfall, ResourceKind::Classrooms, wanted.classrooms, taken.len());
            self.observe(&pool, taken.len(), shortfall_of(&shortfall, ResourceKind::Classrooms));
            taken
        };

        let (labs, mobile_units, labs_converted) = {
            let mut lab_pool = self.labs.lock();
            let mut mobile_pool = self.mobile_units.lock();

            let labs = lab_pool.take(wanted.labs);
            let deficit = wanted.labs - labs.len() as u32;
            let mut mobile_units = mobile_pool.take(deficit);
            let converted = mobile_units.len() as u32;
            note_missing(&mut shortfall, ResourceKind::Labs, deficit, mobile_units.len());
            if converted > 0 {
                debug!(converted, deficit, "mobile units substituted for labs");
            }

            let direct_need = wanted.mobile_units.saturating_sub(converted);
            let direct = mobile_pool.take(direct_need);
            note_missing(&mut shortfall, ResourceKind::MobileUnits, direct_need, direct.len());
            mobile_units.extend(direct);

            self.observe(&lab_pool, labs.len(), shortfall_of(&shortfall, ResourceKind::Labs));
            self.observe(
                &mobile_pool,
                mobile_units.len(),
                shortfall_of(&shortfall, ResourceKind::MobileUnits),
            );
            (labs, mobile_units, converted)
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_labs_converted(labs_converted);
        }

        AllocationResult {
            classrooms,
            labs,
            mobile_units,
            labs_converted,
            shortfall: (!shortfall.is_empty()).then_some(shortfall),
        }
    }

    fn observe(&self, pool: &ResourcePool, assigned: usize, missing: u32) {
        if let Some(metrics) = &self.metrics {
            metrics.record_units(pool.kind(), assigned, missing);
            metrics.observe_pool(&pool.status());
        }
    }

    fn persist(
        &self,
        record: &AllocationRecord,
        alert: Option<ShortfallAlert>,
    ) -> campus_persistence::Result<()> {
        let mut history = self.history.lock();
        history.records.insert(record.id.clone(), record.clone());
        if let Some(alert) = alert {
            history.alerts.insert(alert.id.clone(), alert);
            history.alerts_dirty = true;
        }

        // Both documents are attempted so one failed write cannot leave a
        // partial record without its alert once the store recovers.
        let records = self.store.save_records(&history.records);
        let alerts = if history.alerts_dirty {
            let saved = self.store.save_alerts(&history.alerts);
            if saved.is_ok() {
                history.alerts_dirty = false;
            }
            saved
        } else {
            Ok(())
        };
        records.and(alerts)
    }

    /// Merge the durable store into memory: every unit a stored record holds
    /// becomes assigned, and unseen records and alerts join the history.
    ///
    /// Units only ever move from available to assigned, so reloading is safe
    /// while traffic is being served.
    pub fn reload(&self) -> Result<RecoveryReport> {
        let contents = self.store.load()?;
        let mut report = RecoveryReport {
            records: contents.records.len(),
            alerts: contents.alerts.len(),
            ..RecoveryReport::default()
        };

        {
            let mut classrooms = self.classrooms.lock();
            let mut labs = self.labs.lock();
            let mut mobile_units = self.mobile_units.lock();
            for record in contents.records.values() {
                for (kind, unit) in record.units() {
                    let pool = match kind {
                        ResourceKind::Classrooms => &mut *classrooms,
                        ResourceKind::Labs => &mut *labs,
                        ResourceKind::MobileUnits => &mut *mobile_units,
                    };
                    if pool.is_assigned(unit) {
                        continue;
                    }
                    if pool.mark_assigned(unit) {
                        report.units_restored += 1;
                    } else {
                        report.unknown_units += 1;
                        warn!(
                            request_id = %record.id,
                            category = %kind,
                            unit,
                            "stored unit is not part of the configured inventory"
                        );
                    }
                }
            }
            if let Some(metrics) = &self.metrics {
                for pool in [&*classrooms, &*labs, &*mobile_units] {
                    metrics.observe_pool(&pool.status());
                }
            }
        }

        let mut history = self.history.lock();
        for (id, record) in contents.records {
            history.records.entry(id).or_insert(record);
        }
        for (id, alert) in contents.alerts {
            history.alerts.entry(id).or_insert(alert);
        }
        Ok(report)
    }

    fn pool_statuses(&self) -> Vec<PoolStatus> {
        let classrooms = self.classrooms.lock();
        let labs = self.labs.lock();
        let mobile_units = self.mobile_units.lock();
        vec![classrooms.status(), labs.status(), mobile_units.status()]
    }

    /// Current per-pool counts plus history sizes.
    pub fn status(&self) -> InventoryStatus {
        let pools = self.pool_statuses();
        let history = self.history.lock();
        InventoryStatus {
            pools,
            records: history.records.len(),
            alerts: history.alerts.len(),
        }
    }

    /// Look up a committed record by id.
    pub fn record(&self, id: &str) -> Option<AllocationRecord> {
        self.history.lock().records.get(id).cloned()
    }

    /// Whether `unit` of `kind` is currently assigned.
    pub fn is_assigned(&self, kind: ResourceKind, unit: &str) -> bool {
        match kind {
            ResourceKind::Classrooms => self.classrooms.lock().is_assigned(unit),
            ResourceKind::Labs => self.labs.lock().is_assigned(unit),
            ResourceKind::MobileUnits => self.mobile_units.lock().is_assigned(unit),
        }
    }
}

fn note_missing(shortfall: &mut Shortfall, kind: ResourceKind, wanted: u32, got: usize) {
    let missing = wanted.saturating_sub(got as u32);
    if missing > 0 {
        shortfall.insert(kind, missing);
    }
}

fn shortfall_of(shortfall: &Shortfall, kind: ResourceKind) -> u32 {
    shortfall.get(&kind).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_msg::{AllocationStatus, ResourceCounts};
    use tempfile::{tempdir, TempDir};

    fn allocator(classrooms: u32, labs: u32, mobile_units: u32) -> (Allocator, TempDir) {
        let dir = tempdir().unwrap();
        let inventory = InventoryConfig {
            classrooms,
            labs,
            mobile_units,
            ..InventoryConfig::default()
        };
        let store = DurableStore::new(dir.path().join("records.json"), dir.path().join("alerts.json"));
        (Allocator::new(&inventory, store), dir)
    }

    fn ask(classrooms: u32, labs: u32, mobile_units: u32) -> AllocationRequest {
        AllocationRequest::new(
            "engineering",
            "systems",
            ResourceCounts::new(classrooms, labs, mobile_units),
        )
    }

    #[test]
    fn lab_deficit_is_covered_by_mobile_units() {
        let (allocator, _dir) = allocator(10, 15, 5);
        let record = allocator.allocate(&ask(0, 20, 0));
        assert_eq!(record.result.labs.len(), 15);
        assert_eq!(record.result.labs_converted, 5);
        assert_eq!(record.result.mobile_units.len(), 5);
        assert_eq!(record.result.shortfall_of(ResourceKind::Labs), 0);
        assert_eq!(record.status, AllocationStatus::Complete);
        assert_eq!(allocator.status().pools[2].available, 0);
    }

    #[test]
    fn classroom_shortage_is_partial() {
        let (allocator, _dir) = allocator(30, 0, 0);
        allocator.allocate(&ask(22, 0, 0));
        let record = allocator.allocate(&ask(25, 0, 0));
        assert_eq!(record.result.classrooms.len(), 8);
        assert_eq!(record.result.shortfall_of(ResourceKind::Classrooms), 17);
        assert_eq!(record.status, AllocationStatus::Partial);
        assert_eq!(allocator.status().alerts, 1);
    }

    #[test]
    fn substitution_counts_against_direct_mobile_requests() {
        let (allocator, _dir) = allocator(0, 2, 3);
        let record = allocator.allocate(&ask(0, 4, 2));
        // Two substitutes cover the lab deficit, leaving a direct need of zero.
        assert_eq!(record.result.labs_converted, 2);
        assert_eq!(record.result.mobile_units, ["M1", "M2"]);
        assert_eq!(record.result.shortfall, None);

        let record = allocator.allocate(&ask(0, 1, 2));
        assert_eq!(record.result.labs_converted, 1);
        assert_eq!(record.result.shortfall_of(ResourceKind::MobileUnits), 1);
        assert_eq!(record.result.shortfall_of(ResourceKind::Labs), 0);
    }

    #[test]
    fn lab_shortfall_remains_after_exhausting_substitutes() {
        let (allocator, _dir) = allocator(0, 1, 1);
        let record = allocator.allocate(&ask(0, 4, 0));
        assert_eq!(record.result.labs, ["L1"]);
        assert_eq!(record.result.labs_converted, 1);
        assert_eq!(record.result.shortfall_of(ResourceKind::Labs), 2);
        let fulfilled = record.fulfilled();
        assert_eq!(
            fulfilled.labs + record.result.shortfall_of(ResourceKind::Labs),
            4
        );
    }

    #[test]
    fn every_allocation_is_persisted() {
        let (allocator, _dir) = allocator(2, 0, 0);
        let first = allocator.allocate(&ask(1, 0, 0));
        let second = allocator.allocate(&ask(3, 0, 0));
        let contents = allocator.store().load().unwrap();
        assert_eq!(contents.records.len(), 2);
        assert!(contents.records.contains_key(&first.id));
        assert_eq!(contents.alerts.len(), 1);
        assert!(contents.alerts.contains_key(&second.id));
    }

    #[test]
    fn persistence_failure_still_returns_result() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("records.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();
        let store = DurableStore::new(&blocked, dir.path().join("alerts.json"));
        let allocator = Allocator::new(&InventoryConfig::default(), store);

        let record = allocator.allocate(&ask(2, 0, 0));
        assert_eq!(record.result.classrooms, ["C1", "C2"]);
        assert!(allocator.is_assigned(ResourceKind::Classrooms, "C1"));
    }

    #[test]
    fn alerts_survive_a_failed_record_write() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("records.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();
        let store = DurableStore::new(&blocked, dir.path().join("alerts.json"));
        let inventory = InventoryConfig {
            classrooms: 1,
            ..InventoryConfig::default()
        };
        let allocator = Allocator::new(&inventory, store);

        let first = allocator.allocate(&ask(3, 0, 0));
        assert_eq!(first.status, AllocationStatus::Partial);
        std::fs::remove_dir_all(&blocked).unwrap();
        let second = allocator.allocate(&ask(3, 0, 0));

        let contents = allocator.store().load().unwrap();
        for id in [&first.id, &second.id] {
            assert!(contents.records.contains_key(id));
            assert!(contents.alerts.contains_key(id));
        }
    }

    #[test]
    fn alerts_are_rewritten_once_their_document_is_writable() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("alerts.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();
        let store = DurableStore::new(dir.path().join("records.json"), &blocked);
        let inventory = InventoryConfig {
            classrooms: 1,
            ..InventoryConfig::default()
        };
        let allocator = Allocator::new(&inventory, store);

        let partial = allocator.allocate(&ask(2, 0, 0));
        std::fs::remove_dir_all(&blocked).unwrap();
        // A complete allocation still flushes the pending alert.
        allocator.allocate(&ask(0, 0, 0));

        let contents = allocator.store().load().unwrap();
        assert!(contents.alerts.contains_key(&partial.id));
    }

    #[test]
    fn zero_request_is_complete_and_touches_nothing() {
        let (allocator, _dir) = allocator(3, 3, 3);
        let record = allocator.allocate(&ask(0, 0, 0));
        assert_eq!(record.status, AllocationStatus::Complete);
        assert!(allocator
            .status()
            .pools
            .iter()
            .all(|pool| pool.assigned == 0));
    }
}
