//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Resource pools and the allocation engine."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use campus_msg::ResourceKind;
use indexmap::IndexSet;
use serde::Serialize;

/// Fixed inventory of interchangeable units in one category.
///
/// A unit id is in exactly one of `available` or `assigned`.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    kind: ResourceKind,
    available: IndexSet<String>,
    assigned: IndexSet<String>,
}

/// Point-in-time counts for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub kind: ResourceKind,
    pub total: usize,
    pub assigned: usize,
    pub available: usize,
}

impl ResourcePool {
    /// Pool of `size` units named `<prefix>1` through `<prefix><size>`.
    pub fn new(kind: ResourceKind, prefix: &str, size: u32) -> Self {
        Self {
            kind,
            available: (1..=size).map(|n| format!("{prefix}{n}")).collect(),
            assigned: IndexSet::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn total(&self) -> usize {
        self.available.len() + self.assigned.len()
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn assigned(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_assigned(&self, unit: &str) -> bool {
        self.assigned.contains(unit)
    }

    /// Assign up to `wanted` units, lowest ids first.
    pub fn take(&mut self, wanted: u32) -> Vec<String> {
        let count = (wanted as usize).min(self.available.len());
        let taken: Vec<String> = self.available.drain(..count).collect();
        self.assigned.extend(taken.iter().cloned());
        taken
    }

    /// Mark a known unit as assigned. Returns `false` for ids this pool does
    /// not contain; already-assigned ids are accepted.
    pub fn mark_assigned(&mut self, unit: &str) -> bool {
        if self.assigned.contains(unit) {
            return true;
        }
        match self.available.shift_take(unit) {
            Some(owned) => {
                self.assigned.insert(owned);
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            kind: self.kind,
            total: self.total(),
            assigned: self.assigned(),
            available: self.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_hands_out_lowest_ids_and_caps() {
        let mut pool = ResourcePool::new(ResourceKind::Labs, "L", 3);
        assert_eq!(pool.take(2), ["L1", "L2"]);
        assert_eq!(pool.take(5), ["L3"]);
        assert!(pool.take(1).is_empty());
        assert_eq!(pool.assigned(), 3);
        assert_eq!(pool.total(), 3);
    }

    #[test]
    fn mark_assigned_preserves_totals() {
        let mut pool = ResourcePool::new(ResourceKind::Classrooms, "C", 5);
        assert!(pool.mark_assigned("C4"));
        assert!(pool.mark_assigned("C4"));
        assert!(!pool.mark_assigned("C9"));
        assert!(pool.is_assigned("C4"));
        assert_eq!(pool.status().assigned + pool.status().available, 5);
        assert_eq!(pool.take(4), ["C1", "C2", "C3", "C5"]);
    }
}
