//! PriorityQueue (spec §4.2): bundles for one `(src, dst)` pair, ordered by
//! composite `priority_key`. Not scheduled directly — always held inside an
//! [`crate::unrouted::UnroutedTree`] or [`crate::priority_tree::PriorityTree`].

use std::collections::{BTreeMap, HashMap};

use crate::bundle::{Bundle, ClassOfService};

#[derive(Debug, Clone, Default)]
pub struct PriorityQueue {
    entries: BTreeMap<String, Bundle>,
    pending: u64,
    bytes: u64,
    per_cos: HashMap<ClassOfService, u64>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn per_cos_count(&self, cos: ClassOfService) -> u64 {
        self.per_cos.get(&cos).copied().unwrap_or(0)
    }

    pub fn insert(&mut self, b: Bundle) {
        self.pending += 1;
        self.bytes += b.length;
        *self.per_cos.entry(b.cos).or_insert(0) += 1;
        self.entries.insert(b.priority_key.clone(), b);
    }

    /// Removes and returns the lexicographically smallest entry (next to transmit).
    pub fn pop(&mut self) -> Option<Bundle> {
        let key = self.entries.keys().next()?.clone();
        let b = self.entries.remove(&key)?;
        self.pending -= 1;
        self.bytes -= b.length;
        if let Some(c) = self.per_cos.get_mut(&b.cos) {
            *c = c.saturating_sub(1);
        }
        Some(b)
    }

    pub fn peek_priority(&self) -> Option<&str> {
        self.entries.keys().next().map(String::as_str)
    }

    pub fn remove(&mut self, bundle_id: u64) -> Option<Bundle> {
        let key = self
            .entries
            .iter()
            .find(|(_, b)| b.bundle_id == bundle_id)
            .map(|(k, _)| k.clone())?;
        let b = self.entries.remove(&key)?;
        self.pending -= 1;
        self.bytes -= b.length;
        if let Some(c) = self.per_cos.get_mut(&b.cos) {
            *c = c.saturating_sub(1);
        }
        Some(b)
    }

    /// Drains every bundle out of `other` into `self`, preserving priority order.
    pub fn merge_from(&mut self, other: &mut PriorityQueue) {
        for (_, b) in std::mem::take(&mut other.entries) {
            self.insert(b);
        }
        other.pending = 0;
        other.bytes = 0;
        other.per_cos.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eid::Eid;

    fn bundle(id: u64, cos: ClassOfService, expiration: u64) -> Bundle {
        Bundle::new(
            id,
            format!("gbof:{id}"),
            10,
            20,
            Eid::parse("ipn:20.0").unwrap(),
            100,
            expiration,
            cos,
        )
    }

    #[test]
    fn pop_returns_highest_priority_regardless_of_insertion_order() {
        let mut q = PriorityQueue::new();
        q.insert(bundle(1, ClassOfService::Bulk, 100));
        q.insert(bundle(2, ClassOfService::Reserved, 100));
        q.insert(bundle(3, ClassOfService::Normal, 100));

        assert_eq!(q.pop().unwrap().bundle_id, 2);
        assert_eq!(q.pop().unwrap().bundle_id, 3);
        assert_eq!(q.pop().unwrap().bundle_id, 1);
        assert!(q.pop().is_none());
    }

    #[test]
    fn counters_track_pending_bytes_and_per_cos() {
        let mut q = PriorityQueue::new();
        q.insert(bundle(1, ClassOfService::Expedited, 100));
        q.insert(bundle(2, ClassOfService::Expedited, 100));
        assert_eq!(q.pending(), 2);
        assert_eq!(q.bytes(), 200);
        assert_eq!(q.per_cos_count(ClassOfService::Expedited), 2);

        q.pop();
        assert_eq!(q.pending(), 1);
        assert_eq!(q.bytes(), 100);
        assert_eq!(q.per_cos_count(ClassOfService::Expedited), 1);
    }

    #[test]
    fn merge_from_drains_the_source_queue() {
        let mut a = PriorityQueue::new();
        let mut b = PriorityQueue::new();
        b.insert(bundle(1, ClassOfService::Normal, 100));
        b.insert(bundle(2, ClassOfService::Normal, 50));

        a.merge_from(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.len(), 2);
    }
}
