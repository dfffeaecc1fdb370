//! PriorityTree (spec §4.5 data model, §4.4 operations): a Link's scheduling
//! structure. Two views over the same `(src,dst)` queues: a by-pair map for
//! lookup, and a by-priority multimap for `pop()`.
//!
//! The priority index only ever holds handles (the `(src,dst)` pair) that are
//! re-inserted whenever the owning queue's head bundle changes — the two
//! indices are kept consistent by routing every mutation through the methods
//! here rather than touching `by_pair` queues directly from outside.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::bundle::Bundle;
use crate::queue::PriorityQueue;
use crate::unrouted::UnroutedTree;
use crate::wildmap::SrcDstWildcardMap;

fn clamp_priority(pri: u16) -> u16 {
    pri.min(999)
}

/// `"SSS~DDD~<bundle-priority-key>"`, `SSS`/`DDD` the reversed, zero-padded
/// node priorities (0-999, higher wins) so ascending lexicographic order
/// yields descending priority order.
fn composite_key(src_pri: u16, dst_pri: u16, bundle_priority_key: &str) -> String {
    let src_pri = clamp_priority(src_pri);
    let dst_pri = clamp_priority(dst_pri);
    format!(
        "{:03}~{:03}~{bundle_priority_key}",
        999 - src_pri,
        999 - dst_pri
    )
}

fn lookup(map: &HashMap<u64, u16>, node: u64) -> u16 {
    map.get(&node).copied().unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct PriorityTree {
    by_pair: HashMap<(u64, u64), PriorityQueue>,
    by_priority: BTreeMap<String, VecDeque<(u64, u64)>>,
    src_priority: HashMap<u64, u16>,
    dst_priority: HashMap<u64, u16>,
}

impl PriorityTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &(u64, u64)> {
        self.by_pair.keys()
    }

    fn remove_from_index(&mut self, key: &str, pair: (u64, u64)) {
        if let Some(bucket) = self.by_priority.get_mut(key) {
            if let Some(pos) = bucket.iter().position(|p| *p == pair) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.by_priority.remove(key);
            }
        }
    }

    fn head_key(&self, pair: (u64, u64)) -> Option<String> {
        let q = self.by_pair.get(&pair)?;
        let head = q.peek_priority()?;
        let sp = lookup(&self.src_priority, pair.0);
        let dp = lookup(&self.dst_priority, pair.1);
        Some(composite_key(sp, dp, head))
    }

    fn reindex(&mut self, pair: (u64, u64), old_key: Option<String>) {
        if let Some(old) = old_key {
            self.remove_from_index(&old, pair);
        }
        if let Some(new_key) = self.head_key(pair) {
            self.by_priority.entry(new_key).or_default().push_back(pair);
        }
    }

    pub fn insert(&mut self, b: Bundle) {
        let pair = (b.src_node, b.dst_node);
        let old_key = self.head_key(pair);
        self.by_pair.entry(pair).or_default().insert(b);
        self.reindex(pair, old_key);
    }

    /// Merges an entire queue in (a link closing elsewhere, or the unrouted tree).
    pub fn insert_queue(&mut self, src: u64, dst: u64, mut q: PriorityQueue) {
        let pair = (src, dst);
        let old_key = self.head_key(pair);
        if let Some(existing) = self.by_pair.get_mut(&pair) {
            existing.merge_from(&mut q);
        } else {
            self.by_pair.insert(pair, q);
        }
        self.reindex(pair, old_key);
    }

    /// Pops the highest-priority bundle across every queue.
    pub fn pop(&mut self) -> Option<Bundle> {
        let (key, pair) = {
            let (key, bucket) = self.by_priority.iter_mut().next()?;
            let pair = bucket.pop_front()?;
            (key.clone(), pair)
        };
        if self.by_priority.get(&key).is_some_and(VecDeque::is_empty) {
            self.by_priority.remove(&key);
        }

        let bundle = {
            let q = self.by_pair.get_mut(&pair)?;
            q.pop()
        };

        let empty = self.by_pair.get(&pair).is_some_and(PriorityQueue::is_empty);
        if empty {
            self.by_pair.remove(&pair);
        } else if let Some(new_key) = self.head_key(pair) {
            self.by_priority.entry(new_key).or_default().push_back(pair);
        }
        bundle
    }

    /// Moves queues no longer enabled for transmit out to `unrouted`; drops empty queues.
    pub fn return_disabled_bundles(
        &mut self,
        unrouted: &mut UnroutedTree,
        xmt_enabled: &SrcDstWildcardMap,
    ) {
        let disabled: Vec<(u64, u64)> = self
            .by_pair
            .keys()
            .copied()
            .filter(|(src, dst)| !xmt_enabled.check(*src, *dst))
            .collect();
        for pair in disabled {
            if let Some(key) = self.head_key(pair) {
                self.remove_from_index(&key, pair);
            }
            if let Some(q) = self.by_pair.remove(&pair) {
                if !q.is_empty() {
                    unrouted.insert_queue(pair.0, pair.1, q);
                }
            }
        }
    }

    /// Detaches every queue into `unrouted`; used on link close.
    pub fn return_all_bundles(&mut self, unrouted: &mut UnroutedTree) {
        for (pair, q) in self.drain_all() {
            if !q.is_empty() {
                unrouted.insert_queue(pair.0, pair.1, q);
            }
        }
    }

    /// Detaches every queue, clearing both indices.
    pub fn drain_all(&mut self) -> Vec<((u64, u64), PriorityQueue)> {
        self.by_priority.clear();
        self.by_pair.drain().collect()
    }

    pub fn set_src_node_priority(&mut self, node: u64, pri: u16) {
        let pri = clamp_priority(pri);
        self.src_priority.insert(node, pri);
        let affected: Vec<(u64, u64)> = self
            .by_pair
            .keys()
            .copied()
            .filter(|(src, _)| *src == node)
            .collect();
        for pair in affected {
            let old_key = {
                // the map already holds the new priority, so recompute the would-be old
                // key using the prior value is not needed: we just removed-and-reinsert
                // every affected queue's current index entry unconditionally.
                self.by_priority
                    .iter()
                    .find(|(_, bucket)| bucket.contains(&pair))
                    .map(|(k, _)| k.clone())
            };
            self.reindex(pair, old_key);
        }
    }

    pub fn set_dst_node_priority(&mut self, node: u64, pri: u16) {
        let pri = clamp_priority(pri);
        self.dst_priority.insert(node, pri);
        let affected: Vec<(u64, u64)> = self
            .by_pair
            .keys()
            .copied()
            .filter(|(_, dst)| *dst == node)
            .collect();
        for pair in affected {
            let old_key = self
                .by_priority
                .iter()
                .find(|(_, bucket)| bucket.contains(&pair))
                .map(|(k, _)| k.clone());
            self.reindex(pair, old_key);
        }
    }

    pub fn reachable_dests(&self) -> HashSet<u64> {
        self.by_pair.keys().map(|(_, dst)| *dst).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ClassOfService;
    use eid::Eid;

    fn bundle(id: u64, src: u64, dst: u64, cos: ClassOfService) -> Bundle {
        Bundle::new(
            id,
            format!("gbof:{id}"),
            src,
            dst,
            Eid::parse("ipn:1.0").unwrap(),
            100,
            3600,
            cos,
        )
    }

    #[test]
    fn priority_ordering_is_independent_of_insertion_order() {
        let mut t = PriorityTree::new();
        t.insert(bundle(1, 10, 20, ClassOfService::Normal));
        t.insert(bundle(2, 11, 20, ClassOfService::Normal));
        t.set_src_node_priority(10, 900);
        t.set_src_node_priority(11, 100);

        let popped = t.pop().unwrap();
        assert_eq!(popped.bundle_id, 1);
    }

    #[test]
    fn scenario_s3_two_expedited_bundles_different_src_priority() {
        let mut t = PriorityTree::new();
        t.set_src_node_priority(10, 900);
        t.set_src_node_priority(11, 100);

        t.insert(bundle(1, 11, 30, ClassOfService::Expedited));
        t.insert(bundle(2, 10, 30, ClassOfService::Expedited));

        assert_eq!(t.pop().unwrap().bundle_id, 2);
        assert_eq!(t.pop().unwrap().bundle_id, 1);
    }

    #[test]
    fn return_all_bundles_moves_everything_to_unrouted() {
        let mut t = PriorityTree::new();
        t.insert(bundle(1, 10, 20, ClassOfService::Normal));
        t.insert(bundle(2, 10, 21, ClassOfService::Normal));
        let mut unrouted = UnroutedTree::new();
        t.return_all_bundles(&mut unrouted);
        assert!(t.is_empty());
        assert_eq!(unrouted.total_pending(), 2);
    }

    #[test]
    fn return_disabled_bundles_only_moves_disabled_pairs() {
        let mut t = PriorityTree::new();
        t.insert(bundle(1, 10, 20, ClassOfService::Normal));
        t.insert(bundle(2, 10, 21, ClassOfService::Normal));
        let mut xmt = SrcDstWildcardMap::new();
        xmt.put_pair(10, 20, true);
        xmt.put_pair(10, 21, false);

        let mut unrouted = UnroutedTree::new();
        t.return_disabled_bundles(&mut unrouted, &xmt);

        assert_eq!(unrouted.total_pending(), 1);
        assert_eq!(t.pop().unwrap().bundle_id, 1);
    }
}
