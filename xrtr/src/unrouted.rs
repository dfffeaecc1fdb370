//! UnroutedTree (spec §4.4): a holding area for bundles with no currently
//! eligible link, keyed the same way as a Link's [`crate::priority_tree::PriorityTree`]
//! but without the global priority ordering — nothing is scheduled here.

use std::collections::{HashMap, HashSet};

use crate::bundle::Bundle;
use crate::priority_tree::PriorityTree;
use crate::queue::PriorityQueue;
use crate::wildmap::SrcDstWildcardMap;

#[derive(Debug, Default)]
pub struct UnroutedTree {
    queues: HashMap<(u64, u64), PriorityQueue>,
}

impl UnroutedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(PriorityQueue::is_empty)
    }

    pub fn total_pending(&self) -> u64 {
        self.queues.values().map(PriorityQueue::pending).sum()
    }

    pub fn insert(&mut self, b: Bundle) {
        self.queues
            .entry((b.src_node, b.dst_node))
            .or_default()
            .insert(b);
    }

    /// Merges an entire queue in (used when a link closes or is disabled).
    pub fn insert_queue(&mut self, src: u64, dst: u64, mut q: PriorityQueue) {
        let pair = (src, dst);
        if let Some(existing) = self.queues.get_mut(&pair) {
            existing.merge_from(&mut q);
        } else {
            self.queues.insert(pair, q);
        }
    }

    /// Moves every queue reachable via a link, and (for a forward link) enabled
    /// for transmit, into that link's [`PriorityTree`]. Returns bundles moved.
    pub fn route_to_link(
        &mut self,
        reachable_dests: &HashSet<u64>,
        is_fwdlink: bool,
        xmt_enabled: &SrcDstWildcardMap,
        target: &mut PriorityTree,
    ) -> usize {
        let matching: Vec<(u64, u64)> = self
            .queues
            .keys()
            .copied()
            .filter(|(src, dst)| {
                reachable_dests.contains(dst) && (!is_fwdlink || xmt_enabled.check(*src, *dst))
            })
            .collect();

        let mut moved = 0;
        for pair in matching {
            if let Some(q) = self.queues.remove(&pair) {
                moved += q.len();
                target.insert_queue(pair.0, pair.1, q);
            }
        }
        moved
    }

    /// Detaches every queue, for handing an entire unrouted set elsewhere.
    pub fn drain_all(&mut self) -> Vec<((u64, u64), PriorityQueue)> {
        self.queues.drain().collect()
    }

    pub fn remove_bundle(&mut self, src: u64, dst: u64, bundle_id: u64) -> Option<Bundle> {
        let pair = (src, dst);
        let q = self.queues.get_mut(&pair)?;
        let b = q.remove(bundle_id);
        if q.is_empty() {
            self.queues.remove(&pair);
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ClassOfService;
    use eid::Eid;

    fn bundle(id: u64, src: u64, dst: u64) -> Bundle {
        Bundle::new(
            id,
            format!("gbof:{id}"),
            src,
            dst,
            Eid::parse("ipn:1.0").unwrap(),
            100,
            3600,
            ClassOfService::Normal,
        )
    }

    #[test]
    fn route_to_link_moves_only_reachable_enabled_pairs() {
        let mut unrouted = UnroutedTree::new();
        unrouted.insert(bundle(1, 10, 20));
        unrouted.insert(bundle(2, 10, 21));

        let mut reachable = HashSet::new();
        reachable.insert(20);
        let mut xmt = SrcDstWildcardMap::new();
        xmt.put_double_wild(true);

        let mut tree = PriorityTree::new();
        let moved = unrouted.route_to_link(&reachable, true, &xmt, &mut tree);

        assert_eq!(moved, 1);
        assert_eq!(unrouted.total_pending(), 1);
        assert_eq!(tree.pop().unwrap().bundle_id, 1);
    }

    #[test]
    fn scenario_s2_bundle_parks_then_routes_on_link_open() {
        let mut unrouted = UnroutedTree::new();
        unrouted.insert(bundle(1, 10, 20));
        assert_eq!(unrouted.total_pending(), 1);

        let mut reachable = HashSet::new();
        reachable.insert(20);
        let xmt = SrcDstWildcardMap::new();
        let mut tree = PriorityTree::new();
        let moved = unrouted.route_to_link(&reachable, false, &xmt, &mut tree);

        assert_eq!(moved, 1);
        assert!(unrouted.is_empty());
    }
}
