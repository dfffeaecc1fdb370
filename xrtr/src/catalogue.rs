//! BundleCatalogue (spec §4.3): the master by-bundle-id map. Every bundle
//! known to a DTN node appears here until it is removed and destroyed.
//!
//! Per the design note on reference-counted bundles, this module is the sole
//! owner of `Bundle` values; every other index in [`crate::nodeagent`] holds
//! bare bundle ids rather than a second copy of the data.

use std::collections::{HashMap, HashSet};

use crate::bundle::Bundle;

#[derive(Debug, Clone, Default)]
pub struct AggregateStats {
    pub received: u64,
    pub transmitted: u64,
    pub transmit_failed: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub expired: u64,
    pub custody_released: u64,
    pub interval_bytes: u64,
    pub interval_bundles: u64,
}

impl AggregateStats {
    pub fn reset_interval(&mut self) {
        self.interval_bytes = 0;
        self.interval_bundles = 0;
    }
}

#[derive(Debug, Default)]
pub struct BundleCatalogue {
    bundles: HashMap<u64, Bundle>,
    stats: HashMap<(u64, u64), AggregateStats>,
}

impl BundleCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bundle_id: u64) -> Option<&Bundle> {
        self.bundles.get(&bundle_id)
    }

    pub fn get_mut(&mut self, bundle_id: u64) -> Option<&mut Bundle> {
        self.bundles.get_mut(&bundle_id)
    }

    pub fn contains(&self, bundle_id: u64) -> bool {
        self.bundles.contains_key(&bundle_id)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn stats(&self, src: u64, dst: u64) -> Option<&AggregateStats> {
        self.stats.get(&(src, dst))
    }

    /// Inserts `b` unless its id is already known. A duplicate is logged and
    /// dropped silently; the caller must not route it onward in that case.
    pub fn bundle_received(&mut self, b: Bundle) -> bool {
        if self.bundles.contains_key(&b.bundle_id) {
            log::warn!(
                "duplicate bundle_received for bundle {}, dropping",
                b.bundle_id
            );
            return false;
        }
        let stats = self.stats.entry((b.src_node, b.dst_node)).or_default();
        stats.received += 1;
        stats.interval_bytes += b.length;
        stats.interval_bundles += 1;
        self.bundles.insert(b.bundle_id, b);
        true
    }

    pub fn erase(&mut self, bundle_id: u64) -> Option<Bundle> {
        self.bundles.remove(&bundle_id)
    }

    pub fn bundle_expired(&mut self, bundle_id: u64) -> Option<Bundle> {
        let b = self.bundles.remove(&bundle_id)?;
        if let Some(s) = self.stats.get_mut(&(b.src_node, b.dst_node)) {
            s.expired += 1;
        }
        Some(b)
    }

    pub fn bundle_rejected(&mut self, bundle_id: u64) -> Option<Bundle> {
        let b = self.bundles.remove(&bundle_id)?;
        if let Some(s) = self.stats.get_mut(&(b.src_node, b.dst_node)) {
            s.rejected += 1;
        }
        Some(b)
    }

    pub fn bundle_transmitted(&mut self, bundle_id: u64, success: bool) -> Option<&Bundle> {
        let pair = self
            .bundles
            .get(&bundle_id)
            .map(|b| (b.src_node, b.dst_node))?;
        let stat = self.stats.entry(pair).or_default();
        if success {
            stat.transmitted += 1;
        } else {
            stat.transmit_failed += 1;
        }
        self.bundles.get(&bundle_id)
    }

    pub fn bundle_delivered(&mut self, bundle_id: u64) -> Option<Bundle> {
        let b = self.bundles.remove(&bundle_id)?;
        if let Some(s) = self.stats.get_mut(&(b.src_node, b.dst_node)) {
            s.delivered += 1;
        }
        Some(b)
    }

    pub fn bundle_custody_accepted(&mut self, bundle_id: u64) -> Option<&mut Bundle> {
        let b = self.bundles.get_mut(&bundle_id)?;
        b.flags.local_custody = true;
        Some(b)
    }

    pub fn bundle_custody_released(&mut self, bundle_id: u64) -> Option<&mut Bundle> {
        let pair = self
            .bundles
            .get(&bundle_id)
            .map(|b| (b.src_node, b.dst_node))?;
        if let Some(s) = self.stats.get_mut(&pair) {
            s.custody_released += 1;
        }
        let b = self.bundles.get_mut(&bundle_id)?;
        b.flags.local_custody = false;
        Some(b)
    }

    pub fn prepare_for_resync(&mut self) {
        for b in self.bundles.values_mut() {
            b.flags.in_resync_report = false;
        }
    }

    pub fn mark_in_report(&mut self, bundle_id: u64) {
        if let Some(b) = self.bundles.get_mut(&bundle_id) {
            b.flags.in_resync_report = true;
        }
    }

    /// Removes every bundle not marked `in_resync_report` since the last
    /// [`Self::prepare_for_resync`], plus matching entries in the agent's
    /// undelivered/custody indices. Returns the count removed.
    pub fn finalize_resync(
        &mut self,
        undelivered: &mut HashSet<u64>,
        custody: &mut HashMap<u64, u64>,
    ) -> usize {
        let stale: Vec<u64> = self
            .bundles
            .iter()
            .filter(|(_, b)| !b.flags.in_resync_report)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.bundles.remove(id);
            undelivered.remove(id);
            custody.retain(|_, bundle_id| bundle_id != id);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ClassOfService;
    use eid::Eid;

    fn bundle(id: u64) -> Bundle {
        Bundle::new(
            id,
            format!("gbof:{id}"),
            10,
            20,
            Eid::parse("ipn:20.0").unwrap(),
            100,
            3600,
            ClassOfService::Normal,
        )
    }

    #[test]
    fn duplicate_bundle_received_is_dropped_silently() {
        let mut c = BundleCatalogue::new();
        assert!(c.bundle_received(bundle(1)));
        assert!(!c.bundle_received(bundle(1)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn conservation_across_lifecycle_events() {
        let mut c = BundleCatalogue::new();
        c.bundle_received(bundle(1));
        c.bundle_received(bundle(2));
        c.bundle_received(bundle(3));
        assert_eq!(c.len(), 3);

        c.bundle_delivered(1);
        c.bundle_expired(2);
        assert_eq!(c.len(), 1);
        assert!(c.contains(3));
    }

    #[test]
    fn resync_removes_bundles_missing_from_the_report() {
        let mut c = BundleCatalogue::new();
        c.bundle_received(bundle(1));
        c.bundle_received(bundle(2));
        c.bundle_received(bundle(3));

        let mut undelivered = HashSet::new();
        let mut custody = HashMap::new();
        undelivered.insert(2);
        custody.insert(555, 3);

        c.prepare_for_resync();
        c.mark_in_report(1);
        let removed = c.finalize_resync(&mut undelivered, &mut custody);

        assert_eq!(removed, 2);
        assert!(c.contains(1));
        assert!(!c.contains(2));
        assert!(!c.contains(3));
        assert!(undelivered.is_empty());
        assert!(custody.is_empty());
    }
}
