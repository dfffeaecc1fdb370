//! Router (spec §4.6 / C7): owns every Link for one DTN node plus the node's
//! UnroutedTree; classifies and dispatches inbound bundles.
//!
//! Folded into [`crate::nodeagent::NodeAgent`] as a plain struct rather than
//! a separate actor: actix runs an actor's mailbox single-threaded, so a
//! distinct Router actor would only add message-passing overhead between it
//! and the agent with no concurrency gained. Link stays a true actor because
//! its Sender tick genuinely needs independent periodic execution. See
//! DESIGN.md.

use std::collections::HashSet;

use actix::prelude::*;
use log::{info, warn};

use crate::bundle::Bundle;
use crate::link::messages::{Enqueue, SetXmtEnabled};
use crate::link::Link;
use crate::unrouted::UnroutedTree;
use crate::wildmap::SrcDstWildcardMap;

/// One registered link, in the insertion order the original scans for
/// "first eligible link" routing (spec §4.6 step 2).
struct LinkEntry {
    link_id: String,
    addr: Addr<Link>,
    is_fwdlink: bool,
    sources: HashSet<u64>,
    dests: HashSet<u64>,
    closed: bool,
}

#[allow(clippy::too_many_arguments)]
fn eligible(
    closed: bool,
    is_fwdlink: bool,
    is_arrival_link: bool,
    dest_reachable: bool,
    src: u64,
    dst: u64,
    xmt_enabled: &SrcDstWildcardMap,
) -> bool {
    if closed || is_arrival_link || !dest_reachable {
        return false;
    }
    if is_fwdlink && !xmt_enabled.check(src, dst) {
        return false;
    }
    true
}

#[derive(Default)]
pub struct Router {
    links: Vec<LinkEntry>,
    pub unrouted: UnroutedTree,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_link(&mut self, link_id: String, addr: Addr<Link>, is_fwdlink: bool) {
        self.links.push(LinkEntry {
            link_id,
            addr,
            is_fwdlink,
            sources: HashSet::new(),
            dests: HashSet::new(),
            closed: true,
        });
    }

    pub fn is_registered(&self, link_id: &str) -> bool {
        self.links.iter().any(|l| l.link_id == link_id)
    }

    pub fn addr(&self, link_id: &str) -> Option<Addr<Link>> {
        self.links
            .iter()
            .find(|l| l.link_id == link_id)
            .map(|l| l.addr.clone())
    }

    pub fn unregister_link(&mut self, link_id: &str) {
        self.links.retain(|l| l.link_id != link_id);
    }

    fn entry_mut(&mut self, link_id: &str) -> Option<&mut LinkEntry> {
        self.links.iter_mut().find(|l| l.link_id == link_id)
    }

    /// A link opened with a fresh set of reachable sources/dests: record it
    /// and move everything in UnroutedTree that is now routable on it.
    pub fn link_opened(
        &mut self,
        link_id: &str,
        sources: HashSet<u64>,
        dests: HashSet<u64>,
        xmt_enabled: &SrcDstWildcardMap,
    ) {
        let is_fwdlink = match self.entry_mut(link_id) {
            Some(entry) => {
                entry.closed = false;
                entry.sources = sources;
                entry.dests = dests.clone();
                entry.is_fwdlink
            }
            None => {
                warn!("link_opened for unregistered link {link_id}");
                return;
            }
        };

        let addr = self
            .links
            .iter()
            .find(|l| l.link_id == link_id)
            .map(|l| l.addr.clone());
        let Some(addr) = addr else { return };

        let mut tree = crate::priority_tree::PriorityTree::new();
        let moved = self
            .unrouted
            .route_to_link(&dests, is_fwdlink, xmt_enabled, &mut tree);
        if moved > 0 {
            info!("link {link_id} opened: moved {moved} parked bundles onto it");
        }
        while let Some(b) = tree.pop() {
            addr.do_send(Enqueue(b));
        }
    }

    pub fn link_closed(&mut self, link_id: &str) {
        if let Some(entry) = self.entry_mut(link_id) {
            entry.closed = true;
            entry.sources.clear();
            entry.dests.clear();
        }
    }

    /// Bundles handed back by a Link's own `return_all_bundles`/
    /// `return_disabled_bundles` path land here, merged into UnroutedTree.
    pub fn reabsorb(&mut self, queues: Vec<(u64, u64, crate::queue::PriorityQueue)>) {
        for (src, dst, q) in queues {
            self.unrouted.insert_queue(src, dst, q);
        }
    }

    pub fn set_xmt_enabled(&mut self, xmt_enabled: SrcDstWildcardMap) {
        for entry in &self.links {
            entry.addr.do_send(SetXmtEnabled(xmt_enabled.clone()));
        }
    }

    fn is_eligible(
        entry: &LinkEntry,
        arrival_link_id: Option<&str>,
        dst: u64,
        src: u64,
        xmt_enabled: &SrcDstWildcardMap,
    ) -> bool {
        eligible(
            entry.closed,
            entry.is_fwdlink,
            arrival_link_id == Some(entry.link_id.as_str()),
            entry.dests.contains(&dst),
            src,
            dst,
            xmt_enabled,
        )
    }

    /// Classifies and dispatches one bundle (spec §4.6 step 1-3).
    ///
    /// ECOS-critical bundles fan out to every eligible link except the one
    /// they arrived on; ordinary bundles stop at the first eligible link in
    /// registration order; bundles with no eligible link park in
    /// UnroutedTree.
    pub fn route_bundle(
        &mut self,
        bundle: Bundle,
        arrival_link_id: Option<&str>,
        xmt_enabled: &SrcDstWildcardMap,
    ) {
        let src = bundle.src_node;
        let dst = bundle.dst_node;

        if bundle.flags.ecos_critical {
            let targets: Vec<Addr<Link>> = self
                .links
                .iter()
                .filter(|e| Self::is_eligible(e, arrival_link_id, dst, src, xmt_enabled))
                .map(|e| e.addr.clone())
                .collect();
            if targets.is_empty() {
                self.unrouted.insert(bundle);
                return;
            }
            for addr in targets {
                addr.do_send(Enqueue(bundle.clone()));
            }
            return;
        }

        let target = self
            .links
            .iter()
            .find(|e| Self::is_eligible(e, arrival_link_id, dst, src, xmt_enabled))
            .map(|e| e.addr.clone());

        match target {
            Some(addr) => addr.do_send(Enqueue(bundle)),
            None => self.unrouted.insert(bundle),
        }
    }

    /// Validates a received bundle's `(src,dst)` against the link it arrived
    /// on (spec §4.6 `accept_bundle`). Forward links are the trusted ingress
    /// and always accept.
    pub fn accept_bundle(&self, src: u64, dst: u64, link_id: &str, local_admin_node: Option<u64>) -> bool {
        let Some(entry) = self.links.iter().find(|l| l.link_id == link_id) else {
            return false;
        };
        if entry.closed {
            return false;
        }
        if entry.is_fwdlink {
            return true;
        }
        if !entry.sources.contains(&src) {
            return false;
        }
        entry.dests.contains(&dst) || local_admin_node == Some(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_excludes_arrival_link_and_closed_links() {
        let xmt = SrcDstWildcardMap::new();
        assert!(!eligible(false, false, true, true, 10, 20, &xmt));
        assert!(!eligible(true, false, false, true, 10, 20, &xmt));
        assert!(eligible(false, false, false, true, 10, 20, &xmt));
    }

    #[test]
    fn fwdlink_requires_xmt_enabled() {
        let mut xmt = SrcDstWildcardMap::new();
        assert!(!eligible(false, true, false, true, 10, 20, &xmt));
        xmt.put_pair(10, 20, true);
        assert!(eligible(false, true, false, true, 10, 20, &xmt));
    }
}
