//! Link (spec §4.5 / C6): per-link state machine plus a rate-limited Sender.
//!
//! The conceptual dedicated Sender thread is realized here as a periodic
//! actor tick (`ctx.run_interval`) that drains the leaky bucket and the
//! PriorityTree together; see DESIGN.md for why a non-blocking tick replaces
//! the source's blocking spin-wait.

pub mod bucket;
pub mod messages;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use actix::prelude::*;
use log::{info, warn};

use crate::bundle::Bundle;
use crate::common::canceltoken::CancelToken;
use crate::outbound::{OutboundEnvelope, OutboundSender};
use crate::priority_tree::PriorityTree;
use crate::wildmap::SrcDstWildcardMap;

use bucket::LeakyBucket;
use ctrlchan::message::ReconfigureEntry;
use ctrlchan::OutboundMessage;
use messages::{
    Enqueue, LinkBecameAvailable, LinkBecameUnavailable, LinkClosedEvent, LinkOpened,
    ProbeMissedBundles, ReturnBundles, SetDstPriority, SetFwdlinkAos, SetFwdlinkEnabled,
    SetRateBps, SetSrcPriority, SetXmtEnabled,
};

const SENDER_TICK: Duration = Duration::from_millis(20);
const MAX_SENDS_PER_TICK: u32 = 64;
const MISSED_BUNDLE_PROBE_IDLE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Available,
    Open,
    Closed,
    Unavailable,
}

pub struct Link {
    pub link_id: String,
    pub server_eid: String,
    pub is_fwdlink: bool,
    pub fwdlnk_force_los_while_disabled: bool,

    state: LinkState,
    remote_eid: Option<String>,
    remote_addr: Option<String>,
    sources: HashSet<u64>,
    dests: HashSet<u64>,

    fwdlnk_enabled: bool,
    fwdlnk_aos: bool,
    last_sent_comm_aos: Option<bool>,

    tree: PriorityTree,
    bucket: LeakyBucket,

    last_enqueued_at: Option<Instant>,
    probe_sent_for_current_idle: bool,

    outbound: OutboundSender,
    owning_agent: Recipient<ReturnBundles>,
    probe_recipient: Recipient<ProbeMissedBundles>,
    cancel: CancelToken,
}

impl Link {
    pub fn new(
        link_id: String,
        server_eid: String,
        is_fwdlink: bool,
        rate_bps: u64,
        outbound: OutboundSender,
        owning_agent: Recipient<ReturnBundles>,
        probe_recipient: Recipient<ProbeMissedBundles>,
    ) -> Self {
        Link {
            link_id,
            server_eid,
            is_fwdlink,
            fwdlnk_force_los_while_disabled: true,
            state: LinkState::Unknown,
            remote_eid: None,
            remote_addr: None,
            sources: HashSet::new(),
            dests: HashSet::new(),
            fwdlnk_enabled: false,
            fwdlnk_aos: false,
            last_sent_comm_aos: None,
            tree: PriorityTree::new(),
            bucket: LeakyBucket::new(rate_bps),
            last_enqueued_at: None,
            probe_sent_for_current_idle: false,
            outbound,
            owning_agent,
            probe_recipient,
            cancel: CancelToken::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_node_reachable(&self, dst: u64) -> bool {
        self.state == LinkState::Open && self.dests.contains(&dst)
    }

    pub fn valid_source(&self, src: u64) -> bool {
        self.sources.contains(&src)
    }

    pub fn valid_dest(&self, dst: u64) -> bool {
        self.dests.contains(&dst)
    }

    fn okay_to_send(&self) -> bool {
        self.state == LinkState::Open
            && (!self.is_fwdlink || (self.fwdlnk_enabled && self.fwdlnk_aos))
    }

    fn effective_comm_aos(&self) -> bool {
        if self.fwdlnk_force_los_while_disabled && !self.fwdlnk_enabled {
            false
        } else {
            self.fwdlnk_aos
        }
    }

    fn send_outbound(&self, message: OutboundMessage) {
        let envelope = OutboundEnvelope {
            server_eid: self.server_eid.clone(),
            message,
        };
        if self.outbound.try_send(envelope).is_err() {
            warn!("link {}: outbound queue full, dropping message", self.link_id);
        }
    }

    fn maybe_emit_aos_reconfigure(&mut self) {
        let comm_aos = self.effective_comm_aos();
        if self.last_sent_comm_aos != Some(comm_aos) {
            self.last_sent_comm_aos = Some(comm_aos);
            self.send_outbound(OutboundMessage::LinkReconfigureReq {
                link_id: self.link_id.clone(),
                entries: vec![ReconfigureEntry::comm_aos(comm_aos)],
            });
        }
    }

    fn sender_tick(&mut self) {
        if !self.okay_to_send() {
            return;
        }
        for _ in 0..MAX_SENDS_PER_TICK {
            let Some(bundle) = self.tree.pop() else {
                break;
            };
            if bundle.flags.deleted {
                continue;
            }
            let bits = LeakyBucket::cost_bits(bundle.length);
            if self.cancel.is_canceled() || !self.bucket.try_consume(bits) {
                self.tree.insert(bundle);
                break;
            }
            let bundle_id = bundle.bundle_id;
            self.send_outbound(OutboundMessage::TransmitBundleReq {
                bundle_id,
                link_id: self.link_id.clone(),
            });
        }
    }

    fn missed_bundle_probe_tick(&mut self) {
        if let Some(last) = self.last_enqueued_at {
            if self.tree.is_empty()
                && !self.probe_sent_for_current_idle
                && last.elapsed() >= MISSED_BUNDLE_PROBE_IDLE
            {
                self.probe_sent_for_current_idle = true;
                let _ = self.probe_recipient.do_send(ProbeMissedBundles {
                    link_id: self.link_id.clone(),
                });
            }
        }
    }

    fn return_all_bundles(&mut self) -> Vec<(u64, u64, crate::queue::PriorityQueue)> {
        self.tree
            .drain_all()
            .into_iter()
            .map(|((src, dst), q)| (src, dst, q))
            .collect()
    }
}

impl Actor for Link {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(SENDER_TICK, |act, _ctx| {
            act.sender_tick();
            act.missed_bundle_probe_tick();
        });
    }
}

impl Handler<LinkBecameAvailable> for Link {
    type Result = ();

    fn handle(&mut self, _msg: LinkBecameAvailable, _ctx: &mut Self::Context) {
        self.state = LinkState::Available;
    }
}

impl Handler<LinkOpened> for Link {
    type Result = ();

    fn handle(&mut self, msg: LinkOpened, _ctx: &mut Self::Context) {
        self.state = LinkState::Open;
        self.remote_eid = Some(msg.remote_eid);
        self.remote_addr = Some(msg.remote_addr);
        self.sources = msg.sources;
        self.dests = msg.dests;
        info!("link {} opened", self.link_id);
    }
}

impl Handler<LinkBecameUnavailable> for Link {
    type Result = ();

    fn handle(&mut self, _msg: LinkBecameUnavailable, _ctx: &mut Self::Context) {
        self.state = LinkState::Unavailable;
    }
}

impl Handler<LinkClosedEvent> for Link {
    type Result = ();

    fn handle(&mut self, _msg: LinkClosedEvent, _ctx: &mut Self::Context) {
        self.state = LinkState::Closed;
        let queues = self.return_all_bundles();
        let _ = self.owning_agent.do_send(ReturnBundles {
            link_id: self.link_id.clone(),
            queues,
        });
    }
}

impl Handler<Enqueue> for Link {
    type Result = ();

    fn handle(&mut self, msg: Enqueue, _ctx: &mut Self::Context) {
        self.tree.insert(msg.0);
        self.last_enqueued_at = Some(Instant::now());
        self.probe_sent_for_current_idle = false;
    }
}

impl Handler<SetFwdlinkEnabled> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetFwdlinkEnabled, _ctx: &mut Self::Context) {
        self.fwdlnk_enabled = msg.0;
        self.maybe_emit_aos_reconfigure();
    }
}

impl Handler<SetFwdlinkAos> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetFwdlinkAos, _ctx: &mut Self::Context) {
        self.fwdlnk_aos = msg.0;
        self.maybe_emit_aos_reconfigure();
    }
}

impl Handler<SetRateBps> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetRateBps, _ctx: &mut Self::Context) {
        self.bucket.set_rate(msg.0);
    }
}

impl Handler<SetSrcPriority> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetSrcPriority, _ctx: &mut Self::Context) {
        self.tree.set_src_node_priority(msg.0, msg.1);
    }
}

impl Handler<SetDstPriority> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetDstPriority, _ctx: &mut Self::Context) {
        self.tree.set_dst_node_priority(msg.0, msg.1);
    }
}

impl Handler<SetXmtEnabled> for Link {
    type Result = ();

    fn handle(&mut self, msg: SetXmtEnabled, _ctx: &mut Self::Context) {
        let mut unrouted = crate::unrouted::UnroutedTree::new();
        self.tree.return_disabled_bundles(&mut unrouted, &msg.0);
        if !unrouted.is_empty() {
            let queues = unrouted
                .drain_all()
                .into_iter()
                .map(|((src, dst), q)| (src, dst, q))
                .collect();
            let _ = self.owning_agent.do_send(ReturnBundles {
                link_id: self.link_id.clone(),
                queues,
            });
        }
    }
}
