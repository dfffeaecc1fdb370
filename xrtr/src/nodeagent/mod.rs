//! DtnNodeAgent (spec §4.7 / C8): per-daemon master. Owns the Catalogue and
//! an embedded [`Router`] (see router/mod.rs for why the Router is a plain
//! struct here rather than its own actor), parses inbound messages, and
//! drives resync.

pub mod messages;

use std::collections::{HashMap, HashSet};

use actix::prelude::*;
use log::{debug, info, warn};

use crate::bundle::{Bundle, ClassOfService};
use crate::catalogue::BundleCatalogue;
use crate::link::messages::{
    LinkBecameAvailable, LinkBecameUnavailable, LinkClosedEvent, LinkOpened, ProbeMissedBundles,
    ReturnBundles, SetDstPriority, SetFwdlinkAos, SetFwdlinkEnabled, SetRateBps, SetSrcPriority,
};
use crate::link::Link;
use crate::outbound::{OutboundEnvelope, OutboundSender};
use crate::router::Router;
use crate::wildmap::SrcDstWildcardMap;
use ctrlchan::message::{BundleInfo, LinkReportEntry};
use ctrlchan::{InboundMessage, OutboundMessage};
use eid::Eid;

use messages::{ConfigureLink, Deliver, PolicyUpdate, TransportReset, UnconfigureLink};

const ECOS_CRITICAL_BIT: u32 = 0x1;
/// Internal convergence layers the daemon manages itself; `link_report`
/// entries naming them are never force-closed even when unconfigured here.
const INTERNAL_CONV_LAYERS: [&str; 2] = ["bibe", "restage"];

struct LinkConfig {
    is_fwdlink: bool,
    rate_bps: u64,
    sources: HashSet<u64>,
    dests: HashSet<u64>,
}

pub struct NodeAgent {
    server_eid: String,
    local_admin_node: Option<u64>,
    outbound: OutboundSender,

    catalogue: BundleCatalogue,
    custody_bundles: HashMap<u64, u64>,
    undelivered_bundles: HashSet<u64>,
    critical_bundles: HashSet<String>,
    delivered_bundle_id_list: HashSet<u64>,
    bundles_by_dest: HashMap<u64, HashSet<u64>>,

    router: Router,
    configured_links: HashMap<String, LinkConfig>,
    seen_link_report: bool,

    accept_custody: SrcDstWildcardMap,
    fwdlink_xmt_enabled: SrcDstWildcardMap,
    src_priority: HashMap<u64, u16>,
    dst_priority: HashMap<u64, u16>,
    max_expiration_fwd: u64,
    max_expiration_rtn: u64,

    last_hello: Option<(u64, u64)>,
    resync_in_progress: bool,
}

impl NodeAgent {
    pub fn new(server_eid: String, local_admin_node: Option<u64>, outbound: OutboundSender) -> Self {
        NodeAgent {
            server_eid,
            local_admin_node,
            outbound,
            catalogue: BundleCatalogue::new(),
            custody_bundles: HashMap::new(),
            undelivered_bundles: HashSet::new(),
            critical_bundles: HashSet::new(),
            delivered_bundle_id_list: HashSet::new(),
            bundles_by_dest: HashMap::new(),
            router: Router::new(),
            configured_links: HashMap::new(),
            seen_link_report: false,
            accept_custody: SrcDstWildcardMap::new(),
            fwdlink_xmt_enabled: SrcDstWildcardMap::new(),
            src_priority: HashMap::new(),
            dst_priority: HashMap::new(),
            max_expiration_fwd: u64::MAX,
            max_expiration_rtn: u64::MAX,
            last_hello: None,
            resync_in_progress: false,
        }
    }

    fn send_outbound(&self, message: OutboundMessage) {
        let envelope = OutboundEnvelope {
            server_eid: self.server_eid.clone(),
            message,
        };
        if self.outbound.try_send(envelope).is_err() {
            warn!("agent {}: outbound queue full, dropping message", self.server_eid);
        }
    }

    fn bundle_from_info(&self, info: &BundleInfo, received_from_link_id: Option<String>) -> Option<Bundle> {
        let dest_eid = Eid::parse(&info.dest_eid)?;
        let dst_node = dest_eid.node_id()?;
        let src_node = Eid::parse(&info.source_eid)?.node_id()?;
        let cos = ClassOfService::parse(&info.priority).unwrap_or(ClassOfService::Normal);
        let mut bundle = Bundle::new(
            info.bundle_id,
            info.gbof_id.clone(),
            src_node,
            dst_node,
            dest_eid,
            info.length,
            info.expiration,
            cos,
        );
        bundle.flags.custody_requested = info.custody_requested;
        bundle.flags.local_custody = info.local_custody;
        bundle.flags.ecos_critical = info.ecos_flags & ECOS_CRITICAL_BIT != 0;
        bundle.received_from_link_id = received_from_link_id;
        Some(bundle)
    }

    fn forget_bundle(&mut self, b: &Bundle) {
        self.undelivered_bundles.remove(&b.bundle_id);
        self.custody_bundles.retain(|_, id| *id != b.bundle_id);
        if let Some(set) = self.bundles_by_dest.get_mut(&b.dst_node) {
            set.remove(&b.bundle_id);
        }
        if b.flags.ecos_critical {
            self.critical_bundles.remove(&b.gbof_id);
        }
    }

    fn push_node_priorities(&self, addr: &Addr<Link>) {
        for (&node, &pri) in &self.src_priority {
            addr.do_send(SetSrcPriority(node, pri));
        }
        for (&node, &pri) in &self.dst_priority {
            addr.do_send(SetDstPriority(node, pri));
        }
    }

    fn ensure_link(&mut self, link_id: &str, ctx: &mut Context<Self>) -> Option<Addr<Link>> {
        if let Some(addr) = self.router.addr(link_id) {
            return Some(addr);
        }
        let cfg = self.configured_links.get(link_id)?;
        let addr = Link::new(
            link_id.to_owned(),
            self.server_eid.clone(),
            cfg.is_fwdlink,
            cfg.rate_bps,
            self.outbound.clone(),
            ctx.address().recipient(),
            ctx.address().recipient(),
        )
        .start();
        self.push_node_priorities(&addr);
        self.router.register_link(link_id.to_owned(), addr.clone(), cfg.is_fwdlink);
        Some(addr)
    }

    fn apply_link_report(&mut self, links: Vec<LinkReportEntry>, ctx: &mut Context<Self>) {
        for entry in links {
            let configured = self.configured_links.contains_key(&entry.link_id);
            if !configured {
                if !INTERNAL_CONV_LAYERS.contains(&entry.conv_layer.as_str()) {
                    warn!("force-closing unconfigured link {}", entry.link_id);
                    self.send_outbound(OutboundMessage::LinkCloseReq {
                        link_id: entry.link_id.clone(),
                    });
                }
                continue;
            }
            let Some(addr) = self.ensure_link(&entry.link_id, ctx) else {
                continue;
            };
            self.apply_link_state(&entry.link_id, &addr, &entry.link_state, ctx);
        }
    }

    fn apply_link_state(&mut self, link_id: &str, addr: &Addr<Link>, state: &str, _ctx: &mut Context<Self>) {
        match state {
            "available" => addr.do_send(LinkBecameAvailable),
            "open" => self.open_link(link_id, addr),
            "unavailable" => {
                addr.do_send(LinkBecameUnavailable);
                addr.do_send(SetFwdlinkAos(false));
            }
            "closed" => {
                addr.do_send(LinkClosedEvent);
                addr.do_send(SetFwdlinkAos(false));
                self.router.link_closed(link_id);
            }
            other => debug!("unrecognized link_state {other:?} for {link_id}"),
        }
    }

    /// Marks a link open. The forward link's AOS state is not carried by any
    /// wire message in this protocol (see DESIGN.md); we treat "reported
    /// open" as AOS-present, matching the original's behavior absent an
    /// explicit out-of-band signal.
    fn open_link(&mut self, link_id: &str, addr: &Addr<Link>) {
        let Some(cfg) = self.configured_links.get(link_id) else {
            return;
        };
        addr.do_send(LinkOpened {
            remote_eid: String::new(),
            remote_addr: String::new(),
            sources: cfg.sources.clone(),
            dests: cfg.dests.clone(),
        });
        if cfg.is_fwdlink {
            addr.do_send(SetFwdlinkEnabled(true));
            addr.do_send(SetFwdlinkAos(true));
        }
        self.router
            .link_opened(link_id, cfg.sources.clone(), cfg.dests.clone(), &self.fwdlink_xmt_enabled);
    }

    /// `MAX_EXPIRATION_FWD`/`MAX_EXPIRATION_RTN` cap bundle TTL by direction:
    /// locally-originated bundles heading out are "forward", everything else
    /// is "return". Not explicit in the wire protocol; see DESIGN.md.
    fn exceeds_expiration_cap(&self, bundle: &Bundle) -> bool {
        if Some(bundle.src_node) == self.local_admin_node {
            bundle.expiration > self.max_expiration_fwd
        } else {
            bundle.expiration > self.max_expiration_rtn
        }
    }

    fn handle_bundle_received(&mut self, link_id: String, infos: Vec<BundleInfo>) {
        for info in infos {
            let Some(bundle) = self.bundle_from_info(&info, Some(link_id.clone())) else {
                warn!("dropping bundle {} with unroutable eid scheme", info.bundle_id);
                continue;
            };
            let bundle_id = bundle.bundle_id;

            if self.delivered_bundle_id_list.remove(&bundle_id) {
                debug!("bundle {bundle_id} received after it was already reported delivered");
                continue;
            }

            if bundle.flags.ecos_critical && !self.critical_bundles.insert(bundle.gbof_id.clone()) {
                self.send_outbound(OutboundMessage::DeleteBundleReq {
                    bundle_ids: vec![bundle_id],
                });
                continue;
            }

            if !self.router.accept_bundle(
                bundle.src_node,
                bundle.dst_node,
                &link_id,
                self.local_admin_node,
            ) {
                self.send_outbound(OutboundMessage::DeleteBundleReq {
                    bundle_ids: vec![bundle_id],
                });
                continue;
            }

            if self.exceeds_expiration_cap(&bundle) {
                warn!(
                    "bundle {bundle_id} expiration {} exceeds configured cap, rejecting",
                    bundle.expiration
                );
                self.send_outbound(OutboundMessage::DeleteBundleReq {
                    bundle_ids: vec![bundle_id],
                });
                continue;
            }

            if !self.catalogue.bundle_received(bundle.clone()) {
                continue;
            }
            self.bundles_by_dest
                .entry(bundle.dst_node)
                .or_default()
                .insert(bundle_id);

            if self.local_admin_node == Some(bundle.dst_node) {
                // Local delivery is the daemon's job (out of scope here); just
                // track it until the matching bundle_delivered arrives.
                self.undelivered_bundles.insert(bundle_id);
                continue;
            }

            if bundle.flags.custody_requested
                && !bundle.flags.local_custody
                && self.accept_custody.check(bundle.src_node, bundle.dst_node)
            {
                self.send_outbound(OutboundMessage::TakeCustodyReq { bundle_id });
            } else {
                self.router
                    .route_bundle(bundle, Some(&link_id), &self.fwdlink_xmt_enabled);
            }
        }
    }

    fn handle_custody_accepted(&mut self, bundle_id: u64, custody_id: u64) {
        self.custody_bundles.insert(custody_id, bundle_id);
        if let Some(b) = self.catalogue.bundle_custody_accepted(bundle_id).cloned() {
            self.router.route_bundle(b, None, &self.fwdlink_xmt_enabled);
        }
    }

    fn handle_custody_signal(&mut self, bundle_id: u64, success: bool, reason: String) {
        if success || reason == "REDUNDANT_RECEPTION" {
            if let Some(b) = self.catalogue.bundle_custody_released(bundle_id).cloned() {
                self.catalogue.erase(bundle_id);
                self.forget_bundle(&b);
            }
        }
    }

    fn handle_bundle_transmitted(&mut self, link_id: String, bundle_id: u64, bytes_sent: u64) {
        if bytes_sent == 0 {
            self.catalogue.bundle_transmitted(bundle_id, false);
            if let Some(b) = self.catalogue.get(bundle_id).cloned() {
                self.router
                    .route_bundle(b, Some(&link_id), &self.fwdlink_xmt_enabled);
            }
            return;
        }
        let local_custody = self
            .catalogue
            .get(bundle_id)
            .map(|b| b.flags.local_custody)
            .unwrap_or(false);
        self.catalogue.bundle_transmitted(bundle_id, true);
        if !local_custody {
            if let Some(b) = self.catalogue.erase(bundle_id) {
                self.forget_bundle(&b);
            }
        }
    }

    fn reroute_by_id(&mut self, bundle_id: u64, reason: &str) {
        if let Some(b) = self.catalogue.get(bundle_id).cloned() {
            debug!("re-routing bundle {bundle_id} ({reason})");
            self.router.route_bundle(b, None, &self.fwdlink_xmt_enabled);
        }
    }

    fn handle_bundle_expired(&mut self, bundle_id: u64) {
        if let Some(b) = self.catalogue.bundle_expired(bundle_id) {
            self.forget_bundle(&b);
        }
    }

    fn handle_bundle_delivered(&mut self, bundle_id: u64) {
        if let Some(b) = self.catalogue.bundle_delivered(bundle_id) {
            self.forget_bundle(&b);
        } else {
            self.delivered_bundle_id_list.insert(bundle_id);
        }
    }

    fn handle_hello(&mut self, bundles_received: u64, bundles_pending: u64) {
        let current = (bundles_received, bundles_pending);
        let stable = self.last_hello == Some(current);
        self.last_hello = Some(current);
        if stable && !self.resync_in_progress && bundles_pending != self.catalogue.len() as u64 {
            info!(
                "resync triggered: daemon pending={bundles_pending}, local pending={}",
                self.catalogue.len()
            );
            self.resync_in_progress = true;
            self.catalogue.prepare_for_resync();
            self.send_outbound(OutboundMessage::BundleQuery);
        }
    }

    fn handle_bundle_report(&mut self, bundles: Vec<BundleInfo>, last_msg: bool) {
        for info in &bundles {
            self.catalogue.mark_in_report(info.bundle_id);
        }
        if last_msg {
            let removed = self
                .catalogue
                .finalize_resync(&mut self.undelivered_bundles, &mut self.custody_bundles);
            if removed > 0 {
                info!("resync removed {removed} stale bundles");
            }
            self.resync_in_progress = false;
        }
    }
}

impl Actor for NodeAgent {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("node agent for {} starting", self.server_eid);
    }
}

impl Handler<Deliver> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        if !self.seen_link_report {
            if let InboundMessage::LinkReport { links } = msg.0 {
                self.seen_link_report = true;
                self.apply_link_report(links, ctx);
                self.send_outbound(OutboundMessage::LinkQuery);
                self.send_outbound(OutboundMessage::BundleQuery);
            } else {
                debug!("discarding inbound message before initial link_report");
            }
            return;
        }

        match msg.0 {
            InboundMessage::Hello {
                bundles_received,
                bundles_pending,
            } => self.handle_hello(bundles_received, bundles_pending),
            InboundMessage::Alert { text } => warn!("alert from daemon: {text}"),
            InboundMessage::LinkReport { links } => self.apply_link_report(links, ctx),
            InboundMessage::LinkAvailable { link_id } => {
                if let Some(addr) = self.router.addr(&link_id) {
                    addr.do_send(LinkBecameAvailable);
                }
            }
            InboundMessage::LinkOpened { link } => {
                if let Some(addr) = self.ensure_link(&link.link_id, ctx) {
                    self.open_link(&link.link_id, &addr);
                }
            }
            InboundMessage::LinkClosed { link_id } => {
                if let Some(addr) = self.router.addr(&link_id) {
                    addr.do_send(LinkClosedEvent);
                }
                self.router.link_closed(&link_id);
            }
            InboundMessage::LinkUnavailable { link_id } => {
                if let Some(addr) = self.router.addr(&link_id) {
                    addr.do_send(LinkBecameUnavailable);
                }
            }
            InboundMessage::BundleReport { bundles, last_msg } => {
                self.handle_bundle_report(bundles, last_msg)
            }
            InboundMessage::BundleReceived { link_id, bundles } => {
                self.handle_bundle_received(link_id, bundles)
            }
            InboundMessage::BundleTransmitted {
                link_id,
                bundle_id,
                bytes_sent,
            } => self.handle_bundle_transmitted(link_id, bundle_id, bytes_sent),
            InboundMessage::BundleDelivered { bundle_id } => self.handle_bundle_delivered(bundle_id),
            InboundMessage::BundleExpired { bundle_id } => self.handle_bundle_expired(bundle_id),
            InboundMessage::BundleCancelled { bundle_id } => self.reroute_by_id(bundle_id, "cancelled"),
            InboundMessage::CustodyTimeout { bundle_id } => {
                self.reroute_by_id(bundle_id, "custody timeout")
            }
            InboundMessage::CustodyAccepted {
                bundle_id,
                custody_id,
            } => self.handle_custody_accepted(bundle_id, custody_id),
            InboundMessage::CustodySignal {
                bundle_id,
                success,
                reason,
            } => self.handle_custody_signal(bundle_id, success, reason),
        }
    }
}

impl Handler<ReturnBundles> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: ReturnBundles, _ctx: &mut Self::Context) {
        self.router.reabsorb(msg.queues);
    }
}

impl Handler<ProbeMissedBundles> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: ProbeMissedBundles, _ctx: &mut Self::Context) {
        debug!("probing for missed bundles on idle link {}", msg.link_id);
        self.send_outbound(OutboundMessage::BundleQuery);
    }
}

impl Handler<ConfigureLink> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: ConfigureLink, _ctx: &mut Self::Context) {
        self.configured_links.insert(
            msg.link_id.clone(),
            LinkConfig {
                is_fwdlink: msg.is_fwdlink,
                rate_bps: msg.rate_bps,
                sources: msg.sources,
                dests: msg.dests,
            },
        );
        if let Some(addr) = self.router.addr(&msg.link_id) {
            addr.do_send(SetRateBps(msg.rate_bps));
            if msg.is_fwdlink {
                addr.do_send(SetFwdlinkEnabled(true));
            }
        }
    }
}

impl Handler<UnconfigureLink> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: UnconfigureLink, _ctx: &mut Self::Context) {
        self.configured_links.remove(&msg.link_id);
        if let Some(addr) = self.router.addr(&msg.link_id) {
            addr.do_send(SetFwdlinkEnabled(false));
        }
    }
}

impl Handler<PolicyUpdate> for NodeAgent {
    type Result = ();

    fn handle(&mut self, msg: PolicyUpdate, _ctx: &mut Self::Context) {
        match msg {
            PolicyUpdate::AcceptCustody(map) => self.accept_custody = map,
            PolicyUpdate::FwdlinkXmtEnabled(map) => {
                self.fwdlink_xmt_enabled = map.clone();
                self.router.set_xmt_enabled(map);
            }
            PolicyUpdate::SourcePriority { node, priority } => {
                self.src_priority.insert(node, priority);
                for link_id in self.configured_links.keys().cloned().collect::<Vec<_>>() {
                    if let Some(addr) = self.router.addr(&link_id) {
                        addr.do_send(SetSrcPriority(node, priority));
                    }
                }
            }
            PolicyUpdate::DestPriority { node, priority } => {
                self.dst_priority.insert(node, priority);
                for link_id in self.configured_links.keys().cloned().collect::<Vec<_>>() {
                    if let Some(addr) = self.router.addr(&link_id) {
                        addr.do_send(SetDstPriority(node, priority));
                    }
                }
            }
            PolicyUpdate::MaxExpirationFwd(secs) => self.max_expiration_fwd = secs,
            PolicyUpdate::MaxExpirationRtn(secs) => self.max_expiration_rtn = secs,
        }
    }
}

impl Handler<TransportReset> for NodeAgent {
    type Result = ();

    fn handle(&mut self, _msg: TransportReset, ctx: &mut Self::Context) {
        warn!("transport reset: tearing down node agent {}", self.server_eid);
        ctx.stop();
    }
}
