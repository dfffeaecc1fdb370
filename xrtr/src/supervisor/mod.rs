//! Supervisor (spec §4.9 / C10): top-level multiplexer. Owns the Transport
//! and a `server_eid -> DtnNodeAgent` map, dispatches inbound frames by
//! `server_eid`, and holds the global mutable policy tables (spec §9) that
//! get pushed down to every agent via message rather than a shared pointer.

use std::collections::HashMap;

use actix::prelude::*;
use log::{info, warn};

use ctrlchan::InboundMessage;

use crate::common::shutdown::Shutdown;
use crate::config::{self, Directive};
use crate::nodeagent::messages::{ConfigureLink, Deliver, PolicyUpdate, TransportReset, UnconfigureLink};
use crate::nodeagent::NodeAgent;
use crate::outbound::OutboundSender;
use crate::wildmap::SrcDstWildcardMap;

/// One frame off the wire, tagged with the EID it was addressed to.
#[derive(Message)]
#[rtype(result = "()")]
pub struct InboundFrame {
    pub server_eid: String,
    pub message: InboundMessage,
}

/// Reloads routing policy from a freshly (re)read config file.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReloadConfig(pub Vec<Directive>);

pub struct Supervisor {
    outbound: OutboundSender,
    local_admin_node: Option<u64>,
    agents: HashMap<String, Addr<NodeAgent>>,

    accept_custody: SrcDstWildcardMap,
    fwdlink_xmt_enabled: SrcDstWildcardMap,
    forward_links: HashMap<String, (u64, std::collections::HashSet<u64>)>,
    link_enables: HashMap<String, (std::collections::HashSet<u64>, std::collections::HashSet<u64>)>,
}

impl Supervisor {
    pub fn new(outbound: OutboundSender, local_admin_node: Option<u64>) -> Self {
        Supervisor {
            outbound,
            local_admin_node,
            agents: HashMap::new(),
            accept_custody: SrcDstWildcardMap::new(),
            fwdlink_xmt_enabled: SrcDstWildcardMap::new(),
            forward_links: HashMap::new(),
            link_enables: HashMap::new(),
        }
    }

    fn agent_for(&mut self, server_eid: &str) -> Addr<NodeAgent> {
        if let Some(addr) = self.agents.get(server_eid) {
            return addr.clone();
        }
        info!("discovered new daemon eid {server_eid}, starting node agent");
        let addr = NodeAgent::new(server_eid.to_owned(), self.local_admin_node, self.outbound.clone()).start();
        self.push_configured_links(&addr);
        self.push_policy(&addr);
        self.agents.insert(server_eid.to_owned(), addr.clone());
        addr
    }

    fn push_configured_links(&self, addr: &Addr<NodeAgent>) {
        for (link_id, (rate_bps, nodes)) in &self.forward_links {
            addr.do_send(ConfigureLink {
                link_id: link_id.clone(),
                is_fwdlink: true,
                rate_bps: *rate_bps,
                sources: nodes.clone(),
                dests: nodes.clone(),
            });
        }
        for (link_id, (sources, dests)) in &self.link_enables {
            if self.forward_links.contains_key(link_id) {
                continue;
            }
            addr.do_send(ConfigureLink {
                link_id: link_id.clone(),
                is_fwdlink: false,
                rate_bps: 0,
                sources: sources.clone(),
                dests: dests.clone(),
            });
        }
    }

    fn push_policy(&self, addr: &Addr<NodeAgent>) {
        addr.do_send(PolicyUpdate::AcceptCustody(self.accept_custody.clone()));
        addr.do_send(PolicyUpdate::FwdlinkXmtEnabled(self.fwdlink_xmt_enabled.clone()));
    }

    fn apply_directive(&mut self, directive: Directive) {
        match directive {
            Directive::RemoteAddress(_) | Directive::RemotePort(_) => {
                // Transport connection settings are read once at startup from
                // Settings; directives naming them mid-run are a config error
                // elsewhere in the daemon's own docs, so we just log and skip.
                warn!("REMOTE_ADDRESS/REMOTE_PORT can only be set at startup, ignoring");
            }
            Directive::ForwardLink {
                link_id,
                throttle_bps,
                nodes,
            } => {
                self.forward_links.insert(link_id.clone(), (throttle_bps, nodes.clone()));
                self.broadcast(ConfigureLink {
                    link_id,
                    is_fwdlink: true,
                    rate_bps: throttle_bps,
                    sources: nodes.clone(),
                    dests: nodes,
                });
            }
            Directive::LinkEnable {
                link_id,
                establish_conn: _,
                sources,
                dests,
            } => {
                self.link_enables.insert(link_id.clone(), (sources.clone(), dests.clone()));
                self.broadcast(ConfigureLink {
                    link_id,
                    is_fwdlink: false,
                    rate_bps: 0,
                    sources,
                    dests,
                });
            }
            Directive::LinkDisable { link_id } => {
                self.forward_links.remove(&link_id);
                self.link_enables.remove(&link_id);
                self.broadcast(UnconfigureLink { link_id });
            }
            Directive::FwdlinkTransmitEnable { src, dst } => {
                config::apply_wildcard_directive(&mut self.fwdlink_xmt_enabled, &src, &dst, true);
                self.broadcast(PolicyUpdate::FwdlinkXmtEnabled(self.fwdlink_xmt_enabled.clone()));
            }
            Directive::FwdlinkTransmitDisable { src, dst } => {
                config::apply_wildcard_directive(&mut self.fwdlink_xmt_enabled, &src, &dst, false);
                self.broadcast(PolicyUpdate::FwdlinkXmtEnabled(self.fwdlink_xmt_enabled.clone()));
            }
            Directive::MaxExpirationFwd(secs) => self.broadcast(PolicyUpdate::MaxExpirationFwd(secs)),
            Directive::MaxExpirationRtn(secs) => self.broadcast(PolicyUpdate::MaxExpirationRtn(secs)),
            Directive::SourcePriority { priority, nodes } => {
                for node in nodes {
                    self.broadcast(PolicyUpdate::SourcePriority { node, priority });
                }
            }
            Directive::DestPriority { priority, nodes } => {
                for node in nodes {
                    self.broadcast(PolicyUpdate::DestPriority { node, priority });
                }
            }
            Directive::AcceptCustody { accept, src, dst } => {
                config::apply_accept_custody_directive(&mut self.accept_custody, &src, &dst, accept);
                self.broadcast(PolicyUpdate::AcceptCustody(self.accept_custody.clone()));
            }
            Directive::AcceptCustodyClear => {
                self.accept_custody = SrcDstWildcardMap::new();
                self.broadcast(PolicyUpdate::AcceptCustody(self.accept_custody.clone()));
            }
        }
    }

    fn broadcast<M>(&self, msg: M)
    where
        M: Message + Clone + Send + 'static,
        M::Result: Send,
        NodeAgent: Handler<M>,
    {
        for addr in self.agents.values() {
            addr.do_send(msg.clone());
        }
    }
}

impl Actor for Supervisor {
    type Context = Context<Self>;
}

impl Handler<InboundFrame> for Supervisor {
    type Result = ();

    fn handle(&mut self, msg: InboundFrame, _ctx: &mut Self::Context) {
        if let InboundMessage::Alert { text } = &msg.message {
            match text.as_str() {
                "shuttingDown" => {
                    if let Some(addr) = self.agents.remove(&msg.server_eid) {
                        info!("daemon {} reported shuttingDown, tearing down agent", msg.server_eid);
                        addr.do_send(TransportReset);
                    }
                    return;
                }
                "justBooted" => {
                    if let Some(addr) = self.agents.remove(&msg.server_eid) {
                        warn!("daemon {} reported justBooted, all state stale, recreating agent", msg.server_eid);
                        addr.do_send(TransportReset);
                    }
                    self.agent_for(&msg.server_eid);
                    return;
                }
                _ => {}
            }
        }
        let addr = self.agent_for(&msg.server_eid);
        addr.do_send(Deliver(msg.message));
    }
}

impl Handler<ReloadConfig> for Supervisor {
    type Result = ();

    fn handle(&mut self, msg: ReloadConfig, _ctx: &mut Self::Context) {
        for directive in msg.0 {
            self.apply_directive(directive);
        }
    }
}

/// Transport break: every agent's state is stale without a fresh handshake
/// (spec §4.8); tear them all down and wait for new `link_report`s.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TransportBroke;

impl Handler<TransportBroke> for Supervisor {
    type Result = ();

    fn handle(&mut self, _msg: TransportBroke, _ctx: &mut Self::Context) {
        warn!("transport connection lost, tearing down all node agents");
        for (_, addr) in self.agents.drain() {
            addr.do_send(TransportReset);
        }
    }
}

impl Handler<Shutdown> for Supervisor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        for addr in self.agents.values() {
            addr.do_send(TransportReset);
        }
        ctx.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::config::{Directive, WildNode, WildNodeList};

    fn new_supervisor() -> (Supervisor, tokio::sync::mpsc::Receiver<crate::outbound::OutboundEnvelope>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (Supervisor::new(tx, Some(10)), rx)
    }

    #[test]
    fn forward_link_directive_populates_table() {
        let (mut sup, _rx) = new_supervisor();
        let nodes: HashSet<u64> = [20, 21].into_iter().collect();
        sup.apply_directive(Directive::ForwardLink {
            link_id: "fwd0".into(),
            throttle_bps: 5000,
            nodes: nodes.clone(),
        });
        let (rate, stored) = sup.forward_links.get("fwd0").expect("link recorded");
        assert_eq!(*rate, 5000);
        assert_eq!(stored, &nodes);
    }

    #[test]
    fn link_disable_clears_both_tables() {
        let (mut sup, _rx) = new_supervisor();
        sup.apply_directive(Directive::ForwardLink {
            link_id: "fwd0".into(),
            throttle_bps: 5000,
            nodes: [20].into_iter().collect(),
        });
        sup.apply_directive(Directive::LinkDisable { link_id: "fwd0".into() });
        assert!(!sup.forward_links.contains_key("fwd0"));
    }

    #[test]
    fn accept_custody_directive_updates_wildcard_map() {
        let (mut sup, _rx) = new_supervisor();
        sup.apply_directive(Directive::AcceptCustody {
            accept: true,
            src: WildNode::Wild,
            dst: WildNode::Node(20),
        });
        assert!(sup.accept_custody.check(999, 20));
        assert!(!sup.accept_custody.check(999, 21));

        sup.apply_directive(Directive::AcceptCustodyClear);
        assert!(!sup.accept_custody.check(999, 20));
    }

    #[test]
    fn fwdlink_transmit_enable_wildcard_directive() {
        let (mut sup, _rx) = new_supervisor();
        sup.apply_directive(Directive::FwdlinkTransmitEnable {
            src: WildNodeList::Wild,
            dst: WildNodeList::Wild,
        });
        assert!(sup.fwdlink_xmt_enabled.check(1, 2));
    }

    #[test]
    fn remote_address_directive_is_ignored() {
        let (mut sup, _rx) = new_supervisor();
        sup.apply_directive(Directive::RemoteAddress("10.0.0.1".into()));
        assert!(sup.forward_links.is_empty());
        assert!(sup.link_enables.is_empty());
    }

    #[actix_rt::test]
    async fn alert_shutting_down_removes_agent() {
        let (mut sup, _rx) = new_supervisor();
        sup.agent_for("ipn:1.0");
        assert!(sup.agents.contains_key("ipn:1.0"));

        let addr = sup.start();
        addr.send(InboundFrame {
            server_eid: "ipn:1.0".into(),
            message: InboundMessage::Alert { text: "shuttingDown".into() },
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        addr.send(crate::common::shutdown::Shutdown {}).await.unwrap();
    }

    #[actix_rt::test]
    async fn alert_just_booted_recreates_agent() {
        let (mut sup, _rx) = new_supervisor();
        sup.agent_for("ipn:1.0");
        let addr = sup.start();

        addr.send(InboundFrame {
            server_eid: "ipn:1.0".into(),
            message: InboundMessage::Alert { text: "justBooted".into() },
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        addr.send(crate::common::shutdown::Shutdown {}).await.unwrap();
    }
}
