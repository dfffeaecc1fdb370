use actix::prelude::*;

use ctrlchan::InboundMessage;

/// One decoded inbound frame for this node, dispatched by the Supervisor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub InboundMessage);

/// Transport connectivity was torn down: all per-node state is stale (spec
/// §4.8) and must be rebuilt from a fresh handshake once reconnected.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TransportReset;

/// Tells the agent a link is now configured (from a `FORWARD_LINK` or
/// `LINK_ENABLE` directive) and should be created once reported by the
/// daemon, or updated if already running.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct ConfigureLink {
    pub link_id: String,
    pub is_fwdlink: bool,
    pub rate_bps: u64,
    pub sources: std::collections::HashSet<u64>,
    pub dests: std::collections::HashSet<u64>,
}

/// Removes a link's configuration (`LINK_DISABLE`); the next `link_report`
/// naming it will force-close it.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct UnconfigureLink {
    pub link_id: String,
}

/// A policy change pushed down from the Supervisor (spec §9 Global mutable
/// policy tables: owned there, pushed to every agent by message).
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub enum PolicyUpdate {
    AcceptCustody(crate::wildmap::SrcDstWildcardMap),
    FwdlinkXmtEnabled(crate::wildmap::SrcDstWildcardMap),
    SourcePriority { node: u64, priority: u16 },
    DestPriority { node: u64, priority: u16 },
    MaxExpirationFwd(u64),
    MaxExpirationRtn(u64),
}
