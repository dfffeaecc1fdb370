use std::collections::HashSet;

use actix::prelude::*;

use crate::bundle::Bundle;
use crate::queue::PriorityQueue;
use crate::wildmap::SrcDstWildcardMap;

#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkBecameAvailable;

#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkOpened {
    pub remote_eid: String,
    pub remote_addr: String,
    pub sources: HashSet<u64>,
    pub dests: HashSet<u64>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkBecameUnavailable;

#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkClosedEvent;

#[derive(Message)]
#[rtype(result = "()")]
pub struct Enqueue(pub Bundle);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetFwdlinkEnabled(pub bool);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetFwdlinkAos(pub bool);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetRateBps(pub u64);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetSrcPriority(pub u64, pub u16);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetDstPriority(pub u64, pub u16);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetXmtEnabled(pub SrcDstWildcardMap);

/// Reported back by a Link to its owning agent when it closes or loses
/// transmit-enable for some pairs, handing back in-flight work.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReturnBundles {
    pub link_id: String,
    pub queues: Vec<(u64, u64, PriorityQueue)>,
}

/// Sent when the Sender has been idle for 30s after recent activity: ask the
/// agent to query the daemon in case bundles were accepted but never routed.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ProbeMissedBundles {
    pub link_id: String,
}
