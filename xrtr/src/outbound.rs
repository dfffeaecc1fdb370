//! The shared outbound queue item: every actor that needs to talk to the
//! daemon sends one of these into the Transport-sender's bounded channel
//! (spec §4.8/§5) rather than writing to the socket directly.

use ctrlchan::OutboundMessage;

#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub server_eid: String,
    pub message: OutboundMessage,
}

pub type OutboundSender = tokio::sync::mpsc::Sender<OutboundEnvelope>;
