use actix::prelude::*;

/// Sent to every top-level actor on process shutdown.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown {}
