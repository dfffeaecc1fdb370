pub mod codec;
pub mod errors;
pub mod magic;
pub mod message;

pub use codec::FrameCodec;
pub use errors::ErrorType;
pub use message::{InboundMessage, MsgType, OutboundMessage, RawEnvelope};
