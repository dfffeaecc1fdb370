use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{ErrorType, Errors};
use crate::message::RawEnvelope;

/// Length limit from the wire format: a length prefix outside `[0, 10MB]` closes the connection.
pub const MAX_FRAME_LEN: u32 = 10_000_000;

/// `u32be length || CBOR(RawEnvelope)` framing for the control channel.
#[derive(Debug, Default)]
pub struct FrameCodec {
    frame_len: Option<u32>,
}

impl Decoder for FrameCodec {
    type Item = RawEnvelope;
    type Error = ErrorType;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match self.frame_len {
            Some(len) => len,
            None => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes(src[..4].try_into().unwrap());
                if len > MAX_FRAME_LEN {
                    return Err(Errors::FrameTooLarge(len).into());
                }
                src.advance(4);
                self.frame_len = Some(len);
                len
            }
        };

        if (src.len() as u32) < frame_len {
            src.reserve((frame_len as usize).saturating_sub(src.len()));
            return Ok(None);
        }

        let payload = src.split_to(frame_len as usize);
        self.frame_len = None;
        let envelope: RawEnvelope = serde_cbor::from_slice(&payload)?;
        Ok(Some(envelope))
    }
}

impl Encoder<RawEnvelope> for FrameCodec {
    type Error = ErrorType;

    fn encode(&mut self, item: RawEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_cbor::to_vec(&item)?;
        let len = u32::try_from(payload.len()).map_err(|_| Errors::FrameTooLarge(u32::MAX))?;
        if len > MAX_FRAME_LEN {
            return Err(Errors::FrameTooLarge(len).into());
        }
        dst.reserve(4 + payload.len());
        dst.put_u32(len);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgType;

    #[test]
    fn roundtrips_a_frame() {
        let mut codec = FrameCodec::default();
        let envelope = RawEnvelope::new(MsgType::LinkQuery, "ipn:100.0", serde_cbor::Value::Null);
        let mut buf = BytesMut::new();
        codec.encode(envelope, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.server_eid, "ipn:100.0");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn waits_for_full_frame_across_partial_reads() {
        let mut codec = FrameCodec::default();
        let envelope = RawEnvelope::new(MsgType::BundleQuery, "ipn:100.0", serde_cbor::Value::Null);
        let mut full = BytesMut::new();
        codec.encode(envelope, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_LEN + 1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ErrorType::ChanError(Errors::FrameTooLarge(_)))
        ));
    }
}
