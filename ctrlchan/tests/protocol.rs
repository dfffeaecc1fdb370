//! End-to-end coverage for the wire protocol (spec §6.1): magic handshake
//! followed by length-prefixed CBOR frames, driven over a real async
//! duplex pipe rather than hand-fed byte buffers.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::{Decoder, Encoder, Framed};

use ctrlchan::codec::{FrameCodec, MAX_FRAME_LEN};
use ctrlchan::errors::{ErrorType, Errors};
use ctrlchan::message::{BundleInfo, LinkReportEntry, MsgType, RawEnvelope, ReconfigureEntry};
use ctrlchan::{magic, InboundMessage, OutboundMessage};

fn sample_link_report_entry(link_id: &str) -> LinkReportEntry {
    LinkReportEntry {
        link_id: link_id.to_owned(),
        remote_eid: "ipn:20.0".to_owned(),
        conv_layer: "tcpcl".to_owned(),
        next_hop: "ipn:20.0".to_owned(),
        remote_addr: "10.0.0.1".to_owned(),
        remote_port: 4556,
        link_state: "open".to_owned(),
    }
}

fn sample_bundle_info(bundle_id: u64) -> BundleInfo {
    BundleInfo {
        bundle_id,
        source_eid: "ipn:10.0".to_owned(),
        dest_eid: "ipn:20.0".to_owned(),
        length: 128,
        priority: "expedited".to_owned(),
        expiration: 3600,
        custody_requested: true,
        local_custody: false,
        expired_in_transit: false,
        received_from_link: "fwd0".to_owned(),
        gbof_id: "ipn:10.0-1-0".to_owned(),
        ecos_flags: 0,
    }
}

#[tokio::test]
async fn handshake_then_framed_round_trip_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    let (client_res, server_res) =
        tokio::join!(magic::client_handshake(&mut client), magic::server_handshake(&mut server));
    client_res.unwrap();
    server_res.unwrap();

    let mut client = Framed::new(client, FrameCodec::default());
    let mut server = Framed::new(server, FrameCodec::default());

    let links = serde_cbor::value::to_value(vec![sample_link_report_entry("fwd0")]).unwrap();
    let body = serde_cbor::Value::Map([(serde_cbor::Value::Text("links".into()), links)].into_iter().collect());
    let report = RawEnvelope::new(MsgType::LinkReport, "ipn:1.0", body);
    server.send(report).await.unwrap();

    let received = client.next().await.unwrap().unwrap();
    assert_eq!(received.server_eid, "ipn:1.0");
    let decoded = InboundMessage::from_envelope(&received).unwrap().unwrap();
    match decoded {
        InboundMessage::LinkReport { links } => {
            assert_eq!(links.len(), 1);
            assert_eq!(links[0].link_id, "fwd0");
            assert_eq!(links[0].link_state, "open");
        }
        other => panic!("expected LinkReport, got {other:?}"),
    }

    let req = OutboundMessage::TransmitBundleReq {
        bundle_id: 7,
        link_id: "fwd0".to_owned(),
    }
    .into_envelope("ipn:1.0");
    client.send(req).await.unwrap();

    let received = server.next().await.unwrap().unwrap();
    assert_eq!(received.msg_type, u64::from(MsgType::TransmitBundleReq));
    assert_eq!(received.server_eid, "ipn:1.0");
}

#[tokio::test]
async fn bundle_received_round_trips_with_real_bundle_fields() {
    let (client, server) = tokio::io::duplex(4096);
    let mut client = Framed::new(client, FrameCodec::default());
    let mut server = Framed::new(server, FrameCodec::default());

    let body = serde_cbor::Value::Map(
        [
            (serde_cbor::Value::Text("link_id".into()), serde_cbor::Value::Text("fwd0".into())),
            (
                serde_cbor::Value::Text("bundles".into()),
                serde_cbor::value::to_value(vec![sample_bundle_info(42)]).unwrap(),
            ),
        ]
        .into_iter()
        .collect(),
    );
    let envelope = RawEnvelope::new(MsgType::BundleReceived, "ipn:1.0", body);
    server.send(envelope).await.unwrap();

    let received = client.next().await.unwrap().unwrap();
    let decoded = InboundMessage::from_envelope(&received).unwrap().unwrap();
    match decoded {
        InboundMessage::BundleReceived { link_id, bundles } => {
            assert_eq!(link_id, "fwd0");
            assert_eq!(bundles.len(), 1);
            assert_eq!(bundles[0].bundle_id, 42);
            assert!(bundles[0].custody_requested);
        }
        other => panic!("expected BundleReceived, got {other:?}"),
    }
}

#[tokio::test]
async fn link_reconfigure_req_carries_rate_and_aos_entries() {
    let (client, server) = tokio::io::duplex(4096);
    let mut client = Framed::new(client, FrameCodec::default());
    let mut server = Framed::new(server, FrameCodec::default());

    let envelope = OutboundMessage::LinkReconfigureReq {
        link_id: "fwd0".to_owned(),
        entries: vec![ReconfigureEntry::rate_bps(5000), ReconfigureEntry::comm_aos(true)],
    }
    .into_envelope("ipn:1.0");
    client.send(envelope).await.unwrap();

    let received = server.next().await.unwrap().unwrap();
    assert_eq!(received.msg_type, u64::from(MsgType::LinkReconfigureReq));
    let bytes = serde_cbor::to_vec(&received).unwrap();
    let roundtripped: RawEnvelope = serde_cbor::from_slice(&bytes).unwrap();
    assert_eq!(roundtripped.server_eid, "ipn:1.0");
}

#[tokio::test]
async fn client_handshake_rejects_wrong_server_magic_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let server_task = async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        server.write_all(b"NOPE").await.unwrap();
    };
    let (client_res, ()) = tokio::join!(magic::client_handshake(&mut client), server_task);
    assert!(matches!(client_res, Err(ErrorType::ChanError(Errors::InvalidMagic(_)))));
}

#[tokio::test]
async fn oversized_frame_length_prefix_is_rejected_over_real_stream() {
    use tokio::io::AsyncWriteExt;

    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
    drop(client);

    let mut server = Framed::new(server, FrameCodec::default());
    let result = server.next().await.unwrap();
    assert!(matches!(result, Err(ErrorType::ChanError(Errors::FrameTooLarge(_)))));
}

#[tokio::test]
async fn codec_reassembles_a_frame_split_across_many_small_reads() {
    let mut codec = FrameCodec::default();
    let envelope = RawEnvelope::new(MsgType::BundleQuery, "ipn:100.0", serde_cbor::Value::Null);
    let mut full = BytesMut::new();
    codec.encode(envelope, &mut full).unwrap();

    let mut partial = BytesMut::new();
    let mut decoded = None;
    for byte in full.iter() {
        partial.extend_from_slice(&[*byte]);
        if let Some(env) = codec.decode(&mut partial).unwrap() {
            decoded = Some(env);
            break;
        }
    }
    let decoded = decoded.expect("frame should complete once all bytes arrive");
    assert_eq!(decoded.server_eid, "ipn:100.0");
    assert_eq!(decoded.msg_type, u64::from(MsgType::BundleQuery));
}
