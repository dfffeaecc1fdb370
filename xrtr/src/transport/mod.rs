//! Transport (spec §4.8 / C9): persistent length-prefixed TCP client to the
//! daemon. A reader task decodes frames and dispatches by `server_eid`; a
//! separate sender task drains the outbound queue onto the socket. Either
//! side failing tears down the connection and is retried after
//! `Settings::reconnect_interval_secs`.

use std::time::Duration;

use actix::prelude::*;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use ctrlchan::{magic, FrameCodec, InboundMessage};

use crate::common::settings::Settings;
use crate::outbound::OutboundEnvelope;
use crate::supervisor::{InboundFrame, Supervisor, TransportBroke};

/// Runs the connect/reconnect loop forever. Returns only if `cancel` fires.
pub async fn run(
    settings: Settings,
    supervisor: Addr<Supervisor>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<OutboundEnvelope>,
    mut cancel: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            res = connect_and_run(&settings, &supervisor, &mut outbound_rx) => {
                if let Err(e) = res {
                    warn!("transport connection to {}:{} failed: {e:?}", settings.daemon_remote_address, settings.daemon_remote_port);
                }
                supervisor.do_send(TransportBroke);
            }
            _ = cancel.recv() => {
                info!("transport shutting down");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(settings.reconnect_interval_secs)) => {}
            _ = cancel.recv() => return,
        }
    }
}

async fn connect_and_run(
    settings: &Settings,
    supervisor: &Addr<Supervisor>,
    outbound_rx: &mut tokio::sync::mpsc::Receiver<OutboundEnvelope>,
) -> Result<(), ctrlchan::ErrorType> {
    let addr = format!("{}:{}", settings.daemon_remote_address, settings.daemon_remote_port);
    info!("connecting to daemon at {addr}");
    let mut stream = TcpStream::connect(&addr).await?;
    magic::client_handshake(&mut stream).await?;
    info!("handshake with {addr} complete");

    let framed = Framed::new(stream, FrameCodec::default());
    let (mut sink, mut stream) = framed.split();

    let reader = async {
        while let Some(result) = stream.next().await {
            let envelope = result?;
            match InboundMessage::from_envelope(&envelope) {
                Ok(Some(message)) => {
                    supervisor.do_send(InboundFrame {
                        server_eid: envelope.server_eid,
                        message,
                    });
                }
                Ok(None) => {
                    warn!(
                        "ignoring unsupported message type {} version {} from {}",
                        envelope.msg_type, envelope.msg_version, envelope.server_eid
                    );
                }
                Err(e) => error!("failed to decode body for {}: {e:?}", envelope.server_eid),
            }
        }
        Ok::<(), ctrlchan::ErrorType>(())
    };

    let writer = async {
        while let Some(envelope) = outbound_rx.recv().await {
            let raw = envelope.message.into_envelope(envelope.server_eid);
            sink.send(raw).await?;
        }
        Ok::<(), ctrlchan::ErrorType>(())
    };

    tokio::try_join!(reader, writer)?;
    Ok(())
}
