use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{ErrorType, Errors};

/// Sent by the router immediately after connecting.
pub const CLIENT_MAGIC: [u8; 4] = *b"XCLT";
/// Sent by the daemon in response, before any framed message.
pub const SERVER_MAGIC: [u8; 4] = *b"XRTR";

/// Router side of the handshake: send our magic, then check the daemon's.
pub async fn client_handshake<S>(stream: &mut S) -> Result<(), ErrorType>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&CLIENT_MAGIC).await?;
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    if buf != SERVER_MAGIC {
        return Err(Errors::InvalidMagic(buf).into());
    }
    Ok(())
}

/// Daemon side of the handshake, used by test fixtures that stand in for the daemon.
pub async fn server_handshake<S>(stream: &mut S) -> Result<(), ErrorType>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    if buf != CLIENT_MAGIC {
        return Err(Errors::InvalidMagic(buf).into());
    }
    stream.write_all(&SERVER_MAGIC).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_succeeds_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let (client_res, server_res) =
            tokio::join!(client_handshake(&mut client), server_handshake(&mut server));
        client_res.unwrap();
        server_res.unwrap();
    }

    #[tokio::test]
    async fn client_rejects_wrong_server_magic() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let server_task = async move {
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(b"NOPE").await.unwrap();
        };
        let (client_res, ()) = tokio::join!(client_handshake(&mut client), server_task);
        assert!(matches!(
            client_res,
            Err(ErrorType::ChanError(Errors::InvalidMagic(_)))
        ));
    }
}
