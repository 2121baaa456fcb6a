//! TCP transport for the authoritative server.
//!
//! Every message is one frame `[kind u8][len u32 LE][payload]`, where kind 0
//! carries a JSON control message and kind 1 a binary position frame.
//! Connection tasks only read frames into the server's inbound queue and
//! write what the tick produced; the tick itself runs on the loop in [`run`].

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::network::protocol::MAX_MESSAGE_BYTES;
use crate::network::server::{AuthoritativeServer, Inbound, Payload};
use crate::network::session::ConnectionId;

pub const KIND_TEXT: u8 = 0;
pub const KIND_BINARY: u8 = 1;

/// Upper bound for frames written by the server (position frames grow with N)
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("frame of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("text frame is not UTF-8")]
    BadText(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = reader.read_u32_le().await? as usize;
    if len > limit {
        return Err(TransportError::TooLarge { size: len, limit });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    match kind {
        KIND_TEXT => Ok(Some(Frame::Text(String::from_utf8(payload)?))),
        KIND_BINARY => Ok(Some(Frame::Binary(payload))),
        other => Err(TransportError::UnknownKind(other)),
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let (kind, payload) = match frame {
        Frame::Text(text) => (KIND_TEXT, text.as_bytes()),
        Frame::Binary(bytes) => (KIND_BINARY, bytes.as_slice()),
    };
    if payload.len() > MAX_FRAME_BYTES {
        return Err(TransportError::TooLarge { size: payload.len(), limit: MAX_FRAME_BYTES });
    }
    writer.write_u8(kind).await?;
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve `server` on `bind` until the process exits. Must run inside a tokio
/// runtime; a current-thread runtime is enough.
pub async fn run(mut server: AuthoritativeServer, bind: &str) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind).await?;
    log::info!("listening on {}", listener.local_addr()?);

    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
    let mut writers: BTreeMap<ConnectionId, mpsc::UnboundedSender<Payload>> = BTreeMap::new();
    let mut next_connection = 1u64;

    let mut ticker = tokio::time::interval(server.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let conn = ConnectionId(next_connection);
                    next_connection += 1;
                    log::info!("{conn} accepted from {addr}");
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    writers.insert(conn, out_tx);
                    spawn_connection(conn, stream, inbound_tx.clone(), out_rx);
                    server.enqueue(Inbound::Connected(conn));
                }
                Err(e) => log::warn!("accept failed: {e}"),
            },
            Some(inbound) = inbound_rx.recv() => {
                if let Inbound::Closed(conn) = &inbound {
                    writers.remove(conn);
                }
                server.enqueue(inbound);
            }
            tick = ticker.tick() => {
                for out in server.tick(tick.into_std()) {
                    let close = out.payload == Payload::Close;
                    let delivered = writers.get(&out.connection).is_some_and(|tx| tx.send(out.payload).is_ok());
                    if close || !delivered {
                        writers.remove(&out.connection);
                    }
                }
            }
        }
    }
}

fn spawn_connection(
    conn: ConnectionId,
    stream: TcpStream,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("{conn}: set_nodelay failed: {e}");
    }
    let (mut reader, mut writer) = stream.into_split();

    tokio::spawn(async move {
        loop {
            let item = match read_frame(&mut reader, MAX_MESSAGE_BYTES).await {
                Ok(Some(Frame::Text(text))) => Inbound::Text(conn, text),
                Ok(Some(Frame::Binary(bytes))) => Inbound::Binary(conn, bytes),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{conn}: {e}");
                    break;
                }
            };
            if inbound.send(item).is_err() {
                return;
            }
        }
        // the server loop outlives its connections; a failed send means shutdown
        let _ = inbound.send(Inbound::Closed(conn));
    });

    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            let frame = match payload {
                Payload::Text(text) => Frame::Text(text),
                Payload::Binary(bytes) => Frame::Binary(bytes),
                Payload::Close => break,
            };
            if let Err(e) = write_frame(&mut writer, &frame).await {
                log::debug!("{conn}: write failed: {e}");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frames = vec![
            Frame::Text(r#"{"type":"leave"}"#.to_string()),
            Frame::Binary(vec![1, 2, 3, 4, 5, 6, 7, 8]),
            Frame::Text(String::new()),
        ];
        for f in &frames {
            write_frame(&mut a, f).await.unwrap();
        }
        drop(a);

        for f in &frames {
            assert_eq!(read_frame(&mut b, 1024).await.unwrap().as_ref(), Some(f));
        }
        assert!(read_frame(&mut b, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn header_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Binary(vec![9; 3])).await.unwrap();
        assert_eq!(buf, vec![KIND_BINARY, 3, 0, 0, 0, 9, 9, 9]);
    }

    #[tokio::test]
    async fn bad_frames_rejected() {
        let oversized = [KIND_TEXT, 0, 1, 0, 0];
        let err = read_frame(&mut &oversized[..], 16).await.unwrap_err();
        assert!(matches!(err, TransportError::TooLarge { size: 256, limit: 16 }));

        let unknown = [7u8, 0, 0, 0, 0];
        assert!(matches!(read_frame(&mut &unknown[..], 16).await, Err(TransportError::UnknownKind(7))));

        let truncated = [KIND_BINARY, 4, 0, 0, 0, 1];
        assert!(matches!(read_frame(&mut &truncated[..], 16).await, Err(TransportError::Io(_))));
    }
}
