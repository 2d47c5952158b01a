//! Per-connection request processing.
//!
//! Each connection runs three pieces:
//!
//! ```text
//! socket ──► reader task ──mpsc──► request loop ──mpsc──► writer task ──► socket
//!                 │                     ▲
//!                 └──── closed ─────────┘
//! ```
//!
//! The request loop handles one request at a time, so an `Await` suspends
//! only its own connection. When the peer goes away the reader drops the
//! `closed` signal and any in-flight await is cancelled, which releases its
//! waiter registrations.

use std::sync::Arc;

use bytes::Bytes;
use synchro_core::{ClientState, Environment, RequestContext, SyncExtension, SyncResponse};
use synchro_proto::{ErrorCode, ErrorReport};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    error::ServerError,
    framing::{Inbound, RequestHeader, read_request},
};

/// Requests buffered between the reader task and the request loop.
const INBOUND_QUEUE: usize = 64;

/// Serialized writer for one connection.
///
/// Every packet is fully encoded before it is queued, so packets never
/// interleave on the socket.
#[derive(Debug, Clone)]
pub struct ConnectionWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionWriter {
    /// Spawn the writer task draining into `sink`.
    pub fn spawn<W>(conn_id: u64, mut sink: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let task = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if let Err(e) = sink.write_all(&packet).await {
                    tracing::debug!(conn_id, "Write error: {}", e);
                    return;
                }
            }
            let _ = sink.shutdown().await;
        });

        (Self { tx }, task)
    }

    /// Queue an encoded packet.
    pub fn send(&self, packet: Bytes) -> Result<(), ServerError> {
        self.tx
            .send(packet)
            .map_err(|_| ServerError::Transport("connection writer closed".to_string()))
    }
}

/// Serve one connection until the peer disconnects.
///
/// End-of-stream on the read side counts as a disconnect, even when the peer
/// has only half-closed its write direction right after sending an await.
/// The in-flight await is cancelled, its waiters deregister, and requests
/// still queued behind it are dropped without a response.
pub async fn handle_connection<E, R, W>(
    conn_id: u64,
    reader: R,
    writer: W,
    extension: Arc<SyncExtension<E>>,
    max_request_bytes: usize,
) -> Result<(), ServerError>
where
    E: Environment,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer, writer_task) = ConnectionWriter::spawn(conn_id, writer);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (closed_tx, mut closed_rx) = oneshot::channel::<()>();

    let max_body_bytes = max_request_bytes.saturating_sub(RequestHeader::SIZE);
    let reader_task =
        tokio::spawn(read_loop(conn_id, reader, max_body_bytes, inbound_tx, closed_tx));

    let mut client = ClientState::new();
    let mut sequence: u16 = 0;

    while let Some(inbound) = inbound_rx.recv().await {
        sequence = sequence.wrapping_add(1);

        let response = tokio::select! {
            biased;
            response = process(&extension, &mut client, sequence, inbound) => response,
            _ = &mut closed_rx => {
                tracing::debug!(conn_id, sequence, "Peer closed during request");
                break;
            },
        };

        if let Some(response) = response {
            if let Err(e) = writer.send(response.encode(extension.config(), sequence)) {
                tracing::debug!(conn_id, sequence, "Dropping response: {}", e);
                break;
            }
        }
    }

    reader_task.abort();
    drop(writer);
    let _ = writer_task.await;

    tracing::debug!(conn_id, requests = sequence, "Connection finished");
    Ok(())
}

async fn read_loop<R>(
    conn_id: u64,
    mut reader: R,
    max_body_bytes: usize,
    inbound: mpsc::Sender<Inbound>,
    closed: oneshot::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_request(&mut reader, max_body_bytes).await {
            Ok(Some(request)) => {
                if inbound.send(request).await.is_err() {
                    break;
                }
            },
            Ok(None) => {
                tracing::debug!(conn_id, "Connection closed by peer");
                break;
            },
            Err(ServerError::Framing(msg)) => {
                tracing::warn!(conn_id, "Dropping connection: {}", msg);
                break;
            },
            Err(e) => {
                tracing::debug!(conn_id, "Read error: {}", e);
                break;
            },
        }
    }

    drop(closed);
}

async fn process<E: Environment>(
    extension: &SyncExtension<E>,
    client: &mut ClientState,
    sequence: u16,
    inbound: Inbound,
) -> Option<SyncResponse> {
    let config = extension.config();

    match inbound {
        Inbound::Request { major_opcode, minor_opcode, body } => {
            if major_opcode != config.major_opcode {
                tracing::debug!(major_opcode, minor_opcode, "Request for unknown major opcode");
                return Some(host_error(ErrorCode::Implementation, major_opcode, minor_opcode));
            }

            let ctx = RequestContext { major_opcode, minor_opcode, sequence };
            extension.dispatch(client, ctx, &body).await
        },
        Inbound::Oversized { major_opcode, minor_opcode, body_len } => {
            tracing::debug!(major_opcode, minor_opcode, body_len, "Request exceeds size limit");
            Some(host_error(ErrorCode::Length, major_opcode, minor_opcode))
        },
    }
}

fn host_error(code: ErrorCode, major_opcode: u8, minor_opcode: u8) -> SyncResponse {
    SyncResponse::Error(ErrorReport {
        code,
        major_opcode,
        minor_opcode: u16::from(minor_opcode),
        bad_value: 0,
    })
}
