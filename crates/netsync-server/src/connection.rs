//! Per-socket handling: handshake, read loop and writer task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netsync_core::ClientNo;
use netsync_proto::{
    ClientMessage, CodecError, FrameError, PROTOCOL_VERSION, ServerMessage, read_frame,
    write_frame,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::hub::{Hub, HubError};
use crate::room::Outbox;

/// How long the writer may keep flushing after the client is gone.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No Hello within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Expected Hello, got {0}")]
    UnexpectedMessage(&'static str),
}

/// Serve one client until it disconnects. Errors are logged, never propagated.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Hub,
    config: Arc<ServerConfig>,
) {
    if let Err(e) = serve_client(stream, peer, &hub, &config).await {
        tracing::warn!(%peer, error = %e, "Connection ended with error");
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    hub: &Hub,
    config: &ServerConfig,
) -> Result<(), ConnectionError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let hello = match timeout(config.handshake_timeout, read_frame(&mut reader)).await {
        Err(_) => return Err(ConnectionError::HandshakeTimeout(config.handshake_timeout)),
        Ok(Ok(None)) => return Ok(()),
        Ok(Ok(Some(frame))) => ClientMessage::decode(&frame)?,
        Ok(Err(e)) => return Err(e.into()),
    };

    let (protocol_version, room_id, device_id) = match hello {
        ClientMessage::Hello {
            protocol_version,
            room_id,
            device_id,
        } => (protocol_version, room_id, device_id),
        other => return Err(ConnectionError::UnexpectedMessage(message_name(&other))),
    };

    if protocol_version != PROTOCOL_VERSION {
        let reason = format!(
            "Unsupported protocol version {protocol_version} (server speaks {PROTOCOL_VERSION})"
        );
        return reject(&mut writer, reason).await;
    }
    if room_id.is_empty() {
        return reject(&mut writer, "Room id is empty".to_string()).await;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let client_no = match hub.join(&room_id, &device_id, tx.clone()) {
        Ok(client_no) => client_no,
        Err(e) => return reject(&mut writer, e.to_string()).await,
    };
    tracing::info!(room = %room_id, client_no, %peer, device_id = %device_id, "Client joined");

    let mut writer_task = tokio::spawn(write_loop(writer, rx));
    let mut writer_done = false;

    loop {
        let read = tokio::select! {
            read = timeout(config.heartbeat_timeout, read_frame(&mut reader)) => read,
            result = &mut writer_task => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => tracing::warn!(room = %room_id, client_no, "Writer stopped"),
                    Ok(Err(e)) => {
                        tracing::warn!(room = %room_id, client_no, error = %e, "Write failed, closing connection");
                    }
                    Err(e) => tracing::warn!(room = %room_id, client_no, error = %e, "Writer task failed"),
                }
                break;
            }
        };

        let frame = match read {
            Err(_) => {
                tracing::warn!(room = %room_id, client_no, "Heartbeat timeout");
                break;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                tracing::debug!(room = %room_id, client_no, error = %e, "Read failed");
                break;
            }
        };

        let msg = match ClientMessage::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(room = %room_id, client_no, error = %e, "Dropping malformed frame");
                continue;
            }
        };

        if !dispatch(hub, &room_id, client_no, &tx, msg) {
            break;
        }
    }

    hub.leave(&room_id, client_no);
    drop(tx);
    tracing::info!(room = %room_id, client_no, "Client left");

    // The writer stops once every outbox sender is gone.
    if !writer_done && timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        tracing::debug!(room = %room_id, client_no, "Writer did not drain in time");
    }
    Ok(())
}

/// Apply one client message. Returns false when the client said goodbye.
fn dispatch(hub: &Hub, room_id: &str, client_no: ClientNo, own: &Outbox, msg: ClientMessage) -> bool {
    let result = match msg {
        ClientMessage::SetGlobalVariable { name, value } => hub
            .with_room(room_id, |room| room.set_global(client_no, &name, &value))
            .map(drop),
        ClientMessage::SetClientVariable { name, value } => hub
            .with_room(room_id, |room| room.set_client(client_no, &name, &value))
            .map(drop),
        ClientMessage::Rpc {
            target,
            function,
            args,
        } => hub
            .with_room(room_id, |room| room.rpc(client_no, target, &function, &args))
            .map(drop),
        ClientMessage::Transform(transform) => hub
            .with_room(room_id, |room| room.relay_transform(client_no, transform))
            .map(drop),
        ClientMessage::Ping { timestamp } => {
            send_direct(own, &ServerMessage::Pong { timestamp });
            Ok(())
        }
        ClientMessage::Hello { .. } => {
            tracing::warn!(room = room_id, client_no, "Ignoring repeated Hello");
            Ok(())
        }
        ClientMessage::Goodbye => return false,
    };

    if let Err(e) = result {
        log_rejected(room_id, client_no, &e);
    }
    true
}

fn log_rejected(room_id: &str, client_no: ClientNo, e: &HubError) {
    tracing::warn!(room = room_id, client_no, error = %e, "Request rejected");
}

fn send_direct(own: &Outbox, msg: &ServerMessage) {
    match msg.encode() {
        Ok(frame) => {
            let _ = own.send(frame.into());
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode reply"),
    }
}

async fn reject(writer: &mut OwnedWriteHalf, reason: String) -> Result<(), ConnectionError> {
    tracing::info!(reason = %reason, "Rejecting client");
    let frame = ServerMessage::Rejected { reason }.encode()?;
    write_frame(writer, &frame).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Arc<[u8]>>,
) -> Result<(), FrameError> {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            let _ = writer.shutdown().await;
            return Err(e);
        }
    }
    writer.shutdown().await?;
    Ok(())
}

fn message_name(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Hello { .. } => "Hello",
        ClientMessage::SetGlobalVariable { .. } => "SetGlobalVariable",
        ClientMessage::SetClientVariable { .. } => "SetClientVariable",
        ClientMessage::Rpc { .. } => "Rpc",
        ClientMessage::Transform(_) => "Transform",
        ClientMessage::Ping { .. } => "Ping",
        ClientMessage::Goodbye => "Goodbye",
    }
}
