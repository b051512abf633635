//! Socket plumbing: handshake plus the reader and writer tasks.

use netsync_core::ClientNo;
use netsync_proto::message::msg_type;
use netsync_proto::{
    ClientMessage, MAX_FRAME_LEN, PROTOCOL_VERSION, RoomSnapshot, ServerMessage, read_frame,
    write_frame,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::SessionConfig;
use crate::session::SessionError;

/// Bytes the relay adds when it forwards an `Rpc` with the sender's number.
const RPC_DELIVERY_OVERHEAD: usize = 4;

/// What the reader task hands to the session.
#[derive(Debug)]
pub(crate) enum Inbound {
    Message(ServerMessage),
    Closed(String),
}

/// Owns the socket tasks. Dropping it aborts the reader; the writer
/// finishes once its queue is drained.
pub(crate) struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queue a message for the writer. Frames the relay could not carry are
    /// refused here so they never reach the socket.
    pub(crate) fn send(&self, msg: &ClientMessage) -> Result<(), SessionError> {
        let bytes = msg.encode()?;
        check_frame_len(msg, bytes.len())?;
        self.outbound
            .send(bytes)
            .map_err(|_| SessionError::NotConnected)
    }

    /// Say goodbye and let the writer flush before the socket closes.
    pub(crate) fn close(self) {
        if let Err(e) = self.send(&ClientMessage::Goodbye) {
            tracing::debug!(error = %e, "Goodbye not queued");
        }
    }
}

fn check_frame_len(msg: &ClientMessage, len: usize) -> Result<(), SessionError> {
    let max = match msg {
        ClientMessage::Rpc { .. } => MAX_FRAME_LEN - RPC_DELIVERY_OVERHEAD,
        _ => MAX_FRAME_LEN,
    };
    if len > max {
        return Err(SessionError::MessageTooLarge { len, max });
    }
    Ok(())
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub(crate) struct Established {
    pub client_no: ClientNo,
    pub snapshot: RoomSnapshot,
    pub handle: ConnectionHandle,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Connect, send Hello and wait for the server's verdict.
pub(crate) async fn establish(config: &SessionConfig) -> Result<Established, SessionError> {
    let stream = timeout(
        config.connect_timeout,
        TcpStream::connect(config.server_addr.as_str()),
    )
    .await
    .map_err(|_| SessionError::Timeout)??;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let hello = ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        room_id: config.room_id.clone(),
        device_id: config.device_id.clone(),
    }
    .encode()?;
    write_frame(&mut writer, &hello).await?;

    let first = timeout(config.connect_timeout, read_frame(&mut reader))
        .await
        .map_err(|_| SessionError::Timeout)??
        .ok_or(SessionError::Closed)?;

    let (client_no, snapshot) = match ServerMessage::decode(&first)? {
        ServerMessage::Welcome {
            client_no,
            snapshot,
        } => (client_no, snapshot),
        ServerMessage::Rejected { reason } => return Err(SessionError::Rejected(reason)),
        other => {
            return Err(SessionError::Protocol(format!(
                "expected Welcome, got {other:?}"
            )));
        }
    };

    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(reader, inbound_tx));
    tokio::spawn(write_loop(writer, outbound_rx));

    Ok(Established {
        client_no,
        snapshot,
        handle: ConnectionHandle { outbound, reader },
        inbound,
    })
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::UnboundedSender<Inbound>) {
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match ServerMessage::decode(&frame) {
                Ok(msg) => {
                    if inbound.send(Inbound::Message(msg)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, len = frame.len(), "Dropping malformed server frame");
                }
            },
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) => break format!("read failed: {e}"),
        }
    };
    tracing::debug!(%reason, "Reader stopped");
    let _ = inbound.send(Inbound::Closed(reason));
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbound.recv().await {
        let is_goodbye = frame.first() == Some(&msg_type::GOODBYE);
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!(error = %e, "Write failed");
            return;
        }
        if is_goodbye {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_rpc(arg_len: usize, count: usize) -> ClientMessage {
        ClientMessage::Rpc {
            target: netsync_proto::RpcTarget::Others,
            function: "Blob".to_string(),
            args: vec!["x".repeat(arg_len); count],
        }
    }

    #[tokio::test]
    async fn test_oversized_message_is_not_queued() {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            outbound,
            reader: tokio::spawn(async {}),
        };

        let msg = blob_rpc(60_000, 70);
        assert!(matches!(
            handle.send(&msg),
            Err(SessionError::MessageTooLarge { max, .. }) if max == MAX_FRAME_LEN - RPC_DELIVERY_OVERHEAD
        ));
        assert!(outbound_rx.try_recv().is_err());

        handle.send(&blob_rpc(60_000, 20)).unwrap();
        assert!(outbound_rx.try_recv().is_ok());
    }

    #[test]
    fn test_rpc_keeps_room_for_sender_number() {
        assert!(check_frame_len(&ClientMessage::Goodbye, MAX_FRAME_LEN).is_ok());
        assert!(matches!(
            check_frame_len(&blob_rpc(1, 1), MAX_FRAME_LEN - 1),
            Err(SessionError::MessageTooLarge { .. })
        ));
    }
}
