use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use netsync_core::{ClientNo, Transform, VariableError, VariableLimits, VariableStore};
use netsync_proto::{CodecError, MAX_FRAME_LEN, RpcTarget, ServerMessage};
use tokio::sync::mpsc;

/// Pre-encoded frames waiting to be written to one client socket.
pub type Outbox = mpsc::UnboundedSender<Arc<[u8]>>;

#[derive(thiserror::Error, Debug)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,

    #[error("Client {0} not found in the room")]
    ClientNotFound(ClientNo),

    #[error("Message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A connected client.
#[derive(Debug, Clone)]
pub struct Member {
    pub client_no: ClientNo,
    pub device_id: String,
    pub joined_at: DateTime<Utc>,
    outbox: Outbox,
}

#[derive(Debug)]
pub struct Room {
    id: String,
    max_clients: u32,
    members: BTreeMap<ClientNo, Member>,
    next_client_no: ClientNo,
    variables: VariableStore,
    created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: String, max_clients: u32, limits: VariableLimits) -> Self {
        Self {
            id,
            max_clients,
            members: BTreeMap::new(),
            next_client_no: 1,
            variables: VariableStore::new(limits),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn count_clients(&self) -> u32 {
        u32::try_from(self.members.len()).unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_client(&self, client_no: ClientNo) -> bool {
        self.members.contains_key(&client_no)
    }

    pub fn iter_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Admit a client.
    ///
    /// The `Welcome` is queued on `outbox` before the client becomes visible
    /// to broadcasts, so it is always the first frame the client receives.
    pub fn join(&mut self, device_id: &str, outbox: Outbox) -> Result<ClientNo, RoomError> {
        if self.count_clients() >= self.max_clients {
            return Err(RoomError::RoomFull);
        }

        let client_no = self.next_client_no;

        let mut snapshot = self.variables.to_snapshot();
        snapshot.clients = self.members.keys().copied().chain([client_no]).collect();
        let welcome = encode_frame(&ServerMessage::Welcome {
            client_no,
            snapshot,
        })?;
        // A closed outbox means the socket is already gone; the connection
        // task will call `leave` shortly.
        let _ = outbox.send(welcome);

        self.next_client_no += 1;
        self.members.insert(
            client_no,
            Member {
                client_no,
                device_id: device_id.to_string(),
                joined_at: Utc::now(),
                outbox,
            },
        );

        self.broadcast(&ServerMessage::ClientJoined { client_no }, Some(client_no))?;
        Ok(client_no)
    }

    /// Remove a client and its variables. Returns false if it was not a member.
    pub fn leave(&mut self, client_no: ClientNo) -> bool {
        if self.members.remove(&client_no).is_none() {
            return false;
        }
        self.variables.remove_client(client_no);
        if let Err(e) = self.broadcast(&ServerMessage::ClientLeft { client_no }, None) {
            tracing::warn!(room = %self.id, client_no, error = %e, "Failed to announce departure");
        }
        true
    }

    /// Returns true when the value changed and was broadcast.
    pub fn set_global(
        &mut self,
        sender: ClientNo,
        name: &str,
        value: &str,
    ) -> Result<bool, RoomError> {
        self.assert_member(sender)?;
        let Some(change) = self.variables.set_global(name, value)? else {
            return Ok(false);
        };
        self.broadcast(
            &ServerMessage::GlobalVariableChanged {
                sender,
                name: change.name,
                previous: change.previous,
                current: change.current,
            },
            None,
        )?;
        Ok(true)
    }

    /// Returns true when the value changed and was broadcast.
    pub fn set_client(
        &mut self,
        client_no: ClientNo,
        name: &str,
        value: &str,
    ) -> Result<bool, RoomError> {
        self.assert_member(client_no)?;
        let Some(change) = self.variables.set_client(client_no, name, value)? else {
            return Ok(false);
        };
        self.broadcast(
            &ServerMessage::ClientVariableChanged {
                client_no,
                name: change.name,
                previous: change.previous,
                current: change.current,
            },
            None,
        )?;
        Ok(true)
    }

    /// Route an RPC. Returns the number of recipients.
    pub fn rpc(
        &mut self,
        sender: ClientNo,
        target: RpcTarget,
        function: &str,
        args: &[String],
    ) -> Result<usize, RoomError> {
        self.assert_member(sender)?;
        let msg = ServerMessage::RpcDelivered {
            sender,
            function: function.to_string(),
            args: args.to_vec(),
        };
        match target {
            RpcTarget::All => self.broadcast(&msg, None),
            RpcTarget::Others => self.broadcast(&msg, Some(sender)),
            RpcTarget::Client(client_no) => {
                self.send_to(client_no, &msg)?;
                Ok(1)
            }
        }
    }

    /// Forward a client's pose to everyone else.
    pub fn relay_transform(
        &mut self,
        sender: ClientNo,
        transform: Transform,
    ) -> Result<usize, RoomError> {
        self.assert_member(sender)?;
        self.broadcast(
            &ServerMessage::TransformUpdate {
                client_no: sender,
                transform,
            },
            Some(sender),
        )
    }

    pub fn send_to(&self, client_no: ClientNo, msg: &ServerMessage) -> Result<(), RoomError> {
        let member = self
            .members
            .get(&client_no)
            .ok_or(RoomError::ClientNotFound(client_no))?;
        let frame = encode_frame(msg)?;
        if member.outbox.send(frame).is_err() {
            tracing::debug!(room = %self.id, client_no, "Outbox closed");
        }
        Ok(())
    }

    /// Encode once and queue for every member except `except`.
    ///
    /// Nothing is queued when the frame would exceed `MAX_FRAME_LEN`.
    pub fn broadcast(
        &self,
        msg: &ServerMessage,
        except: Option<ClientNo>,
    ) -> Result<usize, RoomError> {
        let frame = encode_frame(msg)?;
        let mut delivered = 0;
        for member in self.members.values() {
            if Some(member.client_no) == except {
                continue;
            }
            if member.outbox.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(room = %self.id, client_no = member.client_no, "Outbox closed");
            }
        }
        Ok(delivered)
    }

    fn assert_member(&self, client_no: ClientNo) -> Result<(), RoomError> {
        if self.has_client(client_no) {
            Ok(())
        } else {
            Err(RoomError::ClientNotFound(client_no))
        }
    }
}

fn encode_frame(msg: &ServerMessage) -> Result<Arc<[u8]>, RoomError> {
    let bytes = msg.encode()?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(RoomError::MessageTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(bytes.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    use netsync_proto::ClientMessage;

    type Inbox = mpsc::UnboundedReceiver<Arc<[u8]>>;

    fn create_test_room(max_clients: u32) -> Room {
        Room::new("lobby".to_string(), max_clients, VariableLimits::default())
    }

    fn join(room: &mut Room, device: &str) -> (ClientNo, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client_no = room.join(device, tx).unwrap();
        (client_no, rx)
    }

    /// Arguments that make an `Rpc` to `Others` exactly `MAX_FRAME_LEN` bytes.
    fn args_filling_frame(function: &str) -> Vec<String> {
        // tag, target, function, arg count
        let mut remaining = MAX_FRAME_LEN - (1 + 1 + 2 + function.len() + 2);
        let mut args = Vec::new();
        while remaining > 0 {
            let len = (remaining - 2).min(60_000);
            args.push("x".repeat(len));
            remaining -= len + 2;
        }
        args
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(ServerMessage::decode(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_welcome_is_first_and_lists_clients() {
        let mut room = create_test_room(4);
        let (first, mut rx1) = join(&mut room, "a");
        room.set_global(first, "Scale", "2").unwrap();
        let (second, mut rx2) = join(&mut room, "b");

        assert_eq!((first, second), (1, 2));

        let msgs = drain(&mut rx2);
        let ServerMessage::Welcome { client_no, snapshot } = &msgs[0] else {
            panic!("Wrong message type");
        };
        assert_eq!(*client_no, 2);
        assert_eq!(snapshot.clients, vec![1, 2]);
        assert_eq!(snapshot.globals, vec![("Scale".to_string(), "2".to_string())]);
        assert_eq!(msgs.len(), 1);

        let msgs = drain(&mut rx1);
        assert!(msgs.contains(&ServerMessage::ClientJoined { client_no: 2 }));
    }

    #[test]
    fn test_room_full_error() {
        let mut room = create_test_room(1);
        let _first = join(&mut room, "a");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(room.join("b", tx), Err(RoomError::RoomFull)));
    }

    #[test]
    fn test_client_numbers_not_reused() {
        let mut room = create_test_room(4);
        let (first, _rx1) = join(&mut room, "a");
        assert!(room.leave(first));
        let (second, _rx2) = join(&mut room, "a");
        assert_eq!(second, 2);
        assert!(!room.leave(first));
    }

    #[test]
    fn test_unchanged_value_not_broadcast() {
        let mut room = create_test_room(4);
        let (client, mut rx) = join(&mut room, "a");
        drain(&mut rx);

        assert!(room.set_client(client, "Mode", "VR").unwrap());
        assert!(!room.set_client(client, "Mode", "VR").unwrap());

        let msgs = drain(&mut rx);
        assert_eq!(
            msgs,
            vec![ServerMessage::ClientVariableChanged {
                client_no: client,
                name: "Mode".to_string(),
                previous: None,
                current: "VR".to_string(),
            }]
        );
    }

    #[test]
    fn test_leave_drops_client_variables() {
        let mut room = create_test_room(4);
        let (a, _rx_a) = join(&mut room, "a");
        let (_b, mut rx_b) = join(&mut room, "b");
        room.set_client(a, "Color", "1,0,0,1").unwrap();
        drain(&mut rx_b);

        room.leave(a);
        assert!(room.variables().client(a).is_none());
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::ClientLeft { client_no: a }]);
    }

    #[test]
    fn test_rpc_targets() {
        let mut room = create_test_room(4);
        let (a, mut rx_a) = join(&mut room, "a");
        let (b, mut rx_b) = join(&mut room, "b");
        let (_c, mut rx_c) = join(&mut room, "c");
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        assert_eq!(room.rpc(a, RpcTarget::Others, "Ping", &[]).unwrap(), 2);
        assert!(drain(&mut rx_a).is_empty());

        assert_eq!(room.rpc(a, RpcTarget::All, "Ping", &[]).unwrap(), 3);
        assert_eq!(drain(&mut rx_a).len(), 1);

        room.rpc(a, RpcTarget::Client(b), "Log", &["hi".to_string()])
            .unwrap();
        assert_eq!(drain(&mut rx_b).len(), 3);
        assert_eq!(drain(&mut rx_c).len(), 2);

        assert!(matches!(
            room.rpc(a, RpcTarget::Client(99), "Log", &[]),
            Err(RoomError::ClientNotFound(99))
        ));
    }

    #[test]
    fn test_full_room_welcome_fits_in_one_frame() {
        let limits = VariableLimits::default();
        let mut room = Room::new("packed".to_string(), 64, limits);
        let name = |i: usize| format!("{i:0>width$}", width = limits.max_name_len);
        let value = "v".repeat(limits.max_value_len);

        let mut members = Vec::new();
        for device in 0..63 {
            let (client_no, rx) = join(&mut room, &format!("device-{device}"));
            for i in 0..limits.max_client_variables {
                room.set_client(client_no, &name(i), &value).unwrap();
            }
            // Keep earlier members' queues from growing with every write.
            drop(rx);
            members.push(client_no);
        }
        for i in 0..limits.max_global_variables {
            room.set_global(members[0], &name(i), &value).unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let last = room.join("device-63", tx).unwrap();
        let frame = rx.try_recv().unwrap();
        assert!(frame.len() <= MAX_FRAME_LEN, "welcome is {} bytes", frame.len());

        let ServerMessage::Welcome { client_no, snapshot } = ServerMessage::decode(&frame).unwrap()
        else {
            panic!("Wrong message type");
        };
        assert_eq!(client_no, last);
        assert_eq!(snapshot.clients.len(), 64);
        assert_eq!(snapshot.globals.len(), limits.max_global_variables);
    }

    #[test]
    fn test_oversized_welcome_rejects_join() {
        let limits = VariableLimits {
            max_value_len: 60_000,
            ..VariableLimits::default()
        };
        let mut room = Room::new("huge".to_string(), 4, limits);
        let (a, _rx_a) = join(&mut room, "a");
        let value = "x".repeat(limits.max_value_len);
        for i in 0..limits.max_global_variables {
            room.set_global(a, &format!("G{i}"), &value).unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(matches!(
            room.join("b", tx),
            Err(RoomError::MessageTooLarge { .. })
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(room.count_clients(), 1);
    }

    #[test]
    fn test_oversized_rpc_is_not_queued() {
        let mut room = create_test_room(4);
        let (a, mut rx_a) = join(&mut room, "a");
        let (b, mut rx_b) = join(&mut room, "b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Fits as a client frame but not once the sender number is added.
        let args = args_filling_frame("Blob");
        let request = ClientMessage::Rpc {
            target: RpcTarget::Others,
            function: "Blob".to_string(),
            args: args.clone(),
        };
        assert_eq!(request.encode().unwrap().len(), MAX_FRAME_LEN);

        for target in [RpcTarget::Others, RpcTarget::All, RpcTarget::Client(b)] {
            assert!(matches!(
                room.rpc(a, target, "Blob", &args),
                Err(RoomError::MessageTooLarge { max, .. }) if max == MAX_FRAME_LEN
            ));
        }
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());

        assert_eq!(room.rpc(a, RpcTarget::Others, "Ping", &[]).unwrap(), 1);
    }

    #[test]
    fn test_non_member_cannot_write() {
        let mut room = create_test_room(4);
        assert!(matches!(
            room.set_global(5, "Scale", "1"),
            Err(RoomError::ClientNotFound(5))
        ));
    }
}
