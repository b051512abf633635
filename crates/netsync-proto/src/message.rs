//! Client and server message types.
//!
//! Every message starts with a one-byte type id followed by its fields.

use crate::ClientNo;
use crate::codec::{CodecError, Reader, Writer};
use crate::snapshot::RoomSnapshot;
use crate::transform::Transform;

/// Message type identifiers.
pub mod msg_type {
    // client -> server
    pub const HELLO: u8 = 0x01;
    pub const SET_GLOBAL_VARIABLE: u8 = 0x10;
    pub const SET_CLIENT_VARIABLE: u8 = 0x11;
    pub const RPC: u8 = 0x20;
    pub const TRANSFORM: u8 = 0x30;
    pub const PING: u8 = 0x70;
    pub const GOODBYE: u8 = 0x7F;

    // server -> client
    pub const WELCOME: u8 = 0x81;
    pub const REJECTED: u8 = 0x82;
    pub const CLIENT_JOINED: u8 = 0x83;
    pub const CLIENT_LEFT: u8 = 0x84;
    pub const GLOBAL_VARIABLE_CHANGED: u8 = 0x90;
    pub const CLIENT_VARIABLE_CHANGED: u8 = 0x91;
    pub const RPC_DELIVERED: u8 = 0xA0;
    pub const TRANSFORM_UPDATE: u8 = 0xB0;
    pub const PONG: u8 = 0xF0;
}

/// Recipients of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcTarget {
    /// Every client in the room, sender included.
    All,
    /// Every client except the sender.
    Others,
    /// A single client.
    Client(ClientNo),
}

impl RpcTarget {
    fn write(self, w: &mut Writer) {
        match self {
            RpcTarget::All => w.put_u8(0),
            RpcTarget::Others => w.put_u8(1),
            RpcTarget::Client(client_no) => {
                w.put_u8(2);
                w.put_u32(client_no);
            }
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match r.u8()? {
            0 => Ok(RpcTarget::All),
            1 => Ok(RpcTarget::Others),
            2 => Ok(RpcTarget::Client(r.u32()?)),
            tag => Err(CodecError::InvalidTag {
                field: "rpc target",
                tag,
            }),
        }
    }
}

fn write_transform(w: &mut Writer, transform: &Transform) {
    for v in transform.position {
        w.put_f32(v);
    }
    for v in transform.rotation {
        w.put_f32(v);
    }
}

fn read_transform(r: &mut Reader<'_>) -> Result<Transform, CodecError> {
    let position = [r.f32()?, r.f32()?, r.f32()?];
    let rotation = [r.f32()?, r.f32()?, r.f32()?, r.f32()?];
    Ok(Transform { position, rotation })
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// First message on a connection.
    Hello {
        protocol_version: u16,
        room_id: String,
        device_id: String,
    },
    SetGlobalVariable {
        name: String,
        value: String,
    },
    /// Sets a variable owned by the sending client.
    SetClientVariable {
        name: String,
        value: String,
    },
    Rpc {
        target: RpcTarget,
        function: String,
        args: Vec<String>,
    },
    /// Latest pose of the sender's avatar.
    Transform(Transform),
    /// Heartbeat; echoed back as `Pong`.
    Ping {
        timestamp: f64,
    },
    /// Orderly disconnect.
    Goodbye,
}

impl ClientMessage {
    /// Encode the message to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let w = match self {
            ClientMessage::Hello {
                protocol_version,
                room_id,
                device_id,
            } => {
                let mut w = Writer::new(msg_type::HELLO);
                w.put_u16(*protocol_version);
                w.put_str(room_id)?;
                w.put_str(device_id)?;
                w
            }
            ClientMessage::SetGlobalVariable { name, value } => {
                let mut w = Writer::new(msg_type::SET_GLOBAL_VARIABLE);
                w.put_str(name)?;
                w.put_str(value)?;
                w
            }
            ClientMessage::SetClientVariable { name, value } => {
                let mut w = Writer::new(msg_type::SET_CLIENT_VARIABLE);
                w.put_str(name)?;
                w.put_str(value)?;
                w
            }
            ClientMessage::Rpc {
                target,
                function,
                args,
            } => {
                let mut w = Writer::new(msg_type::RPC);
                target.write(&mut w);
                w.put_str(function)?;
                w.put_str_list(args)?;
                w
            }
            ClientMessage::Transform(transform) => {
                let mut w = Writer::new(msg_type::TRANSFORM);
                write_transform(&mut w, transform);
                w
            }
            ClientMessage::Ping { timestamp } => {
                let mut w = Writer::new(msg_type::PING);
                w.put_f64(*timestamp);
                w
            }
            ClientMessage::Goodbye => Writer::new(msg_type::GOODBYE),
        };
        Ok(w.finish())
    }

    /// Decode a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (&kind, rest) = data.split_first().ok_or(CodecError::Empty)?;
        let mut r = Reader::new(rest);

        let msg = match kind {
            msg_type::HELLO => ClientMessage::Hello {
                protocol_version: r.u16()?,
                room_id: r.string()?,
                device_id: r.string()?,
            },
            msg_type::SET_GLOBAL_VARIABLE => ClientMessage::SetGlobalVariable {
                name: r.string()?,
                value: r.string()?,
            },
            msg_type::SET_CLIENT_VARIABLE => ClientMessage::SetClientVariable {
                name: r.string()?,
                value: r.string()?,
            },
            msg_type::RPC => ClientMessage::Rpc {
                target: RpcTarget::read(&mut r)?,
                function: r.string()?,
                args: r.string_list()?,
            },
            msg_type::TRANSFORM => ClientMessage::Transform(read_transform(&mut r)?),
            msg_type::PING => ClientMessage::Ping {
                timestamp: r.f64()?,
            },
            msg_type::GOODBYE => ClientMessage::Goodbye,
            other => return Err(CodecError::UnknownType(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted. Always the first message a client receives.
    Welcome {
        client_no: ClientNo,
        snapshot: RoomSnapshot,
    },
    /// Handshake refused; the server closes the connection afterwards.
    Rejected {
        reason: String,
    },
    ClientJoined {
        client_no: ClientNo,
    },
    ClientLeft {
        client_no: ClientNo,
    },
    GlobalVariableChanged {
        sender: ClientNo,
        name: String,
        previous: Option<String>,
        current: String,
    },
    ClientVariableChanged {
        client_no: ClientNo,
        name: String,
        previous: Option<String>,
        current: String,
    },
    RpcDelivered {
        sender: ClientNo,
        function: String,
        args: Vec<String>,
    },
    TransformUpdate {
        client_no: ClientNo,
        transform: Transform,
    },
    Pong {
        timestamp: f64,
    },
}

impl ServerMessage {
    /// Encode the message to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let w = match self {
            ServerMessage::Welcome {
                client_no,
                snapshot,
            } => {
                let mut w = Writer::new(msg_type::WELCOME);
                w.put_u32(*client_no);
                w.put_blob(&snapshot.to_bytes()?)?;
                w
            }
            ServerMessage::Rejected { reason } => {
                let mut w = Writer::new(msg_type::REJECTED);
                w.put_str(reason)?;
                w
            }
            ServerMessage::ClientJoined { client_no } => {
                let mut w = Writer::new(msg_type::CLIENT_JOINED);
                w.put_u32(*client_no);
                w
            }
            ServerMessage::ClientLeft { client_no } => {
                let mut w = Writer::new(msg_type::CLIENT_LEFT);
                w.put_u32(*client_no);
                w
            }
            ServerMessage::GlobalVariableChanged {
                sender,
                name,
                previous,
                current,
            } => {
                let mut w = Writer::new(msg_type::GLOBAL_VARIABLE_CHANGED);
                w.put_u32(*sender);
                w.put_str(name)?;
                w.put_opt_str(previous.as_deref())?;
                w.put_str(current)?;
                w
            }
            ServerMessage::ClientVariableChanged {
                client_no,
                name,
                previous,
                current,
            } => {
                let mut w = Writer::new(msg_type::CLIENT_VARIABLE_CHANGED);
                w.put_u32(*client_no);
                w.put_str(name)?;
                w.put_opt_str(previous.as_deref())?;
                w.put_str(current)?;
                w
            }
            ServerMessage::RpcDelivered {
                sender,
                function,
                args,
            } => {
                let mut w = Writer::new(msg_type::RPC_DELIVERED);
                w.put_u32(*sender);
                w.put_str(function)?;
                w.put_str_list(args)?;
                w
            }
            ServerMessage::TransformUpdate {
                client_no,
                transform,
            } => {
                let mut w = Writer::new(msg_type::TRANSFORM_UPDATE);
                w.put_u32(*client_no);
                write_transform(&mut w, transform);
                w
            }
            ServerMessage::Pong { timestamp } => {
                let mut w = Writer::new(msg_type::PONG);
                w.put_f64(*timestamp);
                w
            }
        };
        Ok(w.finish())
    }

    /// Decode a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (&kind, rest) = data.split_first().ok_or(CodecError::Empty)?;
        let mut r = Reader::new(rest);

        let msg = match kind {
            msg_type::WELCOME => ServerMessage::Welcome {
                client_no: r.u32()?,
                snapshot: RoomSnapshot::from_bytes(r.blob()?)?,
            },
            msg_type::REJECTED => ServerMessage::Rejected {
                reason: r.string()?,
            },
            msg_type::CLIENT_JOINED => ServerMessage::ClientJoined {
                client_no: r.u32()?,
            },
            msg_type::CLIENT_LEFT => ServerMessage::ClientLeft {
                client_no: r.u32()?,
            },
            msg_type::GLOBAL_VARIABLE_CHANGED => ServerMessage::GlobalVariableChanged {
                sender: r.u32()?,
                name: r.string()?,
                previous: r.opt_string()?,
                current: r.string()?,
            },
            msg_type::CLIENT_VARIABLE_CHANGED => ServerMessage::ClientVariableChanged {
                client_no: r.u32()?,
                name: r.string()?,
                previous: r.opt_string()?,
                current: r.string()?,
            },
            msg_type::RPC_DELIVERED => ServerMessage::RpcDelivered {
                sender: r.u32()?,
                function: r.string()?,
                args: r.string_list()?,
            },
            msg_type::TRANSFORM_UPDATE => ServerMessage::TransformUpdate {
                client_no: r.u32()?,
                transform: read_transform(&mut r)?,
            },
            msg_type::PONG => ServerMessage::Pong {
                timestamp: r.f64()?,
            },
            other => return Err(CodecError::UnknownType(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_roundtrip() {
        let msg = ClientMessage::Rpc {
            target: RpcTarget::Client(7),
            function: "SetColor".to_string(),
            args: vec!["0.5".to_string(), String::new(), "日本".to_string()],
        };
        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_welcome_carries_snapshot() {
        let snapshot = RoomSnapshot {
            clients: vec![1, 3],
            globals: vec![("Scale".to_string(), "1.5".to_string())],
            client_variables: vec![(3, vec![("Color".to_string(), "1,0,0,1".to_string())])],
        };
        let msg = ServerMessage::Welcome {
            client_no: 3,
            snapshot: snapshot.clone(),
        };

        let ServerMessage::Welcome {
            client_no,
            snapshot: decoded,
        } = ServerMessage::decode(&msg.encode().unwrap()).unwrap()
        else {
            panic!("Wrong message type");
        };
        assert_eq!(client_no, 3);
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_variable_change_without_previous() {
        let msg = ServerMessage::GlobalVariableChanged {
            sender: 2,
            name: "Mode".to_string(),
            previous: None,
            current: "VR".to_string(),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes[0], msg_type::GLOBAL_VARIABLE_CHANGED);
        assert_eq!(ServerMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(ClientMessage::decode(&[]).unwrap_err(), CodecError::Empty);
        assert_eq!(
            ClientMessage::decode(&[0x55]).unwrap_err(),
            CodecError::UnknownType(0x55)
        );
        // Server message ids are not valid client messages.
        assert!(ClientMessage::decode(&[msg_type::PONG, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());

        let mut bytes = ClientMessage::Goodbye.encode().unwrap();
        bytes.push(0);
        assert_eq!(
            ClientMessage::decode(&bytes).unwrap_err(),
            CodecError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_truncated_transform() {
        let msg = ServerMessage::TransformUpdate {
            client_no: 1,
            transform: Transform::from_position([1.0, 2.0, 3.0]),
        };
        let bytes = msg.encode().unwrap();
        assert!(matches!(
            ServerMessage::decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
