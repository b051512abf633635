use std::fmt;
use std::str::FromStr;

use netsync_core::{ClientNo, VariableChange, parse_value};

/// Notifications delivered to listeners during [`Session::poll`](crate::Session::poll).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed; `client_no` is this session's identifier.
    Connected { client_no: ClientNo },
    /// Connection closed, locally or by the server.
    Disconnected { reason: String },
    /// Another participant is present (joined, or already there at connect).
    AvatarConnected { client_no: ClientNo },
    AvatarDisconnected { client_no: ClientNo },
    GlobalVariableChanged(VariableChange),
    ClientVariableChanged {
        client_no: ClientNo,
        change: VariableChange,
    },
    RpcReceived(RpcInvocation),
}

/// A received RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcInvocation {
    pub sender: ClientNo,
    pub function: String,
    pub args: Vec<String>,
}

impl RpcInvocation {
    /// Handlers filter on the function name themselves.
    pub fn is(&self, function: &str) -> bool {
        self.function == function
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Parse one argument; missing or malformed arguments are logged and yield `None`.
    pub fn parse_arg<T>(&self, index: usize) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.arg(index) else {
            tracing::warn!(
                function = %self.function,
                index,
                count = self.args.len(),
                "RPC argument missing"
            );
            return None;
        };
        parse_value(&self.function, raw)
    }
}
