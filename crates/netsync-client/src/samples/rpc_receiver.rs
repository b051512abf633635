use std::collections::VecDeque;

use netsync_core::{Rgba, format_float};

use crate::event::{RpcInvocation, SessionEvent};
use crate::listener::SessionListener;
use crate::session::Session;

const DEFAULT_MESSAGE_CAPACITY: usize = 32;

/// Handles the `SetColor` and `LogMessage` RPCs; other functions are ignored.
#[derive(Debug, Clone)]
pub struct RpcReceiver {
    color: Rgba,
    messages: VecDeque<String>,
    capacity: usize,
    malformed: usize,
}

impl Default for RpcReceiver {
    fn default() -> Self {
        Self {
            color: Rgba::WHITE,
            messages: VecDeque::new(),
            capacity: DEFAULT_MESSAGE_CAPACITY,
            malformed: 0,
        }
    }
}

impl RpcReceiver {
    pub const SET_COLOR: &'static str = "SetColor";
    pub const LOG_MESSAGE: &'static str = "LogMessage";

    pub fn color(&self) -> Rgba {
        self.color
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    /// Count of invocations dropped for bad arguments.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Ask every other participant to paint their object `color`.
    pub fn send_color(session: &Session, color: Rgba) -> bool {
        let args = [color.r, color.g, color.b, color.a].map(format_float);
        session.rpc(Self::SET_COLOR, &args)
    }

    pub fn send_message(session: &Session, text: &str) -> bool {
        session.rpc(Self::LOG_MESSAGE, &[text])
    }

    fn handle(&mut self, rpc: &RpcInvocation) {
        if rpc.is(Self::SET_COLOR) {
            match Rgba::from_components(&rpc.function, &rpc.args) {
                Some(color) => self.color = color,
                None => self.malformed += 1,
            }
        } else if rpc.is(Self::LOG_MESSAGE) {
            if self.messages.len() >= self.capacity {
                self.messages.pop_front();
            }
            self.messages
                .push_back(format!("[{}] {}", rpc.sender, rpc.args.join(" ")));
        }
    }
}

impl SessionListener for RpcReceiver {
    fn on_event(&mut self, _session: &Session, event: &SessionEvent) {
        if let SessionEvent::RpcReceived(rpc) = event {
            self.handle(rpc);
        }
    }
}
