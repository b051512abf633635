use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use netsync_core::{ClientNo, parse_value};

use crate::event::SessionEvent;
use crate::listener::SessionListener;
use crate::session::Session;

/// Presentation mode a participant is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XrMode {
    /// Fully virtual.
    #[default]
    Vr,
    /// Passthrough mixed reality.
    Mr,
}

impl XrMode {
    pub fn toggled(self) -> Self {
        match self {
            XrMode::Vr => XrMode::Mr,
            XrMode::Mr => XrMode::Vr,
        }
    }
}

impl fmt::Display for XrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            XrMode::Vr => "VR",
            XrMode::Mr => "MR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseXrModeError(String);

impl fmt::Display for ParseXrModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown XR mode '{}'", self.0)
    }
}

impl FromStr for XrMode {
    type Err = ParseXrModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VR" => Ok(XrMode::Vr),
            "MR" => Ok(XrMode::Mr),
            _ => Err(ParseXrModeError(s.to_string())),
        }
    }
}

/// Publishes this session's VR/MR mode and tracks everyone else's.
#[derive(Debug, Clone)]
pub struct XrModeSwitch {
    variable: String,
    local: XrMode,
    modes: BTreeMap<ClientNo, XrMode>,
}

impl Default for XrModeSwitch {
    fn default() -> Self {
        Self {
            variable: Self::DEFAULT_VARIABLE.to_string(),
            local: XrMode::default(),
            modes: BTreeMap::new(),
        }
    }
}

impl XrModeSwitch {
    pub const DEFAULT_VARIABLE: &'static str = "XrMode";

    pub fn local_mode(&self) -> XrMode {
        self.local
    }

    pub fn mode_of(&self, client_no: ClientNo) -> Option<XrMode> {
        self.modes.get(&client_no).copied()
    }

    pub fn set_mode(&mut self, session: &Session, mode: XrMode) -> bool {
        self.local = mode;
        session.set_client_variable(&self.variable, &mode.to_string())
    }

    /// Flip the local mode. The flag is false when the new mode could not be sent.
    pub fn toggle(&mut self, session: &Session) -> (XrMode, bool) {
        let mode = self.local.toggled();
        let sent = self.set_mode(session, mode);
        (mode, sent)
    }
}

impl SessionListener for XrModeSwitch {
    fn on_event(&mut self, session: &Session, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { .. } => {
                let mode = self.local;
                self.set_mode(session, mode);
            }
            SessionEvent::ClientVariableChanged { client_no, change }
                if change.name == self.variable =>
            {
                if let Some(mode) = parse_value::<XrMode>(&self.variable, &change.current) {
                    self.modes.insert(*client_no, mode);
                }
            }
            SessionEvent::AvatarDisconnected { client_no } => {
                self.modes.remove(client_no);
            }
            SessionEvent::Disconnected { .. } => self.modes.clear(),
            _ => {}
        }
    }
}
