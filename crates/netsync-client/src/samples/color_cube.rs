use std::collections::BTreeMap;
use std::time::Instant;

use netsync_core::{ClientNo, Rgba, parse_value};
use rand::Rng;

use crate::event::SessionEvent;
use crate::listener::SessionListener;
use crate::session::Session;

/// Per-participant cube color carried in a client variable.
///
/// A newly seen avatar is initialised one tick after its announcement, once
/// the variables delivered alongside it have been applied.
#[derive(Debug, Clone)]
pub struct ColorCube {
    variable: String,
    colors: BTreeMap<ClientNo, Rgba>,
    awaiting_spawn: Vec<ClientNo>,
}

impl Default for ColorCube {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VARIABLE)
    }
}

impl ColorCube {
    pub const DEFAULT_VARIABLE: &'static str = "Color";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            colors: BTreeMap::new(),
            awaiting_spawn: Vec::new(),
        }
    }

    pub fn color_of(&self, client_no: ClientNo) -> Option<Rgba> {
        self.colors.get(&client_no).copied()
    }

    pub fn colors(&self) -> &BTreeMap<ClientNo, Rgba> {
        &self.colors
    }

    /// Pick a random opaque color for this session's cube and publish it.
    pub fn randomize(&self, session: &Session) -> Option<Rgba> {
        let mut rng = rand::rng();
        let color = Rgba::rgb(rng.random(), rng.random(), rng.random());
        self.publish(session, color).then_some(color)
    }

    pub fn publish(&self, session: &Session, color: Rgba) -> bool {
        session.set_client_variable(&self.variable, &color.to_string())
    }

    fn apply(&mut self, client_no: ClientNo, raw: &str) {
        if raw.is_empty() {
            return;
        }
        if let Some(color) = parse_value::<Rgba>(&self.variable, raw) {
            self.colors.insert(client_no, color);
        }
    }
}

impl SessionListener for ColorCube {
    fn on_event(&mut self, _session: &Session, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { client_no } | SessionEvent::AvatarConnected { client_no } => {
                self.awaiting_spawn.push(*client_no);
            }
            SessionEvent::AvatarDisconnected { client_no } => {
                self.colors.remove(client_no);
                self.awaiting_spawn.retain(|c| c != client_no);
            }
            SessionEvent::ClientVariableChanged { client_no, change }
                if change.name == self.variable =>
            {
                self.apply(*client_no, &change.current);
            }
            SessionEvent::Disconnected { .. } => {
                self.colors.clear();
                self.awaiting_spawn.clear();
            }
            _ => {}
        }
    }

    fn on_tick(&mut self, session: &Session, _now: Instant) {
        for client_no in std::mem::take(&mut self.awaiting_spawn) {
            let raw = session.get_client_variable_of(client_no, &self.variable, "");
            self.apply(client_no, &raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use netsync_core::VariableChange;

    use crate::config::SessionConfig;

    fn color_changed(client_no: ClientNo, value: &str) -> SessionEvent {
        SessionEvent::ClientVariableChanged {
            client_no,
            change: VariableChange {
                name: "Color".to_string(),
                previous: None,
                current: value.to_string(),
            },
        }
    }

    #[test]
    fn test_tracks_colors_per_client() {
        let session = Session::new(SessionConfig::default());
        let mut cube = ColorCube::default();

        cube.on_event(&session, &color_changed(2, "1,0,0,1"));
        cube.on_event(&session, &color_changed(3, "0,0,1"));
        assert_eq!(cube.color_of(2), Some(Rgba::RED));
        assert_eq!(cube.color_of(3), Some(Rgba::BLUE));

        cube.on_event(&session, &SessionEvent::AvatarDisconnected { client_no: 2 });
        assert_eq!(cube.color_of(2), None);
        assert_eq!(cube.colors().len(), 1);
    }

    #[test]
    fn test_malformed_color_ignored() {
        let session = Session::new(SessionConfig::default());
        let mut cube = ColorCube::default();

        cube.on_event(&session, &color_changed(2, "0,1,0"));
        cube.on_event(&session, &color_changed(2, "green"));
        cube.on_event(&session, &color_changed(2, "1,1"));
        assert_eq!(cube.color_of(2), Some(Rgba::GREEN));
    }

    #[test]
    fn test_spawn_waits_for_tick() {
        let session = Session::new(SessionConfig::default());
        let mut cube = ColorCube::default();

        cube.on_event(&session, &SessionEvent::AvatarConnected { client_no: 4 });
        assert_eq!(cube.awaiting_spawn, vec![4]);
        cube.on_tick(&session, Instant::now());
        assert!(cube.awaiting_spawn.is_empty());
        // nothing published for client 4 in this offline session
        assert_eq!(cube.color_of(4), None);
    }
}
