use netsync_core::{format_float, parse_value};

use crate::event::SessionEvent;
use crate::listener::SessionListener;
use crate::session::Session;

/// Shares one uniform scale through a global variable.
#[derive(Debug, Clone)]
pub struct ScaleSync {
    variable: String,
    scale: f32,
}

impl Default for ScaleSync {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VARIABLE)
    }
}

impl ScaleSync {
    pub const DEFAULT_VARIABLE: &'static str = "Scale";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            scale: 1.0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Ask the room to adopt `scale`. Applied locally when the server echoes it.
    pub fn publish(&self, session: &Session, scale: f32) -> bool {
        session.set_global_variable(&self.variable, &format_float(scale))
    }

    fn apply(&mut self, raw: &str) {
        match parse_value::<f32>(&self.variable, raw) {
            Some(scale) if scale.is_finite() => self.scale = scale,
            Some(scale) => tracing::warn!(variable = %self.variable, scale, "Ignoring non-finite scale"),
            None => {}
        }
    }
}

impl SessionListener for ScaleSync {
    fn on_event(&mut self, _session: &Session, event: &SessionEvent) {
        if let SessionEvent::GlobalVariableChanged(change) = event
            && change.name == self.variable
        {
            self.apply(&change.current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use netsync_core::VariableChange;

    use crate::config::SessionConfig;

    fn changed(name: &str, value: &str) -> SessionEvent {
        SessionEvent::GlobalVariableChanged(VariableChange {
            name: name.to_string(),
            previous: None,
            current: value.to_string(),
        })
    }

    #[test]
    fn test_follows_global_variable() {
        let session = Session::new(SessionConfig::default());
        let mut sync = ScaleSync::default();

        sync.on_event(&session, &changed("Scale", "2.5"));
        assert!((sync.scale() - 2.5).abs() < f32::EPSILON);

        sync.on_event(&session, &changed("Other", "9"));
        assert!((sync.scale() - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_malformed_scale_keeps_previous() {
        let session = Session::new(SessionConfig::default());
        let mut sync = ScaleSync::new("CubeScale");

        sync.on_event(&session, &changed("CubeScale", "0.5"));
        sync.on_event(&session, &changed("CubeScale", "large"));
        sync.on_event(&session, &changed("CubeScale", "NaN"));
        assert!((sync.scale() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_publish_offline_fails() {
        let session = Session::new(SessionConfig::default());
        assert!(!ScaleSync::default().publish(&session, 3.0));
    }
}
