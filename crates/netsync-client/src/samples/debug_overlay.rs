use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::event::SessionEvent;
use crate::listener::SessionListener;
use crate::session::Session;

const DEFAULT_REFRESH: Duration = Duration::from_millis(500);
const DEFAULT_LOG_LINES: usize = 8;

/// Text status panel: connection summary refreshed on an interval, plus the
/// most recent events.
#[derive(Debug, Clone)]
pub struct DebugOverlay {
    refresh: Duration,
    last_refresh: Option<Instant>,
    text: String,
    recent: VecDeque<String>,
    max_lines: usize,
}

impl Default for DebugOverlay {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH)
    }
}

impl DebugOverlay {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            last_refresh: None,
            text: String::new(),
            recent: VecDeque::new(),
            max_lines: DEFAULT_LOG_LINES,
        }
    }

    /// Last rendered panel.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    pub fn render(&self, session: &Session) -> String {
        let mut out = String::new();
        match session.client_no() {
            Some(client_no) => {
                let _ = writeln!(out, "Client: {client_no} (connected)");
            }
            None => out.push_str("Client: - (offline)\n"),
        }

        let ids: Vec<String> = session
            .get_connected_client_ids()
            .iter()
            .map(ToString::to_string)
            .collect();
        let _ = writeln!(out, "Clients: [{}]", ids.join(", "));

        out.push_str(&rtt_line(session.rtt_ms(), session.last_rtt_ms()));
        let _ = writeln!(out, "Globals: {}", session.get_all_global_variables().len());

        for line in &self.recent {
            let _ = writeln!(out, "> {line}");
        }
        out
    }

    fn record(&mut self, line: String) {
        if self.recent.len() >= self.max_lines {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
    }
}

fn rtt_line(smoothed: Option<u32>, last: Option<u32>) -> String {
    match (smoothed, last) {
        (Some(rtt), Some(last)) => format!("RTT: {rtt} ms (last {last} ms)\n"),
        (Some(rtt), None) => format!("RTT: {rtt} ms\n"),
        (None, _) => "RTT: -\n".to_string(),
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connected { client_no } => format!("connected as {client_no}"),
        SessionEvent::Disconnected { reason } => format!("disconnected: {reason}"),
        SessionEvent::AvatarConnected { client_no } => format!("client {client_no} joined"),
        SessionEvent::AvatarDisconnected { client_no } => format!("client {client_no} left"),
        SessionEvent::GlobalVariableChanged(change) => {
            format!("global {} = {}", change.name, change.current)
        }
        SessionEvent::ClientVariableChanged { client_no, change } => {
            format!("client {client_no} {} = {}", change.name, change.current)
        }
        SessionEvent::RpcReceived(rpc) => {
            format!("rpc {}({}) from {}", rpc.function, rpc.args.join(", "), rpc.sender)
        }
    }
}

impl SessionListener for DebugOverlay {
    fn on_event(&mut self, _session: &Session, event: &SessionEvent) {
        self.record(describe(event));
    }

    fn on_tick(&mut self, session: &Session, now: Instant) {
        let due = self
            .last_refresh
            .is_none_or(|last| now.saturating_duration_since(last) >= self.refresh);
        if due {
            self.text = self.render(session);
            self.last_refresh = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SessionConfig;

    #[test]
    fn test_refreshes_on_interval() {
        let session = Session::new(SessionConfig::default());
        let mut overlay = DebugOverlay::new(Duration::from_secs(1));
        let start = Instant::now();

        overlay.on_tick(&session, start);
        assert!(overlay.text().contains("offline"));

        overlay.on_event(&session, &SessionEvent::AvatarConnected { client_no: 2 });
        overlay.on_tick(&session, start + Duration::from_millis(500));
        assert!(!overlay.text().contains("client 2 joined"));

        overlay.on_tick(&session, start + Duration::from_secs(1));
        assert!(overlay.text().contains("client 2 joined"));
    }

    #[test]
    fn test_rtt_line_shows_last_sample() {
        assert_eq!(rtt_line(Some(60), Some(100)), "RTT: 60 ms (last 100 ms)\n");
        assert_eq!(rtt_line(None, None), "RTT: -\n");

        let session = Session::new(SessionConfig::default());
        assert!(DebugOverlay::default().render(&session).contains("RTT: -\n"));
    }

    #[test]
    fn test_recent_lines_are_bounded() {
        let session = Session::new(SessionConfig::default());
        let mut overlay = DebugOverlay::default();
        for client_no in 0..20 {
            overlay.on_event(&session, &SessionEvent::AvatarDisconnected { client_no });
        }
        let recent: Vec<&str> = overlay.recent().collect();
        assert_eq!(recent.len(), DEFAULT_LOG_LINES);
        assert_eq!(recent.last(), Some(&"client 19 left"));
    }
}
