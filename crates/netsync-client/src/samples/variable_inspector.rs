use std::collections::BTreeMap;
use std::fmt::Write as _;

use netsync_core::ClientNo;

use crate::session::Session;

/// Read-only text dump of the replicated variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableInspector;

impl VariableInspector {
    pub fn render_globals(session: &Session) -> String {
        render_section("Globals", &session.get_all_global_variables())
    }

    pub fn render_client(session: &Session, client_no: ClientNo) -> String {
        let title = if session.client_no() == Some(client_no) {
            format!("Client {client_no} (self)")
        } else {
            format!("Client {client_no}")
        };
        render_section(&title, &session.get_all_client_variables(client_no))
    }

    /// Globals followed by every connected client in ascending order.
    pub fn render_all(session: &Session) -> String {
        let mut out = Self::render_globals(session);
        for client_no in session.get_connected_client_ids() {
            out.push_str(&Self::render_client(session, client_no));
        }
        out
    }
}

fn render_section(title: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = format!("{title}\n");
    if variables.is_empty() {
        out.push_str("  (none)\n");
    }
    for (name, value) in variables {
        let _ = writeln!(out, "  {name} = {value}");
    }
    out
}
