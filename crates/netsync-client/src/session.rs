//! The session facade.
//!
//! One [`Session`] per process is reachable through [`Session::instance`];
//! tests and tools may create private ones with [`Session::new`]. Variables are
//! server-authoritative: writes are sent to the server and become visible
//! locally only when the server echoes them back, so every participant
//! observes the same order of changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;
use std::time::Instant;

use netsync_core::{
    ClientNo, SendThrottle, Transform, TransformBuffer, VariableChange, VariableError,
    VariableLimits, VariableStore, VariableTable,
};
use netsync_proto::{ClientMessage, CodecError, FrameError, RpcTarget, ServerMessage};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;

use crate::config::SessionConfig;
use crate::connection::{self, ConnectionHandle, Inbound};
use crate::event::{RpcInvocation, SessionEvent};
use crate::listener::{FnListener, ListenerId, ListenerRegistry, SessionListener};
use crate::rtt::RttTracker;

static INSTANCE: OnceLock<Session> = OnceLock::new();

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection timed out")]
    Timeout,

    #[error("Server closed the connection")]
    Closed,

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Variable(#[from] VariableError),
}

struct Link {
    handle: ConnectionHandle,
    inbound: tokio::sync::mpsc::UnboundedReceiver<Inbound>,
}

/// Replicated room state.
struct Replica {
    client_no: Option<ClientNo>,
    clients: BTreeSet<ClientNo>,
    variables: VariableStore,
    transforms: HashMap<ClientNo, TransformBuffer>,
    local_transform: Option<Transform>,
    transform_dirty: bool,
    transform_throttle: SendThrottle,
    rtt: RttTracker,
}

impl Replica {
    fn new(config: &SessionConfig) -> Self {
        Self {
            client_no: None,
            clients: BTreeSet::new(),
            variables: VariableStore::new(config.limits),
            transforms: HashMap::new(),
            local_transform: None,
            transform_dirty: false,
            transform_throttle: SendThrottle::from_rate(config.transform_send_rate_hz),
            rtt: RttTracker::new(config.ping_interval.as_secs_f64()),
        }
    }

    fn reset(&mut self) {
        self.client_no = None;
        self.clients.clear();
        self.variables.clear();
        self.transforms.clear();
        self.transform_dirty = self.local_transform.is_some();
        self.transform_throttle.reset();
        self.rtt.clear();
    }
}

pub struct Session {
    config: SessionConfig,
    epoch: Instant,
    replica: RwLock<Replica>,
    link: Mutex<Option<Link>>,
    /// Events produced outside `poll` (connect, disconnect), delivered on the next poll.
    pending: Mutex<Vec<SessionEvent>>,
    listeners: Mutex<ListenerRegistry>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            replica: RwLock::new(Replica::new(&config)),
            config,
            epoch: Instant::now(),
            link: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            listeners: Mutex::new(ListenerRegistry::default()),
        }
    }

    /// The process-wide session, created with default settings on first use.
    pub fn instance() -> &'static Session {
        INSTANCE.get_or_init(|| Session::new(SessionConfig::default()))
    }

    /// Create the process-wide session with `config`.
    ///
    /// Has no effect on the configuration if the instance already exists.
    pub fn init(config: SessionConfig) -> &'static Session {
        let mut created = false;
        let session = INSTANCE.get_or_init(|| {
            created = true;
            Session::new(config)
        });
        if !created {
            tracing::warn!("Session already initialized, keeping existing configuration");
        }
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect to the configured server and room.
    ///
    /// The connection notifications (`Connected`, one `AvatarConnected` per
    /// participant already present, then one change per existing variable) are
    /// delivered by the next [`poll`](Self::poll).
    pub async fn connect(&self) -> Result<ClientNo, SessionError> {
        if self.link.lock().is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        let established = connection::establish(&self.config).await?;
        let client_no = established.client_no;
        let snapshot = established.snapshot;
        let mut events = vec![SessionEvent::Connected { client_no }];
        events.extend(
            snapshot
                .clients
                .iter()
                .filter(|c| **c != client_no)
                .map(|c| SessionEvent::AvatarConnected { client_no: *c }),
        );
        events.extend(snapshot.globals.iter().map(|(name, value)| {
            SessionEvent::GlobalVariableChanged(VariableChange {
                name: name.clone(),
                previous: None,
                current: value.clone(),
            })
        }));
        for (owner, pairs) in &snapshot.client_variables {
            events.extend(pairs.iter().map(|(name, value)| {
                SessionEvent::ClientVariableChanged {
                    client_no: *owner,
                    change: VariableChange {
                        name: name.clone(),
                        previous: None,
                        current: value.clone(),
                    },
                }
            }));
        }

        {
            let mut link = self.link.lock();
            if link.is_some() {
                established.handle.close();
                return Err(SessionError::AlreadyConnected);
            }

            let mut replica = self.replica.write();
            replica.reset();
            replica.client_no = Some(client_no);
            replica.clients = snapshot.clients.iter().copied().collect();
            replica.clients.insert(client_no);
            replica.variables.load_snapshot(&snapshot);

            *link = Some(Link {
                handle: established.handle,
                inbound: established.inbound,
            });
            self.pending.lock().extend(events);
        }

        tracing::info!(
            client_no,
            room = %self.config.room_id,
            server = %self.config.server_addr,
            "Connected"
        );
        Ok(client_no)
    }

    /// Close the connection. Returns false if there was none.
    pub fn disconnect(&self) -> bool {
        let Some(link) = self.link.lock().take() else {
            return false;
        };
        link.handle.close();

        let mut events = Vec::new();
        self.teardown("disconnected locally".to_string(), &mut events);
        self.pending.lock().extend(events);
        tracing::info!("Disconnected");
        true
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// This session's identifier within the room, once connected.
    pub fn client_no(&self) -> Option<ClientNo> {
        self.replica.read().client_no
    }

    /// Every participant in the room, this session included, ascending.
    pub fn get_connected_client_ids(&self) -> Vec<ClientNo> {
        self.replica.read().clients.iter().copied().collect()
    }

    /// Smoothed round-trip time to the server.
    pub fn rtt_ms(&self) -> Option<u32> {
        self.replica.read().rtt.rtt_ms()
    }

    /// Most recent unsmoothed round-trip sample.
    pub fn last_rtt_ms(&self) -> Option<u32> {
        self.replica.read().rtt.last_rtt_ms()
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Request a room-wide variable change. Invalid requests are logged and
    /// reported as `false`.
    pub fn set_global_variable(&self, name: &str, value: &str) -> bool {
        report(name, self.try_set_global_variable(name, value))
    }

    pub fn try_set_global_variable(&self, name: &str, value: &str) -> Result<(), SessionError> {
        {
            let replica = self.replica.read();
            let limits = replica.variables.limits();
            check_write(replica.variables.globals(), name, value, limits, limits.max_global_variables)?;
        }
        self.send(&ClientMessage::SetGlobalVariable {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Current value of a room-wide variable, or `default`.
    pub fn get_global_variable(&self, name: &str, default: &str) -> String {
        self.replica.read().variables.globals().get_or(name, default)
    }

    pub fn get_all_global_variables(&self) -> BTreeMap<String, String> {
        self.replica.read().variables.globals().to_map()
    }

    /// Request a change to a variable owned by this session.
    pub fn set_client_variable(&self, name: &str, value: &str) -> bool {
        report(name, self.try_set_client_variable(name, value))
    }

    pub fn try_set_client_variable(&self, name: &str, value: &str) -> Result<(), SessionError> {
        {
            let replica = self.replica.read();
            let client_no = replica.client_no.ok_or(SessionError::NotConnected)?;
            let limits = replica.variables.limits();
            let empty = VariableTable::new();
            let table = replica.variables.client(client_no).unwrap_or(&empty);
            check_write(table, name, value, limits, limits.max_client_variables)?;
        }
        self.send(&ClientMessage::SetClientVariable {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// One of this session's own variables, or `default`.
    pub fn get_client_variable(&self, name: &str, default: &str) -> String {
        match self.client_no() {
            Some(client_no) => self.get_client_variable_of(client_no, name, default),
            None => default.to_string(),
        }
    }

    /// A variable owned by any participant, or `default`.
    pub fn get_client_variable_of(&self, client_no: ClientNo, name: &str, default: &str) -> String {
        self.replica
            .read()
            .variables
            .client(client_no)
            .map_or_else(|| default.to_string(), |table| table.get_or(name, default))
    }

    /// Every variable owned by `client_no`; empty for unknown clients.
    pub fn get_all_client_variables(&self, client_no: ClientNo) -> BTreeMap<String, String> {
        self.replica
            .read()
            .variables
            .client(client_no)
            .map(VariableTable::to_map)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // RPC
    // ------------------------------------------------------------------

    /// Invoke `function` on every other participant.
    pub fn rpc<S: AsRef<str>>(&self, function: &str, args: &[S]) -> bool {
        self.rpc_to(RpcTarget::Others, function, args)
    }

    pub fn rpc_to<S: AsRef<str>>(&self, target: RpcTarget, function: &str, args: &[S]) -> bool {
        match self.try_rpc_to(target, function, args) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(function, error = %e, "RPC not sent");
                false
            }
        }
    }

    pub fn try_rpc_to<S: AsRef<str>>(
        &self,
        target: RpcTarget,
        function: &str,
        args: &[S],
    ) -> Result<(), SessionError> {
        if function.is_empty() {
            return Err(SessionError::Protocol("empty RPC function name".to_string()));
        }
        self.send(&ClientMessage::Rpc {
            target,
            function: function.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        })
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    /// Update this session's avatar pose; sent at the configured rate.
    pub fn set_local_transform(&self, transform: Transform) {
        let mut replica = self.replica.write();
        if replica.local_transform != Some(transform) {
            replica.local_transform = Some(transform);
            replica.transform_dirty = true;
        }
    }

    /// Interpolated pose of a remote avatar, rendered slightly in the past.
    pub fn remote_transform(&self, client_no: ClientNo) -> Option<Transform> {
        let render_time = self.now_secs() - self.config.interpolation_delay.as_secs_f64();
        self.replica
            .read()
            .transforms
            .get(&client_no)
            .and_then(|buffer| buffer.sample(render_time))
    }

    // ------------------------------------------------------------------
    // Listeners and polling
    // ------------------------------------------------------------------

    pub fn subscribe(&self, listener: impl SessionListener + 'static) -> ListenerId {
        self.listeners.lock().add(Box::new(listener))
    }

    pub fn subscribe_fn<F>(&self, f: F) -> ListenerId
    where
        F: FnMut(&Session, &SessionEvent) + Send + 'static,
    {
        self.subscribe(FnListener(f))
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().remove(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Process everything received since the last call, send due heartbeats
    /// and transform updates, then notify listeners.
    ///
    /// Call once per frame. Returns the number of events delivered.
    pub fn poll(&self) -> usize {
        let now = Instant::now();
        let now_secs = self.now_secs();
        let mut events;
        let mut closed = None;
        {
            let mut link = self.link.lock();
            events = std::mem::take(&mut *self.pending.lock());
            if let Some(active) = link.as_mut() {
                loop {
                    match active.inbound.try_recv() {
                        Ok(Inbound::Message(msg)) => self.apply(msg, now_secs, &mut events),
                        Ok(Inbound::Closed(reason)) => {
                            closed = Some(reason);
                            break;
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            closed = Some("connection task ended".to_string());
                            break;
                        }
                    }
                }
                if closed.is_some() {
                    *link = None;
                } else {
                    self.flush_outgoing(&active.handle, now_secs);
                }
            }
        }
        if let Some(reason) = closed {
            tracing::warn!(%reason, "Connection lost");
            self.teardown(reason, &mut events);
        }

        self.dispatch(&events, now);
        events.len()
    }

    fn apply(&self, msg: ServerMessage, now_secs: f64, events: &mut Vec<SessionEvent>) {
        let mut replica = self.replica.write();
        match msg {
            ServerMessage::ClientJoined { client_no } => {
                if replica.clients.insert(client_no) && replica.client_no != Some(client_no) {
                    events.push(SessionEvent::AvatarConnected { client_no });
                }
            }
            ServerMessage::ClientLeft { client_no } => {
                replica.variables.remove_client(client_no);
                replica.transforms.remove(&client_no);
                if replica.clients.remove(&client_no) {
                    events.push(SessionEvent::AvatarDisconnected { client_no });
                }
            }
            ServerMessage::GlobalVariableChanged {
                sender,
                name,
                previous,
                current,
            } => {
                tracing::trace!(sender, %name, "Global variable changed");
                replica.variables.globals_mut().apply(&name, &current);
                events.push(SessionEvent::GlobalVariableChanged(VariableChange {
                    name,
                    previous,
                    current,
                }));
            }
            ServerMessage::ClientVariableChanged {
                client_no,
                name,
                previous,
                current,
            } => {
                replica.variables.client_mut(client_no).apply(&name, &current);
                events.push(SessionEvent::ClientVariableChanged {
                    client_no,
                    change: VariableChange {
                        name,
                        previous,
                        current,
                    },
                });
            }
            ServerMessage::RpcDelivered {
                sender,
                function,
                args,
            } => events.push(SessionEvent::RpcReceived(RpcInvocation {
                sender,
                function,
                args,
            })),
            ServerMessage::TransformUpdate {
                client_no,
                transform,
            } => {
                replica
                    .transforms
                    .entry(client_no)
                    .or_default()
                    .push(now_secs, transform);
            }
            ServerMessage::Pong { timestamp } => {
                if let Some(rtt) = replica.rtt.process_pong(timestamp, now_secs) {
                    tracing::trace!(rtt_ms = rtt, "Pong");
                }
            }
            ServerMessage::Welcome { .. } | ServerMessage::Rejected { .. } => {
                tracing::warn!(?msg, "Ignoring handshake message on established connection");
            }
        }
    }

    fn flush_outgoing(&self, handle: &ConnectionHandle, now_secs: f64) {
        let mut replica = self.replica.write();

        if replica.rtt.should_ping(now_secs) {
            match handle.send(&ClientMessage::Ping { timestamp: now_secs }) {
                Ok(()) => replica.rtt.record_ping_sent(now_secs),
                Err(e) => tracing::warn!(error = %e, "Ping not sent"),
            }
        }

        if replica.transform_dirty
            && let Some(transform) = replica.local_transform
            && replica.transform_throttle.try_send(now_secs)
        {
            match handle.send(&ClientMessage::Transform(transform)) {
                Ok(()) => replica.transform_dirty = false,
                Err(e) => tracing::warn!(error = %e, "Transform not sent"),
            }
        }
    }

    /// Forget the room and queue departure notifications.
    fn teardown(&self, reason: String, events: &mut Vec<SessionEvent>) {
        let mut replica = self.replica.write();
        let own = replica.client_no;
        events.extend(
            replica
                .clients
                .iter()
                .filter(|c| Some(**c) != own)
                .map(|c| SessionEvent::AvatarDisconnected { client_no: *c }),
        );
        replica.reset();
        events.push(SessionEvent::Disconnected { reason });
    }

    /// Listeners run with no session lock held so they can call back in.
    fn dispatch(&self, events: &[SessionEvent], now: Instant) {
        let mut active = self.listeners.lock().check_out();
        for event in events {
            tracing::debug!(?event, "Session event");
            for (_, listener) in &mut active {
                listener.on_event(self, event);
            }
        }
        for (_, listener) in &mut active {
            listener.on_tick(self, now);
        }
        self.listeners.lock().check_in(active);
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), SessionError> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or(SessionError::NotConnected)?;
        link.handle.send(msg)
    }

    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Validate a write against the local replica before sending it.
fn check_write(
    table: &VariableTable,
    name: &str,
    value: &str,
    limits: &VariableLimits,
    capacity: usize,
) -> Result<(), VariableError> {
    limits.validate(name, value)?;
    if table.get(name).is_none() && table.len() >= capacity {
        return Err(VariableError::TooManyVariables { max: capacity });
    }
    Ok(())
}

fn report(name: &str, result: Result<(), SessionError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(name, error = %e, "Variable write rejected");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offline() -> Session {
        Session::new(SessionConfig::default())
    }

    #[test]
    fn test_offline_reads_return_defaults() {
        let session = offline();
        assert!(!session.is_connected());
        assert_eq!(session.client_no(), None);
        assert_eq!(session.get_global_variable("Scale", "1"), "1");
        assert_eq!(session.get_client_variable("Color", "white"), "white");
        assert!(session.get_all_client_variables(4).is_empty());
        assert!(session.get_connected_client_ids().is_empty());
    }

    #[test]
    fn test_offline_writes_fail_softly() {
        let session = offline();
        assert!(!session.set_global_variable("Scale", "2"));
        assert!(!session.set_client_variable("Color", "1,0,0,1"));
        assert!(!session.rpc("Ping", &["a"]));
        assert!(matches!(
            session.try_set_global_variable("Scale", "2"),
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            session.try_set_client_variable("Color", "x"),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_invalid_names_rejected_before_sending() {
        let session = offline();
        assert!(matches!(
            session.try_set_global_variable("", "1"),
            Err(SessionError::Variable(VariableError::EmptyName))
        ));
        let long = "x".repeat(VariableLimits::default().max_value_len + 1);
        assert!(matches!(
            session.try_set_global_variable("Blob", &long),
            Err(SessionError::Variable(VariableError::ValueTooLong { .. }))
        ));
    }

    #[test]
    fn test_disconnect_without_connection() {
        let session = offline();
        assert!(!session.disconnect());
        assert_eq!(session.poll(), 0);
    }

    #[test]
    fn test_apply_updates_replica_and_emits_events() {
        let session = offline();
        let mut events = Vec::new();
        session.apply(ServerMessage::ClientJoined { client_no: 2 }, 0.0, &mut events);
        session.apply(
            ServerMessage::GlobalVariableChanged {
                sender: 2,
                name: "Scale".to_string(),
                previous: None,
                current: "1.5".to_string(),
            },
            0.0,
            &mut events,
        );
        session.apply(
            ServerMessage::ClientVariableChanged {
                client_no: 2,
                name: "Color".to_string(),
                previous: None,
                current: "1,0,0,1".to_string(),
            },
            0.0,
            &mut events,
        );

        assert_eq!(session.get_global_variable("Scale", "1"), "1.5");
        assert_eq!(session.get_client_variable_of(2, "Color", ""), "1,0,0,1");
        assert_eq!(session.get_connected_client_ids(), vec![2]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SessionEvent::AvatarConnected { client_no: 2 });

        session.apply(ServerMessage::ClientLeft { client_no: 2 }, 0.0, &mut events);
        assert!(session.get_all_client_variables(2).is_empty());
        assert_eq!(events[3], SessionEvent::AvatarDisconnected { client_no: 2 });
    }

    #[test]
    fn test_transform_updates_are_buffered() {
        let session = offline();
        let mut events = Vec::new();
        let transform = Transform::from_position([1.0, 2.0, 3.0]);
        session.apply(
            ServerMessage::TransformUpdate {
                client_no: 5,
                transform,
            },
            0.0,
            &mut events,
        );
        assert!(events.is_empty());
        assert_eq!(session.remote_transform(5), Some(transform));
        assert_eq!(session.remote_transform(6), None);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself_during_dispatch() {
        let session = offline();
        let calls = Arc::new(AtomicUsize::new(0));
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let calls_in = Arc::clone(&calls);
        let slot_in = Arc::clone(&id_slot);
        let id = session.subscribe_fn(move |session, _event| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot_in.lock() {
                session.unsubscribe(id);
            }
        });
        *id_slot.lock() = Some(id);

        session.pending.lock().push(SessionEvent::AvatarConnected { client_no: 1 });
        assert_eq!(session.poll(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.listener_count(), 0);

        session.pending.lock().push(SessionEvent::AvatarConnected { client_no: 2 });
        session.poll();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_subscribed_during_dispatch_is_kept() {
        let session = offline();
        let added = Arc::new(AtomicUsize::new(0));
        let added_in = Arc::clone(&added);
        session.subscribe_fn(move |session, _event| {
            if added_in.fetch_add(1, Ordering::SeqCst) == 0 {
                session.subscribe_fn(|_, _| {});
            }
        });

        session.pending.lock().push(SessionEvent::AvatarConnected { client_no: 1 });
        session.poll();
        assert_eq!(session.listener_count(), 2);
    }
}
