//! NetSync Client
//!
//! The [`Session`] facade: a process-wide handle for shared variables, RPCs,
//! avatar transforms and presence, driven from the host application's frame
//! loop via [`Session::poll`].

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
mod connection;
pub mod event;
pub mod listener;
pub mod rtt;
pub mod samples;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use event::{RpcInvocation, SessionEvent};
pub use listener::{ListenerId, SessionListener};
pub use netsync_core::{ClientNo, Transform, VariableChange};
pub use netsync_proto::RpcTarget;
pub use session::{Session, SessionError};
