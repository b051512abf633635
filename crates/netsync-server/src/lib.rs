//! NetSync relay server.
//!
//! Accepts TCP clients, groups them into rooms, keeps the authoritative
//! variable tables and fans out variable changes, RPCs and transforms.
//! A small HTTP inspector exposes room state as JSON.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod hub;
pub mod inspector;
pub mod room;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use hub::{Hub, HubError};
pub use room::{Room, RoomError};
pub use server::Server;
