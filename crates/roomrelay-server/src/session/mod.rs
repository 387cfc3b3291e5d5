//! Per-connection protocol handling: authentication, room requests, chat
//! relay and teardown.

pub mod handler;

pub use handler::{SessionHandler, SessionSettings};
