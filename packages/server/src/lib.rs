//! Multi-room WebSocket broadcast server.
//!
//! Clients join a named room (or the always-present lobby) and receive
//! status, user-list and message broadcasts for that room. Lobby subscribers
//! additionally receive a live directory of all other rooms.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
