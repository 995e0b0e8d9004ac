//! Parley signaling relay
//!
//! Rooms keyed by an opaque id, at most `room_capacity` WebSocket peers each.
//! The first peer of an empty room is told to offer, later peers to answer,
//! and every other frame is forwarded verbatim to the rest of the room.

#![warn(clippy::all)]

pub mod config;
pub mod handler;
pub mod rooms;
pub mod server;

pub use config::ServerConfig;
pub use rooms::{RoomFull, RoomRegistry};
pub use server::{ServerHandle, SignalingServer};
