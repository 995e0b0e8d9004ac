//! Parley core
//!
//! Transport-agnostic pieces of a two-party call: the signaling wire
//! protocol, the perfect negotiation state machine and the local media model.
//! Peer-connection and WebSocket bindings live in `parley-webrtc`; the room
//! relay lives in `parley-signaling-server`.

#![warn(clippy::all)]

pub mod error;
pub mod media;
pub mod negotiation;
pub mod protocol;

pub use error::{Error, Result};
pub use media::{LocalMedia, LocalTrack, MediaSource, StaticMediaSource, TrackKind, TrackSource};
pub use negotiation::{
    run_session, spawn_signal_pump, CallEvent, CallIntent, ConnectionState, NegotiationEndpoint,
    NegotiationPhase, Negotiator, PeerSession, RemoteTrack, SessionEvent, SessionFlow,
    SessionHandle, SignalingState, SimulatedEndpoint,
};
pub use protocol::{IceCandidate, MessageKind, Role, SdpType, SessionDescription, SignalingMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
