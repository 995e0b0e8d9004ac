//! Perfect negotiation
//!
//! - [`PeerSession`]: role and collision flags for one participant
//! - [`Negotiator`]: event-driven state machine over a [`NegotiationEndpoint`]
//! - [`run_session`]: single-consumer loop that owns the negotiator
//! - [`SimulatedEndpoint`]: in-memory endpoint for tests and headless runs

mod endpoint;
mod events;
mod machine;
mod session;
mod sim;

pub use endpoint::{ConnectionState, NegotiationEndpoint, SignalingState};
pub use events::{CallEvent, CallIntent, RemoteTrack, SessionEvent, SessionHandle};
pub use machine::{run_session, spawn_signal_pump, Negotiator, SessionFlow};
pub use session::{NegotiationPhase, PeerSession};
pub use sim::SimulatedEndpoint;
