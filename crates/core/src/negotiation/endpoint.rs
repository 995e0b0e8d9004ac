//! Peer connection seam
//!
//! The negotiator drives a [`NegotiationEndpoint`] and never touches the
//! peer-connection library directly. `parley-webrtc` implements it over
//! webrtc-rs; [`SimulatedEndpoint`](super::SimulatedEndpoint) implements it
//! in memory for tests.

use crate::media::{LocalTrack, TrackKind};
use crate::protocol::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSEP signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl SignalingState {
    pub fn is_stable(&self) -> bool {
        matches!(self, SignalingState::Stable)
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Aggregate peer connection state, as surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that mean media is no longer flowing
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Operations the negotiator needs from a peer connection
#[async_trait]
pub trait NegotiationEndpoint: Send + Sync {
    /// Current signaling state
    fn signaling_state(&self) -> SignalingState;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Roll back the pending local offer and apply `remote`
    ///
    /// Callers hold the session exclusively for the duration, so nothing is
    /// observed between the two steps.
    async fn rollback_and_apply(&self, remote: SessionDescription) -> Result<()> {
        self.set_local_description(SessionDescription::rollback())
            .await?;
        self.set_remote_description(remote).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Pending local description if any, else the current one
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Pending remote description if any, else the current one
    async fn remote_description(&self) -> Option<SessionDescription>;

    /// Attach a local track on a new sender
    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<()>;

    /// Swap the track on the existing sender of `kind`
    ///
    /// Returns `false` when no sender of that kind exists.
    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}
