//! Per-participant negotiation state

use super::endpoint::SignalingState;
use crate::protocol::Role;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationPhase {
    /// No description exchanged yet
    Idle,
    /// An offer is outstanding in either direction
    Negotiating,
    /// Last exchange completed
    Stable,
    /// Polite peer is discarding its own offer for the remote one
    RollingBack,
}

/// Perfect negotiation flags for one participant
///
/// Owned by exactly one [`Negotiator`](super::Negotiator); never shared.
#[derive(Debug, Clone)]
pub struct PeerSession {
    id: String,
    role: Option<Role>,

    /// True only while producing and sending our own offer
    pub making_offer: bool,

    /// Set when the last remote offer was discarded after a collision
    pub ignore_offer: bool,

    /// Kept for parity with the browser algorithm; not read
    pub is_setting_remote_answer_pending: bool,

    /// Negotiation was requested while the signaling state was not stable
    pub negotiation_pending: bool,

    signaling_state: SignalingState,
    phase: NegotiationPhase,
}

impl PeerSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: None,
            making_offer: false,
            ignore_offer: false,
            is_setting_remote_answer_pending: false,
            negotiation_pending: false,
            signaling_state: SignalingState::Stable,
            phase: NegotiationPhase::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether this peer yields on collision; impolite until a role is assigned
    pub fn is_polite(&self) -> bool {
        self.role.map(|r| r.is_polite()).unwrap_or(false)
    }

    /// Assign the role; a session's role never changes afterwards
    pub fn assign_role(&mut self, role: Role) -> Result<()> {
        match self.role {
            None => {
                self.role = Some(role);
                Ok(())
            }
            Some(existing) if existing == role => Ok(()),
            Some(existing) => Err(Error::RoleError(format!(
                "session {} already assigned {}, refusing {}",
                self.id, existing, role
            ))),
        }
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: NegotiationPhase) {
        self.phase = phase;
    }

    /// Record the endpoint's signaling state and derive the phase from it
    pub fn sync_signaling_state(&mut self, state: SignalingState) {
        self.signaling_state = state;
        self.phase = match state {
            SignalingState::Stable => {
                if self.phase == NegotiationPhase::Idle {
                    NegotiationPhase::Idle
                } else {
                    NegotiationPhase::Stable
                }
            }
            SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer => {
                NegotiationPhase::Negotiating
            }
            SignalingState::Closed => self.phase,
        };
    }

    /// Mark a completed offer/answer exchange
    pub fn mark_stable(&mut self) {
        self.signaling_state = SignalingState::Stable;
        self.phase = NegotiationPhase::Stable;
    }

    /// Collision test for an incoming description
    pub fn offer_collision(&self, is_offer: bool) -> bool {
        is_offer && (self.making_offer || !self.signaling_state.is_stable())
    }
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_is_immutable() {
        let mut session = PeerSession::new();
        assert!(session.role().is_none());
        session.assign_role(Role::Impolite).unwrap();
        session.assign_role(Role::Impolite).unwrap();
        let err = session.assign_role(Role::Polite).unwrap_err();
        assert!(matches!(err, Error::RoleError(_)));
        assert_eq!(session.role(), Some(Role::Impolite));
        assert!(!session.is_polite());
    }

    #[test]
    fn test_unassigned_peer_does_not_yield() {
        let mut session = PeerSession::new();
        assert!(!session.is_polite());
        session.assign_role(Role::Polite).unwrap();
        assert!(session.is_polite());
    }

    #[test]
    fn test_offer_collision() {
        let mut session = PeerSession::new();
        assert!(!session.offer_collision(true));

        session.making_offer = true;
        assert!(session.offer_collision(true));
        assert!(!session.offer_collision(false));

        session.making_offer = false;
        session.sync_signaling_state(SignalingState::HaveLocalOffer);
        assert!(session.offer_collision(true));
        assert_eq!(session.phase(), NegotiationPhase::Negotiating);
    }

    #[test]
    fn test_phase_follows_signaling_state() {
        let mut session = PeerSession::new();
        session.sync_signaling_state(SignalingState::Stable);
        assert_eq!(session.phase(), NegotiationPhase::Idle);

        session.sync_signaling_state(SignalingState::HaveRemoteOffer);
        session.sync_signaling_state(SignalingState::Stable);
        assert_eq!(session.phase(), NegotiationPhase::Stable);
    }
}
