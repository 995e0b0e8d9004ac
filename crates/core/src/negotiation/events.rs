//! Session event types
//!
//! [`SessionEvent`] is everything the negotiator reacts to: relayed frames,
//! endpoint callbacks and UI intents all funnel into one queue. [`CallEvent`]
//! flows the other way, from the negotiator to the UI.

use super::endpoint::ConnectionState;
use crate::media::TrackKind;
use crate::protocol::{IceCandidate, Role, SignalingMessage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A remote track that started arriving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub track_id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

/// Requests issued by the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallIntent {
    ToggleAudio,
    ToggleVideo,
    ToggleScreenShare,
    /// Screen capture was stopped outside the app
    ScreenShareEnded,
    SendChat(String),
    HangUp,
}

/// Input to [`Negotiator::handle_event`](super::Negotiator::handle_event)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Frame relayed by the signaling channel
    Signal(SignalingMessage),

    /// Candidate gathered by the local ICE agent; `None` ends gathering
    LocalCandidate(Option<IceCandidate>),

    /// Peer connection state changed
    ConnectionState(ConnectionState),

    /// Remote media arrived
    RemoteTrack(RemoteTrack),

    /// Local transceivers changed and an offer is needed
    NegotiationNeeded,

    /// UI request
    Intent(CallIntent),

    /// Signaling channel closed
    ChannelClosed,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Signal(msg) => msg.kind().as_str(),
            SessionEvent::LocalCandidate(_) => "local-candidate",
            SessionEvent::ConnectionState(_) => "connection-state",
            SessionEvent::RemoteTrack(_) => "remote-track",
            SessionEvent::NegotiationNeeded => "negotiation-needed",
            SessionEvent::Intent(_) => "intent",
            SessionEvent::ChannelClosed => "channel-closed",
        }
    }
}

/// Events emitted to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Relay assigned this session its role
    RoleAssigned { role: Role },

    /// New remote track, announced once per track id
    RemoteTrack(RemoteTrack),

    /// Connection state changed
    ConnectionStatus { state: ConnectionState },

    /// Chat text from the remote peer
    ChatReceived { text: String },

    /// Local microphone or camera enabled flag flipped
    MediaToggled { kind: TrackKind, enabled: bool },

    /// Outgoing video switched between screen and camera
    ScreenShareChanged { active: bool },

    /// Non-fatal failure scoped to this session
    Error { message: String },

    /// Session torn down
    Closed,
}

impl CallEvent {
    /// Get event type name
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::RoleAssigned { .. } => "role_assigned",
            CallEvent::RemoteTrack(_) => "remote_track",
            CallEvent::ConnectionStatus { .. } => "connection_status",
            CallEvent::ChatReceived { .. } => "chat_received",
            CallEvent::MediaToggled { .. } => "media_toggled",
            CallEvent::ScreenShareChanged { .. } => "screen_share_changed",
            CallEvent::Error { .. } => "error",
            CallEvent::Closed => "closed",
        }
    }
}

/// Cloneable sender half of a session's event queue
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Create a handle and the receiver the session loop consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an event
    pub async fn notify(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed("session loop has ended".to_string()))
    }

    /// Enqueue without waiting; used from synchronous callbacks
    pub fn try_notify(&self, event: SessionEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::SignalingError("session queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::ChannelClosed("session loop has ended".to_string())
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn toggle_audio(&self) -> Result<()> {
        self.notify(SessionEvent::Intent(CallIntent::ToggleAudio)).await
    }

    pub async fn toggle_video(&self) -> Result<()> {
        self.notify(SessionEvent::Intent(CallIntent::ToggleVideo)).await
    }

    pub async fn toggle_screen_share(&self) -> Result<()> {
        self.notify(SessionEvent::Intent(CallIntent::ToggleScreenShare))
            .await
    }

    pub async fn screen_share_ended(&self) -> Result<()> {
        self.notify(SessionEvent::Intent(CallIntent::ScreenShareEnded))
            .await
    }

    /// Send chat text. Surrounding whitespace is trimmed; blank text is dropped.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.notify(SessionEvent::Intent(CallIntent::SendChat(text.to_string())))
            .await
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.notify(SessionEvent::Intent(CallIntent::HangUp)).await
    }
}
