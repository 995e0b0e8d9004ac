//! In-memory peer connection
//!
//! [`SimulatedEndpoint`] follows the JSEP signaling state transitions closely
//! enough to exercise every branch of the negotiator without a network or
//! media stack: wrong-state descriptions are rejected, rollback restores the
//! previous description, candidates need a remote description whose m-lines
//! they reference. Local candidates and remote tracks are reported back
//! through an optional [`SessionHandle`] like a real connection would.

use super::endpoint::{ConnectionState, NegotiationEndpoint, SignalingState};
use super::events::{RemoteTrack, SessionEvent, SessionHandle};
use crate::media::{LocalTrack, TrackKind};
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct Sender {
    kind: TrackKind,
    track_id: String,
    stream_id: String,
}

#[derive(Debug)]
struct SimState {
    signaling: SignalingState,
    current_local: Option<SessionDescription>,
    pending_local: Option<SessionDescription>,
    current_remote: Option<SessionDescription>,
    pending_remote: Option<SessionDescription>,
    senders: Vec<Sender>,
    remote_candidates: Vec<IceCandidate>,
    version: u64,
    gathered: bool,
    connected: bool,
    fail_next_offer: bool,
    fail_next_remote: bool,
}

/// Deterministic peer connection for tests and headless runs
#[derive(Debug)]
pub struct SimulatedEndpoint {
    label: String,
    session_id: u64,
    state: Mutex<SimState>,
    events: Option<SessionHandle>,
}

impl SimulatedEndpoint {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            session_id: (uuid::Uuid::new_v4().as_u128() as u64) >> 1,
            state: Mutex::new(SimState {
                signaling: SignalingState::Stable,
                current_local: None,
                pending_local: None,
                current_remote: None,
                pending_remote: None,
                senders: Vec::new(),
                remote_candidates: Vec::new(),
                version: 0,
                gathered: false,
                connected: false,
                fail_next_offer: false,
                fail_next_remote: false,
            }),
            events: None,
        }
    }

    /// Report gathered candidates, remote tracks and connection changes
    pub fn with_events(mut self, handle: SessionHandle) -> Self {
        self.events = Some(handle);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Make the next `create_offer` call fail once
    pub fn fail_next_offer(&self) {
        self.state.lock().fail_next_offer = true;
    }

    /// Make the next `set_remote_description` call fail once, leaving the
    /// state untouched
    pub fn fail_next_remote_description(&self) {
        self.state.lock().fail_next_remote = true;
    }

    /// Candidates accepted through `add_ice_candidate`
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Track ids currently bound to senders, in attach order
    pub fn sender_tracks(&self) -> Vec<(TrackKind, String)> {
        self.state
            .lock()
            .senders
            .iter()
            .map(|s| (s.kind, s.track_id.clone()))
            .collect()
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(handle) = &self.events {
            if let Err(e) = handle.try_notify(event) {
                debug!(endpoint = %self.label, error = %e, "Dropped simulated endpoint event");
            }
        }
    }

    fn render_offer(&self, state: &mut SimState) -> String {
        state.version += 1;
        let mut sdp = self.header(state.version);
        sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:0\r\n");
        for (i, sender) in state.senders.iter().enumerate() {
            sdp.push_str(&media_section(sender.kind, i + 1, Some(sender)));
        }
        sdp
    }

    fn render_answer(&self, state: &mut SimState, offer: &str) -> String {
        state.version += 1;
        let mut sdp = self.header(state.version);
        let mut unused: Vec<&Sender> = state.senders.iter().collect();
        for (kind, mid) in m_lines(offer) {
            match kind {
                Some(kind) => {
                    let sender = unused
                        .iter()
                        .position(|s| s.kind == kind)
                        .map(|i| unused.remove(i));
                    sdp.push_str(&media_section_with_mid(kind, &mid, sender));
                }
                None => {
                    sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
                    sdp.push_str(&format!("a=mid:{}\r\n", mid));
                }
            }
        }
        sdp
    }

    fn header(&self, version: u64) -> String {
        format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\n",
            self.session_id, version, self.label
        )
    }

    /// Emit one host candidate and the end marker after the first local description
    fn gather(&self, state: &mut SimState) {
        if state.gathered {
            return;
        }
        state.gathered = true;
        let port = 50000 + (self.session_id % 10000);
        let candidate = IceCandidate::new(
            format!(
                "candidate:1 1 udp 2130706431 127.0.0.1 {} typ host",
                port
            ),
            Some("0".to_string()),
            Some(0),
        );
        self.notify(SessionEvent::LocalCandidate(Some(candidate)));
        self.notify(SessionEvent::LocalCandidate(None));
    }

    fn announce_remote_tracks(&self, sdp: &str) {
        for track in msid_tracks(sdp) {
            self.notify(SessionEvent::RemoteTrack(track));
        }
    }

    fn maybe_connected(&self, state: &mut SimState) {
        if !state.connected
            && state.signaling == SignalingState::Stable
            && state.current_local.is_some()
            && state.current_remote.is_some()
        {
            state.connected = true;
            self.notify(SessionEvent::ConnectionState(ConnectionState::Connected));
        }
    }
}

#[async_trait]
impl NegotiationEndpoint for SimulatedEndpoint {
    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        if state.fail_next_offer {
            state.fail_next_offer = false;
            return Err(Error::SdpError("simulated offer failure".to_string()));
        }
        match state.signaling {
            SignalingState::Stable | SignalingState::HaveLocalOffer => {
                let sdp = self.render_offer(&mut state);
                Ok(SessionDescription::offer(sdp))
            }
            other => Err(Error::SdpError(format!("cannot create offer in {}", other))),
        }
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(Error::SdpError(format!(
                "cannot create answer in {}",
                state.signaling
            )));
        }
        let offer = state
            .pending_remote
            .as_ref()
            .map(|d| d.sdp.clone())
            .unwrap_or_default();
        let sdp = self.render_answer(&mut state, &offer);
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                state.pending_local = Some(desc);
                state.signaling = SignalingState::HaveLocalOffer;
                self.gather(&mut state);
            }
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                state.current_local = Some(desc);
                state.current_remote = state.pending_remote.take();
                state.signaling = SignalingState::Stable;
                self.gather(&mut state);
                self.maybe_connected(&mut state);
            }
            (SdpType::Rollback, SignalingState::HaveLocalOffer) => {
                state.pending_local = None;
                state.signaling = SignalingState::Stable;
            }
            (sdp_type, signaling) => {
                return Err(Error::SdpError(format!(
                    "cannot set local {:?} in {}",
                    sdp_type, signaling
                )));
            }
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next_remote {
            state.fail_next_remote = false;
            return Err(Error::SdpError("simulated remote description failure".to_string()));
        }
        match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                self.announce_remote_tracks(&desc.sdp);
                state.pending_remote = Some(desc);
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                self.announce_remote_tracks(&desc.sdp);
                state.current_remote = Some(desc);
                state.current_local = state.pending_local.take();
                state.signaling = SignalingState::Stable;
                self.maybe_connected(&mut state);
            }
            (SdpType::Rollback, SignalingState::HaveRemoteOffer) => {
                state.pending_remote = None;
                state.signaling = SignalingState::Stable;
            }
            (sdp_type, signaling) => {
                return Err(Error::SdpError(format!(
                    "cannot set remote {:?} in {}",
                    sdp_type, signaling
                )));
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        let remote = state
            .pending_remote
            .as_ref()
            .or(state.current_remote.as_ref())
            .map(|d| d.sdp.clone())
            .ok_or_else(|| Error::InvalidState("remote description not set".to_string()))?;

        if candidate.is_end_of_candidates() {
            return Ok(());
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(Error::IceCandidateError(format!(
                "malformed candidate: {}",
                candidate.candidate
            )));
        }

        let lines = m_lines(&remote);
        let known = match (&candidate.sdp_mid, candidate.sdp_mline_index) {
            (Some(mid), _) => lines.iter().any(|(_, m)| m == mid),
            (None, Some(index)) => (index as usize) < lines.len(),
            (None, None) => false,
        };
        if !known {
            return Err(Error::IceCandidateError(format!(
                "no m-line for candidate (mid {:?}, index {:?})",
                candidate.sdp_mid, candidate.sdp_mline_index
            )));
        }

        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state.pending_local.clone().or_else(|| state.current_local.clone())
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state
            .pending_remote
            .clone()
            .or_else(|| state.current_remote.clone())
    }

    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Err(Error::InvalidState("endpoint closed".to_string()));
        }
        if state.senders.iter().any(|s| s.track_id == track.id()) {
            return Err(Error::InvalidState(format!(
                "track {} already has a sender",
                track.id()
            )));
        }
        state.senders.push(Sender {
            kind: track.kind(),
            track_id: track.id().to_string(),
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let mut state = self.state.lock();
        match state.senders.iter_mut().find(|s| s.kind == kind) {
            Some(sender) => {
                sender.track_id = track.id().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.signaling = SignalingState::Closed;
        Ok(())
    }
}

fn media_section(kind: TrackKind, mid: usize, sender: Option<&Sender>) -> String {
    media_section_with_mid(kind, &mid.to_string(), sender)
}

fn media_section_with_mid(kind: TrackKind, mid: &str, sender: Option<&Sender>) -> String {
    let payload = match kind {
        TrackKind::Audio => 111,
        TrackKind::Video => 96,
    };
    let mut section = format!(
        "m={} 9 UDP/TLS/RTP/SAVPF {}\r\na=mid:{}\r\n",
        kind.as_str(),
        payload,
        mid
    );
    match sender {
        Some(sender) => {
            section.push_str(&format!(
                "a=msid:{} {}\r\na=sendrecv\r\n",
                sender.stream_id, sender.track_id
            ));
        }
        None => section.push_str("a=recvonly\r\n"),
    }
    section
}

/// `(kind, mid)` per m-line; kind is `None` for the data section
fn m_lines(sdp: &str) -> Vec<(Option<TrackKind>, String)> {
    let mut lines = Vec::new();
    let mut kind: Option<Option<TrackKind>> = None;
    for line in sdp.lines() {
        if let Some(rest) = line.strip_prefix("m=") {
            kind = Some(parse_kind(rest));
        } else if let Some(mid) = line.strip_prefix("a=mid:") {
            if let Some(k) = kind.take() {
                lines.push((k, mid.trim().to_string()));
            }
        }
    }
    lines
}

fn msid_tracks(sdp: &str) -> Vec<RemoteTrack> {
    let mut tracks = Vec::new();
    let mut kind = None;
    for line in sdp.lines() {
        if let Some(rest) = line.strip_prefix("m=") {
            kind = parse_kind(rest);
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut parts = msid.split_whitespace();
            if let (Some(k), Some(stream_id), Some(track_id)) = (kind, parts.next(), parts.next()) {
                tracks.push(RemoteTrack {
                    track_id: track_id.to_string(),
                    kind: k,
                    stream_id: stream_id.to_string(),
                });
            }
        }
    }
    tracks
}

fn parse_kind(m_line: &str) -> Option<TrackKind> {
    match m_line.split_whitespace().next() {
        Some("audio") => Some(TrackKind::Audio),
        Some("video") => Some(TrackKind::Video),
        _ => None,
    }
}
