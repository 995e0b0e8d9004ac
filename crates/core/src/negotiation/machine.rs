//! Perfect negotiation state machine
//!
//! A [`Negotiator`] owns one [`PeerSession`] and handles one [`SessionEvent`]
//! at a time. Every transition runs to completion inside
//! [`Negotiator::handle_event`], including the awaited endpoint calls, so a
//! polite rollback and the remote offer it makes room for are never
//! separated by another event. [`run_session`] is the single consumer that
//! feeds it.

use super::endpoint::{ConnectionState, NegotiationEndpoint};
use super::events::{CallEvent, CallIntent, RemoteTrack, SessionEvent, SessionHandle};
use super::session::{NegotiationPhase, PeerSession};
use crate::media::{LocalMedia, LocalTrack, MediaSource, TrackKind};
use crate::protocol::{IceCandidate, Role, SdpType, SessionDescription, SignalingMessage};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Whether the session loop should keep going after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Closed,
}

/// Negotiation driver for one participant
pub struct Negotiator<E: NegotiationEndpoint + ?Sized> {
    session: PeerSession,
    endpoint: Arc<E>,
    outbound: mpsc::Sender<SignalingMessage>,
    events: mpsc::Sender<CallEvent>,
    media_source: Arc<dyn MediaSource>,
    media: Option<LocalMedia>,
    screen: Option<LocalTrack>,
    pending_candidates: Vec<IceCandidate>,
    tracks_attached: bool,
    announced_tracks: HashSet<String>,
    closed: bool,
}

impl<E: NegotiationEndpoint + ?Sized> Negotiator<E> {
    /// Create a negotiator
    ///
    /// `outbound` carries frames to the signaling channel, `events` carries
    /// notifications to the UI.
    pub fn new(
        endpoint: Arc<E>,
        outbound: mpsc::Sender<SignalingMessage>,
        events: mpsc::Sender<CallEvent>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            session: PeerSession::new(),
            endpoint,
            outbound,
            events,
            media_source,
            media: None,
            screen: None,
            pending_candidates: Vec::new(),
            tracks_attached: false,
            announced_tracks: HashSet::new(),
            closed: false,
        }
    }

    /// Camera and microphone to attach once the role allows it
    pub fn with_local_media(mut self, media: LocalMedia) -> Self {
        self.media = Some(media);
        self
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn into_session(self) -> PeerSession {
        self.session
    }

    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.media.as_ref()
    }

    pub fn tracks_attached(&self) -> bool {
        self.tracks_attached
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Remote candidates waiting for a remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle one event to completion
    #[instrument(skip(self, event), fields(session = %self.session.id(), event = event.name()))]
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<SessionFlow> {
        if self.closed {
            debug!("Session closed, dropping event");
            return Ok(SessionFlow::Closed);
        }

        match event {
            SessionEvent::Signal(msg) => self.on_signal(msg).await?,
            SessionEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate).await?,
            SessionEvent::ConnectionState(state) => self.on_connection_state(state).await,
            SessionEvent::RemoteTrack(track) => self.on_remote_track(track).await,
            SessionEvent::NegotiationNeeded => self.negotiate().await?,
            SessionEvent::Intent(intent) => return self.on_intent(intent).await,
            SessionEvent::ChannelClosed => {
                self.teardown("signaling channel closed").await;
                return Ok(SessionFlow::Closed);
            }
        }

        Ok(SessionFlow::Continue)
    }

    async fn on_signal(&mut self, msg: SignalingMessage) -> Result<()> {
        if let SignalingMessage::Role { role } = msg {
            return self.on_role(role).await;
        }

        if self.session.role().is_none() {
            warn!(kind = msg.kind().as_str(), "Message before role assignment, ignoring");
            return Ok(());
        }

        match msg {
            SignalingMessage::PeerJoined => self.on_peer_joined().await,
            SignalingMessage::Description { sdp } => self.on_description(sdp).await,
            SignalingMessage::Candidate { candidate } => self.on_remote_candidate(candidate).await,
            SignalingMessage::Chat { text } => {
                self.emit(CallEvent::ChatReceived { text }).await;
                Ok(())
            }
            SignalingMessage::Role { .. } => Ok(()),
        }
    }

    async fn on_role(&mut self, role: Role) -> Result<()> {
        self.session.assign_role(role)?;
        info!(role = %role, "Role assigned");
        self.emit(CallEvent::RoleAssigned { role }).await;

        // The impolite peer waits for someone to offer to.
        if role.is_polite() {
            self.attach_local_tracks().await?;
        }
        Ok(())
    }

    async fn on_peer_joined(&mut self) -> Result<()> {
        info!("Remote peer joined");
        self.attach_local_tracks().await
    }

    /// Add local tracks to the endpoint once, then negotiate
    ///
    /// Without local tracks nothing changes on the endpoint, so no offer is
    /// made and the session waits for the remote one.
    async fn attach_local_tracks(&mut self) -> Result<()> {
        if self.tracks_attached {
            debug!("Local tracks already attached");
            return Ok(());
        }
        self.tracks_attached = true;

        let Some(media) = self.media.clone() else {
            debug!("No local media, waiting for remote offer");
            return Ok(());
        };

        let mut attached = 0;
        for track in media.tracks() {
            self.endpoint.add_track(track, media.stream_id()).await?;
            debug!(track_id = track.id(), kind = track.kind().as_str(), "Attached local track");
            attached += 1;
        }

        if attached == 0 {
            return Ok(());
        }
        self.negotiate().await
    }

    /// Negotiation-needed: produce and send one offer
    async fn negotiate(&mut self) -> Result<()> {
        if self.session.making_offer {
            debug!("Offer already in flight, coalescing");
            return Ok(());
        }

        self.sync_state();
        if !self.session.signaling_state().is_stable() {
            debug!(state = %self.session.signaling_state(), "Not stable, deferring negotiation");
            self.session.negotiation_pending = true;
            return Ok(());
        }

        self.session.negotiation_pending = false;
        self.session.making_offer = true;
        let result = self.make_offer().await;
        self.session.making_offer = false;
        self.sync_state();

        if let Err(e) = &result {
            warn!(error = %e, "Offer failed; will retry on next trigger");
        }
        result
    }

    async fn make_offer(&mut self) -> Result<()> {
        let offer = self.endpoint.create_offer().await?;
        self.endpoint.set_local_description(offer).await?;
        let local = self.current_local_description().await?;
        debug!("Sending offer");
        self.send(SignalingMessage::description(local)).await
    }

    async fn on_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.sync_state();
        let is_offer = desc.is_offer();
        let collision = self.session.offer_collision(is_offer);

        self.session.ignore_offer = !self.session.is_polite() && collision;
        if self.session.ignore_offer {
            debug!(state = %self.session.signaling_state(), "Ignoring colliding offer");
            return Ok(());
        }

        let applied = if collision {
            debug!("Offer collision, rolling back local offer");
            self.session.set_phase(NegotiationPhase::RollingBack);
            self.endpoint.rollback_and_apply(desc).await
        } else {
            self.session.is_setting_remote_answer_pending = desc.sdp_type == SdpType::Answer;
            let applied = self.endpoint.set_remote_description(desc).await;
            self.session.is_setting_remote_answer_pending = false;
            applied
        };
        self.sync_state();
        if let Err(e) = applied {
            warn!(error = %e, state = %self.session.signaling_state(), "Remote description rejected");
            if collision && self.session.signaling_state().is_stable() {
                // Our offer is gone and theirs never landed; offer again
                self.session.negotiation_pending = true;
                if let Err(retry) = self.after_exchange().await {
                    warn!(error = %retry, "Re-offer after failed rollback failed");
                }
            }
            return Err(e);
        }

        self.flush_pending_candidates().await;

        if is_offer {
            let answer = self.endpoint.create_answer().await?;
            self.endpoint.set_local_description(answer).await?;
            self.sync_state();
            let local = self.current_local_description().await?;
            debug!("Sending answer");
            self.send(SignalingMessage::description(local)).await?;
        }

        self.after_exchange().await
    }

    /// Replay a deferred negotiation once the exchange has settled
    async fn after_exchange(&mut self) -> Result<()> {
        if !self.session.signaling_state().is_stable() {
            return Ok(());
        }
        self.session.mark_stable();
        if self.session.negotiation_pending {
            debug!("Replaying deferred negotiation");
            return self.negotiate().await;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.endpoint.remote_description().await.is_none() {
            debug!(buffered = self.pending_candidates.len() + 1, "No remote description, buffering candidate");
            self.pending_candidates.push(candidate);
            return Ok(());
        }

        match self.endpoint.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) if self.session.ignore_offer => {
                debug!(error = %e, "Candidate for ignored offer rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_candidates);
        debug!(count = pending.len(), "Flushing buffered candidates");
        for candidate in pending {
            if let Err(e) = self.endpoint.add_ice_candidate(candidate).await {
                if self.session.ignore_offer {
                    debug!(error = %e, "Buffered candidate for ignored offer rejected");
                } else {
                    warn!(error = %e, "Buffered candidate rejected");
                }
            }
        }
    }

    async fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        match candidate {
            Some(candidate) if !candidate.is_end_of_candidates() => {
                self.send(SignalingMessage::candidate(candidate)).await
            }
            _ => {
                debug!("Local candidate gathering complete");
                Ok(())
            }
        }
    }

    async fn on_connection_state(&mut self, state: ConnectionState) {
        if state.is_degraded() {
            warn!(state = %state, "Peer connection degraded");
        } else {
            info!(state = %state, "Peer connection state changed");
        }
        self.emit(CallEvent::ConnectionStatus { state }).await;
    }

    async fn on_remote_track(&mut self, track: RemoteTrack) {
        if !self.announced_tracks.insert(track.track_id.clone()) {
            return;
        }
        info!(track_id = %track.track_id, kind = track.kind.as_str(), "Remote track");
        self.emit(CallEvent::RemoteTrack(track)).await;
    }

    async fn on_intent(&mut self, intent: CallIntent) -> Result<SessionFlow> {
        match intent {
            CallIntent::ToggleAudio => self.toggle(TrackKind::Audio).await,
            CallIntent::ToggleVideo => self.toggle(TrackKind::Video).await,
            CallIntent::ToggleScreenShare => {
                if self.screen.is_some() {
                    self.stop_screen_share().await?;
                } else {
                    self.start_screen_share().await?;
                }
            }
            CallIntent::ScreenShareEnded => self.stop_screen_share().await?,
            CallIntent::SendChat(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    self.send(SignalingMessage::chat(text)).await?;
                }
            }
            CallIntent::HangUp => {
                self.teardown("hang up").await;
                return Ok(SessionFlow::Closed);
            }
        }
        Ok(SessionFlow::Continue)
    }

    async fn toggle(&mut self, kind: TrackKind) {
        let enabled = self.media.as_ref().and_then(|media| match kind {
            TrackKind::Audio => media.toggle_audio(),
            TrackKind::Video => media.toggle_video(),
        });
        match enabled {
            Some(enabled) => {
                debug!(kind = kind.as_str(), enabled, "Toggled local track");
                self.emit(CallEvent::MediaToggled { kind, enabled }).await;
            }
            None => debug!(kind = kind.as_str(), "No local track to toggle"),
        }
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        let screen = self.media_source.display_media().await?;
        if !self.endpoint.replace_track(TrackKind::Video, &screen).await? {
            return Err(Error::InvalidState(
                "screen share needs an attached video sender".to_string(),
            ));
        }
        info!(track_id = screen.id(), "Screen share started");
        self.screen = Some(screen);
        self.emit(CallEvent::ScreenShareChanged { active: true }).await;
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };
        screen.set_enabled(false);

        match self.media.as_ref().and_then(|m| m.video()).cloned() {
            Some(camera) => {
                self.endpoint.replace_track(TrackKind::Video, &camera).await?;
            }
            None => warn!("No camera track to restore after screen share"),
        }
        info!("Screen share stopped");
        self.emit(CallEvent::ScreenShareChanged { active: false }).await;
        Ok(())
    }

    /// Close the endpoint and stop local tracks; idempotent
    pub async fn teardown(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(reason, "Tearing down session");

        if let Err(e) = self.endpoint.close().await {
            warn!(error = %e, "Failed to close endpoint");
        }
        if let Some(media) = &self.media {
            for track in media.tracks() {
                track.set_enabled(false);
            }
        }
        if let Some(screen) = self.screen.take() {
            screen.set_enabled(false);
        }
        self.pending_candidates.clear();
        self.session.sync_signaling_state(self.endpoint.signaling_state());
        self.emit(CallEvent::Closed).await;
    }

    fn sync_state(&mut self) {
        self.session
            .sync_signaling_state(self.endpoint.signaling_state());
    }

    async fn current_local_description(&self) -> Result<SessionDescription> {
        self.endpoint
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("local description missing after set".to_string()))
    }

    async fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| Error::ChannelClosed("signaling channel closed".to_string()))
    }

    async fn emit(&self, event: CallEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Call event receiver dropped");
        }
    }
}

/// Consume `rx` until the session closes; returns the final session state
pub async fn run_session<E>(
    mut negotiator: Negotiator<E>,
    mut rx: mpsc::Receiver<SessionEvent>,
) -> PeerSession
where
    E: NegotiationEndpoint + ?Sized,
{
    info!(session = %negotiator.session().id(), "Session started");

    while let Some(event) = rx.recv().await {
        match negotiator.handle_event(event).await {
            Ok(SessionFlow::Continue) => {}
            Ok(SessionFlow::Closed) => break,
            Err(e) if e.is_terminal() => {
                error!(error = %e, "Session failed");
                negotiator
                    .emit(CallEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                break;
            }
            Err(e) => {
                warn!(error = %e, "Session event failed");
                negotiator
                    .emit(CallEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    negotiator.teardown("session ended").await;
    info!(session = %negotiator.session().id(), "Session ended");
    negotiator.into_session()
}

/// Forward inbound signaling frames into a session's queue
///
/// Queues [`SessionEvent::ChannelClosed`] once `inbound` ends.
pub fn spawn_signal_pump(
    mut inbound: mpsc::Receiver<SignalingMessage>,
    handle: SessionHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = inbound.recv().await {
            if handle.notify(SessionEvent::Signal(msg)).await.is_err() {
                return;
            }
        }
        let _ = handle.notify(SessionEvent::ChannelClosed).await;
    })
}
