//! Two-peer negotiation harness
//!
//! Drives [`Negotiator`]s over [`SimulatedEndpoint`]s by hand, so tests
//! decide exactly which frame reaches which peer and when.

#![allow(dead_code)]

use parley_core::{
    CallEvent, Error, LocalMedia, MediaSource, Negotiator, Result, SessionEvent, SessionFlow, SessionHandle,
    SignalingMessage, SimulatedEndpoint, StaticMediaSource,
};
use std::sync::Arc;
use tokio::sync::mpsc;

const QUEUE_DEPTH: usize = 256;

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// One participant with every channel exposed
pub struct TestPeer {
    pub negotiator: Negotiator<SimulatedEndpoint>,
    pub handle: SessionHandle,
    events_rx: mpsc::Receiver<SessionEvent>,
    outbound_rx: mpsc::Receiver<SignalingMessage>,
    call_rx: mpsc::Receiver<CallEvent>,
}

impl TestPeer {
    /// Peer with camera and microphone
    pub async fn with_media(label: &str) -> Self {
        let media = StaticMediaSource::all()
            .user_media()
            .await
            .expect("static media");
        Self::build(label, Some(media), StaticMediaSource::all())
    }

    /// Peer that only receives
    pub fn receive_only(label: &str) -> Self {
        Self::build(label, None, StaticMediaSource::none())
    }

    pub fn build(label: &str, media: Option<LocalMedia>, source: StaticMediaSource) -> Self {
        let (handle, events_rx) = SessionHandle::channel(QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (call_tx, call_rx) = mpsc::channel(QUEUE_DEPTH);

        let endpoint = Arc::new(SimulatedEndpoint::new(label).with_events(handle.clone()));
        let mut negotiator = Negotiator::new(endpoint, outbound_tx, call_tx, Arc::new(source));
        if let Some(media) = media {
            negotiator = negotiator.with_local_media(media);
        }

        Self {
            negotiator,
            handle,
            events_rx,
            outbound_rx,
            call_rx,
        }
    }

    pub fn endpoint(&self) -> &SimulatedEndpoint {
        self.negotiator.endpoint()
    }

    /// Hand one relayed frame to the negotiator
    pub async fn deliver(&mut self, msg: SignalingMessage) -> Result<SessionFlow> {
        self.negotiator.handle_event(SessionEvent::Signal(msg)).await
    }

    pub async fn handle(&mut self, event: SessionEvent) -> Result<SessionFlow> {
        self.negotiator.handle_event(event).await
    }

    /// Handle everything the endpoint queued (candidates, tracks, state)
    pub async fn process_queued(&mut self) -> Vec<Error> {
        let mut errors = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(e) = self.negotiator.handle_event(event).await {
                errors.push(e);
            }
        }
        errors
    }

    pub fn take_outbound(&mut self) -> Vec<SignalingMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound_rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn take_call_events(&mut self) -> Vec<CallEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.call_rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Move `from`'s queued frames to `to`; returns how many were delivered
pub async fn flush(from: &mut TestPeer, to: &mut TestPeer, errors: &mut Vec<Error>) -> usize {
    errors.extend(from.process_queued().await);
    let frames = from.take_outbound();
    let count = frames.len();
    for msg in frames {
        if let Err(e) = to.deliver(msg).await {
            errors.push(e);
        }
    }
    count
}

/// Relay frames both ways until neither peer has anything left to say
///
/// Returns every error raised on the way.
pub async fn exchange(a: &mut TestPeer, b: &mut TestPeer) -> Vec<Error> {
    let mut errors = Vec::new();
    loop {
        let moved = flush(a, b, &mut errors).await + flush(b, a, &mut errors).await;
        if moved == 0 {
            return errors;
        }
    }
}

/// Only the `description` frames in `frames`
pub fn descriptions(frames: &[SignalingMessage]) -> Vec<parley_core::SessionDescription> {
    frames
        .iter()
        .filter_map(|msg| match msg {
            SignalingMessage::Description { sdp } => Some(sdp.clone()),
            _ => None,
        })
        .collect()
}
