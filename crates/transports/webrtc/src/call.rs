//! Joining a room
//!
//! [`join`] wires a relay connection, a peer connection and a negotiator
//! together and starts the session loop. The caller keeps a [`CallHandle`]
//! for user actions and reads [`CallEvent`]s from the returned receiver.

use crate::channel::WsSignalingChannel;
use crate::config::CallConfig;
use crate::endpoint::RtcEndpoint;
use parley_core::{
    run_session, spawn_signal_pump, CallEvent, MediaSource, Negotiator, PeerSession, Result,
    SessionHandle,
};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// Running call
///
/// Derefs to [`SessionHandle`] for toggles, chat and hang-up.
pub struct CallHandle {
    handle: SessionHandle,
    endpoint: Arc<RtcEndpoint>,
    session: JoinHandle<PeerSession>,
    pump: JoinHandle<()>,
}

impl CallHandle {
    pub fn endpoint(&self) -> &Arc<RtcEndpoint> {
        &self.endpoint
    }

    /// Hang up and wait for the session loop to finish
    pub async fn close(self) -> Result<PeerSession> {
        // An already-finished loop has dropped its receiver; that is fine.
        let _ = self.handle.hang_up().await;
        let session = self
            .session
            .await
            .map_err(|e| anyhow::anyhow!("Session task failed: {}", e))?;
        self.pump.abort();
        Ok(session)
    }
}

impl Deref for CallHandle {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

/// Join `room` on the relay in `config`
///
/// Camera and microphone are acquired before connecting, so a missing device
/// fails the join instead of surfacing later as a call error.
#[instrument(skip(config, media_source), fields(room = %room))]
pub async fn join(
    config: &CallConfig,
    room: &str,
    media_source: Arc<dyn MediaSource>,
) -> Result<(CallHandle, mpsc::Receiver<CallEvent>)> {
    config.validate()?;
    let url = config.signal_url(room)?;

    let media = media_source.user_media().await?;
    info!(
        stream_id = media.stream_id(),
        tracks = media.tracks().count(),
        "Local media acquired"
    );

    let (outbound, inbound) = WsSignalingChannel::connect(&url).await?.into_parts();

    let (handle, rx) = SessionHandle::channel(config.event_buffer);
    let endpoint = Arc::new(RtcEndpoint::new(config, handle.clone()).await?);

    let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
    let negotiator = Negotiator::new(Arc::clone(&endpoint), outbound, events_tx, media_source)
        .with_local_media(media);

    let pump = spawn_signal_pump(inbound, handle.clone());
    let session = tokio::spawn(run_session(negotiator, rx));

    Ok((
        CallHandle {
            handle,
            endpoint,
            session,
            pump,
        },
        events_rx,
    ))
}
