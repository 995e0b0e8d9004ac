//! webrtc-rs peer connection behind [`NegotiationEndpoint`]
//!
//! Connection callbacks (gathered candidates, state changes, remote tracks)
//! are forwarded into the session's event queue; nothing here decides
//! anything about negotiation.
//!
//! webrtc-rs refuses `rollback` in every signaling state, so discarding a
//! pending offer replaces the peer connection with a fresh one carrying the
//! same tracks. Callbacks still firing on a replaced connection are muted
//! by generation.

use crate::config::CallConfig;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use parley_core::{
    ConnectionState, Error, IceCandidate, LocalTrack, NegotiationEndpoint, RemoteTrack, Result,
    SdpType, SessionDescription, SessionEvent, SessionHandle, SignalingState, TrackKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

struct AttachedTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

/// Peer connection endpoint for one call
pub struct RtcEndpoint {
    api: API,
    rtc_config: RTCConfiguration,
    handle: SessionHandle,

    pc: RwLock<Arc<RTCPeerConnection>>,

    /// Bumped each time the connection is replaced
    generation: Arc<AtomicU64>,

    /// Outgoing tracks by kind, in attach order
    senders: Mutex<Vec<AttachedTrack>>,

    /// Sample tracks by local track id, for whatever feeds the media
    sample_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl RtcEndpoint {
    /// Create a peer connection and route its callbacks into `handle`
    #[instrument(skip(config, handle))]
    pub async fn new(config: &CallConfig, handle: SessionHandle) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let generation = Arc::new(AtomicU64::new(0));
        let pc = new_connection(&api, &rtc_config).await?;
        register_callbacks(&pc, handle.clone(), Arc::clone(&generation), 0);
        info!("Peer connection created");

        Ok(Self {
            api,
            rtc_config,
            handle,
            pc: RwLock::new(pc),
            generation,
            senders: Mutex::new(Vec::new()),
            sample_tracks: Mutex::new(HashMap::new()),
        })
    }

    /// Underlying webrtc-rs connection
    ///
    /// Discarding a pending offer swaps this out, so don't hold on to it
    /// across negotiation.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc.read())
    }

    /// How many times the connection has been replaced
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Sample track bound to local track `track_id`; write media samples here
    pub fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_tracks.lock().get(track_id).cloned()
    }

    fn sample_track_for(&self, track: &LocalTrack, stream_id: &str) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.sample_tracks.lock();
        tracks
            .entry(track.id().to_string())
            .or_insert_with(|| {
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.kind()),
                    track.id().to_string(),
                    stream_id.to_string(),
                ))
            })
            .clone()
    }

    /// Throw away the pending negotiation by replacing the connection
    ///
    /// The new connection is stable, has no descriptions and sends the same
    /// tracks. Any transport the old one had established is lost.
    async fn discard_pending(&self) -> Result<()> {
        let old = self.peer_connection();
        match old.signaling_state() {
            RTCSignalingState::Stable => {
                return Err(Error::InvalidState(
                    "nothing to roll back in stable state".to_string(),
                ))
            }
            RTCSignalingState::Closed => {
                return Err(Error::InvalidState("connection is closed".to_string()))
            }
            _ => {}
        }

        let generation = self.generation() + 1;
        let pc = new_connection(&self.api, &self.rtc_config).await?;
        register_callbacks(&pc, self.handle.clone(), Arc::clone(&self.generation), generation);

        let attached: Vec<(TrackKind, Arc<TrackLocalStaticSample>)> = self
            .senders
            .lock()
            .iter()
            .map(|a| (a.kind, Arc::clone(&a.track)))
            .collect();
        let mut senders = Vec::with_capacity(attached.len());
        for (kind, track) in attached {
            let sender = match attach(&pc, Arc::clone(&track)).await {
                Ok(sender) => sender,
                Err(e) => {
                    let _ = pc.close().await;
                    return Err(e);
                }
            };
            senders.push(AttachedTrack {
                kind,
                track,
                sender,
            });
        }

        let tracks = senders.len();
        *self.senders.lock() = senders;
        *self.pc.write() = pc;
        self.generation.store(generation, Ordering::SeqCst);

        if let Err(e) = old.close().await {
            debug!("Replaced connection did not close cleanly: {}", e);
        }
        info!(generation, tracks, "Peer connection replaced to discard pending offer");
        Ok(())
    }
}

async fn new_connection(api: &API, rtc_config: &RTCConfiguration) -> Result<Arc<RTCPeerConnection>> {
    let pc = api
        .new_peer_connection(rtc_config.clone())
        .await
        .map_err(|e| Error::WebRtcError(format!("Failed to create peer connection: {}", e)))?;
    Ok(Arc::new(pc))
}

async fn attach(
    pc: &RTCPeerConnection,
    track: Arc<TrackLocalStaticSample>,
) -> Result<Arc<RTCRtpSender>> {
    let sender = pc
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| Error::WebRtcError(format!("Failed to add track: {}", e)))?;

    // Drain RTCP so interceptors keep running.
    let rtcp_sender = Arc::clone(&sender);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while rtcp_sender.read(&mut buf).await.is_ok() {}
    });
    Ok(sender)
}

fn ice_servers(config: &CallConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn register_callbacks(
    pc: &Arc<RTCPeerConnection>,
    handle: SessionHandle,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    let live = move || current.load(Ordering::SeqCst) == generation;

    let candidate_handle = handle.clone();
    let candidate_live = live.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let handle = candidate_handle.clone();
        let live = candidate_live.clone();
        Box::pin(async move {
            if !live() {
                return;
            }
            let event = match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => SessionEvent::LocalCandidate(Some(from_rtc_candidate(init))),
                    Err(e) => {
                        warn!("Failed to convert ICE candidate to JSON: {}", e);
                        return;
                    }
                },
                None => SessionEvent::LocalCandidate(None),
            };
            if let Err(e) = handle.notify(event).await {
                debug!("Dropped local candidate: {}", e);
            }
        })
    }));

    let state_handle = handle.clone();
    let state_live = live.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let handle = state_handle.clone();
        let live = state_live.clone();
        Box::pin(async move {
            if !live() {
                debug!("Ignoring state {} of a replaced connection", s);
                return;
            }
            let state = match s {
                RTCPeerConnectionState::New => ConnectionState::New,
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
                _ => return,
            };
            if let Err(e) = handle.notify(SessionEvent::ConnectionState(state)).await {
                debug!("Dropped connection state {}: {}", state, e);
            }
        })
    }));

    let track_handle = handle;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let handle = track_handle.clone();
            let live = live.clone();
            Box::pin(async move {
                if !live() {
                    return;
                }
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let remote = RemoteTrack {
                    track_id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                };
                if let Err(e) = handle.notify(SessionEvent::RemoteTrack(remote)).await {
                    debug!("Dropped remote track: {}", e);
                }

                // Rendering happens elsewhere; keep the receive buffer moving.
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!(track_id = %track.id(), "Remote track ended");
                });
            })
        },
    ));
}

/// Convert a wire description into a webrtc-rs description
pub fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp.clone()),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = desc.sdp.clone();
            return Ok(rollback);
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", desc.sdp_type, e)))
}

/// Convert a webrtc-rs description into a wire description
pub fn from_rtc_description(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => {
            return Err(Error::SdpError(
                "description has unspecified type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    })
}

pub fn to_rtc_candidate(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment.clone(),
    }
}

pub fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn signaling_state_of(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
            SignalingState::HaveLocalOffer
        }
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
            SignalingState::HaveRemoteOffer
        }
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

#[async_trait]
impl NegotiationEndpoint for RtcEndpoint {
    fn signaling_state(&self) -> SignalingState {
        signaling_state_of(self.pc.read().signaling_state())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection()
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection()
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp_type == SdpType::Rollback {
            return self.discard_pending().await;
        }
        self.peer_connection()
            .set_local_description(to_rtc_description(&desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp_type == SdpType::Rollback {
            return self.discard_pending().await;
        }
        self.peer_connection()
            .set_remote_description(to_rtc_description(&desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    #[instrument(skip(self, remote))]
    async fn rollback_and_apply(&self, remote: SessionDescription) -> Result<()> {
        self.discard_pending().await?;
        self.set_remote_description(remote).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.is_end_of_candidates() {
            debug!("Remote end-of-candidates");
            return Ok(());
        }
        self.peer_connection()
            .add_ice_candidate(to_rtc_candidate(&candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.peer_connection().local_description().await?;
        from_rtc_description(&desc)
            .map_err(|e| warn!("Unusable local description: {}", e))
            .ok()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        let desc = self.peer_connection().remote_description().await?;
        from_rtc_description(&desc)
            .map_err(|e| warn!("Unusable remote description: {}", e))
            .ok()
    }

    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<()> {
        let sample_track = self.sample_track_for(track, stream_id);
        let sender = attach(&self.peer_connection(), Arc::clone(&sample_track)).await?;

        self.senders.lock().push(AttachedTrack {
            kind: track.kind(),
            track: sample_track,
            sender,
        });
        debug!(track_id = track.id(), kind = track.kind().as_str(), "Track added");
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let current = self
            .senders
            .lock()
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| (Arc::clone(&a.sender), a.track.stream_id().to_string()));
        let Some((sender, stream_id)) = current else {
            return Ok(false);
        };

        let sample_track = self.sample_track_for(track, &stream_id);
        sender
            .replace_track(Some(
                Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>
            ))
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to replace track: {}", e)))?;

        // A replacement connection must send what is sending now
        if let Some(attached) = self
            .senders
            .lock()
            .iter_mut()
            .find(|a| Arc::ptr_eq(&a.sender, &sender))
        {
            attached.track = sample_track;
        }
        debug!(track_id = track.id(), kind = kind.as_str(), "Track replaced");
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection()
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}
