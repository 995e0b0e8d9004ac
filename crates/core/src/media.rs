//! Local media model
//!
//! Capture itself lives outside the core; a [`MediaSource`] hands the session
//! track descriptors whose `enabled` flag is shared with whatever produces
//! the samples. Muting never renegotiates, it only flips that flag.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Device a local track was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

/// Handle to one locally captured track
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, source: TrackSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn microphone() -> Self {
        Self::new(TrackKind::Audio, TrackSource::Microphone)
    }

    pub fn camera() -> Self {
        Self::new(TrackKind::Video, TrackSource::Camera)
    }

    pub fn screen() -> Self {
        Self::new(TrackKind::Video, TrackSource::Screen)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag, returning the new value
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }
}

/// Camera + microphone stream acquired when joining a room
#[derive(Debug, Clone)]
pub struct LocalMedia {
    stream_id: String,
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
}

impl LocalMedia {
    pub fn new(audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4().to_string(),
            audio,
            video,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn audio(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&LocalTrack> {
        self.video.as_ref()
    }

    /// All tracks, audio first
    pub fn tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    /// Toggle microphone; `None` when the stream has no audio track
    pub fn toggle_audio(&self) -> Option<bool> {
        self.audio.as_ref().map(LocalTrack::toggle)
    }

    /// Toggle camera; `None` when the stream has no video track
    pub fn toggle_video(&self) -> Option<bool> {
        self.video.as_ref().map(LocalTrack::toggle)
    }
}

/// Capture backend used by a session
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire camera and microphone
    async fn user_media(&self) -> Result<LocalMedia>;

    /// Acquire a screen capture video track
    async fn display_media(&self) -> Result<LocalTrack>;
}

/// Media source backed by fixed device availability
///
/// Produces track descriptors without capturing anything. Used by headless
/// clients and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticMediaSource {
    pub microphone: bool,
    pub camera: bool,
    pub display: bool,
}

impl StaticMediaSource {
    /// Every device present
    pub fn all() -> Self {
        Self {
            microphone: true,
            camera: true,
            display: true,
        }
    }

    /// No device present; every acquisition fails
    pub fn none() -> Self {
        Self {
            microphone: false,
            camera: false,
            display: false,
        }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn user_media(&self) -> Result<LocalMedia> {
        if !self.microphone {
            return Err(Error::MediaUnavailable("microphone not available".to_string()));
        }
        if !self.camera {
            return Err(Error::MediaUnavailable("camera not available".to_string()));
        }
        Ok(LocalMedia::new(
            Some(LocalTrack::microphone()),
            Some(LocalTrack::camera()),
        ))
    }

    async fn display_media(&self) -> Result<LocalTrack> {
        if !self.display {
            return Err(Error::MediaUnavailable("screen capture not available".to_string()));
        }
        Ok(LocalTrack::screen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_shared_flag() {
        let track = LocalTrack::microphone();
        let shared = track.clone();
        assert!(track.is_enabled());
        assert!(!track.toggle());
        assert!(!shared.is_enabled());
        assert!(shared.toggle());
        assert!(track.is_enabled());
    }

    #[test]
    fn test_static_source_all_devices() {
        let media = tokio_test::block_on(StaticMediaSource::all().user_media()).unwrap();
        let kinds: Vec<_> = media.tracks().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
        assert!(tokio_test::block_on(StaticMediaSource::all().display_media()).is_ok());
    }

    #[test]
    fn test_local_media_toggles() {
        let media = LocalMedia::new(Some(LocalTrack::microphone()), None);
        assert_eq!(media.toggle_audio(), Some(false));
        assert_eq!(media.toggle_video(), None);
        assert_eq!(media.tracks().count(), 1);
    }

    #[tokio::test]
    async fn test_static_source_without_camera_fails() {
        let source = StaticMediaSource {
            camera: false,
            ..StaticMediaSource::all()
        };
        let err = source.user_media().await.unwrap_err();
        assert!(matches!(err, Error::MediaUnavailable(_)));
        assert!(source.display_media().await.is_ok());
    }

    #[tokio::test]
    async fn test_static_source_all_devices_async() {
        let media = StaticMediaSource::all().user_media().await.unwrap();
        assert_eq!(media.audio().map(|t| t.kind()), Some(TrackKind::Audio));
        assert_eq!(media.video().map(|t| t.source()), Some(TrackSource::Camera));
        assert!(StaticMediaSource::none().display_media().await.is_err());
    }
}
