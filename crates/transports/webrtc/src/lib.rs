//! Parley WebRTC bindings
//!
//! Binds the negotiation core in `parley-core` to real transports: a
//! webrtc-rs peer connection ([`RtcEndpoint`]) and a WebSocket connection to
//! the room relay ([`WsSignalingChannel`]). [`join`] puts them together.
//!
//! # Example
//!
//! ```no_run
//! use parley_core::{CallEvent, StaticMediaSource};
//! use parley_webrtc::{join, CallConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> parley_core::Result<()> {
//! let config = CallConfig::new("ws://localhost:8080");
//! let (call, mut events) = join(&config, "standup", Arc::new(StaticMediaSource::all())).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let CallEvent::RoleAssigned { .. } = event {
//!         call.send_chat("hello").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod call;
pub mod channel;
pub mod config;
pub mod endpoint;

pub use call::{join, CallHandle};
pub use channel::WsSignalingChannel;
pub use config::{CallConfig, TurnServerConfig, DEFAULT_STUN_SERVERS, SIGNAL_PATH};
pub use endpoint::RtcEndpoint;
