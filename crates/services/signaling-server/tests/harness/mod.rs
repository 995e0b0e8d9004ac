//! Relay test harness
//!
//! Starts a relay on an ephemeral port and connects raw WebSocket clients
//! to it.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parley_core::SignalingMessage;
use parley_signaling_server::{ServerConfig, ServerHandle, SignalingServer};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub async fn start_relay(config: ServerConfig) -> ServerHandle {
    SignalingServer::new(config.with_bind_address("127.0.0.1:0"))
        .expect("valid config")
        .start()
        .await
        .expect("relay starts")
}

pub fn room_url(relay: &ServerHandle, path_and_query: &str) -> String {
    format!("ws://{}{}", relay.local_addr(), path_and_query)
}

pub async fn connect(relay: &ServerHandle, room: &str) -> Client {
    let url = room_url(relay, &format!("/signal?room={}", room));
    let (client, _) = connect_async(url).await.expect("handshake");
    client
}

/// Next text frame, decoded
pub async fn recv(client: &mut Client) -> SignalingMessage {
    loop {
        let msg = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return SignalingMessage::from_json(&text).expect("decode");
        }
    }
}

/// Assert nothing arrives for a short while
pub async fn assert_silent(client: &mut Client) {
    assert!(
        timeout(Duration::from_millis(200), client.next()).await.is_err(),
        "unexpected frame"
    );
}

pub async fn send(client: &mut Client, msg: &SignalingMessage) {
    client
        .send(Message::Text(msg.to_json().expect("encode")))
        .await
        .expect("send");
}
