//! In-process WebSocket peer for signaling tests
//!
//! [`ScriptedRelay`] accepts one client, sends it a scripted list of frames
//! and records every text frame the client sends back.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parley_core::SignalingMessage;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

pub struct ScriptedRelay {
    pub addr: SocketAddr,
    /// Raw text frames received from the client, in order
    pub received: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl ScriptedRelay {
    /// Bind on an ephemeral port; on connect, send `script` as raw text frames
    pub async fn start(script: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = accept_async(stream).await.expect("handshake");
            let (mut ws_tx, mut ws_rx) = ws.split();

            for frame in script {
                ws_tx.send(Message::Text(frame)).await.expect("send");
            }

            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    Message::Text(text) => {
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        Self {
            addr,
            received: rx,
            task,
        }
    }

    /// Script made of protocol messages
    pub async fn with_messages(messages: &[SignalingMessage]) -> Self {
        let script = messages
            .iter()
            .map(|m| m.to_json().expect("encode"))
            .collect();
        Self::start(script).await
    }

    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}
