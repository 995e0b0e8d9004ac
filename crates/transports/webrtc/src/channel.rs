//! WebSocket signaling channel
//!
//! Bridges one relay connection onto a pair of mpsc queues: frames pushed
//! into [`WsSignalingChannel::outbound`] are written as JSON text frames,
//! frames read off the socket come out of [`WsSignalingChannel::inbound`].
//! The inbound queue ends when the socket closes.

use futures_util::{SinkExt, StreamExt};
use parley_core::{Error, Result, SignalingMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Queue depth in each direction
const CHANNEL_CAPACITY: usize = 128;

/// Connected signaling channel
pub struct WsSignalingChannel {
    pub outbound: mpsc::Sender<SignalingMessage>,
    pub inbound: mpsc::Receiver<SignalingMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsSignalingChannel {
    /// Open a WebSocket to `url` and start the reader and writer tasks
    pub async fn connect(url: &Url) -> Result<Self> {
        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            Error::WebSocketError(format!("Failed to connect to {}: {}", url, e))
        })?;
        info!("Connected to signaling relay at {}", url);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<SignalingMessage>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<SignalingMessage>(CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} frame: {}", msg.kind().as_str(), e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!("Failed to send signaling frame: {}", e);
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("Signaling writer finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed signaling frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        info!("Signaling relay closed the connection: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        error!("Signaling socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Signaling reader finished");
        });

        Ok(Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            reader,
            writer,
        })
    }

    /// Split into the outbound sender and inbound receiver
    ///
    /// The socket tasks keep running until either side is dropped.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<SignalingMessage>,
        mpsc::Receiver<SignalingMessage>,
    ) {
        (self.outbound, self.inbound)
    }

    /// Stop both socket tasks
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}
