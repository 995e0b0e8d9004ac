//! Per-connection relay handler
//!
//! Performs the WebSocket handshake (refusing unknown paths), joins the room
//! named in the query string, then pumps frames between the socket and the
//! room until either side goes away.

use crate::config::ServerConfig;
use crate::rooms::RoomRegistry;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message, Result as WsResult,
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Room id carried by a request URI's query string, if any
pub fn room_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "room")
        .map(|(_, value)| value.trim().to_string())
        .filter(|room| !room.is_empty())
}

/// Handle a single WebSocket connection
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    debug!("New connection from: {}", addr);

    let mut room: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() != config.path {
            let mut refused = ErrorResponse::new(Some("not found".to_string()));
            *refused.status_mut() = StatusCode::NOT_FOUND;
            return Err(refused);
        }
        room = Some(
            room_from_query(req.uri().query()).unwrap_or_else(|| config.default_room.clone()),
        );
        Ok(resp)
    })
    .await?;
    let room = room.unwrap_or_else(|| config.default_room.clone());

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(config.outbound_buffer);
    let id = Uuid::new_v4();

    if let Err(full) = registry.join(&room, id, tx).await {
        info!("Refusing {}: {}", addr, full);
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: Cow::Borrowed("room full"),
            })))
            .await;
        return Ok(());
    }

    // Forward room frames to this socket
    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                debug!("Failed to send frame: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let delivered = registry.relay(&room, id, &text).await;
                debug!(room = %room, participant = %id, delivered, "Relayed frame");
            }
            Ok(Message::Close(_)) => {
                debug!("Connection closed by client: {}", addr);
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!(room = %room, participant = %id, "Ignoring binary frame");
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", addr, e);
                break;
            }
            _ => {}
        }
    }

    registry.leave(&room, id).await;
    forward_task.abort();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_from_query() {
        assert_eq!(room_from_query(Some("room=abc")), Some("abc".to_string()));
        assert_eq!(
            room_from_query(Some("x=1&room=team%20standup")),
            Some("team standup".to_string())
        );
        assert_eq!(room_from_query(Some("room=")), None);
        assert_eq!(room_from_query(Some("other=1")), None);
        assert_eq!(room_from_query(None), None);
    }
}
