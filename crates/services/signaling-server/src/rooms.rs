//! Room registry
//!
//! A room is an ordered list of connected participants. Joining assigns the
//! role from the occupancy at the moment of joining and tells everyone
//! already inside that someone arrived. Frames from one participant are
//! relayed to every other participant of the same room.

use parley_core::{MessageKind, Role, SignalingMessage};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Join refused because the room is at capacity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("room {room} is full ({capacity} peers)")]
pub struct RoomFull {
    pub room: String,
    pub capacity: usize,
}

struct Participant {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// All rooms on this relay
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Vec<Participant>>>,
    capacity: Option<usize>,
}

impl RoomRegistry {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Add `id` to `room` and return its role
    ///
    /// Existing participants get `peer-joined` and the newcomer gets `role`
    /// before the newcomer becomes visible to relaying, so no relayed frame
    /// from it can overtake either notification.
    ///
    /// Nothing is awaited while the registry is locked. An occupant whose
    /// queue is closed or full cannot take `peer-joined` and is evicted
    /// before the newcomer's role is computed.
    pub async fn join(
        &self,
        room: &str,
        id: Uuid,
        tx: mpsc::Sender<String>,
    ) -> Result<Role, RoomFull> {
        let mut rooms = self.rooms.write().await;
        let participants = rooms.entry(room.to_string()).or_default();
        participants.retain(|p| !p.tx.is_closed());

        if let Some(capacity) = self.capacity {
            if participants.len() >= capacity {
                return Err(RoomFull {
                    room: room.to_string(),
                    capacity,
                });
            }
        }

        if let Ok(frame) = SignalingMessage::PeerJoined.to_json() {
            participants.retain(|other| match other.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(room, participant = %other.id, error = %e, "Evicting stalled participant");
                    false
                }
            });
        }

        let role = Role::for_occupancy(participants.len());

        if let Ok(frame) = SignalingMessage::role(role).to_json() {
            if let Err(e) = tx.try_send(frame) {
                debug!(room, participant = %id, error = %e, "role not delivered");
            }
        }

        participants.push(Participant { id, tx });
        info!(
            room,
            participant = %id,
            role = role.as_str(),
            occupants = participants.len(),
            "Participant joined"
        );
        Ok(role)
    }

    /// Remove `id` from `room`; drops the room once empty
    pub async fn leave(&self, room: &str, id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let Some(participants) = rooms.get_mut(room) else {
            return;
        };
        participants.retain(|p| p.id != id);
        info!(room, participant = %id, occupants = participants.len(), "Participant left");

        if participants.is_empty() {
            rooms.remove(room);
            debug!(room, "Room removed");
        }
    }

    /// Forward `frame` from `from` to every other participant in `room`
    ///
    /// Frames claiming a relay-only type are dropped. Returns the number of
    /// participants the frame was queued for.
    pub async fn relay(&self, room: &str, from: Uuid, frame: &str) -> usize {
        if let Some(kind) = MessageKind::peek(frame) {
            if kind.is_server_only() {
                warn!(room, participant = %from, kind = kind.as_str(), "Dropping relay-only frame from client");
                return 0;
            }
        }

        let targets: Vec<mpsc::Sender<String>> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(participants) => participants
                    .iter()
                    .filter(|p| p.id != from)
                    .map(|p| p.tx.clone())
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(frame.to_string()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of participants in `room`
    pub async fn occupancy(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn participant() -> (Uuid, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Uuid::new_v4(), tx, rx)
    }

    fn decode(frame: String) -> SignalingMessage {
        SignalingMessage::from_json(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_first_joiner_offers_second_answers() {
        let registry = RoomRegistry::new(Some(2));
        let (a, a_tx, mut a_rx) = participant();
        let (b, b_tx, mut b_rx) = participant();

        assert_eq!(registry.join("r", a, a_tx).await.unwrap(), Role::Impolite);
        assert_eq!(decode(a_rx.recv().await.unwrap()), SignalingMessage::role(Role::Impolite));

        assert_eq!(registry.join("r", b, b_tx).await.unwrap(), Role::Polite);
        assert_eq!(decode(a_rx.recv().await.unwrap()), SignalingMessage::PeerJoined);
        assert_eq!(decode(b_rx.recv().await.unwrap()), SignalingMessage::role(Role::Polite));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_room_is_refused() {
        let registry = RoomRegistry::new(Some(2));
        let mut inboxes = Vec::new();
        for _ in 0..2 {
            let (id, tx, rx) = participant();
            registry.join("r", id, tx).await.unwrap();
            inboxes.push(rx);
        }
        let (c, c_tx, mut c_rx) = participant();
        let err = registry.join("r", c, c_tx).await.unwrap_err();
        assert_eq!(err.capacity, 2);
        assert!(c_rx.try_recv().is_err());
        assert_eq!(registry.occupancy("r").await, 2);
    }

    #[tokio::test]
    async fn test_unbounded_room_makes_later_joiners_polite() {
        let registry = RoomRegistry::new(None);
        let mut roles = Vec::new();
        let mut inboxes = Vec::new();
        for _ in 0..4 {
            let (id, tx, rx) = participant();
            roles.push(registry.join("r", id, tx).await.unwrap());
            inboxes.push(rx);
        }
        assert_eq!(
            roles,
            vec![Role::Impolite, Role::Polite, Role::Polite, Role::Polite]
        );
    }

    #[tokio::test]
    async fn test_relay_skips_sender_and_other_rooms() {
        let registry = RoomRegistry::new(None);
        let (a, a_tx, mut a_rx) = participant();
        let (b, b_tx, mut b_rx) = participant();
        let (c, c_tx, mut c_rx) = participant();
        registry.join("r", a, a_tx).await.unwrap();
        registry.join("r", b, b_tx).await.unwrap();
        registry.join("other", c, c_tx).await.unwrap();
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}
        while c_rx.try_recv().is_ok() {}

        let chat = SignalingMessage::chat("hello").to_json().unwrap();
        assert_eq!(registry.relay("r", a, &chat).await, 1);
        assert_eq!(b_rx.recv().await.unwrap(), chat);
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_drops_relay_only_types() {
        let registry = RoomRegistry::new(None);
        let (a, a_tx, _a_rx) = participant();
        let (b, b_tx, mut b_rx) = participant();
        registry.join("r", a, a_tx).await.unwrap();
        registry.join("r", b, b_tx).await.unwrap();
        while b_rx.try_recv().is_ok() {}

        let forged = SignalingMessage::role(Role::Impolite).to_json().unwrap();
        assert_eq!(registry.relay("r", a, &forged).await, 0);
        let forged = SignalingMessage::PeerJoined.to_json().unwrap();
        assert_eq!(registry.relay("r", a, &forged).await, 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stalled_occupant_does_not_block_joins() {
        let registry = RoomRegistry::new(Some(2));

        // Queue of one, filled by its own role frame and never drained
        let a = Uuid::new_v4();
        let (a_tx, _a_rx) = mpsc::channel(1);
        registry.join("r", a, a_tx).await.unwrap();

        let (b, b_tx, mut b_rx) = participant();
        let role = tokio::time::timeout(Duration::from_secs(1), registry.join("r", b, b_tx))
            .await
            .expect("join blocked on a stalled occupant")
            .unwrap();

        // The stalled occupant is gone, so the newcomer takes the offerer seat
        assert_eq!(role, Role::Impolite);
        assert_eq!(decode(b_rx.recv().await.unwrap()), SignalingMessage::role(Role::Impolite));
        assert_eq!(registry.occupancy("r").await, 1);

        let (c, c_tx, _c_rx) = participant();
        let joined = tokio::time::timeout(
            Duration::from_secs(1),
            registry.join("unrelated", c, c_tx),
        )
        .await
        .expect("registry stayed locked");
        assert_eq!(joined.unwrap(), Role::Impolite);
    }

    #[tokio::test]
    async fn test_departed_occupant_is_pruned_on_join() {
        let registry = RoomRegistry::new(Some(2));
        let (a, a_tx, a_rx) = participant();
        registry.join("r", a, a_tx).await.unwrap();
        drop(a_rx);

        let (b, b_tx, _b_rx) = participant();
        assert_eq!(registry.join("r", b, b_tx).await.unwrap(), Role::Impolite);
        assert_eq!(registry.occupancy("r").await, 1);
    }

    #[tokio::test]
    async fn test_empty_room_is_removed() {
        let registry = RoomRegistry::new(Some(2));
        let (a, a_tx, _a_rx) = participant();
        let (b, b_tx, _b_rx) = participant();
        registry.join("r", a, a_tx).await.unwrap();
        registry.join("r", b, b_tx).await.unwrap();

        registry.leave("r", a).await;
        assert_eq!(registry.occupancy("r").await, 1);
        registry.leave("r", b).await;
        assert_eq!(registry.room_count().await, 0);

        // Fresh room: first joiner offers again
        let (c, c_tx, _c_rx) = participant();
        assert_eq!(registry.join("r", c, c_tx).await.unwrap(), Role::Impolite);
    }
}
