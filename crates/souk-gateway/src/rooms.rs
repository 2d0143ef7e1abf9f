use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use souk_types::frames::ChatFrame;

/// Canonical room id for an unordered pair of users. Whichever side connects
/// first, both land in the same room.
pub fn room_id(a: i64, b: i64) -> String {
    format!("chat_{}_{}", a.min(b), a.max(b))
}

/// Tracks which live sessions belong to which pair room and fans frames out
/// to them. Membership is process-local and ephemeral: it exists only for
/// the lifetime of the connection, nothing is persisted.
#[derive(Clone)]
pub struct RoomManager {
    inner: Arc<RoomManagerInner>,
}

struct RoomManagerInner {
    /// room id -> (conn_id -> session sender)
    rooms: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<ChatFrame>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RoomManagerInner {
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Join a session to a room. Returns (conn_id, receiver); the session
    /// loop drains the receiver into its socket.
    pub async fn join(&self, room: &str) -> (Uuid, mpsc::UnboundedReceiver<ChatFrame>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Remove a session from its room. Already-removed is a no-op; the last
    /// session leaving drops the room entry entirely.
    pub async fn leave(&self, room: &str, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Fan a frame out to every session in the room, the sender's own other
    /// sessions included; that is what keeps a user's open tabs in sync.
    /// Fire-and-forget: a session whose channel is gone is skipped.
    pub async fn broadcast(&self, room: &str, frame: ChatFrame) {
        let rooms = self.inner.rooms.read().await;
        if let Some(members) = rooms.get(room) {
            for tx in members.values() {
                let _ = tx.send(frame.clone());
            }
        }
    }

    /// Number of live sessions in a room.
    pub async fn occupancy(&self, room: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map_or(0, |members| members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> ChatFrame {
        ChatFrame {
            text: text.to_string(),
            sender_id: 3,
            receiver_id: 7,
            created_at: "12:00".to_string(),
            product_id: None,
            owner_id: None,
        }
    }

    #[test]
    fn room_id_is_canonical() {
        assert_eq!(room_id(3, 7), "chat_3_7");
        assert_eq!(room_id(7, 3), "chat_3_7");
        assert_eq!(room_id(3, 7), room_id(7, 3));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session_including_senders_other_tabs() {
        let rooms = RoomManager::new();
        let room = room_id(3, 7);

        let (_id_a, mut rx_a) = rooms.join(&room).await;
        let (_id_b, mut rx_b) = rooms.join(&room).await;
        // User 3's second tab
        let (_id_c, mut rx_c) = rooms.join(&room).await;

        rooms.broadcast(&room, frame("hi")).await;

        assert_eq!(rx_a.recv().await.unwrap().text, "hi");
        assert_eq!(rx_b.recv().await.unwrap().text, "hi");
        assert_eq!(rx_c.recv().await.unwrap().text, "hi");
    }

    #[tokio::test]
    async fn rooms_are_isolated_per_pair() {
        let rooms = RoomManager::new();

        let (_id_a, mut rx_a) = rooms.join(&room_id(3, 7)).await;
        let (_id_b, mut rx_b) = rooms.join(&room_id(3, 9)).await;

        rooms.broadcast(&room_id(3, 7), frame("for 7 only")).await;

        assert_eq!(rx_a.recv().await.unwrap().text, "for 7 only");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let rooms = RoomManager::new();
        let room = room_id(3, 7);

        let (conn_id, _rx) = rooms.join(&room).await;
        assert_eq!(rooms.occupancy(&room).await, 1);

        rooms.leave(&room, conn_id).await;
        rooms.leave(&room, conn_id).await;
        assert_eq!(rooms.occupancy(&room).await, 0);

        // Broadcasting into an empty room is harmless
        rooms.broadcast(&room, frame("nobody home")).await;
    }
}
