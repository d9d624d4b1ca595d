use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identifies one WebSocket connection. A user may hold several.
pub type ConnectionId = u64;

struct Peer {
    user_id: String,
    tx: mpsc::UnboundedSender<String>,
}

/// Relay state: live connections and room membership
pub struct RelayState {
    peers: DashMap<ConnectionId, Peer>,
    /// room id -> connections that joined it
    rooms: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    access_token: Option<String>,
}

impl RelayState {
    /// Open relay: any token is accepted.
    pub fn new() -> Self {
        Self::with_access_token(None)
    }

    /// Relay that only accepts connections presenting `token`. An empty
    /// token leaves the relay open.
    pub fn with_access_token(token: Option<String>) -> Self {
        Self {
            peers: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
            access_token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Register a connection and return its id
    pub fn register(&self, user_id: String, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(id, Peer { user_id, tx });
        id
    }

    /// Drop a connection and every room membership it held
    pub fn unregister(&self, conn: ConnectionId) {
        self.leave_all(conn);
        self.peers.remove(&conn);
    }

    pub fn user_id(&self, conn: ConnectionId) -> Option<String> {
        self.peers.get(&conn).map(|peer| peer.user_id.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    pub fn join(&self, conn: ConnectionId, room: &str) {
        let inserted = self
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn);
        if inserted {
            info!(conn, room, "Joined room");
        }
    }

    pub fn leave(&self, conn: ConnectionId, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
            debug!(conn, room, "Left room");
        }
    }

    pub fn leave_all(&self, conn: ConnectionId) {
        let joined: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(&conn))
            .map(|entry| entry.key().clone())
            .collect();
        for room in joined {
            self.leave(conn, &room);
        }
    }

    pub fn is_member(&self, conn: ConnectionId, room: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&conn))
            .unwrap_or(false)
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send to one connection. Returns false if it is gone.
    pub fn send_to(&self, conn: ConnectionId, message: &str) -> bool {
        self.peers
            .get(&conn)
            .map(|peer| peer.tx.send(message.to_string()).is_ok())
            .unwrap_or(false)
    }

    /// Send to every member of `room` except `exclude`. Returns how many
    /// connections the message was handed to.
    pub fn send_to_room(&self, room: &str, message: &str, exclude: Option<ConnectionId>) -> usize {
        self.members(room)
            .into_iter()
            .filter(|conn| Some(*conn) != exclude)
            .filter(|conn| self.send_to(*conn, message))
            .count()
    }

    /// Send to every connection that has not joined `room`
    pub fn send_outside_room(&self, room: &str, message: &str) -> usize {
        let members: HashSet<ConnectionId> = self.members(room).into_iter().collect();
        let outside: Vec<ConnectionId> = self
            .peers
            .iter()
            .map(|entry| *entry.key())
            .filter(|conn| !members.contains(conn))
            .collect();
        outside
            .into_iter()
            .filter(|conn| self.send_to(*conn, message))
            .count()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_relay_state() {
        let state = RelayState::new();
        assert_eq!(state.connection_count(), 0);
        assert_eq!(state.access_token(), None);
    }

    #[test]
    fn test_empty_access_token_means_open() {
        let state = RelayState::with_access_token(Some(String::new()));
        assert_eq!(state.access_token(), None);
        let state = RelayState::with_access_token(Some("secret".to_string()));
        assert_eq!(state.access_token(), Some("secret"));
    }

    #[test]
    fn test_register_and_unregister() {
        let state = RelayState::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn = state.register("user1".to_string(), tx);
        assert_eq!(state.user_id(conn).as_deref(), Some("user1"));
        assert_eq!(state.connection_count(), 1);

        state.join(conn, "room-a");
        state.unregister(conn);
        assert_eq!(state.connection_count(), 0);
        assert!(state.members("room-a").is_empty());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let state = RelayState::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let a = state.register("user1".to_string(), tx1);
        let b = state.register("user1".to_string(), tx2);
        assert_ne!(a, b);
        assert_eq!(state.connection_count(), 2);
    }

    #[test]
    fn test_join_and_leave() {
        let state = RelayState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = state.register("user1".to_string(), tx);

        state.join(conn, "room-a");
        state.join(conn, "room-a");
        assert!(state.is_member(conn, "room-a"));
        assert_eq!(state.members("room-a"), vec![conn]);

        state.leave(conn, "room-a");
        assert!(!state.is_member(conn, "room-a"));
        assert!(state.members("room-a").is_empty());

        // Leaving a room never joined is a no-op
        state.leave(conn, "room-b");
    }

    #[test]
    fn test_leave_all() {
        let state = RelayState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = state.register("user1".to_string(), tx);
        state.join(conn, "room-a");
        state.join(conn, "room-b");

        state.leave_all(conn);
        assert!(!state.is_member(conn, "room-a"));
        assert!(!state.is_member(conn, "room-b"));
    }

    #[test]
    fn test_send_to_room_excludes_sender() {
        let state = RelayState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let a = state.register("user1".to_string(), tx1);
        let b = state.register("user2".to_string(), tx2);
        let c = state.register("user3".to_string(), tx3);
        state.join(a, "room-a");
        state.join(b, "room-a");
        state.join(c, "room-b");

        assert_eq!(state.send_to_room("room-a", "typing", Some(a)), 1);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "typing");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_send_to_room_includes_everyone_without_exclusion() {
        let state = RelayState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let a = state.register("user1".to_string(), tx1);
        let b = state.register("user2".to_string(), tx2);
        state.join(a, "room-a");
        state.join(b, "room-a");

        assert_eq!(state.send_to_room("room-a", "hello", None), 2);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_send_outside_room() {
        let state = RelayState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let a = state.register("user1".to_string(), tx1);
        let _b = state.register("admin".to_string(), tx2);
        state.join(a, "room-a");

        assert_eq!(state.send_outside_room("room-a", "notify"), 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "notify");
    }

    #[test]
    fn test_send_to_closed_connection() {
        let state = RelayState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = state.register("user1".to_string(), tx);
        state.join(conn, "room-a");

        drop(rx);
        assert!(!state.send_to(conn, "lost"));
        assert_eq!(state.send_to_room("room-a", "lost", None), 0);
    }

    #[test]
    fn test_default_impl() {
        let state = RelayState::default();
        assert_eq!(state.connection_count(), 0);
    }
}
