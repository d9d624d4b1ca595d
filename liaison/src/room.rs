//! Which conversation is active, and the membership commands that follow
//! from switching.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::websocket::{ClientEvent, Emitter, RoomRef};

/// Live, cloneable view of the active room.
///
/// Handlers read it when they run, never at registration time, so a REST
/// response or push event that races a room switch sees the new room.
#[derive(Debug, Clone)]
pub struct ActiveRoom {
    rx: watch::Receiver<Option<String>>,
}

impl ActiveRoom {
    pub fn current(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.rx.borrow().as_deref() == Some(room_id)
    }
}

pub struct RoomTracker {
    active: watch::Sender<Option<String>>,
    join_pending: bool,
    leave_on_switch: bool,
}

impl RoomTracker {
    pub fn new(leave_on_switch: bool) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            active,
            join_pending: false,
            leave_on_switch,
        }
    }

    pub fn handle(&self) -> ActiveRoom {
        ActiveRoom {
            rx: self.active.subscribe(),
        }
    }

    pub fn active(&self) -> Option<String> {
        self.active.borrow().clone()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.active.borrow().as_deref() == Some(room_id)
    }

    /// A join that could not be sent yet and waits for the next connect.
    pub fn join_pending(&self) -> bool {
        self.join_pending
    }

    /// Make `room_id` the active room and ask the server for its events.
    /// Returns the previously active room.
    ///
    /// The cell is updated before anything is emitted so that every reader
    /// observes the new room from this point on.
    pub fn switch_to(&mut self, room_id: &str, emitter: &dyn Emitter) -> Option<String> {
        let previous = self.active.send_replace(Some(room_id.to_string()));
        info!(room = %room_id, previous = ?previous, "Switching active room");

        if let Some(prev) = previous.as_deref() {
            if self.leave_on_switch && prev != room_id && emitter.is_connected() {
                if let Err(e) = emitter.emit(ClientEvent::LeaveRoom(RoomRef::new(prev))) {
                    warn!(room = %prev, error = %e, "Failed to leave previous room");
                }
            }
        }

        self.join_pending = !self.try_join(room_id, emitter);
        previous
    }

    /// Re-issue the join for the active room after a (re)connect.
    pub fn on_connected(&mut self, emitter: &dyn Emitter) {
        match self.active() {
            Some(room_id) => {
                self.join_pending = !self.try_join(&room_id, emitter);
            }
            None => self.join_pending = false,
        }
    }

    /// Server-side membership does not survive the connection.
    pub fn on_disconnected(&mut self) {
        self.join_pending = self.active.borrow().is_some();
    }

    fn try_join(&self, room_id: &str, emitter: &dyn Emitter) -> bool {
        if !emitter.is_connected() {
            debug!(room = %room_id, "Not connected, deferring join");
            return false;
        }
        match emitter.emit(ClientEvent::JoinRoom(RoomRef::new(room_id))) {
            Ok(()) => true,
            Err(e) => {
                warn!(room = %room_id, error = %e, "Join failed, deferring until reconnect");
                false
            }
        }
    }
}
