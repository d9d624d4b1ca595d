//! Message list of the active room.
//!
//! Three sources feed it: history pages from REST, messages pushed over the
//! realtime channel, and optimistic entries created locally on send. The list
//! keeps insertion order and collapses every optimistic entry with its
//! server echo.
//!
//! Echoes are matched in three tiers: permanent id, then `tempId`, then
//! identical content and sender within a time window. The last tier is a
//! heuristic: two identical messages sent inside the window by the same
//! sender can pair with the wrong placeholder.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::config::MATCH_WINDOW_MS;
use crate::models::Message;

/// What [`MessageList::apply_incoming`] did with a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Already present under its permanent id.
    Duplicate,
    /// Replaced the optimistic entry it references by `tempId`.
    ConfirmedByTempId(usize),
    /// Replaced an optimistic entry matched on content, sender and time.
    ConfirmedByContent(usize),
    Appended(usize),
}

#[derive(Debug, Clone)]
pub struct MessageList {
    messages: Vec<Message>,
    match_window_ms: i64,
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new(MATCH_WINDOW_MS)
    }
}

impl MessageList {
    pub fn new(match_window_ms: i64) -> Self {
        Self {
            messages: Vec::new(),
            match_window_ms,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Entries the server knows about; used as the pagination offset.
    pub fn confirmed_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_optimistic).count()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Replace the list with a freshly loaded history page.
    pub fn seed(&mut self, history: Vec<Message>) {
        debug!(count = history.len(), "Seeding message list");
        self.messages = history.into_iter().map(Message::confirmed).collect();
    }

    /// Insert an older page in front of the list. Existing entries keep
    /// their order and content; page entries already present (the offset
    /// drifts when live messages arrive between page loads) are skipped.
    /// Returns how many entries were inserted.
    pub fn prepend_older(&mut self, older: Vec<Message>) -> usize {
        let known: HashSet<&str> = self
            .messages
            .iter()
            .filter(|m| !m.is_optimistic)
            .map(|m| m.id.as_str())
            .collect();

        let mut fresh: Vec<Message> = Vec::with_capacity(older.len());
        for msg in older {
            if known.contains(msg.id.as_str()) || fresh.iter().any(|m| m.id == msg.id) {
                trace!(id = %msg.id, "Skipping overlapping history entry");
                continue;
            }
            fresh.push(msg.confirmed());
        }

        let inserted = fresh.len();
        fresh.append(&mut self.messages);
        self.messages = fresh;
        inserted
    }

    /// Append a locally created entry that awaits confirmation.
    pub fn push_optimistic(&mut self, msg: Message) {
        debug_assert!(msg.is_optimistic);
        self.messages.push(msg);
    }

    /// Merge a server-pushed message into the list.
    pub fn apply_incoming(&mut self, incoming: Message, now_ms: i64) -> Applied {
        if self
            .messages
            .iter()
            .any(|m| !m.is_optimistic && m.id == incoming.id)
        {
            // A history page can already hold the confirmed copy of a pending send
            if let Some(index) = incoming.temp_id.as_deref().and_then(|temp_id| {
                self.messages
                    .iter()
                    .position(|m| m.is_optimistic && m.id == temp_id)
            }) {
                debug!(id = %incoming.id, "Dropping placeholder already confirmed by history");
                self.messages.remove(index);
            }
            trace!(id = %incoming.id, "Ignoring duplicate message");
            return Applied::Duplicate;
        }

        if let Some(temp_id) = incoming.temp_id.as_deref() {
            if let Some(index) = self
                .messages
                .iter()
                .position(|m| m.is_optimistic && m.id == temp_id)
            {
                debug!(id = %incoming.id, temp_id, "Confirmed optimistic message");
                self.messages[index] = incoming.confirmed();
                return Applied::ConfirmedByTempId(index);
            }
        }

        let window = self.match_window_ms;
        if let Some(index) = self.messages.iter().position(|m| {
            m.is_optimistic
                && m.sender_id == incoming.sender_id
                && m.content == incoming.content
                && (now_ms - m.created_at).abs() <= window
        }) {
            debug!(id = %incoming.id, "Confirmed optimistic message by content");
            self.messages[index] = incoming.confirmed();
            return Applied::ConfirmedByContent(index);
        }

        self.messages.push(incoming.confirmed());
        Applied::Appended(self.messages.len() - 1)
    }

    /// Flag an optimistic entry whose send failed. Returns `false` if no such
    /// pending entry exists (e.g. it was confirmed in the meantime).
    pub fn mark_failed(&mut self, temp_id: &str) -> bool {
        match self.pending_mut(temp_id) {
            Some(msg) => {
                msg.failed = true;
                true
            }
            None => false,
        }
    }

    /// Clear the failure flag before a retry and return the entry to resend.
    pub fn take_for_retry(&mut self, temp_id: &str) -> Option<Message> {
        let msg = self.pending_mut(temp_id)?;
        if !msg.failed {
            return None;
        }
        msg.failed = false;
        Some(msg.clone())
    }

    fn pending_mut(&mut self, temp_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.is_optimistic && m.id == temp_id)
    }
}
