//! Sidebar state: last message and unread counters per conversation.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::models::{ContentType, Conversation, Message};

#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    conversations: Vec<Conversation>,
    /// Messages from this sender never count as unread.
    operator_id: String,
    /// Id of the last message recorded per conversation.
    last_ids: HashMap<String, String>,
}

impl ConversationList {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            conversations: Vec::new(),
            operator_id: operator_id.into(),
            last_ids: HashMap::new(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Replace with a list fetched from the server, newest activity first.
    /// The room currently open keeps an unread count of zero.
    pub fn replace(&mut self, mut conversations: Vec<Conversation>, active_room: Option<&str>) {
        if let Some(active) = active_room {
            for conversation in conversations.iter_mut().filter(|c| c.id == active) {
                conversation.unread_count = 0;
            }
        }
        self.conversations = conversations;
        self.sort();
    }

    /// Bump the conversation a message belongs to. Returns `false` when the
    /// conversation is unknown and the list should be refetched.
    pub fn record_message(&mut self, msg: &Message, active_room: Option<&str>) -> bool {
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == msg.chat_id)
        else {
            debug!(chat = %msg.chat_id, "Message for unknown conversation");
            return false;
        };
        if self.last_ids.get(&msg.chat_id) == Some(&msg.id) {
            trace!(id = %msg.id, "Message already recorded");
            return true;
        }
        self.last_ids.insert(msg.chat_id.clone(), msg.id.clone());

        conversation.last_message = Some(preview(msg));
        conversation.last_message_at = Some(msg.created_at);
        if active_room != Some(msg.chat_id.as_str()) && msg.sender_id != self.operator_id {
            conversation.unread_count += 1;
        }
        self.sort();
        true
    }

    /// Local half of mark-as-read; the REST call is issued by the runtime.
    pub fn mark_read(&mut self, id: &str) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.unread_count = 0;
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    fn sort(&mut self) {
        // Stable: conversations without activity keep the server's order
        self.conversations
            .sort_by(|a, b| b.last_message_at.unwrap_or(0).cmp(&a.last_message_at.unwrap_or(0)));
    }
}

/// Sidebar text for a message.
fn preview(msg: &Message) -> String {
    match msg.content_type {
        ContentType::Text => msg.content.clone(),
        ContentType::Image => "[image]".to_string(),
        ContentType::Gift => "[gift]".to_string(),
    }
}
