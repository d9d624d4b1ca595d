//! Synchronous core of one chat session.
//!
//! `ChatSession` owns every piece of state behind the chat screen and is
//! driven by three kinds of input: operator actions (open, type, send),
//! transport events, and REST results. It never awaits; the runtime feeds it
//! and waits on its timer deadline.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::ActivityFeed;
use crate::config::{ClientConfig, SendFailurePolicy};
use crate::conversations::ConversationList;
use crate::error::{ChatError, ChatResult, ErrorSink};
use crate::models::input::{SendMessageInput, ValidateExt};
use crate::models::{ActivityItem, ActivityKind, ContentType, Conversation, Message, TempIdGenerator};
use crate::reconciler::MessageList;
use crate::room::{ActiveRoom, RoomTracker};
use crate::typing::{RemoteTyping, TypingDebouncer, TypingSignal};
use crate::websocket::{ClientEvent, Emitter, OutboundMessage, RoomRef, ServerEvent};

/// History page the runtime should fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub room_id: String,
    pub limit: u32,
    pub offset: u32,
}

/// What a server event asks of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored,
    Updated,
    /// The conversation list is stale and should be refetched.
    RefreshConversations,
}

/// Render-ready copy of the session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub active_room: Option<String>,
    pub messages: Vec<Message>,
    pub draft: String,
    pub remote_typing: bool,
    /// Who the indicator is for, when the server said.
    pub typing_user: Option<String>,
    pub conversations: Vec<Conversation>,
    pub total_unread: u32,
    pub activity: Vec<ActivityItem>,
    pub connected: bool,
    pub auth_failed: bool,
    pub history_loaded: bool,
    pub has_more_history: bool,
    pub loading_older: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct HistoryState {
    loaded: bool,
    has_more: bool,
    loading_older: bool,
}

pub struct ChatSession {
    operator_id: String,
    page_size: u32,
    send_failure: SendFailurePolicy,
    emitter: Arc<dyn Emitter>,
    sink: Arc<dyn ErrorSink>,
    rooms: RoomTracker,
    messages: MessageList,
    typing: TypingDebouncer,
    remote_typing: RemoteTyping,
    conversations: ConversationList,
    activity: ActivityFeed,
    temp_ids: TempIdGenerator,
    draft: String,
    history: HistoryState,
    auth_failed: bool,
}

impl ChatSession {
    pub fn new(config: &ClientConfig, emitter: Arc<dyn Emitter>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            operator_id: config.operator_id.clone(),
            page_size: config.page_size,
            send_failure: config.send_failure,
            emitter,
            sink,
            rooms: RoomTracker::new(config.leave_on_switch),
            messages: MessageList::new(config.match_window_ms),
            typing: TypingDebouncer::new(config.typing_idle),
            remote_typing: RemoteTyping::new(config.typing_expiry),
            conversations: ConversationList::new(config.operator_id.clone()),
            activity: ActivityFeed::new(config.activity_capacity),
            temp_ids: TempIdGenerator::new(),
            draft: String::new(),
            history: HistoryState::default(),
            auth_failed: false,
        }
    }

    pub fn active_room(&self) -> Option<String> {
        self.rooms.active()
    }

    /// Live handle on the active room for tasks outside the session.
    pub fn active_room_handle(&self) -> ActiveRoom {
        self.rooms.handle()
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn activity(&self) -> &ActivityFeed {
        &self.activity
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_remote_typing(&self, now: Instant) -> bool {
        self.remote_typing.is_typing(now)
    }

    pub fn is_connected(&self) -> bool {
        self.emitter.is_connected()
    }

    pub fn auth_failed(&self) -> bool {
        self.auth_failed
    }

    /// Switch to `room_id`. The previous room's messages and typing state
    /// are dropped; the returned request seeds the new room.
    pub fn open_room(&mut self, room_id: &str) -> HistoryRequest {
        if self.typing.cancel() {
            if let Some(previous) = self.rooms.active() {
                self.emit_typing(&previous, TypingSignal::Stop);
            }
        }

        self.rooms.switch_to(room_id, self.emitter.as_ref());
        self.messages.clear();
        self.remote_typing.hide();
        self.draft.clear();
        self.history = HistoryState {
            loaded: false,
            has_more: true,
            loading_older: false,
        };
        self.conversations.mark_read(room_id);

        HistoryRequest {
            room_id: room_id.to_string(),
            limit: self.page_size,
            offset: 0,
        }
    }

    pub fn on_connected(&mut self) {
        info!(room = ?self.rooms.active(), "Transport connected");
        self.rooms.on_connected(self.emitter.as_ref());
    }

    pub fn on_disconnected(&mut self) {
        warn!("Transport disconnected, waiting for reconnect");
        self.rooms.on_disconnected();
        self.remote_typing.hide();
    }

    pub fn on_unauthorized(&mut self) {
        self.auth_failed = true;
        self.sink.report("authenticate", &ChatError::Unauthorized);
    }

    /// Seed the list with the first history page. Dropped when the room is
    /// no longer active. Messages that arrived while the page was in flight
    /// are merged back on top of it.
    pub fn apply_history(&mut self, room_id: &str, result: ChatResult<Vec<Message>>) -> bool {
        if !self.rooms.is_active(room_id) {
            debug!(room = %room_id, "Dropping history for inactive room");
            return false;
        }
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.report("load history", e);
                return false;
            }
        };

        self.history.loaded = true;
        self.history.has_more = page.len() as u32 >= self.page_size;

        let arrived_early = self.messages.messages().to_vec();
        self.messages.seed(page);
        let now_ms = now_millis();
        for msg in arrived_early {
            if msg.is_optimistic {
                self.messages.push_optimistic(msg);
            } else {
                self.messages.apply_incoming(msg, now_ms);
            }
        }
        true
    }

    /// Next "load more" request, if one makes sense right now.
    pub fn begin_load_older(&mut self) -> Option<HistoryRequest> {
        let room_id = self.rooms.active()?;
        if !self.history.loaded || !self.history.has_more || self.history.loading_older {
            return None;
        }
        self.history.loading_older = true;
        Some(HistoryRequest {
            room_id,
            limit: self.page_size,
            offset: self.messages.confirmed_count() as u32,
        })
    }

    pub fn apply_older(&mut self, room_id: &str, result: ChatResult<Vec<Message>>) -> bool {
        if !self.rooms.is_active(room_id) {
            debug!(room = %room_id, "Dropping older page for inactive room");
            return false;
        }
        self.history.loading_older = false;
        match result {
            Ok(page) => {
                self.history.has_more = page.len() as u32 >= self.page_size;
                let inserted = self.messages.prepend_older(page);
                debug!(room = %room_id, inserted, "Prepended older messages");
                true
            }
            Err(e) => {
                self.report("load older messages", e);
                false
            }
        }
    }

    pub fn apply_conversations(&mut self, result: ChatResult<Vec<Conversation>>) {
        match result {
            Ok(list) => {
                let active = self.rooms.active();
                self.conversations.replace(list, active.as_deref());
            }
            Err(e) => self.report("load conversations", e),
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) -> EventOutcome {
        let for_active_room = event.room().is_some_and(|room| self.rooms.is_active(room));
        match event {
            ServerEvent::ReceiveMessage(msg) => {
                let active = self.rooms.active();
                let known = self.conversations.record_message(&msg, active.as_deref());

                if active.as_deref() == Some(msg.chat_id.as_str()) {
                    if msg.sender_id != self.operator_id {
                        self.remote_typing.hide();
                    }
                    self.messages.apply_incoming(msg, now_millis());
                } else {
                    debug!(room = %msg.chat_id, "Message for inactive room not listed");
                }

                if known {
                    EventOutcome::Updated
                } else {
                    EventOutcome::RefreshConversations
                }
            }
            ServerEvent::DisplayTyping(notice) => {
                if !for_active_room || notice.user_id.as_deref() == Some(self.operator_id.as_str())
                {
                    return EventOutcome::Ignored;
                }
                self.remote_typing.display(notice.user_id, now);
                EventOutcome::Updated
            }
            ServerEvent::HideTyping(_) => {
                if !for_active_room {
                    return EventOutcome::Ignored;
                }
                self.remote_typing.hide();
                EventOutcome::Updated
            }
            ServerEvent::AdminNotification(_) => EventOutcome::RefreshConversations,
            ServerEvent::NewUser(payload) => {
                self.activity.push(ActivityKind::NewUser, payload, now_millis());
                EventOutcome::Updated
            }
            ServerEvent::NewActivity(payload) => {
                self.activity
                    .push(ActivityKind::NewActivity, payload, now_millis());
                EventOutcome::Updated
            }
            ServerEvent::Error(err) => {
                self.sink
                    .report("server event", &ChatError::Transport(err.message));
                EventOutcome::Ignored
            }
        }
    }

    /// Operator edited the input field.
    pub fn on_input(&mut self, text: &str, now: Instant) {
        self.draft = text.to_string();
        let Some(room_id) = self.rooms.active() else {
            return;
        };
        if let Some(signal) = self.typing.on_input(text, now) {
            self.emit_typing(&room_id, signal);
        }
    }

    /// Send `content` to the active room.
    ///
    /// Blank content or no active room is a no-op (`Ok(None)`). Otherwise the
    /// optimistic entry is returned; transport failures are reported to the
    /// sink and handled per [`SendFailurePolicy`], not returned.
    pub fn send(&mut self, content: &str, content_type: ContentType) -> ChatResult<Option<Message>> {
        let Some(room_id) = self.rooms.active() else {
            debug!("Send ignored: no active room");
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        SendMessageInput {
            chat_id: room_id.clone(),
            content: content.to_string(),
        }
        .validate_input()?;

        // Sending implies the operator stopped typing
        self.typing.cancel();
        self.emit_typing(&room_id, TypingSignal::Stop);

        let created_at = now_millis();
        let temp_id = self.temp_ids.next(created_at);
        let optimistic = Message::optimistic(
            temp_id.clone(),
            &room_id,
            &self.operator_id,
            content,
            content_type,
            created_at,
        );
        self.messages.push_optimistic(optimistic.clone());

        let outbound = OutboundMessage {
            chat_id: room_id.clone(),
            sender_id: self.operator_id.clone(),
            content: content.to_string(),
            content_type,
            temp_id: temp_id.clone(),
        };
        let mut entry = optimistic;
        if let Err(e) = self.emitter.emit(ClientEvent::SendMessage(outbound)) {
            if self.send_failure == SendFailurePolicy::MarkFailed {
                self.messages.mark_failed(&temp_id);
                entry.failed = true;
            }
            self.sink.report("send message", &e);
        }

        self.draft.clear();
        Ok(Some(entry))
    }

    /// Resend a message previously flagged as failed. Returns `false` when
    /// there is nothing to retry.
    pub fn retry(&mut self, temp_id: &str) -> ChatResult<bool> {
        let Some(msg) = self.messages.take_for_retry(temp_id) else {
            return Ok(false);
        };
        let outbound = OutboundMessage {
            chat_id: msg.chat_id,
            sender_id: msg.sender_id,
            content: msg.content,
            content_type: msg.content_type,
            temp_id: temp_id.to_string(),
        };
        match self.emitter.emit(ClientEvent::SendMessage(outbound)) {
            Ok(()) => {
                info!(temp_id, "Retried message");
                Ok(true)
            }
            Err(e) => {
                self.messages.mark_failed(temp_id);
                Err(e)
            }
        }
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.deadline(), self.remote_typing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(signal) = self.typing.poll(now) {
            if let Some(room_id) = self.rooms.active() {
                self.emit_typing(&room_id, signal);
            }
        }
        if self.remote_typing.poll(now) {
            debug!("Remote typing indicator expired");
        }
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            active_room: self.rooms.active(),
            messages: self.messages.messages().to_vec(),
            draft: self.draft.clone(),
            remote_typing: self.remote_typing.is_typing(now),
            typing_user: self
                .remote_typing
                .user_id()
                .filter(|_| self.remote_typing.is_typing(now))
                .map(String::from),
            conversations: self.conversations.conversations().to_vec(),
            total_unread: self.conversations.total_unread(),
            activity: self.activity.items().cloned().collect(),
            connected: self.emitter.is_connected(),
            auth_failed: self.auth_failed,
            history_loaded: self.history.loaded,
            has_more_history: self.history.has_more,
            loading_older: self.history.loading_older,
        }
    }

    /// Route an error to the sink, remembering authentication failures.
    pub fn report(&mut self, context: &str, error: ChatError) {
        if error.is_auth() {
            self.auth_failed = true;
        }
        self.sink.report(context, &error);
    }

    fn emit_typing(&self, room_id: &str, signal: TypingSignal) {
        let event = match signal {
            TypingSignal::Start => ClientEvent::TypingStart(RoomRef::new(room_id)),
            TypingSignal::Stop => ClientEvent::TypingEnd(RoomRef::new(room_id)),
        };
        if let Err(e) = self.emitter.emit(event) {
            debug!(room = %room_id, error = %e, "Typing signal not sent");
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
