//! Async driver for a [`ChatSession`].
//!
//! One task owns the session and serializes every mutation: operator
//! commands, transport events, REST completions and timer deadlines all go
//! through the same `select!`. REST calls run in their own tasks and report
//! back tagged with the room they were issued for.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::error::{ChatError, ChatResult, ErrorSink};
use crate::models::{ContentType, Conversation, Message};
use crate::room::ActiveRoom;
use crate::session::{ChatSession, EventOutcome, HistoryRequest, SessionSnapshot};
use crate::websocket::{Credential, TransportEvent, WebSocketClient};

/// Operator actions accepted by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Open(String),
    Input(String),
    Send {
        content: String,
        content_type: ContentType,
    },
    /// Upload the bytes, then send the returned URL as an image message.
    SendImage { bytes: Vec<u8>, filename: String },
    LoadOlder,
    Retry(String),
    RefreshConversations,
    Shutdown,
}

/// REST completions, tagged with the room they belong to.
enum ApiOutcome {
    History {
        room_id: String,
        result: ChatResult<Vec<Message>>,
    },
    Older {
        room_id: String,
        result: ChatResult<Vec<Message>>,
    },
    Conversations(ChatResult<Vec<Conversation>>),
    MarkedRead {
        room_id: String,
        result: ChatResult<()>,
    },
    Uploaded {
        room_id: String,
        result: ChatResult<String>,
    },
}

/// Caller's side of a running session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    active_room: ActiveRoom,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn command(&self, command: SessionCommand) -> ChatResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::Transport("session has stopped".to_string()))
    }

    pub fn open(&self, room_id: impl Into<String>) -> ChatResult<()> {
        self.command(SessionCommand::Open(room_id.into()))
    }

    pub fn input(&self, text: impl Into<String>) -> ChatResult<()> {
        self.command(SessionCommand::Input(text.into()))
    }

    pub fn send_text(&self, content: impl Into<String>) -> ChatResult<()> {
        self.command(SessionCommand::Send {
            content: content.into(),
            content_type: ContentType::Text,
        })
    }

    pub fn send_image(&self, bytes: Vec<u8>, filename: impl Into<String>) -> ChatResult<()> {
        self.command(SessionCommand::SendImage {
            bytes,
            filename: filename.into(),
        })
    }

    pub fn load_older(&self) -> ChatResult<()> {
        self.command(SessionCommand::LoadOlder)
    }

    pub fn retry(&self, temp_id: impl Into<String>) -> ChatResult<()> {
        self.command(SessionCommand::Retry(temp_id.into()))
    }

    pub fn refresh_conversations(&self) -> ChatResult<()> {
        self.command(SessionCommand::RefreshConversations)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified whenever the published state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn active_room(&self) -> ActiveRoom {
        self.active_room.clone()
    }

    /// Stop the session and close the transport.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session task ended abnormally");
        }
    }
}

pub struct SessionRuntime<A: ChatApi> {
    session: ChatSession,
    api: Arc<A>,
    client: Arc<WebSocketClient>,
    active_room: ActiveRoom,
    outcomes: mpsc::UnboundedSender<ApiOutcome>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<A: ChatApi> SessionRuntime<A> {
    /// Connect the transport and start the session task.
    pub fn spawn(
        config: ClientConfig,
        api: Arc<A>,
        sink: Arc<dyn ErrorSink>,
    ) -> ChatResult<SessionHandle> {
        config.validate()?;

        let client = Arc::new(WebSocketClient::from_config(&config));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        client.connect(
            Credential {
                token: config.token.clone(),
                user_id: config.operator_id.clone(),
            },
            event_tx,
        )?;

        let session = ChatSession::new(&config, client.clone(), sink);
        let active_room = session.active_room_handle();
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot(Instant::now()));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            session,
            api,
            client,
            active_room: active_room.clone(),
            outcomes: outcome_tx,
            snapshots,
        };
        info!(operator = %config.operator_id, "Starting chat session");
        let task = tokio::spawn(runtime.run(command_rx, event_rx, outcome_rx));

        Ok(SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            active_room,
            task,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut outcomes: mpsc::UnboundedReceiver<ApiOutcome>,
    ) {
        self.refresh_conversations();

        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_transport(event),
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
                _ = wait_for_deadline(deadline) => self.session.poll_timers(Instant::now()),
            }
            self.publish();
        }

        info!("Chat session stopping");
        self.client.disconnect();
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Open(room_id) => {
                let request = self.session.open_room(&room_id);
                self.fetch_history(request);
                self.mark_read(room_id);
            }
            SessionCommand::Input(text) => self.session.on_input(&text, Instant::now()),
            SessionCommand::Send {
                content,
                content_type,
            } => {
                if let Err(e) = self.session.send(&content, content_type) {
                    self.session.report("send message", e);
                }
            }
            SessionCommand::SendImage { bytes, filename } => self.upload(bytes, filename),
            SessionCommand::LoadOlder => {
                if let Some(request) = self.session.begin_load_older() {
                    self.fetch_older(request);
                }
            }
            SessionCommand::Retry(temp_id) => match self.session.retry(&temp_id) {
                Ok(true) => {}
                Ok(false) => debug!(temp_id = %temp_id, "Nothing to retry"),
                Err(e) => self.session.report("retry message", e),
            },
            SessionCommand::RefreshConversations => self.refresh_conversations(),
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.session.on_connected(),
            TransportEvent::Disconnected => self.session.on_disconnected(),
            TransportEvent::Unauthorized => self.session.on_unauthorized(),
            TransportEvent::Event(event) => {
                if self.session.handle_event(event, Instant::now())
                    == EventOutcome::RefreshConversations
                {
                    self.refresh_conversations();
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: ApiOutcome) {
        match outcome {
            ApiOutcome::History { room_id, result } => {
                self.session.apply_history(&room_id, result);
            }
            ApiOutcome::Older { room_id, result } => {
                self.session.apply_older(&room_id, result);
            }
            ApiOutcome::Conversations(result) => self.session.apply_conversations(result),
            ApiOutcome::MarkedRead { room_id, result } => {
                if let Err(e) = result {
                    debug!(room = %room_id, "Mark read failed");
                    self.session.report("mark read", e);
                }
            }
            ApiOutcome::Uploaded { room_id, result } => match result {
                Ok(url) if self.active_room.is_active(&room_id) => {
                    if let Err(e) = self.session.send(&url, ContentType::Image) {
                        self.session.report("send image", e);
                    }
                }
                Ok(_) => debug!(room = %room_id, "Room changed during upload, not sending image"),
                Err(e) => self.session.report("upload image", e),
            },
        }
    }

    fn fetch_history(&self, request: HistoryRequest) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        let active_room = self.active_room.clone();
        tokio::spawn(async move {
            let result = api
                .fetch_messages(&request.room_id, request.limit, request.offset)
                .await;
            if !active_room.is_active(&request.room_id) {
                debug!(room = %request.room_id, "History arrived after room switch");
                return;
            }
            let _ = outcomes.send(ApiOutcome::History {
                room_id: request.room_id,
                result,
            });
        });
    }

    fn fetch_older(&self, request: HistoryRequest) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = api
                .fetch_messages(&request.room_id, request.limit, request.offset)
                .await;
            let _ = outcomes.send(ApiOutcome::Older {
                room_id: request.room_id,
                result,
            });
        });
    }

    fn mark_read(&self, room_id: String) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = api.mark_read(&room_id).await;
            let _ = outcomes.send(ApiOutcome::MarkedRead { room_id, result });
        });
    }

    fn refresh_conversations(&self) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = api.list_conversations().await;
            let _ = outcomes.send(ApiOutcome::Conversations(result));
        });
    }

    fn upload(&self, bytes: Vec<u8>, filename: String) {
        let Some(room_id) = self.session.active_room() else {
            debug!(filename = %filename, "Upload ignored: no active room");
            return;
        };
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = api.upload(&filename, bytes).await;
            let _ = outcomes.send(ApiOutcome::Uploaded { room_id, result });
        });
    }

    fn publish(&self) {
        let next = self.session.snapshot(Instant::now());
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
