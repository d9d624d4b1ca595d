//! Liaison chat session client.
//!
//! Keeps an operator's view of one chat room in sync with a realtime
//! WebSocket server and a REST backend: history paging, optimistic sends
//! reconciled against server echoes, typing indicators and unread counts.

pub mod activity;
pub mod api;
pub mod config;
pub mod conversations;
pub mod error;
pub mod logging;
pub mod models;
pub mod reconciler;
pub mod room;
pub mod runtime;
pub mod session;
pub mod typing;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ChatApi};
pub use config::{ClientConfig, SendFailurePolicy};
pub use error::{ChatError, ChatResult, ErrorSink, TracingSink};
pub use models::{ActivityItem, ActivityKind, ContentType, Conversation, Message};
pub use room::ActiveRoom;
pub use runtime::{SessionCommand, SessionHandle, SessionRuntime};
pub use session::{ChatSession, EventOutcome, HistoryRequest, SessionSnapshot};
pub use websocket::{ClientEvent, Credential, Emitter, ServerEvent, TransportEvent, WebSocketClient};
