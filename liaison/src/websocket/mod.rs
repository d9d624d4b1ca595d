mod client;
mod messages;

pub use client::{Credential, Emitter, TransportEvent, WebSocketClient};
pub use messages::{ClientEvent, OutboundMessage, RoomRef, ServerError, ServerEvent, TypingNotice};
