mod activity;
mod chat;
pub mod input;
mod message;

pub use activity::{ActivityItem, ActivityKind};
pub use chat::Conversation;
pub use message::{ContentType, Message, TempIdGenerator, TEMP_ID_PREFIX};
