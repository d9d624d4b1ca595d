use serde::{Deserialize, Serialize};

use crate::models::{ContentType, Message};

/// Events the client emits on the realtime channel.
///
/// Frames look like `{"event": "join_room", "data": {"chatId": "chat-42"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
    SendMessage(OutboundMessage),
    TypingStart(RoomRef),
    TypingEnd(RoomRef),
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    DisplayTyping(TypingNotice),
    HideTyping(TypingNotice),
    /// Something changed server-side; the conversation list is stale.
    AdminNotification(serde_json::Value),
    NewUser(serde_json::Value),
    NewActivity(serde_json::Value),
    Error(ServerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub chat_id: String,
}

impl RoomRef {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub temp_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub chat_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

impl ServerEvent {
    /// Room the event is scoped to, if any.
    pub fn room(&self) -> Option<&str> {
        match self {
            ServerEvent::ReceiveMessage(msg) => Some(&msg.chat_id),
            ServerEvent::DisplayTyping(notice) | ServerEvent::HideTyping(notice) => {
                Some(&notice.chat_id)
            }
            ServerEvent::AdminNotification(_)
            | ServerEvent::NewUser(_)
            | ServerEvent::NewActivity(_)
            | ServerEvent::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_room_serialization() {
        let event = ClientEvent::JoinRoom(RoomRef::new("chat-42"));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"join_room","data":{"chatId":"chat-42"}}"#);
    }

    #[test]
    fn test_send_message_serialization() {
        let event = ClientEvent::SendMessage(OutboundMessage {
            chat_id: "chat-42".to_string(),
            sender_id: "op-1".to_string(),
            content: "hi".to_string(),
            content_type: ContentType::Text,
            temp_id: "temp-1".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"send_message\""));
        assert!(json.contains("\"tempId\":\"temp-1\""));
        assert!(json.contains("\"contentType\":\"text\""));
    }

    #[test]
    fn test_receive_message_from_server_format() {
        let json = r#"{
            "event": "receive_message",
            "data": {
                "id": "srv-99",
                "chatId": "chat-42",
                "senderId": "op-1",
                "content": "hi",
                "contentType": "text",
                "createdAt": 1700000000000,
                "tempId": "temp-5"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room(), Some("chat-42"));
        if let ServerEvent::ReceiveMessage(msg) = event {
            assert_eq!(msg.id, "srv-99");
            assert_eq!(msg.temp_id.as_deref(), Some("temp-5"));
        } else {
            panic!("Expected ReceiveMessage");
        }
    }

    #[test]
    fn test_typing_events_parse() {
        let json = r#"{"event":"display_typing","data":{"chatId":"chat-1","userId":"u-2"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::DisplayTyping(TypingNotice {
                chat_id: "chat-1".to_string(),
                user_id: Some("u-2".to_string()),
            })
        );

        let json = r#"{"event":"hide_typing","data":{"chatId":"chat-1"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::HideTyping(_)));
    }

    #[test]
    fn test_feed_events_are_unscoped() {
        let json = r#"{"event":"new_user","data":{"id":"u-9","name":"Mia"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room(), None);

        let json = r#"{"event":"admin_notification","data":{"type":"new_message"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::AdminNotification(_)));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let json = r#"{"event":"vip_purchase","data":{}}"#;
        assert!(serde_json::from_str::<ServerEvent>(json).is_err());
    }
}
