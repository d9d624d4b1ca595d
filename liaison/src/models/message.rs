use serde::{Deserialize, Serialize};

/// Prefix of client-generated ids; never issued by the server.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Gift,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// Text, an image URL, or gift metadata encoded as JSON.
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub created_at: i64,
    /// On optimistic entries: their own temporary id. On server echoes: the
    /// temporary id of the entry being confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub is_optimistic: bool,
    /// Set when the send could not be handed to the transport.
    #[serde(skip)]
    pub failed: bool,
}

impl Message {
    /// Build the local placeholder shown before the server confirms a send.
    pub fn optimistic(
        temp_id: String,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        content_type: ContentType,
        created_at: i64,
    ) -> Self {
        Self {
            id: temp_id.clone(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            content_type,
            created_at,
            temp_id: Some(temp_id),
            is_optimistic: true,
            failed: false,
        }
    }

    /// Server-confirmed form of this message.
    pub fn confirmed(mut self) -> Self {
        self.is_optimistic = false;
        self.failed = false;
        self
    }
}

/// Issues temporary ids from the local clock, bumped so two sends within the
/// same millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct TempIdGenerator {
    last: i64,
}

impl TempIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now_ms: i64) -> String {
        let stamp = now_ms.max(self.last + 1);
        self.last = stamp;
        format!("{}{}", TEMP_ID_PREFIX, stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_server_message() {
        let json = r#"{
            "id": "srv-1",
            "chatId": "chat-42",
            "senderId": "user-7",
            "content": "https://cdn.example/a.jpg",
            "contentType": "image",
            "createdAt": 1700000000000
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "srv-1");
        assert_eq!(msg.content_type, ContentType::Image);
        assert_eq!(msg.temp_id, None);
        assert!(!msg.is_optimistic);
        assert!(!msg.failed);
    }

    #[test]
    fn test_content_type_defaults_to_text() {
        let json = r#"{"id":"1","chatId":"c","senderId":"s","content":"hey","createdAt":1}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content_type, ContentType::Text);
    }

    #[test]
    fn test_failed_flag_is_not_serialized() {
        let mut msg = Message::optimistic(
            "temp-1".to_string(),
            "c",
            "s",
            "hi",
            ContentType::Text,
            1,
        );
        msg.failed = true;
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("failed"));
        assert!(json.contains("\"tempId\":\"temp-1\""));
        assert!(json.contains("\"isOptimistic\":true"));
    }

    #[test]
    fn test_temp_ids_are_monotonic() {
        let mut ids = TempIdGenerator::new();
        let a = ids.next(1000);
        let b = ids.next(1000);
        let c = ids.next(999);
        assert_eq!(a, "temp-1000");
        assert_eq!(b, "temp-1001");
        assert_eq!(c, "temp-1002");
        assert!(c.starts_with(TEMP_ID_PREFIX));
    }
}
