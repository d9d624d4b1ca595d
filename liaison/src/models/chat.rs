use serde::{Deserialize, Serialize};

/// One row of the conversation sidebar.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub counterpart_id: String,
    #[serde(default)]
    pub counterpart_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<i64>,
    #[serde(default)]
    pub unread_count: u32,
}
