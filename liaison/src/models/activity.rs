use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    NewUser,
    NewActivity,
}

/// Entry of the admin live feed. The payload is kept as the server sent
/// it; the feed only orders and bounds entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub kind: ActivityKind,
    pub payload: serde_json::Value,
    pub received_at: i64,
}
