use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared by souk-api (REST middleware) and souk-server
/// (WebSocket upgrade authentication). Canonical definition lives here in
/// souk-types to eliminate duplication. The marketplace's identity service
/// issues these tokens; we only verify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

// -- Chat history --

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated_count: usize,
}

// -- Conversation previews --

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub latest_message: String,
    pub time: DateTime<Utc>,
    pub unread: i64,
    pub actual_sender_id: i64,
    pub actual_receiver_id: i64,
}

// -- Notifications --

/// Ad-hoc notification trigger. Field names match the legacy client payload.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(rename = "receiverId")]
    pub receiver_id: i64,
    pub message: String,
    #[serde(rename = "senderId")]
    pub sender_id: i64,
}

// -- Push targets --

/// Register a delivery endpoint: a direct push token, or a browser push
/// subscription object. Exactly one of the two must be present.
#[derive(Debug, Deserialize)]
pub struct RegisterPushTargetRequest {
    pub token: Option<String>,
    pub subscription: Option<serde_json::Value>,
}
