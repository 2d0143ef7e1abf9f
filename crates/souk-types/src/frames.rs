use serde::{Deserialize, Serialize};

/// Frame sent FROM client TO server over the chat WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub message: String,
}

/// Frame fanned out to every session in a pair room.
///
/// `created_at` is a short local-time string ("14:07"); the clients render
/// it verbatim next to the bubble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFrame {
    pub text: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub created_at: String,
    /// Present when the conversation was opened from a product page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}
