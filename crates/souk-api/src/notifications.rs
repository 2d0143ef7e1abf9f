use axum::{Extension, Json, extract::State, response::IntoResponse};

use souk_types::api::{Claims, NotifyRequest};

use crate::state::AppState;

/// Ad-hoc notification trigger retained for the legacy clients: they POST
/// here after sending a message so the recipient's devices light up even
/// when the reminder pipeline has not fired yet. Delivery failure is not an
/// error; the escalation pipeline is the safety net.
pub async fn send_notification(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    let url = format!("{}/chat/{}", state.app_base_url, req.sender_id);

    let result = state
        .notifier
        .notify(req.receiver_id, "New Message", &req.message, &url)
        .await;

    Json(serde_json::json!({
        "status": if result.sent { "sent" } else { "unsent" },
    }))
}
