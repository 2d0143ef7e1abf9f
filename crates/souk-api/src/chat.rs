use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};

use souk_types::api::{Claims, MarkReadResponse, MessageResponse, PreviewResponse};

use crate::state::AppState;

/// Full history between the caller and a peer, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    // Run blocking DB reads off the async runtime
    let rows = tokio::task::spawn_blocking(move || db.messages_between(user_id, peer_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            created_at: parse_timestamp(&row.created_at, row.id),
            read: row.read,
        })
        .collect();

    Ok(Json(messages))
}

/// Mark every unread message of the conversation read. Thin boundary over
/// the ledger's `mark_conversation_read`; idempotent, second call reports 0.
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let updated_count =
        tokio::task::spawn_blocking(move || db.mark_conversation_read(user_id, peer_id))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(MarkReadResponse { updated_count }))
}

/// The caller's conversation list: one preview per pair, newest first.
pub async fn get_previews(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let rows = tokio::task::spawn_blocking(move || db.previews_for(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let previews: Vec<PreviewResponse> = rows
        .into_iter()
        .map(|row| PreviewResponse {
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            latest_message: row.latest_message,
            time: parse_timestamp(&row.time, row.sender_id),
            unread: row.unread,
            actual_sender_id: row.actual_sender_id,
            actual_receiver_id: row.actual_receiver_id,
        })
        .collect();

    Ok(Json(previews))
}

fn parse_timestamp(raw: &str, row_id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') stores "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row {}: {}", raw, row_id, e);
            chrono::DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let rfc = parse_timestamp("2026-08-06T10:30:00+00:00", 1);
        assert_eq!(rfc.to_rfc3339(), "2026-08-06T10:30:00+00:00");

        let sqlite = parse_timestamp("2026-08-06 10:30:00", 1);
        assert_eq!(sqlite, rfc);
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("not a date", 1), chrono::DateTime::<chrono::Utc>::default());
    }
}
