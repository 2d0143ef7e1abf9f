use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use souk_types::api::{Claims, RegisterPushTargetRequest};

use crate::state::AppState;

/// Register a delivery endpoint for the caller. The clients re-post their
/// subscription on every page load, so an exact duplicate is acknowledged
/// with 200 rather than stored twice.
pub async fn register(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterPushTargetRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let subscription = match (&req.token, &req.subscription) {
        (Some(_), None) => None,
        (None, Some(value)) => Some(
            serde_json::to_string(value).map_err(|_| StatusCode::BAD_REQUEST)?,
        ),
        // Exactly one of token / subscription must be present
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let db = state.db.clone();
    let user_id = claims.sub;
    let token = req.token;

    let created = tokio::task::spawn_blocking(move || {
        db.add_push_target(user_id, token.as_deref(), subscription.as_deref())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if created {
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "message": "Push target registered" })),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Push target already registered" })),
        ))
    }
}

/// Remove every delivery endpoint registered for the caller.
pub async fn unregister(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let deleted = tokio::task::spawn_blocking(move || db.delete_push_targets_for(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if deleted == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(serde_json::json!({ "message": "Push targets deleted" })))
}
