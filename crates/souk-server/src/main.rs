use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use souk_api::chat;
use souk_api::middleware::require_auth;
use souk_api::notifications;
use souk_api::push_targets;
use souk_api::state::{AppState, AppStateInner};
use souk_gateway::connection::{self, SessionContext};
use souk_gateway::moderation::{ContactExchangeGate, ModerationGate};
use souk_gateway::rooms::RoomManager;
use souk_notify::dispatch::Notifier;
use souk_notify::escalation::{EscalationConfig, Escalator};
use souk_notify::providers::{
    HttpDirectPush, HttpEmailSender, HttpSubscriptionPush, HttpUserDirectory,
};
use souk_types::api::Claims;

#[derive(Clone)]
struct GatewayState {
    rooms: RoomManager,
    db: Arc<souk_db::Database>,
    gate: Arc<dyn ModerationGate>,
    escalator: Escalator,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "souk=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("SOUK_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("SOUK_DB_PATH").unwrap_or_else(|_| "souk.db".into());
    let host = std::env::var("SOUK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SOUK_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let app_base_url =
        std::env::var("SOUK_APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let accounts_url =
        std::env::var("SOUK_ACCOUNTS_URL").unwrap_or_else(|_| "http://localhost:8000".into());
    let push_api_url =
        std::env::var("SOUK_PUSH_API_URL").unwrap_or_else(|_| "http://localhost:8801/send".into());
    let push_api_key = std::env::var("SOUK_PUSH_API_KEY").unwrap_or_default();
    let webpush_api_url = std::env::var("SOUK_WEBPUSH_API_URL")
        .unwrap_or_else(|_| "http://localhost:8802/send".into());
    let webpush_vapid_key = std::env::var("SOUK_WEBPUSH_VAPID_KEY").unwrap_or_default();
    let mail_api_url =
        std::env::var("SOUK_MAIL_API_URL").unwrap_or_else(|_| "http://localhost:8803/send".into());
    let mail_api_key = std::env::var("SOUK_MAIL_API_KEY").unwrap_or_default();
    let mail_from =
        std::env::var("SOUK_MAIL_FROM").unwrap_or_else(|_| "souk.official.contact@gmail.com".into());
    let push_remind_secs: u64 = std::env::var("SOUK_PUSH_REMIND_SECS")
        .unwrap_or_else(|_| "300".into())
        .parse()?;
    let email_remind_secs: u64 = std::env::var("SOUK_EMAIL_REMIND_SECS")
        .unwrap_or_else(|_| "300".into())
        .parse()?;

    // Init database
    let db = Arc::new(souk_db::Database::open(&PathBuf::from(&db_path))?);

    // Outbound collaborators share one HTTP client
    let http = reqwest::Client::new();
    let direct_push = Arc::new(HttpDirectPush::new(
        http.clone(),
        push_api_url,
        push_api_key,
    ));
    let subscription_push = Arc::new(HttpSubscriptionPush::new(
        http.clone(),
        webpush_api_url,
        webpush_vapid_key,
    ));
    let email = Arc::new(HttpEmailSender::new(
        http.clone(),
        mail_api_url,
        mail_api_key,
        mail_from,
    ));
    let directory = Arc::new(HttpUserDirectory::new(http, accounts_url));

    let notifier = Notifier::new(db.clone(), direct_push, subscription_push);
    let escalator = Escalator::new(
        db.clone(),
        notifier.clone(),
        email,
        directory,
        EscalationConfig {
            push_delay: Duration::from_secs(push_remind_secs),
            email_delay: Duration::from_secs(email_remind_secs),
            app_base_url: app_base_url.clone(),
            ..EscalationConfig::default()
        },
    );

    // Shared state
    let rooms = RoomManager::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        notifier,
        app_base_url,
    });
    let gateway_state = GatewayState {
        rooms,
        db,
        gate: Arc::new(ContactExchangeGate),
        escalator,
        jwt_secret,
    };

    // Routes
    let protected_routes = Router::new()
        .route("/chat/previews", get(chat::get_previews))
        .route("/chat/{peer_id}/messages", get(chat::get_messages))
        .route("/chat/{peer_id}/read", post(chat::mark_conversation_read))
        .route("/notifications", post(notifications::send_notification))
        .route("/push-targets", post(push_targets::register))
        .route("/push-targets", delete(push_targets::unregister))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/ws/chat/{peer_id}", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Souk chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
    /// Product context forwarded into every frame of the conversation.
    product: Option<String>,
    owner: Option<String>,
}

/// The JWT is validated here at the HTTP upgrade layer: browsers cannot set
/// an Authorization header on a WebSocket, so the token rides in the query
/// string. Anonymous or bad tokens never reach the session loop.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Path(peer_id): Path<i64>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = query.token.ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let ctx = SessionContext {
        rooms: state.rooms,
        db: state.db,
        gate: state.gate,
        escalator: state.escalator,
        user_id: token_data.claims.sub,
        peer_id,
        product_id: query.product,
        owner_id: query.owner,
    };

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx)))
}
