use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{Local, Utc};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use souk_db::{Database, LedgerError};
use souk_notify::escalation::Escalator;
use souk_types::frames::{ChatFrame, InboundFrame};

use crate::moderation::{ModerationGate, POLICY_NOTICE};
use crate::rooms::{RoomManager, room_id};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything one chat session operates against. Identity was already
/// validated at the HTTP upgrade layer; by the time a session exists its
/// `user_id` is trusted.
#[derive(Clone)]
pub struct SessionContext {
    pub rooms: RoomManager,
    pub db: Arc<Database>,
    pub gate: Arc<dyn ModerationGate>,
    pub escalator: Escalator,
    pub user_id: i64,
    pub peer_id: i64,
    /// Carried into every outbound frame when the conversation was opened
    /// from a product page.
    pub product_id: Option<String>,
    pub owner_id: Option<String>,
}

/// Handle a pre-authenticated WebSocket connection for one conversation.
pub async fn handle_connection(socket: WebSocket, ctx: SessionContext) {
    let room = room_id(ctx.user_id, ctx.peer_id);
    let (conn_id, mut room_rx) = ctx.rooms.join(&room).await;

    info!("user {} connected to {}", ctx.user_id, room);

    let (mut sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room traffic -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = room_rx.recv() => {
                    let frame = match result {
                        Some(frame) => frame,
                        None => break,
                    };

                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Unserializable chat frame: {}", e);
                            continue;
                        }
                    };

                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client
    let recv_ctx = ctx.clone();
    let recv_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&recv_ctx, &recv_room, &text).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown removes room membership and nothing else: in-flight ledger
    // writes and already-scheduled reminder timelines keep running.
    ctx.rooms.leave(&room, conn_id).await;
    info!("user {} disconnected from {}", ctx.user_id, room);
}

async fn handle_frame(ctx: &SessionContext, room: &str, text: &str) {
    let inbound: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let preview: String = text.chars().take(200).collect();
            warn!("user {} bad frame: {} -- raw: {}", ctx.user_id, e, preview);
            return;
        }
    };

    let content = if ctx.gate.approve(&inbound.message) {
        inbound.message
    } else {
        debug!("user {} message replaced by policy notice", ctx.user_id);
        POLICY_NOTICE.to_string()
    };

    let frame = ChatFrame {
        text: content.clone(),
        sender_id: ctx.user_id,
        receiver_id: ctx.peer_id,
        created_at: Local::now().format("%H:%M").to_string(),
        product_id: ctx.product_id.clone(),
        owner_id: ctx.owner_id.clone(),
    };

    // Live fan-out first. Durability runs on its own task and is never
    // allowed to hold up the socket loop, nor is a failed write allowed to
    // claw back a broadcast that already happened.
    ctx.rooms.broadcast(room, frame).await;

    let db = ctx.db.clone();
    let escalator = ctx.escalator.clone();
    let (sender_id, receiver_id) = (ctx.user_id, ctx.peer_id);
    tokio::spawn(async move {
        record_message(&db, &escalator, sender_id, receiver_id, content).await;
    });
}

/// Append the message to the ledger, update the pair preview, and start the
/// reminder timeline for the receiver.
///
/// The policy notice is recognized by exact content match and skipped
/// entirely: a violation notice is not a real unread message, so it must
/// neither grow the message log nor touch the preview counter.
pub async fn record_message(
    db: &Arc<Database>,
    escalator: &Escalator,
    sender_id: i64,
    receiver_id: i64,
    content: String,
) {
    if content == POLICY_NOTICE {
        return;
    }

    let blocking_db = db.clone();
    let stored = tokio::task::spawn_blocking(move || {
        let message = blocking_db.append_message(sender_id, receiver_id, &content)?;
        blocking_db.upsert_preview(sender_id, receiver_id, &content, Utc::now())?;
        Ok::<_, LedgerError>(message)
    })
    .await;

    match stored {
        Ok(Ok(message)) => {
            escalator.schedule(&message);
        }
        Ok(Err(LedgerError::InvalidPair)) => {
            debug!("user {} tried to message themselves, nothing stored", sender_id);
        }
        Ok(Err(e)) => {
            // Transient: the room already saw the message live.
            warn!(
                "Ledger write failed, message from {} to {} delivered live only: {}",
                sender_id, receiver_id, e
            );
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
        }
    }
}
