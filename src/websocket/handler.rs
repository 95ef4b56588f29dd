use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::models::{
    CollabError, CollabMessage, Identity, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_PROTOCOL_VIOLATION, CLOSE_ROOM_REQUIRED,
};
use crate::services::auth_service::get_auth_token;
use crate::utils::scope_guard::ScopeGuard;
use crate::websocket::heartbeat::{Liveness, Beat};
use crate::ws::connctx::{ConnCtx, ConnHandle, Outbound};
use crate::ws::room::Room;
use crate::AppState;

/// Query parameters accepted on the collaboration endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    pub room: Option<String>,
}

/// WebSocket handler for `/collab/*room_id`
pub async fn collab_ws_path(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Response {
    accept(ws, state, Some(room_id), query, &headers)
}

/// WebSocket handler for `/collab?room=...`
pub async fn collab_ws_query(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Response {
    accept(ws, state, None, query, &headers)
}

fn accept(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    path_room: Option<String>,
    query: ConnectQuery,
    headers: &HeaderMap,
) -> Response {
    let room_id = path_room
        .map(|r| r.trim_start_matches('/').to_string())
        .filter(|r| !r.is_empty())
        .or(query.room)
        .unwrap_or_default();
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| get_auth_token(headers).ok());

    info!("New collaboration connection attempt for room '{}'", room_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, token))
}

/// Handle one collaboration connection from handshake to teardown
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    if room_id.is_empty() {
        warn!("Connection rejected: no room given");
        close_socket(&mut sink, CLOSE_ROOM_REQUIRED, "room-required").await;
        return;
    }

    // 1. Verify the credential
    let identity = match authenticate(&state, token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Connection to room {} rejected: {}", room_id, e);
            close_socket(&mut sink, e.close_code(), e.close_reason()).await;
            return;
        }
    };

    // 2. Check permission on the room
    if let Err(e) = authorize(&state, &room_id, &identity).await {
        warn!("Connection of {} to room {} rejected: {}", identity.principal(), room_id, e);
        close_socket(&mut sink, e.close_code(), e.close_reason()).await;
        return;
    }

    // 3. Register with the room
    let ctx = ConnCtx {
        conn_id: state.registry.next_conn_id(),
        user_id: identity.subject.clone(),
        firm_id: identity.firm_id.clone(),
        room_id: room_id.clone(),
    };
    let (tx, rx) = mpsc::channel(state.config.outbound_buffer.max(1));
    // The room holds the only strong sender; once it drops the connection the
    // writer ends.
    let weak_tx = tx.downgrade();
    let room = match register(&state, &ctx, tx).await {
        Ok(room) => room,
        Err(e) => {
            error!("Room {} unavailable: {}", room_id, e);
            close_socket(&mut sink, e.close_code(), e.close_reason()).await;
            return;
        }
    };
    info!(
        "Connection {} of {} joined room {}",
        ctx.conn_id,
        identity.principal(),
        room_id
    );

    let registry = state.registry.clone();
    let guard_ctx = ctx.clone();
    let guard = ScopeGuard::new(move || {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.remove(&guard_ctx).await;
            });
        }
    });

    let mut writer = tokio::spawn(write_loop(sink, rx));
    let mut writer_done = false;

    // 4. Read until the peer leaves, misbehaves or stops answering pings
    let period = state.config.heartbeat_interval().max(Duration::from_secs(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut liveness = Liveness::new();
    let mut violations: u32 = 0;
    let max_violations = state.config.max_protocol_violations.max(1);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let result = match incoming {
                    Some(Ok(Message::Binary(data))) => match CollabMessage::decode(&data) {
                        Ok(msg) => room.receive(&ctx, msg).await,
                        Err(e) => Err(e),
                    },
                    Some(Ok(Message::Text(_))) => Err(CollabError::Protocol("text frames are not supported".to_string())),
                    Some(Ok(Message::Pong(_))) => {
                        liveness.acknowledge();
                        Ok(())
                    }
                    Some(Ok(Message::Ping(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Connection {} read error: {}", ctx.conn_id, e);
                        break;
                    }
                };

                if let Err(e) = result {
                    violations += 1;
                    warn!(
                        "Protocol violation {}/{} on connection {} in room {}: {}",
                        violations, max_violations, ctx.conn_id, room_id, e
                    );
                    if violations >= max_violations {
                        force_close(&weak_tx, CLOSE_PROTOCOL_VIOLATION, "protocol-violation");
                        break;
                    }
                }
            }
            _ = ticker.tick() => match liveness.beat() {
                Beat::Ping => match weak_tx.upgrade() {
                    Some(tx) => {
                        let _ = tx.try_send(Outbound::Ping);
                    }
                    None => break,
                },
                Beat::TimedOut => {
                    warn!("Connection {} in room {} missed its heartbeat", ctx.conn_id, room_id);
                    force_close(&weak_tx, CLOSE_HEARTBEAT_TIMEOUT, "heartbeat-timeout");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                debug!("Writer of connection {} finished", ctx.conn_id);
                break;
            }
        }
    }

    // 5. Tear down: leave the room, let the writer flush its close frame
    state.registry.remove(&ctx).await;
    guard.dismiss();
    drop(room);

    if !writer_done && tokio::time::timeout(Duration::from_secs(5), &mut writer).await.is_err() {
        writer.abort();
    }
    info!("Connection {} to room {} terminated", ctx.conn_id, room_id);
}

async fn authenticate(state: &AppState, token: Option<&str>) -> Result<Identity, CollabError> {
    match token {
        Some(token) if !token.is_empty() => state.verifier.verify_credential(token).await,
        _ => Err(CollabError::Authentication("missing credential".to_string())),
    }
}

async fn authorize(state: &AppState, room_id: &str, identity: &Identity) -> Result<(), CollabError> {
    match state.permissions.check_permission(room_id, identity).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(CollabError::Authorization(format!(
            "{} may not edit {}",
            identity.principal(),
            room_id
        ))),
        Err(e) => Err(e),
    }
}

/// Join the room, retrying when it was unloaded between lookup and join.
async fn register(state: &AppState, ctx: &ConnCtx, tx: mpsc::Sender<Outbound>) -> Result<Arc<Room>, CollabError> {
    for _ in 0..3 {
        let room = state.registry.get_or_create(&ctx.room_id);
        room.ensure_loaded(state.store.as_ref()).await?;
        if room.join(ConnHandle::new(ctx.clone(), tx.clone())).await {
            return Ok(room);
        }
        debug!("Room {} was unloaded while joining, retrying", ctx.room_id);
    }
    Err(CollabError::Persistence(format!("Room {} is being unloaded", ctx.room_id)))
}

fn force_close(tx: &mpsc::WeakSender<Outbound>, code: u16, reason: &str) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

async fn close_socket(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
}

/// Drain the outbound queue onto the socket
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let result = match out {
            Outbound::Frame(frame) => sink.send(Message::Binary(frame.as_ref().clone())).await,
            Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        };
        if let Err(e) = result {
            debug!("Write failed, stopping writer: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}
