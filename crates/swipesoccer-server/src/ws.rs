use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use swipesoccer_core::net::messages::{
    ClientMessage, MoveRejectedMsg, RegisterMsg, RegisterResponseMsg, ServerMessage,
};
use swipesoccer_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_client_message, decode_message_type,
    encode_server_message,
};
use swipesoccer_core::player::PlayerId;

use crate::presence::ConnectionId;
use crate::service::{RegisterError, Registration};
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let connection = state.service.presence().next_connection_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Wait for the first message: must be a Register.
    let first_msg = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };
    let register = match decode_client_message(&first_msg) {
        Ok(ClientMessage::Register(r)) => r,
        Ok(_) => {
            send_register_error(&mut ws_sender, "Expected Register as first message").await;
            return;
        },
        Err(e) => {
            tracing::debug!(connection, error = %e, "Undecodable first message");
            return;
        },
    };

    // Validate protocol version
    if register.protocol_version != PROTOCOL_VERSION {
        send_register_error(
            &mut ws_sender,
            &format!(
                "Protocol version mismatch: client={}, server={}",
                register.protocol_version, PROTOCOL_VERSION
            ),
        )
        .await;
        return;
    }

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    let registration =
        match register_until_closed(&state, connection, &register, tx.clone(), &mut ws_receiver)
            .await
        {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                tracing::info!(connection, error = %e, "Registration refused");
                send_register_error(&mut ws_sender, &e.to_string()).await;
                state.service.disconnect(connection).await;
                return;
            },
            None => {
                state.service.disconnect(connection).await;
                return;
            },
        };

    let response = ServerMessage::RegisterResponse(RegisterResponseMsg {
        success: true,
        player: Some(registration.player.clone()),
        game_id: Some(registration.game.id),
        error: None,
    });
    let sent = match encode_server_message(&response) {
        Ok(data) => ws_sender.send(Message::Binary(data.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode RegisterResponse");
            false
        },
    };
    if !sent {
        state.service.disconnect(connection).await;
        return;
    }

    spawn_writer(ws_sender, rx);

    let player_id = registration.player.id;
    read_loop(&mut ws_receiver, &state, player_id, &tx, &registration.cancel).await;

    state.service.disconnect(connection).await;
}

/// Run registration to completion while watching the socket. Returns `None`
/// if the client hung up, after registration has settled.
async fn register_until_closed(
    state: &AppState,
    connection: ConnectionId,
    register: &RegisterMsg,
    tx: mpsc::Sender<Bytes>,
    ws_receiver: &mut SplitStream<WebSocket>,
) -> Option<Result<Registration, RegisterError>> {
    let registration = state.service.register(
        connection,
        &register.token,
        register.player_name.as_deref(),
        tx,
    );
    tokio::pin!(registration);

    let mut closed = false;
    let result = loop {
        tokio::select! {
            result = &mut registration => break result,
            msg = ws_receiver.next(), if !closed => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    closed = true;
                    // Cancels any lock wait once the connection is bound.
                    state.service.disconnect(connection).await;
                },
                // Nothing else is meaningful before the response.
                Some(Ok(_)) => {},
            },
        }
    };

    if closed { None } else { Some(result) }
}

async fn send_register_error(ws_sender: &mut SplitSink<WebSocket, Message>, error: &str) {
    let msg = ServerMessage::RegisterResponse(RegisterResponseMsg {
        success: false,
        player: None,
        game_id: None,
        error: Some(error.to_string()),
    });
    if let Ok(response) = encode_server_message(&msg)
        && let Err(e) = ws_sender.send(Message::Binary(response.into())).await
    {
        tracing::warn!(error = %e, "Failed to send register error response");
    }
}

fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    player_id: PlayerId,
    own_sender: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    loop {
        let msg = tokio::select! {
            // Superseded by a newer connection of the same player.
            _ = cancel.cancelled() => break,
            msg = ws_receiver.next() => msg,
        };
        let data = match msg {
            Some(Ok(Message::Binary(d))) => d,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };

        // Rate limit: drop messages that exceed per-connection rate
        if !rate_limiter.allow() {
            tracing::warn!(player_id = %player_id, "Rate limited");
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let msg_type = match decode_message_type(&data) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if msg_type.is_server_only() {
            tracing::warn!(
                player_id = %player_id,
                ?msg_type,
                "Rejected server-only message from client"
            );
            continue;
        }

        match decode_client_message(&data) {
            Ok(ClientMessage::KickBall(kick)) => {
                if let Err(reason) = state.service.submit_move(player_id, kick.target).await {
                    if reason.is_transient() {
                        tracing::warn!(player_id = %player_id, target = kick.target, %reason, "Kick rejected, game busy");
                    } else {
                        tracing::debug!(player_id = %player_id, target = kick.target, %reason, "Kick rejected");
                    }
                    let msg = ServerMessage::MoveRejected(MoveRejectedMsg {
                        target: kick.target,
                        reason,
                    });
                    if let Ok(encoded) = encode_server_message(&msg)
                        && let Err(e) = own_sender.try_send(Bytes::from(encoded))
                    {
                        tracing::debug!(player_id = %player_id, error = %e, "Dropped rejection notice");
                    }
                }
            },
            Ok(ClientMessage::Register(_)) => {
                tracing::debug!(player_id = %player_id, "Ignoring repeated Register");
            },
            Err(e) => {
                tracing::debug!(player_id = %player_id, error = %e, "Undecodable client message");
            },
        }
    }
}
