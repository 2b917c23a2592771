//! WebSocket upgrade handler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{Connection, Outbound, PlayerId};
use crate::util::rate_limit::ConnectionRateLimiter;

/// WebSocket upgrade handler
///
/// Clients authenticate in-band with an AUTH packet, so the upgrade itself is
/// open.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, outbound_rx) = Connection::new(state.config.outbound_queue_capacity);
    let connection_id = connection.id();
    let open = connection.open_flag();

    let player_id = match state.world.connect(connection).await {
        Ok(id) => id,
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to join world");
            return;
        }
    };
    info!(player_id = %player_id, connection = %connection_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();

    // Writer task: outbound queue -> WebSocket
    let mut writer = tokio::spawn(write_frames(player_id, ws_sink, outbound_rx, open.clone()));

    // Reader loop: WebSocket -> world
    let rate_limiter = ConnectionRateLimiter::new(state.config.packet_rate_limit);
    loop {
        let result = tokio::select! {
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer => {
                debug!(player_id = %player_id, "Writer finished, closing reader");
                break;
            }
        };

        match result {
            Ok(Message::Binary(data)) => {
                if !open.load(Ordering::Acquire) {
                    break;
                }
                if !rate_limiter.check_packet() {
                    warn!(player_id = %player_id, "Rate limited packet");
                    continue;
                }
                if state
                    .world
                    .packet(player_id, Bytes::from(data))
                    .await
                    .is_err()
                {
                    debug!(player_id = %player_id, "World closed");
                    break;
                }
            }
            Ok(Message::Text(_)) => {
                debug!(player_id = %player_id, "Received text message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // No-op if the world already removed the player
    let _ = state.world.disconnect(player_id).await;
    writer.abort();

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Drain the connection's outbound queue into the socket
async fn write_frames(
    player_id: PlayerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Frame(frame) if open.load(Ordering::Acquire) => {
                if let Err(e) = ws_sink.send(Message::Binary(frame.to_vec())).await {
                    debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
            Outbound::Frame(_) | Outbound::Close => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
