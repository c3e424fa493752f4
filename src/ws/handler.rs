//! WebSocket connection handling
//!
//! A connection's first message must be a join. After the snapshot goes
//! out, a writer task fans the team broadcast channel and direct replies
//! into the socket while the reader loop forwards intent to the session's
//! input buffer. Clock sync is answered from the connection itself, never
//! through the tick loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::session::PlayerInput;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

const DIRECT_BUFFER: usize = 16;

pub async fn ws_handler(State(app): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Wait for a join; denials keep the socket open so the client can
    // retry with another name
    let bundle = loop {
        let Some(Ok(msg)) = stream.next().await else {
            return;
        };
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<ClientMsg>(&text) {
            Ok(ClientMsg::Join { name }) => match app.lobby.join(&name) {
                Ok(bundle) => break bundle,
                Err(err) => {
                    debug!(%err, "Join denied");
                    let denied = ServerMsg::JoinDenied {
                        reason: err.to_string(),
                    };
                    if send_msg(&mut sink, &denied).await.is_err() {
                        return;
                    }
                }
            },
            Ok(other) => debug!(msg = ?other, "Message before join ignored"),
            Err(err) => debug!(%err, "Malformed message before join"),
        }
    };
    let player_id = bundle.player_id;
    let session_id = bundle.session_id;

    if send_msg(&mut sink, &bundle.accepted).await.is_err() {
        app.lobby.leave(session_id, player_id);
        return;
    }

    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(DIRECT_BUFFER);
    let mut team_rx = bundle.team_rx;
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                res = team_rx.recv() => match res {
                    Ok(msg) => {
                        if send_msg(&mut sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%player_id, skipped, "Client fell behind the broadcast stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => {
                        if send_msg(&mut sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let limiter = ConnectionRateLimiter::new();
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        if !limiter.check() {
            warn!(%player_id, "Input rate limit exceeded, dropping message");
            continue;
        }
        match serde_json::from_str::<ClientMsg>(&text) {
            Ok(ClientMsg::ClockSync { client_time }) => {
                let server_time = unix_millis();
                let reply = ServerMsg::ClockSyncReply {
                    server_time,
                    clock_offset: server_time as i64 - client_time as i64,
                    tick_rate: app.tick_rate.get(),
                };
                let _ = direct_tx.send(reply).await;
            }
            Ok(ClientMsg::Leave) => break,
            Ok(ClientMsg::Join { .. }) => {
                debug!(%player_id, "Duplicate join on a live connection ignored");
            }
            Ok(msg) => {
                // Buffered for the next tick; a full buffer drops the
                // message rather than blocking the socket
                if bundle
                    .input_tx
                    .try_send(PlayerInput { player_id, msg })
                    .is_err()
                {
                    warn!(%player_id, "Session input buffer full, dropping message");
                }
            }
            Err(err) => debug!(%player_id, %err, "Malformed client message"),
        }
    }

    writer.abort();
    app.lobby.leave(session_id, player_id);
    info!(%player_id, "Connection closed");
}

async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(err) => {
            warn!(%err, "Dropping unserializable message");
            Ok(())
        }
    }
}
