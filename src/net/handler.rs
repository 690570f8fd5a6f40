//! WebSocket transport
//!
//! One binary WebSocket message carries exactly one protocol frame: a
//! 4-byte big-endian packet id followed by the payload. The socket is
//! split into a writer task draining the session's outbound queue and
//! a reader loop feeding the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::net::session::{Outgoing, Session};
use crate::protocol::packets::battle::{FlagDropped, RemoveTank};
use crate::protocol::packets::encode;
use crate::util::rate_limit::ConnectionRateLimiter;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    info!(peer = %addr, "new connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (session, mut outbound_rx) = Session::new(addr);
    state.clients.insert(session.clone());

    // Writer task: outbound queue -> socket. A close sentinel ends the
    // connection from server side.
    let writer_addr = addr;
    let writer_handle = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outgoing::Frame(frame) => {
                    if ws_sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                        debug!(peer = %writer_addr, "socket send failed");
                        break;
                    }
                }
                Outgoing::Close => {
                    info!(peer = %writer_addr, "server-side disconnect");
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let rate_limiter = ConnectionRateLimiter::new();
    let dispatcher = state.dispatcher.clone();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Binary(frame)) => {
                if !rate_limiter.check_frame() {
                    warn!(peer = %addr, "inbound frame rate exceeded, frame dropped");
                    continue;
                }
                dispatcher.dispatch(&session, &state, &frame).await;
            }
            Ok(Message::Text(_)) => {
                warn!(peer = %addr, "text message on a binary protocol, ignored");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(peer = %addr, "client initiated close");
                break;
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "socket error");
                break;
            }
        }
    }

    cleanup_battle_membership(&session, &state);
    writer_handle.abort();
    state.clients.remove(session.id);
    info!(
        peer = %addr,
        user = session.username().as_deref().unwrap_or("-"),
        "connection closed"
    );
}

/// A disconnect is an implicit battle exit: roster removal happens
/// immediately and a carried flag drops where the tank last stood.
fn cleanup_battle_membership(session: &Arc<Session>, state: &AppState) {
    let (username, battle_id, position) = {
        let shared = session.lock();
        let Some(user) = shared.user.as_ref() else {
            return;
        };
        let Some(battle_id) = shared.current_battle.clone() else {
            return;
        };
        (user.username.clone(), battle_id, shared.position)
    };

    let outcome = state.battles.leave(&username, &battle_id, position);

    if let Some((flag_team, at)) = outcome.dropped_flag {
        state.clients.send_to_battle(
            &battle_id,
            &outcome.remaining,
            None,
            encode(&FlagDropped {
                team: flag_team.to_wire(),
                position: Some(at),
            }),
        );
    }
    if !outcome.was_spectator {
        state.clients.send_to_battle(
            &battle_id,
            &outcome.remaining,
            None,
            encode(&RemoveTank {
                nickname: Some(username.clone()),
            }),
        );
    }

    info!(user = %username, battle_id = %battle_id, "removed from battle on disconnect");
}
