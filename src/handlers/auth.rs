//! Login handling
//!
//! The account store call is the one true suspension point in the packet
//! pipeline; everything touched after the await is re-validated.

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::AppState;
use crate::net::session::{Session, SessionState};
use crate::protocol::dispatch::Dispatcher;
use crate::protocol::packets::auth::{LoginAccepted, LoginFailed, LoginRequest};
use crate::protocol::packets::lobby::BattleCreated;

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register::<LoginRequest, _, _>(handle_login);
}

async fn handle_login(
    session: Arc<Session>,
    state: AppState,
    packet: LoginRequest,
) -> anyhow::Result<()> {
    let Some(username) = packet.username.filter(|u| !u.trim().is_empty()) else {
        warn!(peer = %session.addr, "login with empty username");
        session.send(&LoginFailed);
        return Ok(());
    };

    if session.lock().user.is_some() {
        warn!(peer = %session.addr, user = %username, "login on an already authenticated session");
        return Ok(());
    }

    // One live session per account.
    if let Some(other) = state.clients.find_by_username(&username) {
        if other.id != session.id {
            warn!(peer = %session.addr, user = %username, "account already connected");
            session.send(&LoginFailed);
            return Ok(());
        }
    }

    // Suspension point: the store may hit real persistence.
    let profile = state.accounts.ensure(&username).await;

    // Someone may have grabbed the name while we were suspended.
    {
        let mut shared = session.lock();
        if shared.user.is_some() {
            warn!(peer = %session.addr, user = %username, "session authenticated during store lookup");
            return Ok(());
        }
        if let Some(other) = state.clients.find_by_username(&username) {
            if other.id != session.id {
                session.send(&LoginFailed);
                return Ok(());
            }
        }
        shared.user = Some(profile.clone());
        shared.state = SessionState::ChatLobby;
    }

    info!(peer = %session.addr, user = %profile.username, rank = profile.rank, "login accepted");
    session.send(&LoginAccepted {
        username: Some(profile.username.clone()),
        rank: profile.rank,
    });

    // Ship the current battle list so the lobby opens populated.
    for json in state.battles.list_summaries() {
        session.send(&BattleCreated { json: Some(json) });
    }

    Ok(())
}
