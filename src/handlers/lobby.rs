//! Battle-list and view-toggle handlers

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::AppState;
use crate::game::battle::{BattleMode, BattleSettings};
use crate::game::workflow;
use crate::net::session::{Session, SessionState};
use crate::protocol::dispatch::Dispatcher;
use crate::protocol::packets::encode;
use crate::protocol::packets::lobby::{
    BattleCreated, BattleDetails, CreateBattleRequest, MountItem, RequestGarage, RequestLobby,
    SelectBattle,
};

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register::<SelectBattle, _, _>(handle_select_battle);
    dispatcher.register::<CreateBattleRequest, _, _>(handle_create_battle);
    dispatcher.register::<RequestLobby, _, _>(handle_request_lobby);
    dispatcher.register::<RequestGarage, _, _>(handle_request_garage);
    dispatcher.register::<MountItem, _, _>(handle_mount_item);
}

async fn handle_select_battle(
    session: Arc<Session>,
    state: AppState,
    packet: SelectBattle,
) -> anyhow::Result<()> {
    let Some(battle_id) = packet.battle_id else {
        warn!(peer = %session.addr, "battle selection without an id");
        return Ok(());
    };

    let Some(json) = state.battles.summary_json(&battle_id) else {
        warn!(peer = %session.addr, battle_id = %battle_id, "selected battle does not exist");
        return Ok(());
    };

    session.lock().last_viewed_battle = Some(battle_id);
    session.send(&BattleDetails { json: Some(json) });
    Ok(())
}

async fn handle_create_battle(
    session: Arc<Session>,
    state: AppState,
    packet: CreateBattleRequest,
) -> anyhow::Result<()> {
    let Some(user) = session.lock().user.clone() else {
        warn!(peer = %session.addr, "battle creation before login");
        return Ok(());
    };

    let Some(battle_mode) = BattleMode::from_wire(packet.battle_mode) else {
        warn!(peer = %session.addr, mode = packet.battle_mode, "unknown battle mode");
        return Ok(());
    };

    let name = packet
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{}'s battle", user.username));
    let map_id = packet.map_id.unwrap_or_default();

    let settings = BattleSettings {
        name,
        private_battle: packet.private_battle,
        battle_mode,
        map_id,
        max_people_count: packet.max_people_count.max(1) as usize,
        min_rank: packet.min_rank,
        max_rank: packet.max_rank,
        time_limit_secs: packet.time_limit_secs,
        score_limit: packet.score_limit,
        auto_balance: packet.auto_balance,
        friendly_fire: packet.friendly_fire,
        parkour_mode: packet.parkour_mode,
    };

    let battle_id = match state.battles.create(settings, Some(&user)) {
        Ok(id) => id,
        Err(e) => {
            warn!(peer = %session.addr, user = %user.username, error = %e, "battle creation rejected");
            return Ok(());
        }
    };

    let json = state
        .battles
        .summary_json(&battle_id)
        .expect("freshly created battle has a summary");

    // Everyone browsing the list sees the new battle; public ones only.
    if !packet.private_battle {
        state
            .clients
            .send_to_lobby_viewers(encode(&BattleCreated { json: Some(json.clone()) }));
    }

    info!(user = %user.username, battle_id = %battle_id, "battle created from lobby");
    session.lock().last_viewed_battle = Some(battle_id);
    session.send(&BattleDetails { json: Some(json) });
    Ok(())
}

async fn handle_request_lobby(
    session: Arc<Session>,
    state: AppState,
    _packet: RequestLobby,
) -> anyhow::Result<()> {
    let next = {
        let mut shared = session.lock();
        match workflow::lobby_toggle(&shared) {
            Some(next) => {
                shared.state = next;
                Some(next)
            }
            None => None,
        }
    };

    match next {
        Some(SessionState::ChatLobby) | Some(SessionState::BattleLobby) => {
            // Re-ship the battle list so the overlay opens current.
            for json in state.battles.list_summaries() {
                session.send(&BattleCreated { json: Some(json) });
            }
        }
        Some(_) => {}
        None => {
            warn!(peer = %session.addr, "lobby toggle does not apply to the current view");
        }
    }
    Ok(())
}

async fn handle_request_garage(
    session: Arc<Session>,
    _state: AppState,
    _packet: RequestGarage,
) -> anyhow::Result<()> {
    let mut shared = session.lock();
    match workflow::garage_toggle(&shared) {
        Some(next) => shared.state = next,
        None => {
            warn!(peer = %session.addr, "garage toggle does not apply to the current view");
        }
    }
    Ok(())
}

async fn handle_mount_item(
    session: Arc<Session>,
    _state: AppState,
    packet: MountItem,
) -> anyhow::Result<()> {
    let mut shared = session.lock();
    let username = match shared.user.as_ref() {
        Some(user) => user.username.clone(),
        None => {
            warn!(peer = %session.addr, "item mount before login");
            return Ok(());
        }
    };
    if !matches!(
        shared.state,
        SessionState::ChatGarage | SessionState::BattleGarage
    ) {
        warn!(peer = %session.addr, user = %username, "item mount outside the garage");
        return Ok(());
    }

    // A tank on the field keeps its old loadout until it is placed again;
    // the placement rebroadcast picks the marker up.
    if shared.current_battle.is_some() {
        shared.pending_equipment_respawn = true;
    }
    info!(
        user = %username,
        item = packet.item_id.as_deref().unwrap_or("-"),
        "item mounted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::test_state;
    use crate::net::session::Outgoing;
    use crate::protocol::packets::{split_frame, ServerPacket};
    use crate::store::accounts::UserProfile;

    fn logged_in(addr: &str, name: &str) -> (Arc<Session>, tokio::sync::mpsc::Receiver<Outgoing>) {
        let (session, rx) = Session::new(addr.parse().unwrap());
        {
            let mut shared = session.lock();
            shared.user = Some(UserProfile {
                username: name.into(),
                rank: 3,
            });
            shared.state = SessionState::ChatLobby;
        }
        (session, rx)
    }

    fn next_frame_id(rx: &mut tokio::sync::mpsc::Receiver<Outgoing>) -> Option<i32> {
        match rx.try_recv().ok()? {
            Outgoing::Frame(frame) => Some(split_frame(&frame).unwrap().0),
            Outgoing::Close => None,
        }
    }

    #[tokio::test]
    async fn selecting_a_battle_records_it_and_sends_details() {
        let state = test_state();
        let (session, mut rx) = logged_in("127.0.0.1:7100", "alpha");
        let battle_id = state.battles.first_battle_id().unwrap();

        handle_select_battle(
            session.clone(),
            state,
            SelectBattle {
                battle_id: Some(battle_id.clone()),
            },
        )
        .await
        .unwrap();

        assert_eq!(session.lock().last_viewed_battle.as_deref(), Some(battle_id.as_str()));
        assert_eq!(next_frame_id(&mut rx), Some(BattleDetails::ID));
    }

    #[tokio::test]
    async fn selecting_an_unknown_battle_sends_nothing() {
        let state = test_state();
        let (session, mut rx) = logged_in("127.0.0.1:7101", "alpha");

        handle_select_battle(
            session.clone(),
            state,
            SelectBattle {
                battle_id: Some("nope".into()),
            },
        )
        .await
        .unwrap();

        assert!(session.lock().last_viewed_battle.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn creating_a_battle_announces_it_to_lobby_viewers() {
        let state = test_state();
        let (creator, mut rx) = logged_in("127.0.0.1:7102", "alpha");
        let (viewer, mut viewer_rx) = logged_in("127.0.0.1:7103", "bravo");
        state.clients.insert(creator.clone());
        state.clients.insert(viewer);

        let before = state.battles.active_battles();
        handle_create_battle(
            creator.clone(),
            state.clone(),
            CreateBattleRequest {
                name: Some("Skirmish".into()),
                private_battle: false,
                battle_mode: 1,
                map_id: Some("map_sandbox".into()),
                max_people_count: 8,
                min_rank: 1,
                max_rank: 10,
                time_limit_secs: 600,
                score_limit: 20,
                auto_balance: true,
                friendly_fire: false,
                parkour_mode: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(state.battles.active_battles(), before + 1);
        assert!(creator.lock().last_viewed_battle.is_some());
        assert_eq!(next_frame_id(&mut viewer_rx), Some(BattleCreated::ID));
        // The creator gets the announcement (also a lobby viewer) then the
        // detail view.
        assert_eq!(next_frame_id(&mut rx), Some(BattleCreated::ID));
        assert_eq!(next_frame_id(&mut rx), Some(BattleDetails::ID));
    }

    #[tokio::test]
    async fn in_battle_mount_flags_an_equipment_respawn() {
        let state = test_state();
        let (session, _rx) = logged_in("127.0.0.1:7105", "alpha");
        {
            let mut shared = session.lock();
            shared.state = SessionState::BattleGarage;
            shared.current_battle = Some("b1".into());
        }

        handle_mount_item(
            session.clone(),
            state.clone(),
            MountItem {
                item_id: Some("railgun_m2".into()),
            },
        )
        .await
        .unwrap();
        assert!(session.lock().pending_equipment_respawn);

        // Out of battle there is no tank to rebuild.
        let (garage, _rx2) = logged_in("127.0.0.1:7106", "bravo");
        garage.lock().state = SessionState::ChatGarage;
        handle_mount_item(garage.clone(), state, MountItem { item_id: None })
            .await
            .unwrap();
        assert!(!garage.lock().pending_equipment_respawn);
    }

    #[tokio::test]
    async fn invalid_mode_registers_nothing() {
        let state = test_state();
        let (session, mut rx) = logged_in("127.0.0.1:7104", "alpha");
        let before = state.battles.active_battles();

        handle_create_battle(
            session,
            state.clone(),
            CreateBattleRequest {
                name: None,
                private_battle: false,
                battle_mode: 42,
                map_id: Some("map_sandbox".into()),
                max_people_count: 8,
                min_rank: 1,
                max_rank: 10,
                time_limit_secs: 600,
                score_limit: 20,
                auto_balance: true,
                friendly_fire: false,
                parkour_mode: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(state.battles.active_battles(), before);
        assert!(rx.try_recv().is_err());
    }
}
