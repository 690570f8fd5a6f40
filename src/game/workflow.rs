//! Session state-machine transitions
//!
//! Pure functions over the session's shared state: handlers decide *when*
//! a transition applies, these encode *what* it does. Every transition
//! keeps the single-roster invariant because roster membership is mutated
//! only through the battle service, never here.

use crate::net::session::{SessionShared, SessionState, TankState};

/// Enter a battle that the service already added us to.
pub fn enter_battle(shared: &mut SessionShared, battle_id: &str, spectator: bool) {
    shared.state = SessionState::Battle;
    shared.current_battle = Some(battle_id.to_owned());
    shared.is_spectator = spectator;
    shared.tank = TankState::Dead;
    shared.pending_spawn = None;
}

/// Exit target selected by the client's layout flag: 0 = lobby, 1 = garage.
pub fn exit_target(layout: i32) -> SessionState {
    if layout == 1 {
        SessionState::ChatGarage
    } else {
        SessionState::ChatLobby
    }
}

/// Clear battle-scoped state and land on the requested screen.
pub fn finalize_exit(shared: &mut SessionShared, layout: i32) {
    shared.clear_battle_state();
    shared.state = exit_target(layout);
}

/// Lobby view toggle. Inside a battle this flips the battle-list overlay
/// without leaving the battle. Returns the new state, or `None` when the
/// request does not apply to the current state.
pub fn lobby_toggle(shared: &SessionShared) -> Option<SessionState> {
    if shared.current_battle.is_some() {
        match shared.state {
            SessionState::Battle => Some(SessionState::BattleLobby),
            SessionState::BattleLobby => Some(SessionState::Battle),
            SessionState::BattleGarage => Some(SessionState::BattleLobby),
            _ => None,
        }
    } else {
        match shared.state {
            SessionState::ChatGarage => Some(SessionState::ChatLobby),
            _ => None,
        }
    }
}

/// Garage view toggle, symmetric to [`lobby_toggle`].
pub fn garage_toggle(shared: &SessionShared) -> Option<SessionState> {
    if shared.current_battle.is_some() {
        match shared.state {
            SessionState::Battle => Some(SessionState::BattleGarage),
            SessionState::BattleLobby => Some(SessionState::BattleGarage),
            SessionState::BattleGarage => Some(SessionState::Battle),
            _ => None,
        }
    } else {
        match shared.state {
            SessionState::ChatLobby => Some(SessionState::ChatGarage),
            _ => None,
        }
    }
}
