//! In-battle handlers: entry and exit, the two-phase spawn cycle, movement
//! relay, self-destruct, flag drops, and battle chat.
//!
//! Every handler runs lock-light: session state is read and mutated under a
//! short critical section, then broadcasts happen against a roster snapshot.
//! Anything that awaited in between re-validates battle membership and the
//! tank incarnation before acting.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::battle::Team;
use crate::game::maps::BoxAction;
use crate::game::service::FlagEvent;
use crate::game::{workflow, DESTROY_RESPAWN_DELAY_MS, FULL_HEALTH};
use crate::net::session::{Session, SpawnReservation, TankState};
use crate::protocol::dispatch::Dispatcher;
use crate::protocol::packets::battle::{
    ActivateTank, BattleChatMessage, BattleChatRequest, CapturePointUpdate, DestroyTank,
    DropFlagRequest, EnterBattle, EnterBattleAsSpectator, EquipmentChanged, ExitFromBattle,
    FlagCaptured, FlagDropped, FlagReturned, FlagTaken, FullMoveCommand, FullMovePacket,
    MoveCommand, MovePacket, PrepareToSpawn, RailgunShot, RailgunShotCommand, ReadyToActivate,
    ReadyToPlace, ReadyToSpawn, RemoveTank, RotateTurretCommand, SelfDestruct, SetHealth,
    SpawnTank, TurretRotation, UnloadBattle,
};
use crate::protocol::packets::{encode, ServerPacket};
use crate::protocol::Vector3;

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register::<EnterBattle, _, _>(handle_enter_battle);
    dispatcher.register::<EnterBattleAsSpectator, _, _>(handle_enter_spectator);
    dispatcher.register::<ExitFromBattle, _, _>(handle_exit);
    dispatcher.register::<ReadyToSpawn, _, _>(handle_ready_to_spawn);
    dispatcher.register::<ReadyToPlace, _, _>(handle_ready_to_place);
    dispatcher.register::<ReadyToActivate, _, _>(handle_ready_to_activate);
    dispatcher.register::<MoveCommand, _, _>(handle_move);
    dispatcher.register::<FullMoveCommand, _, _>(handle_full_move);
    dispatcher.register::<RotateTurretCommand, _, _>(handle_rotate_turret);
    dispatcher.register::<RailgunShotCommand, _, _>(handle_railgun_shot);
    dispatcher.register::<SelfDestruct, _, _>(handle_self_destruct);
    dispatcher.register::<DropFlagRequest, _, _>(handle_drop_flag);
    dispatcher.register::<BattleChatRequest, _, _>(handle_battle_chat);
}

/// One packet to every participant of the battle, spectators included.
/// The roster is snapshotted here; peers who leave between snapshot and
/// send are skipped by the registry.
fn broadcast<P: ServerPacket>(state: &AppState, battle_id: &str, exclude: Option<&str>, packet: &P) {
    let participants = state.battles.participants(battle_id);
    state
        .clients
        .send_to_battle(battle_id, &participants, exclude, encode(packet));
}

// ---------------------------------------------------------------------------
// Entry / exit
// ---------------------------------------------------------------------------

async fn handle_enter_battle(
    session: Arc<Session>,
    state: AppState,
    packet: EnterBattle,
) -> anyhow::Result<()> {
    let (user, battle_id) = {
        let shared = session.lock();
        let Some(user) = shared.user.clone() else {
            warn!(peer = %session.addr, "battle entry before login");
            return Ok(());
        };
        if shared.current_battle.is_some() {
            warn!(peer = %session.addr, user = %user.username, "battle entry while already in a battle");
            return Ok(());
        }
        let Some(battle_id) = shared.last_viewed_battle.clone() else {
            warn!(peer = %session.addr, user = %user.username, "battle entry without a selected battle");
            return Ok(());
        };
        (user, battle_id)
    };

    let team = match state.battles.join(&user, &battle_id, Team::from_wire(packet.team)) {
        Ok(team) => team,
        Err(e) => {
            warn!(peer = %session.addr, user = %user.username, battle_id = %battle_id, error = %e, "battle entry rejected");
            return Ok(());
        }
    };

    workflow::enter_battle(&mut session.lock(), &battle_id, false);
    info!(user = %user.username, battle_id = %battle_id, team = ?team, "joined battle");
    Ok(())
}

async fn handle_enter_spectator(
    session: Arc<Session>,
    state: AppState,
    _packet: EnterBattleAsSpectator,
) -> anyhow::Result<()> {
    let (user, battle_id) = {
        let shared = session.lock();
        let Some(user) = shared.user.clone() else {
            warn!(peer = %session.addr, "spectate before login");
            return Ok(());
        };
        if shared.current_battle.is_some() {
            warn!(peer = %session.addr, user = %user.username, "spectate while already in a battle");
            return Ok(());
        }
        let Some(battle_id) = shared.last_viewed_battle.clone() else {
            warn!(peer = %session.addr, user = %user.username, "spectate without a selected battle");
            return Ok(());
        };
        (user, battle_id)
    };

    if let Err(e) = state.battles.add_spectator(&user, &battle_id) {
        warn!(peer = %session.addr, user = %user.username, battle_id = %battle_id, error = %e, "spectate rejected");
        return Ok(());
    }

    workflow::enter_battle(&mut session.lock(), &battle_id, true);
    info!(user = %user.username, battle_id = %battle_id, "spectating battle");
    Ok(())
}

async fn handle_exit(
    session: Arc<Session>,
    state: AppState,
    packet: ExitFromBattle,
) -> anyhow::Result<()> {
    let (username, battle_id, position) = {
        let shared = session.lock();
        let Some(user) = shared.user.as_ref() else {
            warn!(peer = %session.addr, "battle exit before login");
            return Ok(());
        };
        let Some(battle_id) = shared.current_battle.clone() else {
            warn!(peer = %session.addr, user = %user.username, "battle exit while not in a battle");
            return Ok(());
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

    session.send(&UnloadBattle);
    workflow::finalize_exit(&mut session.lock(), packet.layout);
    info!(user = %username, battle_id = %battle_id, layout = packet.layout, "left battle");
    Ok(())
}

// ---------------------------------------------------------------------------
// Spawn cycle
// ---------------------------------------------------------------------------

async fn handle_ready_to_spawn(
    session: Arc<Session>,
    state: AppState,
    _packet: ReadyToSpawn,
) -> anyhow::Result<()> {
    let (username, battle_id) = {
        let shared = session.lock();
        let Some(user) = shared.user.as_ref() else {
            warn!(peer = %session.addr, "spawn request before login");
            return Ok(());
        };
        if shared.is_spectator {
            warn!(peer = %session.addr, user = %user.username, "spawn request from a spectator");
            return Ok(());
        }
        let Some(battle_id) = shared.current_battle.clone() else {
            warn!(peer = %session.addr, user = %user.username, "spawn request outside a battle");
            return Ok(());
        };
        (user.username.clone(), battle_id)
    };

    let team = state.battles.team_of(&battle_id, &username);
    let spawn = match state.battles.select_spawn(&battle_id, team) {
        Ok(spawn) => spawn,
        Err(e) => {
            warn!(user = %username, battle_id = %battle_id, error = %e, "no spawn available");
            return Ok(());
        }
    };

    {
        let mut shared = session.lock();
        // Exit may have raced the spawn selection.
        if shared.current_battle.as_deref() != Some(battle_id.as_str()) {
            return Ok(());
        }
        shared.pending_spawn = Some(SpawnReservation {
            position: spawn.position,
            rotation: spawn.rotation,
        });
    }

    session.send(&PrepareToSpawn {
        position: Some(spawn.position),
        rotation: Some(spawn.rotation),
    });
    Ok(())
}

async fn handle_ready_to_place(
    session: Arc<Session>,
    state: AppState,
    _packet: ReadyToPlace,
) -> anyhow::Result<()> {
    let placed = {
        let mut shared = session.lock();
        let Some(user) = shared.user.as_ref() else {
            warn!(peer = %session.addr, "placement before login");
            return Ok(());
        };
        let username = user.username.clone();
        let Some(battle_id) = shared.current_battle.clone() else {
            warn!(peer = %session.addr, user = %username, "placement outside a battle");
            return Ok(());
        };

        // Placement is only valid while a reservation is held. A client
        // placing without one has desynchronized state.
        let Some(reservation) = shared.pending_spawn.take() else {
            warn!(peer = %session.addr, user = %username, "placement without a spawn reservation");
            session.force_disconnect();
            return Ok(());
        };

        shared.incarnation = shared.incarnation.wrapping_add(1);
        shared.tank = TankState::Newcome;
        shared.self_destruct_pending = false;
        shared.current_health = FULL_HEALTH;
        shared.position = Some(reservation.position);
        shared.orientation = Some(reservation.rotation);
        let equipment_changed = std::mem::take(&mut shared.pending_equipment_respawn);
        (username, battle_id, reservation, shared.incarnation, equipment_changed)
    };
    let (username, battle_id, reservation, incarnation, equipment_changed) = placed;

    state.battles.start_round(&battle_id);

    // Peers rebuild the tank model when it comes back with new equipment.
    if equipment_changed {
        broadcast(
            &state,
            &battle_id,
            Some(&username),
            &RemoveTank {
                nickname: Some(username.clone()),
            },
        );
        broadcast(
            &state,
            &battle_id,
            Some(&username),
            &EquipmentChanged {
                nickname: Some(username.clone()),
            },
        );
    }

    session.send(&SetHealth {
        nickname: Some(username.clone()),
        health: FULL_HEALTH,
    });

    let team = state.battles.team_of(&battle_id, &username);
    broadcast(
        &state,
        &battle_id,
        None,
        &SpawnTank {
            nickname: Some(username),
            team: team.to_wire(),
            position: Some(reservation.position),
            orientation: Some(reservation.rotation),
            health: FULL_HEALTH,
            incarnation,
        },
    );
    Ok(())
}

async fn handle_ready_to_activate(
    session: Arc<Session>,
    state: AppState,
    _packet: ReadyToActivate,
) -> anyhow::Result<()> {
    let activated = {
        let mut shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            warn!(peer = %session.addr, "activation outside a battle");
            return Ok(());
        };
        if shared.tank != TankState::Newcome {
            debug!(user = %user.username, tank = ?shared.tank, "activation in wrong tank state, ignored");
            return Ok(());
        }
        shared.tank = TankState::Active;
        (user.username, battle_id)
    };

    broadcast(
        &state,
        &activated.1,
        None,
        &ActivateTank {
            nickname: Some(activated.0),
        },
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Shared precondition for every movement packet: authenticated combatant
/// with a live tank. Updates the server-side pose and returns the relay
/// context.
fn apply_move(
    session: &Arc<Session>,
    command: &MoveCommand,
) -> Option<(String, String)> {
    let mut shared = session.lock();
    let user = shared.user.as_ref()?.username.clone();
    let battle_id = shared.current_battle.clone()?;
    if shared.is_spectator || shared.tank == TankState::Dead {
        debug!(peer = %session.addr, user = %user, "movement without a live tank, dropped");
        return None;
    }
    if command.position.is_some() {
        shared.position = command.position;
    }
    if command.orientation.is_some() {
        shared.orientation = command.orientation;
    }
    Some((user, battle_id))
}

/// Movement doubles as the proximity trigger for flags, capture points,
/// and penalty volumes.
fn field_interactions(
    session: &Arc<Session>,
    state: &AppState,
    battle_id: &str,
    username: &str,
    position: Vector3,
) {
    for event in state.battles.flag_interactions(battle_id, username, position) {
        match event {
            FlagEvent::Taken { flag_team, carrier } => {
                info!(battle_id = %battle_id, carrier = %carrier, flag = ?flag_team, "flag taken");
                broadcast(
                    state,
                    battle_id,
                    None,
                    &FlagTaken {
                        team: flag_team.to_wire(),
                        carrier: Some(carrier),
                    },
                );
            }
            FlagEvent::Returned { flag_team } => {
                broadcast(
                    state,
                    battle_id,
                    None,
                    &FlagReturned {
                        team: flag_team.to_wire(),
                    },
                );
            }
            FlagEvent::Captured {
                flag_team,
                carrier,
                score_blue,
                score_red,
            } => {
                info!(
                    battle_id = %battle_id,
                    carrier = %carrier,
                    score_blue,
                    score_red,
                    "flag captured"
                );
                broadcast(
                    state,
                    battle_id,
                    None,
                    &FlagCaptured {
                        team: flag_team.to_wire(),
                        carrier: Some(carrier),
                        score_blue,
                        score_red,
                    },
                );
            }
        }
    }

    for (point_id, owner, score) in state
        .battles
        .update_point_occupancy(battle_id, username, position)
    {
        broadcast(
            state,
            battle_id,
            None,
            &CapturePointUpdate {
                point_id,
                state: owner,
                score,
            },
        );
    }

    match state.battles.box_action_at(battle_id, position) {
        Some(BoxAction::Kill) => {
            if destroy_tank(session, state, username, battle_id, None) {
                info!(user = %username, battle_id = %battle_id, "tank destroyed by penalty volume");
            }
        }
        Some(BoxAction::Kick) => {
            warn!(user = %username, battle_id = %battle_id, "tank in a kick volume, disconnecting");
            session.force_disconnect();
        }
        None => {}
    }
}

async fn handle_move(
    session: Arc<Session>,
    state: AppState,
    packet: MoveCommand,
) -> anyhow::Result<()> {
    let Some((username, battle_id)) = apply_move(&session, &packet) else {
        return Ok(());
    };
    broadcast(
        &state,
        &battle_id,
        Some(&username),
        &MovePacket {
            nickname: Some(username.clone()),
            position: packet.position,
            orientation: packet.orientation,
            linear_velocity: packet.linear_velocity,
            angular_velocity: packet.angular_velocity,
            control: packet.control,
        },
    );
    if let Some(position) = packet.position {
        field_interactions(&session, &state, &battle_id, &username, position);
    }
    Ok(())
}

async fn handle_full_move(
    session: Arc<Session>,
    state: AppState,
    packet: FullMoveCommand,
) -> anyhow::Result<()> {
    let Some((username, battle_id)) = apply_move(&session, &packet.body) else {
        return Ok(());
    };
    session.lock().turret_angle = packet.turret_direction;
    broadcast(
        &state,
        &battle_id,
        Some(&username),
        &FullMovePacket {
            body: MovePacket {
                nickname: Some(username.clone()),
                position: packet.body.position,
                orientation: packet.body.orientation,
                linear_velocity: packet.body.linear_velocity,
                angular_velocity: packet.body.angular_velocity,
                control: packet.body.control,
            },
            turret_direction: packet.turret_direction,
        },
    );
    if let Some(position) = packet.body.position {
        field_interactions(&session, &state, &battle_id, &username, position);
    }
    Ok(())
}

async fn handle_rotate_turret(
    session: Arc<Session>,
    state: AppState,
    packet: RotateTurretCommand,
) -> anyhow::Result<()> {
    let relay = {
        let mut shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            return Ok(());
        };
        if shared.is_spectator || shared.tank == TankState::Dead {
            return Ok(());
        }
        shared.turret_angle = packet.angle;
        shared.turret_control = packet.control;
        (user.username, battle_id)
    };

    broadcast(
        &state,
        &relay.1,
        Some(&relay.0),
        &TurretRotation {
            nickname: Some(relay.0.clone()),
            angle: packet.angle,
            control: packet.control,
        },
    );
    Ok(())
}

/// Shots are relayed like movement: the server trusts the shooter's hit
/// list and fans it out, it does not resolve damage.
async fn handle_railgun_shot(
    session: Arc<Session>,
    state: AppState,
    packet: RailgunShotCommand,
) -> anyhow::Result<()> {
    let relay = {
        let shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            return Ok(());
        };
        if shared.is_spectator || shared.tank == TankState::Dead {
            debug!(peer = %session.addr, user = %user.username, "shot without a live tank, dropped");
            return Ok(());
        }
        (user.username, battle_id)
    };

    broadcast(
        &state,
        &relay.1,
        Some(&relay.0),
        &RailgunShot {
            nickname: Some(relay.0.clone()),
            position: packet.position,
            targets: packet.targets,
        },
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Destruction
// ---------------------------------------------------------------------------

async fn handle_self_destruct(
    session: Arc<Session>,
    state: AppState,
    _packet: SelfDestruct,
) -> anyhow::Result<()> {
    let armed = {
        let mut shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            warn!(peer = %session.addr, "self-destruct outside a battle");
            return Ok(());
        };
        if shared.tank == TankState::Dead {
            warn!(peer = %session.addr, user = %user.username, "self-destruct with no live tank, ignored");
            return Ok(());
        }
        if shared.self_destruct_pending {
            warn!(peer = %session.addr, user = %user.username, "self-destruct already pending, ignored");
            return Ok(());
        }
        shared.self_destruct_pending = true;
        (user.username, battle_id, shared.incarnation)
    };
    let (username, battle_id, incarnation) = armed;

    let delay = Duration::from_secs(state.config.self_destruct_delay_secs);
    info!(user = %username, battle_id = %battle_id, delay_secs = delay.as_secs(), "self-destruct armed");

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if destroy_tank(&session, &state, &username, &battle_id, Some(incarnation)) {
            info!(user = %username, battle_id = %battle_id, "self-destruct fired");
        }
    });

    Ok(())
}

/// Kill the live tank: drop any carried flag, broadcast the destroy, bump
/// the incarnation so pending timers die with it. With an expected
/// incarnation, a tank that respawned in the meantime is left alone.
fn destroy_tank(
    session: &Arc<Session>,
    state: &AppState,
    username: &str,
    battle_id: &str,
    expected_incarnation: Option<u16>,
) -> bool {
    let position = {
        let mut shared = session.lock();
        if expected_incarnation.is_some_and(|i| shared.incarnation != i)
            || shared.current_battle.as_deref() != Some(battle_id)
            || shared.tank == TankState::Dead
        {
            debug!(user = %username, "destroy no longer applies, dropped");
            return false;
        }
        shared.tank = TankState::Dead;
        shared.current_health = 0;
        shared.incarnation = shared.incarnation.wrapping_add(1);
        shared.self_destruct_pending = false;
        shared.position
    };

    if let Some((flag_team, at)) = state.battles.drop_flag(battle_id, username, position) {
        broadcast(
            state,
            battle_id,
            None,
            &FlagDropped {
                team: flag_team.to_wire(),
                position: Some(at),
            },
        );
    }

    broadcast(
        state,
        battle_id,
        None,
        &DestroyTank {
            nickname: Some(username.to_owned()),
            respawn_delay_ms: DESTROY_RESPAWN_DELAY_MS,
        },
    );
    true
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

async fn handle_drop_flag(
    session: Arc<Session>,
    state: AppState,
    _packet: DropFlagRequest,
) -> anyhow::Result<()> {
    let (username, battle_id, position) = {
        let shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            warn!(peer = %session.addr, "flag drop outside a battle");
            return Ok(());
        };
        (user.username, battle_id, shared.position)
    };

    match state.battles.drop_flag(&battle_id, &username, position) {
        Some((flag_team, at)) => {
            broadcast(
                &state,
                &battle_id,
                None,
                &FlagDropped {
                    team: flag_team.to_wire(),
                    position: Some(at),
                },
            );
        }
        None => {
            debug!(user = %username, battle_id = %battle_id, "flag drop while carrying nothing");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn handle_battle_chat(
    session: Arc<Session>,
    state: AppState,
    packet: BattleChatRequest,
) -> anyhow::Result<()> {
    let Some(message) = packet.message.filter(|m| !m.trim().is_empty()) else {
        return Ok(());
    };

    let (username, battle_id) = {
        let shared = session.lock();
        let (Some(user), Some(battle_id)) = (shared.user.clone(), shared.current_battle.clone())
        else {
            warn!(peer = %session.addr, "battle chat outside a battle");
            return Ok(());
        };
        (user.username, battle_id)
    };

    let Some((recipients, team, team_only)) =
        state
            .battles
            .chat_recipients(&battle_id, &username, packet.team_only)
    else {
        return Ok(());
    };

    let frame = encode(&BattleChatMessage {
        nickname: Some(username),
        message: Some(message),
        team: team.to_wire(),
        team_only,
    });
    state
        .clients
        .send_to_battle(&battle_id, &recipients, None, frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::test_state;
    use crate::net::session::{Outgoing, SessionState};
    use crate::protocol::packets::split_frame;
    use crate::store::accounts::UserProfile;
    use tokio::sync::mpsc::Receiver;

    async fn join_default(
        state: &AppState,
        addr: &str,
        name: &str,
    ) -> (Arc<Session>, Receiver<Outgoing>) {
        let (session, rx) = Session::new(addr.parse().unwrap());
        {
            let mut shared = session.lock();
            shared.user = Some(UserProfile {
                username: name.into(),
                rank: 3,
            });
            shared.state = SessionState::ChatLobby;
            shared.last_viewed_battle = state.battles.first_battle_id();
        }
        state.clients.insert(session.clone());
        handle_enter_battle(session.clone(), state.clone(), EnterBattle { team: 2 })
            .await
            .unwrap();
        assert!(session.lock().current_battle.is_some(), "join must succeed");
        (session, rx)
    }

    async fn spectate_default(
        state: &AppState,
        addr: &str,
        name: &str,
    ) -> (Arc<Session>, Receiver<Outgoing>) {
        let (session, rx) = Session::new(addr.parse().unwrap());
        {
            let mut shared = session.lock();
            shared.user = Some(UserProfile {
                username: name.into(),
                rank: 3,
            });
            shared.state = SessionState::ChatLobby;
            shared.last_viewed_battle = state.battles.first_battle_id();
        }
        state.clients.insert(session.clone());
        handle_enter_spectator(session.clone(), state.clone(), EnterBattleAsSpectator)
            .await
            .unwrap();
        (session, rx)
    }

    async fn place(session: &Arc<Session>, state: &AppState) {
        handle_ready_to_spawn(session.clone(), state.clone(), ReadyToSpawn)
            .await
            .unwrap();
        handle_ready_to_place(session.clone(), state.clone(), ReadyToPlace)
            .await
            .unwrap();
    }

    /// Drain queued frames into their packet ids; a close sentinel becomes
    /// id 0 which no packet in the catalog uses.
    fn drain_ids(rx: &mut Receiver<Outgoing>) -> Vec<i32> {
        let mut ids = Vec::new();
        while let Ok(out) = rx.try_recv() {
            match out {
                Outgoing::Frame(frame) => ids.push(split_frame(&frame).unwrap().0),
                Outgoing::Close => ids.push(0),
            }
        }
        ids
    }

    fn move_command() -> MoveCommand {
        MoveCommand {
            client_time: 100,
            position: Some(crate::protocol::Vector3::new(1.0, 2.0, 3.0)),
            orientation: None,
            linear_velocity: None,
            angular_velocity: None,
            control: 1,
        }
    }

    #[tokio::test]
    async fn movement_is_relayed_but_never_echoed() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7200", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7201", "bravo").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        handle_move(a.clone(), state.clone(), move_command())
            .await
            .unwrap();

        assert_eq!(drain_ids(&mut rx_b), vec![MovePacket::ID]);
        assert!(drain_ids(&mut rx_a).is_empty(), "sender must not be echoed");
        assert_eq!(
            a.lock().position,
            Some(crate::protocol::Vector3::new(1.0, 2.0, 3.0))
        );
    }

    #[tokio::test]
    async fn movement_from_a_dead_tank_is_dropped() {
        let state = test_state();
        let (a, _rx_a) = join_default(&state, "127.0.0.1:7202", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7203", "bravo").await;

        // No placement happened, the tank is still dead.
        handle_move(a, state, move_command()).await.unwrap();
        assert!(drain_ids(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn railgun_shot_is_relayed_to_peers_not_the_shooter() {
        use crate::protocol::packets::battle::ShotTarget;

        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7221", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7222", "bravo").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        handle_railgun_shot(
            a.clone(),
            state.clone(),
            RailgunShotCommand {
                client_time: 40,
                position: Some(Vector3::new(1.0, 2.0, 3.0)),
                targets: vec![ShotTarget {
                    nickname: "bravo".into(),
                    position: None,
                    incarnation: 1,
                    rotation: None,
                    orientation: None,
                }],
            },
        )
        .await
        .unwrap();

        assert_eq!(drain_ids(&mut rx_b), vec![RailgunShot::ID]);
        assert!(drain_ids(&mut rx_a).is_empty(), "shooter must not be echoed");
    }

    #[tokio::test]
    async fn shot_without_a_live_tank_is_dropped() {
        let state = test_state();
        let (a, _rx_a) = join_default(&state, "127.0.0.1:7223", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7224", "bravo").await;

        // No placement happened, so there is nothing to shoot with.
        handle_railgun_shot(
            a,
            state,
            RailgunShotCommand {
                client_time: 1,
                position: None,
                targets: Vec::new(),
            },
        )
        .await
        .unwrap();
        assert!(drain_ids(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn placement_without_reservation_disconnects() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7204", "alpha").await;

        handle_ready_to_place(a.clone(), state, ReadyToPlace)
            .await
            .unwrap();

        assert!(matches!(rx_a.try_recv(), Ok(Outgoing::Close)));
        assert_eq!(a.lock().tank, TankState::Dead);
    }

    #[tokio::test]
    async fn placement_broadcasts_spawn_to_combatants_and_spectators() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7205", "alpha").await;
        let (_s, mut rx_s) = spectate_default(&state, "127.0.0.1:7206", "watcher").await;

        place(&a, &state).await;

        let ids = drain_ids(&mut rx_a);
        assert_eq!(ids, vec![PrepareToSpawn::ID, SetHealth::ID, SpawnTank::ID]);
        assert_eq!(drain_ids(&mut rx_s), vec![SpawnTank::ID]);

        let shared = a.lock();
        assert_eq!(shared.tank, TankState::Newcome);
        assert_eq!(shared.current_health, FULL_HEALTH);
        assert_eq!(shared.incarnation, 1);
        assert!(shared.pending_spawn.is_none());
        drop(shared);

        let battle_id = a.lock().current_battle.clone().unwrap();
        assert!(state.battles.battle(&battle_id).unwrap().lock().round_started);
    }

    #[tokio::test]
    async fn placement_after_a_garage_mount_rebroadcasts_equipment() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7225", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7226", "bravo").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        // The marker an in-battle garage mount leaves behind.
        a.lock().pending_equipment_respawn = true;
        place(&a, &state).await;

        assert_eq!(
            drain_ids(&mut rx_b),
            vec![RemoveTank::ID, EquipmentChanged::ID, SpawnTank::ID]
        );
        assert_eq!(
            drain_ids(&mut rx_a),
            vec![PrepareToSpawn::ID, SetHealth::ID, SpawnTank::ID]
        );
        assert!(!a.lock().pending_equipment_respawn);
    }

    #[tokio::test]
    async fn activation_goes_out_to_everyone() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7207", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7208", "bravo").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        handle_ready_to_activate(a.clone(), state, ReadyToActivate)
            .await
            .unwrap();

        assert_eq!(a.lock().tank, TankState::Active);
        assert_eq!(drain_ids(&mut rx_a), vec![ActivateTank::ID]);
        assert_eq!(drain_ids(&mut rx_b), vec![ActivateTank::ID]);
    }

    #[tokio::test(start_paused = true)]
    async fn self_destruct_fires_after_the_delay() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7209", "alpha").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);

        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();
        // Still alive while the charge ticks.
        assert_eq!(a.lock().tank, TankState::Newcome);

        // Paused clock: sleeping past the deadline runs the charge first.
        tokio::time::sleep(Duration::from_secs(state.config.self_destruct_delay_secs + 1)).await;

        assert_eq!(a.lock().tank, TankState::Dead);
        assert_eq!(a.lock().incarnation, 2);
        assert_eq!(drain_ids(&mut rx_a), vec![DestroyTank::ID]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_self_destruct_is_refused_while_one_is_pending() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7220", "alpha").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);

        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();
        assert!(a.lock().self_destruct_pending);
        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2 * state.config.self_destruct_delay_secs + 1))
            .await;

        // One charge, one destroy; the marker resets when it fires.
        assert_eq!(drain_ids(&mut rx_a), vec![DestroyTank::ID]);
        assert!(!a.lock().self_destruct_pending);

        // A fresh placement may arm a new charge.
        place(&a, &state).await;
        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();
        assert!(a.lock().self_destruct_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn respawn_before_the_charge_fires_cancels_it() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7210", "alpha").await;
        place(&a, &state).await;

        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        // New incarnation before the charge fires.
        place(&a, &state).await;
        drain_ids(&mut rx_a);

        tokio::time::sleep(Duration::from_secs(state.config.self_destruct_delay_secs + 1)).await;

        assert_eq!(a.lock().tank, TankState::Newcome);
        assert!(
            !drain_ids(&mut rx_a).contains(&DestroyTank::ID),
            "stale charge must not destroy the new incarnation"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_battle_cancels_a_pending_charge() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7211", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7212", "bravo").await;
        place(&a, &state).await;

        handle_self_destruct(a.clone(), state.clone(), SelfDestruct)
            .await
            .unwrap();
        handle_exit(a.clone(), state.clone(), ExitFromBattle { layout: 0 })
            .await
            .unwrap();
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        tokio::time::sleep(Duration::from_secs(state.config.self_destruct_delay_secs + 1)).await;

        assert!(drain_ids(&mut rx_a).is_empty());
        assert!(drain_ids(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn exit_notifies_peers_and_unloads_the_scene() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7213", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7214", "bravo").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);
        drain_ids(&mut rx_b);

        handle_exit(a.clone(), state.clone(), ExitFromBattle { layout: 1 })
            .await
            .unwrap();

        assert_eq!(drain_ids(&mut rx_b), vec![RemoveTank::ID]);
        assert_eq!(drain_ids(&mut rx_a), vec![UnloadBattle::ID]);
        let shared = a.lock();
        assert_eq!(shared.state, SessionState::ChatGarage);
        assert!(shared.current_battle.is_none());
    }

    #[tokio::test]
    async fn driving_into_a_kill_volume_destroys_immediately() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7219", "alpha").await;
        place(&a, &state).await;
        drain_ids(&mut rx_a);

        handle_move(
            a.clone(),
            state,
            MoveCommand {
                client_time: 1,
                position: Some(Vector3::new(2000.0, 5000.0, 100.0)),
                orientation: None,
                linear_velocity: None,
                angular_velocity: None,
                control: 0,
            },
        )
        .await
        .unwrap();

        assert_eq!(a.lock().tank, TankState::Dead);
        assert_eq!(drain_ids(&mut rx_a), vec![DestroyTank::ID]);
    }

    #[tokio::test]
    async fn driving_over_the_enemy_flag_broadcasts_the_take() {
        use crate::game::battle::{BattleMode, BattleSettings};

        let state = test_state();
        let battle_id = state
            .battles
            .create(
                BattleSettings {
                    name: "ctf".into(),
                    private_battle: false,
                    battle_mode: BattleMode::Ctf,
                    map_id: "map_sandbox".into(),
                    max_people_count: 8,
                    min_rank: 1,
                    max_rank: 30,
                    time_limit_secs: 600,
                    score_limit: 20,
                    auto_balance: true,
                    friendly_fire: false,
                    parkour_mode: false,
                },
                None,
            )
            .unwrap();

        let (a, mut rx_a) = Session::new("127.0.0.1:7218".parse().unwrap());
        {
            let mut shared = a.lock();
            shared.user = Some(UserProfile {
                username: "runner".into(),
                rank: 3,
            });
            shared.state = SessionState::ChatLobby;
            shared.last_viewed_battle = Some(battle_id.clone());
        }
        state.clients.insert(a.clone());
        handle_enter_battle(a.clone(), state.clone(), EnterBattle { team: 1 })
            .await
            .unwrap();
        place(&a, &state).await;
        drain_ids(&mut rx_a);

        let red_base = {
            let battle = state.battles.battle(&battle_id).unwrap();
            let base = battle.lock().flag_red.as_ref().unwrap().base_position;
            base
        };

        handle_move(
            a.clone(),
            state,
            MoveCommand {
                client_time: 1,
                position: Some(red_base),
                orientation: None,
                linear_velocity: None,
                angular_velocity: None,
                control: 0,
            },
        )
        .await
        .unwrap();

        assert_eq!(drain_ids(&mut rx_a), vec![FlagTaken::ID]);
    }

    #[tokio::test]
    async fn battle_chat_reaches_every_participant_including_the_sender() {
        let state = test_state();
        let (a, mut rx_a) = join_default(&state, "127.0.0.1:7215", "alpha").await;
        let (_b, mut rx_b) = join_default(&state, "127.0.0.1:7216", "bravo").await;
        let (_s, mut rx_s) = spectate_default(&state, "127.0.0.1:7217", "watcher").await;

        handle_battle_chat(
            a,
            state,
            BattleChatRequest {
                message: Some("push mid".into()),
                team_only: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(drain_ids(&mut rx_a), vec![BattleChatMessage::ID]);
        assert_eq!(drain_ids(&mut rx_b), vec![BattleChatMessage::ID]);
        assert_eq!(drain_ids(&mut rx_s), vec![BattleChatMessage::ID]);
    }
}
