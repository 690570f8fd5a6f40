//! Battle engine: owns the set of active battles and every operation the
//! packet handlers drive against shared battle state.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::info;

use crate::protocol::Vector3;
use crate::store::accounts::UserProfile;
use crate::util::time::unix_millis;

use super::battle::{
    Battle, BattleMode, BattleSettings, CapturePoint, FlagState, PointOwner, Roster, Team,
};
use super::maps::{BoxAction, MapCatalog, SpawnKind, SpawnPoint};
use super::{CAPTURE_POINT_RADIUS, FLAG_INTERACTION_RADIUS, FULL_HEALTH, SPAWN_Z_OFFSET};

/// Business-rule failures surfaced to the single requesting connection
#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("battle {0} does not exist")]
    UnknownBattle(String),

    #[error("map {0} is not available on this server")]
    UnknownMap(String),

    #[error("map {0} has no flag base positions, cannot host capture-the-flag")]
    MissingFlagData(String),

    #[error("map {0} has no capture point definitions, cannot host domination")]
    MissingKeypointData(String),

    #[error("battle is full ({capacity} combat slots)")]
    BattleFull { capacity: usize },

    #[error("rank {rank} outside battle bracket {min}..={max}")]
    RankOutOfBracket { rank: i32, min: i32, max: i32 },

    #[error("{0} is already in a battle")]
    AlreadyInBattle(String),

    #[error("map {0} has no usable spawn points for this team")]
    NoSpawnPoints(String),

    #[error("capture point {0} does not exist")]
    UnknownPoint(i32),
}

/// Flag transition triggered by a tank moving through the field
#[derive(Debug, Clone, PartialEq)]
pub enum FlagEvent {
    Taken {
        flag_team: Team,
        carrier: String,
    },
    Returned {
        flag_team: Team,
    },
    Captured {
        flag_team: Team,
        carrier: String,
        score_blue: i32,
        score_red: i32,
    },
}

/// Outcome of a roster removal, for the caller to drive notifications
pub struct LeaveOutcome {
    pub was_spectator: bool,
    /// Flag the leaver was carrying, already dropped at `dropped_at`
    pub dropped_flag: Option<(Team, Vector3)>,
    /// Participants remaining after removal, spectators included
    pub remaining: Vec<String>,
}

pub struct BattleService {
    battles: DashMap<String, Arc<Mutex<Battle>>>,
    maps: MapCatalog,
}

impl BattleService {
    /// A default battle always exists so the lobby is never empty.
    pub fn new(maps: MapCatalog) -> Self {
        let service = Self {
            battles: DashMap::new(),
            maps,
        };
        let default_settings = BattleSettings {
            name: "Rookie Battle".to_owned(),
            private_battle: false,
            battle_mode: BattleMode::Dm,
            map_id: "map_sandbox".to_owned(),
            max_people_count: 8,
            min_rank: 1,
            max_rank: 30,
            time_limit_secs: 600,
            score_limit: 20,
            auto_balance: true,
            friendly_fire: false,
            parkour_mode: false,
        };
        service
            .create(default_settings, None)
            .expect("builtin catalog must support the default battle");
        service
    }

    pub fn maps(&self) -> &MapCatalog {
        &self.maps
    }

    pub fn active_battles(&self) -> usize {
        self.battles.len()
    }

    pub fn battle(&self, battle_id: &str) -> Option<Arc<Mutex<Battle>>> {
        self.battles.get(battle_id).map(|b| b.value().clone())
    }

    /// Validate settings against map data and register the battle. Nothing
    /// is registered on failure.
    pub fn create(
        &self,
        settings: BattleSettings,
        creator: Option<&UserProfile>,
    ) -> Result<String, BattleError> {
        let map = self
            .maps
            .get(&settings.map_id)
            .ok_or_else(|| BattleError::UnknownMap(settings.map_id.clone()))?;

        let mut battle = Battle::new(settings);

        match battle.settings.battle_mode {
            BattleMode::Ctf => {
                let flags = map
                    .ctf_flags
                    .ok_or_else(|| BattleError::MissingFlagData(battle.settings.map_id.clone()))?;
                battle.flag_red = Some(FlagState::at_base(flags.red));
                battle.flag_blue = Some(FlagState::at_base(flags.blue));
            }
            BattleMode::Cp => {
                if map.dom_keypoints.is_empty() {
                    return Err(BattleError::MissingKeypointData(
                        battle.settings.map_id.clone(),
                    ));
                }
                battle.capture_points = map
                    .dom_keypoints
                    .iter()
                    .enumerate()
                    .map(|(i, kp)| CapturePoint {
                        id: i as i32,
                        name: kp.name.clone(),
                        position: kp.position,
                        owner: PointOwner::Neutral,
                        score: 0.0,
                        tanks_on_point: Vec::new(),
                    })
                    .collect();
            }
            BattleMode::Dm | BattleMode::Tdm => {}
        }

        let battle_id = battle.battle_id.clone();
        info!(
            battle_id = %battle_id,
            name = %battle.settings.name,
            mode = ?battle.settings.battle_mode,
            map = %battle.settings.map_id,
            creator = creator.map(|u| u.username.as_str()).unwrap_or("System"),
            "battle created"
        );
        self.battles.insert(battle_id.clone(), Arc::new(Mutex::new(battle)));
        Ok(battle_id)
    }

    /// JSON battle summary shipped inside the lobby packets.
    pub fn summary_json(&self, battle_id: &str) -> Option<String> {
        let battle = self.battle(battle_id)?;
        let battle = battle.lock();
        Some(Self::summary_payload(&battle))
    }

    fn summary_payload(battle: &Battle) -> String {
        let mut payload = json!({
            "battleId": battle.battle_id,
            "name": battle.settings.name,
            "battleMode": battle.settings.battle_mode,
            "map": battle.settings.map_id,
            "maxPeople": battle.settings.max_people_count,
            "privateBattle": battle.settings.private_battle,
            "minRank": battle.settings.min_rank,
            "maxRank": battle.settings.max_rank,
            "parkourMode": battle.settings.parkour_mode,
        });
        if battle.is_team_mode() {
            payload["usersBlue"] = json!(battle.users_blue);
            payload["usersRed"] = json!(battle.users_red);
            payload["scoreBlue"] = json!(battle.score_blue);
            payload["scoreRed"] = json!(battle.score_red);
        } else {
            payload["users"] = json!(battle.users);
        }
        payload.to_string()
    }

    /// Summaries of every registered battle. The battle handles are cloned
    /// out of the map before any battle lock is taken: iterating holds a
    /// shard read guard, and re-entering the map under it can wedge against
    /// a writer parked on the same shard.
    pub fn list_summaries(&self) -> Vec<String> {
        let handles: Vec<Arc<Mutex<Battle>>> =
            self.battles.iter().map(|entry| entry.value().clone()).collect();
        handles
            .iter()
            .map(|battle| Self::summary_payload(&battle.lock()))
            .collect()
    }

    /// The first tank placed on the field starts the round clock.
    pub fn start_round(&self, battle_id: &str) {
        if let Some(battle) = self.battle(battle_id) {
            let mut battle = battle.lock();
            if !battle.round_started {
                battle.round_started = true;
                battle.round_start_time = Some(unix_millis());
                info!(battle_id = %battle.battle_id, "round started");
            }
        }
    }

    pub fn first_battle_id(&self) -> Option<String> {
        self.battles.iter().next().map(|e| e.key().clone())
    }

    pub fn is_user_in_battle(&self, username: &str) -> bool {
        self.battles
            .iter()
            .any(|entry| entry.value().lock().contains(username))
    }

    /// Add a combatant. Re-validates capacity and rank bracket; team modes
    /// honor an explicit team request, otherwise balance to the smaller
    /// roster.
    pub fn join(
        &self,
        user: &UserProfile,
        battle_id: &str,
        requested_team: Team,
    ) -> Result<Team, BattleError> {
        if self.is_user_in_battle(&user.username) {
            return Err(BattleError::AlreadyInBattle(user.username.clone()));
        }

        let battle = self
            .battle(battle_id)
            .ok_or_else(|| BattleError::UnknownBattle(battle_id.to_owned()))?;
        let mut battle = battle.lock();

        let capacity = battle.settings.max_people_count;
        if battle.combatant_count() >= capacity {
            return Err(BattleError::BattleFull { capacity });
        }
        if user.rank < battle.settings.min_rank || user.rank > battle.settings.max_rank {
            return Err(BattleError::RankOutOfBracket {
                rank: user.rank,
                min: battle.settings.min_rank,
                max: battle.settings.max_rank,
            });
        }

        let team = if battle.is_team_mode() {
            match requested_team {
                Team::Blue => Team::Blue,
                Team::Red => Team::Red,
                Team::None => {
                    if battle.users_blue.len() <= battle.users_red.len() {
                        Team::Blue
                    } else {
                        Team::Red
                    }
                }
            }
        } else {
            Team::None
        };

        let roster = match team {
            Team::Blue => Roster::Blue,
            Team::Red => Roster::Red,
            Team::None => Roster::Free,
        };
        battle.insert_into(roster, &user.username);
        Ok(team)
    }

    pub fn add_spectator(&self, user: &UserProfile, battle_id: &str) -> Result<(), BattleError> {
        if self.is_user_in_battle(&user.username) {
            return Err(BattleError::AlreadyInBattle(user.username.clone()));
        }
        let battle = self
            .battle(battle_id)
            .ok_or_else(|| BattleError::UnknownBattle(battle_id.to_owned()))?;
        battle.lock().insert_into(Roster::Spectators, &user.username);
        Ok(())
    }

    /// Remove a participant from whichever roster holds them. Idempotent:
    /// leaving a battle you are not in is a no-op with an empty outcome.
    /// A carried flag is dropped at `last_position` before removal so it
    /// never stays attached to a vanished carrier.
    pub fn leave(
        &self,
        username: &str,
        battle_id: &str,
        last_position: Option<Vector3>,
    ) -> LeaveOutcome {
        let Some(battle) = self.battle(battle_id) else {
            return LeaveOutcome {
                was_spectator: false,
                dropped_flag: None,
                remaining: Vec::new(),
            };
        };
        let mut battle = battle.lock();

        let was_spectator = battle.roster_of(username) == Some(Roster::Spectators);
        let dropped_flag = Self::drop_flag_locked(&mut battle, username, last_position);
        battle.remove_everywhere(username);

        LeaveOutcome {
            was_spectator,
            dropped_flag,
            remaining: battle.all_participants(),
        }
    }

    /// Everyone attached to the battle right now, spectators included.
    pub fn participants(&self, battle_id: &str) -> Vec<String> {
        self.battle(battle_id)
            .map(|b| b.lock().all_participants())
            .unwrap_or_default()
    }

    pub fn team_of(&self, battle_id: &str, username: &str) -> Team {
        self.battle(battle_id)
            .map(|b| b.lock().team_of(username))
            .unwrap_or(Team::None)
    }

    /// Pick a spawn point for the participant's team. Team spawns fall back
    /// to the free set when the map defines none. The returned position is
    /// raised so the tank never materializes inside the floor.
    pub fn select_spawn(&self, battle_id: &str, team: Team) -> Result<SpawnPoint, BattleError> {
        let battle = self
            .battle(battle_id)
            .ok_or_else(|| BattleError::UnknownBattle(battle_id.to_owned()))?;
        let map_id = battle.lock().settings.map_id.clone();
        let map = self
            .maps
            .get(&map_id)
            .ok_or_else(|| BattleError::UnknownMap(map_id.clone()))?;

        let kind = match team {
            Team::Blue => SpawnKind::Blue,
            Team::Red => SpawnKind::Red,
            Team::None => SpawnKind::Free,
        };
        let candidates: Vec<&SpawnPoint> = {
            let team_spawns: Vec<&SpawnPoint> = map.spawns_for(kind).collect();
            if team_spawns.is_empty() {
                map.spawns_for(SpawnKind::Free).collect()
            } else {
                team_spawns
            }
        };

        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .ok_or(BattleError::NoSpawnPoints(map_id))?;
        Ok(SpawnPoint {
            kind: chosen.kind,
            position: chosen.position.raised(SPAWN_Z_OFFSET),
            rotation: chosen.rotation,
        })
    }

    pub fn full_health(&self) -> i32 {
        FULL_HEALTH
    }

    /// Penalty volume lookup for a moving tank. The handlers decide the
    /// consequence: kill boxes destroy the tank, kick boxes disconnect.
    pub fn box_action_at(&self, battle_id: &str, position: Vector3) -> Option<BoxAction> {
        let battle = self.battle(battle_id)?;
        let map_id = battle.lock().settings.map_id.clone();
        self.maps
            .get(&map_id)?
            .special_geometry
            .iter()
            .find(|b| b.contains(position))
            .map(|b| b.action)
    }

    /// Recipients for a battle chat message. Team chat goes to the sender's
    /// team plus spectators; everything else (and any chat in a
    /// free-for-all battle) goes to all participants. Returns the
    /// recipients, the sender's team, and whether team routing applied.
    pub fn chat_recipients(
        &self,
        battle_id: &str,
        sender: &str,
        team_only: bool,
    ) -> Option<(Vec<String>, Team, bool)> {
        let battle = self.battle(battle_id)?;
        let battle = battle.lock();
        let team = battle.team_of(sender);

        if team_only && battle.is_team_mode() {
            let roster = match team {
                Team::Blue => &battle.users_blue,
                Team::Red => &battle.users_red,
                Team::None => return Some((battle.all_participants(), team, false)),
            };
            let mut recipients = roster.clone();
            recipients.extend(battle.spectators.iter().cloned());
            Some((recipients, team, true))
        } else {
            Some((battle.all_participants(), team, false))
        }
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    /// Attach the given flag to a carrier. No-op when the flag is already
    /// carried or the battle/flag does not exist.
    pub fn take_flag(&self, battle_id: &str, flag_team: Team, carrier: &str) -> bool {
        let Some(battle) = self.battle(battle_id) else {
            return false;
        };
        let mut battle = battle.lock();
        match battle.flag_mut(flag_team) {
            Some(flag) if flag.carrier.is_none() => {
                flag.carrier = Some(carrier.to_owned());
                true
            }
            _ => false,
        }
    }

    /// Drop whatever flag the user carries at `position`. Returns the flag
    /// team and the ground position it landed on.
    pub fn drop_flag(
        &self,
        battle_id: &str,
        username: &str,
        position: Option<Vector3>,
    ) -> Option<(Team, Vector3)> {
        let battle = self.battle(battle_id)?;
        let mut battle = battle.lock();
        Self::drop_flag_locked(&mut battle, username, position)
    }

    fn drop_flag_locked(
        battle: &mut Battle,
        username: &str,
        position: Option<Vector3>,
    ) -> Option<(Team, Vector3)> {
        let team = battle.carried_flag(username)?;
        let flag = battle.flag_mut(team)?;
        let landing = position.unwrap_or(flag.base_position);
        flag.carrier = None;
        flag.position = landing;
        Some((team, landing))
    }

    /// Send a flag back to its base, clearing any carrier.
    pub fn return_flag(&self, battle_id: &str, flag_team: Team) -> bool {
        let Some(battle) = self.battle(battle_id) else {
            return false;
        };
        let mut battle = battle.lock();
        match battle.flag_mut(flag_team) {
            Some(flag) => {
                flag.carrier = None;
                flag.position = flag.base_position;
                true
            }
            None => false,
        }
    }

    /// Score a capture of the given flag by its current carrier. The flag
    /// returns to base and the carrier's team scores. Returns the updated
    /// (blue, red) scores and the carrier.
    pub fn capture_flag(
        &self,
        battle_id: &str,
        flag_team: Team,
    ) -> Option<(String, i32, i32)> {
        let battle = self.battle(battle_id)?;
        let mut battle = battle.lock();

        let carrier = battle.flag_mut(flag_team)?.carrier.clone()?;
        let scorer_team = flag_team.opponent();
        match scorer_team {
            Team::Blue => battle.score_blue += 1,
            Team::Red => battle.score_red += 1,
            Team::None => return None,
        }
        let flag = battle.flag_mut(flag_team)?;
        flag.carrier = None;
        flag.position = flag.base_position;
        Some((carrier, battle.score_blue, battle.score_red))
    }

    /// Flag interactions for a tank standing at `position`. Proximity is
    /// decided under the battle lock, then the flag primitives apply each
    /// action; they re-check state so a racing peer loses cleanly.
    pub fn flag_interactions(
        &self,
        battle_id: &str,
        username: &str,
        position: Vector3,
    ) -> Vec<FlagEvent> {
        enum Action {
            Take(Team),
            Return(Team),
            Capture(Team),
        }

        let Some(battle) = self.battle(battle_id) else {
            return Vec::new();
        };
        let radius2 = FLAG_INTERACTION_RADIUS * FLAG_INTERACTION_RADIUS;

        let actions: Vec<Action> = {
            let mut battle = battle.lock();
            let team = battle.team_of(username);
            if team == Team::None {
                return Vec::new();
            }

            let mut actions = Vec::new();
            match battle.carried_flag(username) {
                Some(carried) => {
                    // Delivery needs the home flag sitting at its base.
                    let deliver = battle.flag_mut(team).is_some_and(|own| {
                        own.carrier.is_none()
                            && own.position == own.base_position
                            && position.distance_squared(own.base_position) <= radius2
                    });
                    if deliver {
                        actions.push(Action::Capture(carried));
                    }
                }
                None => {
                    let enemy = team.opponent();
                    let take = battle.flag_mut(enemy).is_some_and(|flag| {
                        flag.carrier.is_none()
                            && position.distance_squared(flag.position) <= radius2
                    });
                    if take {
                        actions.push(Action::Take(enemy));
                    }
                    let send_home = battle.flag_mut(team).is_some_and(|flag| {
                        flag.carrier.is_none()
                            && flag.position != flag.base_position
                            && position.distance_squared(flag.position) <= radius2
                    });
                    if send_home {
                        actions.push(Action::Return(team));
                    }
                }
            }
            actions
        };

        let mut events = Vec::new();
        for action in actions {
            match action {
                Action::Take(flag_team) => {
                    if self.take_flag(battle_id, flag_team, username) {
                        events.push(FlagEvent::Taken {
                            flag_team,
                            carrier: username.to_owned(),
                        });
                    }
                }
                Action::Return(flag_team) => {
                    if self.return_flag(battle_id, flag_team) {
                        events.push(FlagEvent::Returned { flag_team });
                    }
                }
                Action::Capture(flag_team) => {
                    if let Some((carrier, score_blue, score_red)) =
                        self.capture_flag(battle_id, flag_team)
                    {
                        events.push(FlagEvent::Captured {
                            flag_team,
                            carrier,
                            score_blue,
                            score_red,
                        });
                    }
                }
            }
        }
        events
    }

    /// Capture-point occupancy for a tank standing at `position`. A point
    /// occupied by a single team flips to that team. Returns the wire
    /// updates for points whose ownership changed.
    pub fn update_point_occupancy(
        &self,
        battle_id: &str,
        username: &str,
        position: Vector3,
    ) -> Vec<(i32, i8, f32)> {
        let Some(battle_ref) = self.battle(battle_id) else {
            return Vec::new();
        };
        let radius2 = CAPTURE_POINT_RADIUS * CAPTURE_POINT_RADIUS;

        let transitions: Vec<(i32, bool)> = {
            let battle = battle_ref.lock();
            battle
                .capture_points
                .iter()
                .filter_map(|point| {
                    let was_on = point
                        .tanks_on_point
                        .iter()
                        .any(|u| u.eq_ignore_ascii_case(username));
                    let now_on = position.distance_squared(point.position) <= radius2;
                    (was_on != now_on).then_some((point.id, now_on))
                })
                .collect()
        };

        let mut updates = Vec::new();
        for (point_id, entered) in transitions {
            let applied = if entered {
                self.enter_point(battle_id, point_id, username)
            } else {
                self.leave_point(battle_id, point_id, username)
            };
            if applied.is_err() {
                continue;
            }

            let claim = {
                let battle = battle_ref.lock();
                let Some(point) = battle.capture_points.iter().find(|p| p.id == point_id)
                else {
                    continue;
                };
                let mut teams = point.tanks_on_point.iter().map(|u| battle.team_of(u));
                match teams.next() {
                    Some(first) if first != Team::None && teams.all(|t| t == first) => {
                        let owner = match first {
                            Team::Red => PointOwner::Red,
                            Team::Blue => PointOwner::Blue,
                            Team::None => PointOwner::Neutral,
                        };
                        (point.owner != owner).then_some(owner)
                    }
                    _ => None,
                }
            };

            if let Some(owner) = claim {
                if self.set_point_owner(battle_id, point_id, owner).is_ok() {
                    let battle = battle_ref.lock();
                    if let Some(point) = battle.capture_points.iter().find(|p| p.id == point_id)
                    {
                        updates.push((point.id, owner.to_wire(), point.score));
                    }
                }
            }
        }
        updates
    }

    // -----------------------------------------------------------------------
    // Capture points (primitives only; the round timer drives accrual)
    // -----------------------------------------------------------------------

    pub fn enter_point(&self, battle_id: &str, point_id: i32, username: &str) -> Result<(), BattleError> {
        self.with_point(battle_id, point_id, |point| {
            if !point
                .tanks_on_point
                .iter()
                .any(|u| u.eq_ignore_ascii_case(username))
            {
                point.tanks_on_point.push(username.to_owned());
            }
        })
    }

    pub fn leave_point(&self, battle_id: &str, point_id: i32, username: &str) -> Result<(), BattleError> {
        self.with_point(battle_id, point_id, |point| {
            point
                .tanks_on_point
                .retain(|u| !u.eq_ignore_ascii_case(username));
        })
    }

    pub fn set_point_owner(
        &self,
        battle_id: &str,
        point_id: i32,
        owner: PointOwner,
    ) -> Result<(), BattleError> {
        self.with_point(battle_id, point_id, |point| {
            point.owner = owner;
            point.score = 0.0;
        })
    }

    /// Accrue score on an owned point. Returns the wire update on change,
    /// `None` when the point is neutral.
    pub fn accrue_point(
        &self,
        battle_id: &str,
        point_id: i32,
        amount: f32,
    ) -> Result<Option<(i8, f32)>, BattleError> {
        let mut update = None;
        self.with_point(battle_id, point_id, |point| {
            if point.owner != PointOwner::Neutral {
                point.score += amount;
                update = Some((point.owner.to_wire(), point.score));
            }
        })?;
        Ok(update)
    }

    fn with_point(
        &self,
        battle_id: &str,
        point_id: i32,
        f: impl FnOnce(&mut CapturePoint),
    ) -> Result<(), BattleError> {
        let battle = self
            .battle(battle_id)
            .ok_or_else(|| BattleError::UnknownBattle(battle_id.to_owned()))?;
        let mut battle = battle.lock();
        let point = battle
            .capture_points
            .iter_mut()
            .find(|p| p.id == point_id)
            .ok_or(BattleError::UnknownPoint(point_id))?;
        f(point);
        Ok(())
    }
}
