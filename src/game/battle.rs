//! Battle model: settings, rosters, scores, and mode-specific state

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::Vector3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleMode {
    /// Free-for-all deathmatch
    Dm,
    /// Team deathmatch
    Tdm,
    /// Capture the flag
    Ctf,
    /// Domination (capture points)
    Cp,
}

impl BattleMode {
    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Dm),
            1 => Some(Self::Tdm),
            2 => Some(Self::Ctf),
            3 => Some(Self::Cp),
            _ => None,
        }
    }

    pub fn is_team_mode(self) -> bool {
        self != Self::Dm
    }
}

/// Team identity as encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    Red,
    Blue,
    None,
}

impl Team {
    pub fn to_wire(self) -> i8 {
        match self {
            Team::Red => 0,
            Team::Blue => 1,
            Team::None => 2,
        }
    }

    pub fn from_wire(v: i8) -> Self {
        match v {
            0 => Team::Red,
            1 => Team::Blue,
            _ => Team::None,
        }
    }

    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
            Team::None => Team::None,
        }
    }
}

/// Immutable creation settings of a battle
#[derive(Debug, Clone)]
pub struct BattleSettings {
    pub name: String,
    pub private_battle: bool,
    pub battle_mode: BattleMode,
    pub map_id: String,
    pub max_people_count: usize,
    pub min_rank: i32,
    pub max_rank: i32,
    pub time_limit_secs: i32,
    pub score_limit: i32,
    pub auto_balance: bool,
    pub friendly_fire: bool,
    pub parkour_mode: bool,
}

/// One CTF flag: at base, on the ground somewhere, or carried
#[derive(Debug, Clone)]
pub struct FlagState {
    pub base_position: Vector3,
    /// Current ground position; meaningless while carried
    pub position: Vector3,
    pub carrier: Option<String>,
}

impl FlagState {
    pub fn at_base(base: Vector3) -> Self {
        Self {
            base_position: base,
            position: base,
            carrier: None,
        }
    }
}

/// Ownership of a domination capture point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOwner {
    Red,
    Blue,
    Neutral,
}

impl PointOwner {
    pub fn to_wire(self) -> i8 {
        match self {
            PointOwner::Red => 0,
            PointOwner::Blue => 1,
            PointOwner::Neutral => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturePoint {
    pub id: i32,
    pub name: String,
    pub position: Vector3,
    pub owner: PointOwner,
    pub score: f32,
    /// Tanks currently standing on the point, by username
    pub tanks_on_point: Vec<String>,
}

/// Which roster a participant sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Roster {
    Free,
    Blue,
    Red,
    Spectators,
}

pub struct Battle {
    pub battle_id: String,
    pub settings: BattleSettings,
    /// Free-for-all roster, used only in DM
    pub users: Vec<String>,
    pub users_blue: Vec<String>,
    pub users_red: Vec<String>,
    pub spectators: Vec<String>,
    pub score_blue: i32,
    pub score_red: i32,
    pub round_started: bool,
    pub round_start_time: Option<u64>,
    pub flag_blue: Option<FlagState>,
    pub flag_red: Option<FlagState>,
    pub capture_points: Vec<CapturePoint>,
}

impl Battle {
    pub fn new(settings: BattleSettings) -> Self {
        Self {
            battle_id: random_battle_id(),
            settings,
            users: Vec::new(),
            users_blue: Vec::new(),
            users_red: Vec::new(),
            spectators: Vec::new(),
            score_blue: 0,
            score_red: 0,
            round_started: false,
            round_start_time: None,
            flag_blue: None,
            flag_red: None,
            capture_points: Vec::new(),
        }
    }

    pub fn is_team_mode(&self) -> bool {
        self.settings.battle_mode.is_team_mode()
    }

    /// Everyone attached to the battle, spectators included.
    pub fn all_participants(&self) -> Vec<String> {
        let mut all = Vec::with_capacity(
            self.users.len() + self.users_blue.len() + self.users_red.len() + self.spectators.len(),
        );
        all.extend(self.users.iter().cloned());
        all.extend(self.users_blue.iter().cloned());
        all.extend(self.users_red.iter().cloned());
        all.extend(self.spectators.iter().cloned());
        all
    }

    pub fn combatant_count(&self) -> usize {
        self.users.len() + self.users_blue.len() + self.users_red.len()
    }

    fn roster_vec(&self, roster: Roster) -> &Vec<String> {
        match roster {
            Roster::Free => &self.users,
            Roster::Blue => &self.users_blue,
            Roster::Red => &self.users_red,
            Roster::Spectators => &self.spectators,
        }
    }

    fn roster_vec_mut(&mut self, roster: Roster) -> &mut Vec<String> {
        match roster {
            Roster::Free => &mut self.users,
            Roster::Blue => &mut self.users_blue,
            Roster::Red => &mut self.users_red,
            Roster::Spectators => &mut self.spectators,
        }
    }

    pub fn roster_of(&self, username: &str) -> Option<Roster> {
        for roster in [Roster::Free, Roster::Blue, Roster::Red, Roster::Spectators] {
            if self
                .roster_vec(roster)
                .iter()
                .any(|u| u.eq_ignore_ascii_case(username))
            {
                return Some(roster);
            }
        }
        None
    }

    pub fn contains(&self, username: &str) -> bool {
        self.roster_of(username).is_some()
    }

    pub fn team_of(&self, username: &str) -> Team {
        match self.roster_of(username) {
            Some(Roster::Blue) => Team::Blue,
            Some(Roster::Red) => Team::Red,
            _ => Team::None,
        }
    }

    /// Insert into a roster, first removing the identity from every other
    /// roster so a participant can never appear twice.
    pub fn insert_into(&mut self, roster: Roster, username: &str) {
        self.remove_everywhere(username);
        self.roster_vec_mut(roster).push(username.to_owned());
    }

    /// Idempotent removal from whichever roster holds the identity.
    pub fn remove_everywhere(&mut self, username: &str) -> bool {
        let mut removed = false;
        for roster in [Roster::Free, Roster::Blue, Roster::Red, Roster::Spectators] {
            let list = self.roster_vec_mut(roster);
            let before = list.len();
            list.retain(|u| !u.eq_ignore_ascii_case(username));
            removed |= list.len() != before;
        }
        removed
    }

    pub fn flag_mut(&mut self, team: Team) -> Option<&mut FlagState> {
        match team {
            Team::Blue => self.flag_blue.as_mut(),
            Team::Red => self.flag_red.as_mut(),
            Team::None => None,
        }
    }

    /// The flag this user is currently carrying, if any.
    pub fn carried_flag(&self, username: &str) -> Option<Team> {
        let carries = |flag: &Option<FlagState>| {
            flag.as_ref()
                .and_then(|f| f.carrier.as_deref())
                .is_some_and(|c| c.eq_ignore_ascii_case(username))
        };
        if carries(&self.flag_blue) {
            Some(Team::Blue)
        } else if carries(&self.flag_red) {
            Some(Team::Red)
        } else {
            None
        }
    }
}

/// Collision-improbable random battle id, 16 hex chars.
fn random_battle_id() -> String {
    let mut rng = rand::thread_rng();
    let raw: u64 = rng.gen();
    format!("{raw:016x}")
}
