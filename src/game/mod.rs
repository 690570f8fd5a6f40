//! Battle engine modules

pub mod battle;
pub mod maps;
pub mod service;
pub mod workflow;

pub use battle::{Battle, BattleMode, BattleSettings, Team};
pub use service::{BattleError, BattleService};

/// Hull hit points granted on every (re)spawn
pub const FULL_HEALTH: i32 = 10_000;

/// Vertical lift applied to reserved spawn positions so tanks never spawn
/// under map geometry
pub const SPAWN_Z_OFFSET: f32 = 200.0;

/// Client-side respawn countdown carried in the destroy broadcast
pub const DESTROY_RESPAWN_DELAY_MS: i32 = 3_000;

/// Distance within which a moving tank interacts with a flag
pub const FLAG_INTERACTION_RADIUS: f32 = 500.0;

/// Distance within which a tank counts as standing on a capture point
pub const CAPTURE_POINT_RADIUS: f32 = 1_000.0;
