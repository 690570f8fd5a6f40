//! Static per-map data consumed read-only by the battle engine
//!
//! Shapes mirror what the asset pipeline extracts from map XML: spawn
//! points, kill/kick volumes, CTF flag bases, and domination keypoints.
//! A builtin catalog covers the stock maps; `MAPS_FILE` may replace it
//! with a JSON document of the same layout.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::protocol::Vector3;

/// Distinguishes free-for-all spawns from per-team spawns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnKind {
    /// Usable in any mode
    Free,
    Blue,
    Red,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub kind: SpawnKind,
    pub position: Vector3,
    pub rotation: Vector3,
}

/// Out-of-bounds penalty applied by the battle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxAction {
    Kill,
    Kick,
}

/// Axis-aligned penalty volume
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpecialBox {
    pub min_x: f32,
    pub min_y: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub max_z: f32,
    pub action: BoxAction,
}

impl SpecialBox {
    pub fn contains(&self, p: Vector3) -> bool {
        p.x >= self.min_x
            && p.x <= self.max_x
            && p.y >= self.min_y
            && p.y <= self.max_y
            && p.z >= self.min_z
            && p.z <= self.max_z
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CtfFlags {
    pub red: Vector3,
    pub blue: Vector3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomKeypoint {
    pub name: String,
    pub position: Vector3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    pub spawn_points: Vec<SpawnPoint>,
    #[serde(default)]
    pub special_geometry: Vec<SpecialBox>,
    #[serde(default)]
    pub ctf_flags: Option<CtfFlags>,
    #[serde(default)]
    pub dom_keypoints: Vec<DomKeypoint>,
}

impl MapData {
    pub fn spawns_for(&self, kind: SpawnKind) -> impl Iterator<Item = &SpawnPoint> {
        self.spawn_points.iter().filter(move |sp| sp.kind == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapCatalog {
    maps: HashMap<String, MapData>,
}

impl MapCatalog {
    pub fn get(&self, map_id: &str) -> Option<&MapData> {
        self.maps.get(map_id)
    }

    pub fn contains(&self, map_id: &str) -> bool {
        self.maps.contains_key(map_id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Load a catalog from a JSON file produced by the asset pipeline.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let maps: HashMap<String, MapData> = serde_json::from_str(&raw)?;
        Ok(Self { maps })
    }

    /// Stock maps compiled into the server. `map_sandbox` carries data for
    /// every mode; `map_polygon` is free-for-all only, with no flag bases
    /// or keypoints.
    pub fn builtin() -> Self {
        let mut maps = HashMap::new();

        let dm_spawn = |x: f32, y: f32, yaw: f32| SpawnPoint {
            kind: SpawnKind::Free,
            position: Vector3::new(x, y, 0.0),
            rotation: Vector3::new(0.0, 0.0, yaw),
        };
        let team_spawn = |kind: SpawnKind, x: f32, y: f32, yaw: f32| SpawnPoint {
            kind,
            position: Vector3::new(x, y, 0.0),
            rotation: Vector3::new(0.0, 0.0, yaw),
        };

        maps.insert(
            "map_sandbox".to_owned(),
            MapData {
                spawn_points: vec![
                    dm_spawn(-5000.0, -5000.0, 0.0),
                    dm_spawn(5000.0, -5000.0, 1.57),
                    dm_spawn(5000.0, 5000.0, 3.14),
                    dm_spawn(-5000.0, 5000.0, -1.57),
                    dm_spawn(0.0, 0.0, 0.0),
                    team_spawn(SpawnKind::Blue, -7500.0, -7500.0, 0.0),
                    team_spawn(SpawnKind::Blue, -7500.0, -6500.0, 0.0),
                    team_spawn(SpawnKind::Red, 8500.0, 8500.0, 3.14),
                    team_spawn(SpawnKind::Red, 8500.0, 7500.0, 3.14),
                ],
                special_geometry: vec![
                    SpecialBox {
                        min_x: -9000.0,
                        min_y: -9000.0,
                        min_z: -600.0,
                        max_x: 10000.0,
                        max_y: 10000.0,
                        max_z: -300.0,
                        action: BoxAction::Kick,
                    },
                    SpecialBox {
                        min_x: -9000.0,
                        min_y: -9000.0,
                        min_z: 1800.0,
                        max_x: 10000.0,
                        max_y: 10000.0,
                        max_z: 2100.0,
                        action: BoxAction::Kick,
                    },
                    SpecialBox {
                        min_x: 1750.0,
                        min_y: 4750.0,
                        min_z: 0.0,
                        max_x: 2250.0,
                        max_y: 5250.0,
                        max_z: 300.0,
                        action: BoxAction::Kill,
                    },
                ],
                ctf_flags: Some(CtfFlags {
                    red: Vector3::new(8000.0, 8000.0, 0.0),
                    blue: Vector3::new(-8000.0, -8000.0, 0.0),
                }),
                dom_keypoints: vec![
                    DomKeypoint {
                        name: "A".to_owned(),
                        position: Vector3::new(0.0, -4000.0, 0.0),
                    },
                    DomKeypoint {
                        name: "B".to_owned(),
                        position: Vector3::new(0.0, 0.0, 0.0),
                    },
                    DomKeypoint {
                        name: "C".to_owned(),
                        position: Vector3::new(0.0, 4000.0, 0.0),
                    },
                ],
            },
        );

        maps.insert(
            "map_polygon".to_owned(),
            MapData {
                spawn_points: vec![
                    dm_spawn(-2000.0, -2000.0, 0.0),
                    dm_spawn(2000.0, 2000.0, 3.14),
                    dm_spawn(-2000.0, 2000.0, -1.57),
                    dm_spawn(2000.0, -2000.0, 1.57),
                ],
                special_geometry: Vec::new(),
                ctf_flags: None,
                dom_keypoints: Vec::new(),
            },
        );

        Self { maps }
    }
}
