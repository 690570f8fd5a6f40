//! Wire protocol: binary codec, packet catalog, and id dispatch

pub mod codec;
pub mod dispatch;
pub mod packets;

use serde::{Deserialize, Serialize};

/// 3-D vector as it appears on the wire and in map data
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Spawn points are lifted above the floor so tanks never materialize
    /// inside geometry.
    pub fn raised(self, dz: f32) -> Self {
        Self {
            x: self.x,
            y: self.y,
            z: self.z + dz,
        }
    }

    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}
