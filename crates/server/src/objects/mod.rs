//! World primitives: players, spores, arena bounds, and the mass model.

mod shared_collection;
mod spawn;

pub use shared_collection::SharedCollection;
pub use spawn::spawn_coords;

use protocol::packets::{PlayerInfo, SporeInfo};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Game world boundaries. Players and spores cannot go beyond these.
pub const MIN_X: f64 = -3000.0;
pub const MAX_X: f64 = 3000.0;
pub const MIN_Y: f64 = -3000.0;
pub const MAX_Y: f64 = 3000.0;

/// A connected player's authoritative state.
///
/// Owned by exactly one session, which is the only writer; everyone else
/// reads through short lock scopes or serialized packet snapshots.
#[derive(Debug, Clone)]
pub struct Player {
    pub db_id: i64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Heading in radians.
    pub direction: f64,
    /// World units per second.
    pub speed: f64,
    /// 24-bit RGB color.
    pub color: u32,
    pub best_score: i32,
}

/// A player as stored in the shared players collection.
pub type SharedPlayer = Arc<Mutex<Player>>;

impl Player {
    pub fn new(db_id: i64, name: String, best_score: i32, color: u32) -> Self {
        Self {
            db_id,
            name,
            x: 0.0,
            y: 0.0,
            radius: 20.0,
            direction: 0.0,
            speed: 150.0,
            color,
            best_score,
        }
    }

    pub fn shared(self) -> SharedPlayer {
        Arc::new(Mutex::new(self))
    }

    /// Copy the scalar fields into a wire snapshot. Packets carry copies,
    /// never live references.
    pub fn info(&self, id: u64) -> PlayerInfo {
        PlayerInfo {
            id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            radius: self.radius,
            direction: self.direction,
            speed: self.speed,
            color: self.color,
        }
    }
}

/// Lock a shared player, recovering the data from a poisoned mutex.
pub fn lock_player(player: &SharedPlayer) -> MutexGuard<'_, Player> {
    player.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A passive food particle, either world-seeded or shed by a moving player.
/// Immutable once created.
#[derive(Debug)]
pub struct Spore {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Id of the player that shed this spore, if any. An id rather than a
    /// reference: the spore stays valid after the dropper leaves.
    pub dropped_by: Option<u64>,
    pub dropped_at: Instant,
}

impl Spore {
    pub fn info(&self, id: u64) -> SporeInfo {
        SporeInfo {
            id,
            x: self.x,
            y: self.y,
            radius: self.radius,
        }
    }
}

/// Mass of a body of the given radius.
pub fn mass_from_radius(radius: f64) -> f64 {
    PI * radius * radius
}

/// Radius of a body of the given mass.
pub fn radius_from_mass(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

/// The radius after gaining `mass_diff` (negative shrinks). All radius
/// changes go through this transform so mass stays additive.
pub fn next_radius(radius: f64, mass_diff: f64) -> f64 {
    radius_from_mass(mass_from_radius(radius) + mass_diff)
}
