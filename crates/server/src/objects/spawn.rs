//! Non-overlapping spawn placement.

use super::{lock_player, SharedCollection, SharedPlayer, Spore, MAX_X};
use rand::Rng;
use std::sync::Arc;

const MAX_TRIES: u32 = 25;

/// Rejection-sample a position whose disk touches no player and no spore.
///
/// Candidates are drawn uniformly from `[-bound, +bound]²`; after
/// `MAX_TRIES` rejected candidates the bound doubles, so the search always
/// terminates no matter how crowded the arena is.
pub fn spawn_coords(
    radius: f64,
    players: &SharedCollection<SharedPlayer>,
    spores: Option<&SharedCollection<Arc<Spore>>>,
) -> (f64, f64) {
    let mut rng = rand::rng();
    let mut bound = MAX_X;
    let mut tries = 0;

    loop {
        let x = bound * (2.0 * rng.random::<f64>() - 1.0);
        let y = bound * (2.0 * rng.random::<f64>() - 1.0);

        let blocked = too_close(x, y, radius, players, |p| {
            let p = lock_player(p);
            (p.x, p.y, p.radius)
        }) || spores.is_some_and(|s| {
            too_close(x, y, radius, s, |s| (s.x, s.y, s.radius))
        });

        if !blocked {
            return (x, y);
        }

        tries += 1;
        if tries > MAX_TRIES {
            bound *= 2.0;
            tries = 0;
        }
    }
}

/// Squared-distance overlap test against a snapshot of the collection.
fn too_close<T: Clone>(
    x: f64,
    y: f64,
    radius: f64,
    objects: &SharedCollection<T>,
    probe: impl Fn(&T) -> (f64, f64, f64),
) -> bool {
    let mut blocked = false;
    objects.for_each(|_, obj| {
        if blocked {
            return;
        }
        let (ox, oy, orad) = probe(obj);
        let dx = ox - x;
        let dy = oy - y;
        if dx * dx + dy * dy <= (radius + orad) * (radius + orad) {
            blocked = true;
        }
    });
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Player;
    use std::time::Instant;

    #[test]
    fn test_spawn_in_empty_world_stays_in_arena() {
        let players = SharedCollection::new();
        for _ in 0..50 {
            let (x, y) = spawn_coords(20.0, &players, None);
            assert!(x.abs() <= MAX_X);
            assert!(y.abs() <= MAX_X);
        }
    }

    #[test]
    fn test_spawn_avoids_players_and_spores() {
        let players = SharedCollection::new();
        let mut occupying = Player::new(1, "blocker".into(), 0, 0);
        occupying.x = 100.0;
        occupying.y = -250.0;
        occupying.radius = 500.0;
        players.add(occupying.shared());

        let spores = SharedCollection::new();
        spores.add(Arc::new(Spore {
            x: -1200.0,
            y: 800.0,
            radius: 15.0,
            dropped_by: None,
            dropped_at: Instant::now(),
        }));

        for _ in 0..50 {
            let (x, y) = spawn_coords(20.0, &players, Some(&spores));

            let dx = x - 100.0;
            let dy = y + 250.0;
            assert!(dx * dx + dy * dy > (20.0_f64 + 500.0).powi(2));

            let dx = x + 1200.0;
            let dy = y - 800.0;
            assert!(dx * dx + dy * dy > (20.0_f64 + 15.0).powi(2));
        }
    }

    #[test]
    fn test_crowded_world_still_spawns() {
        // A player disk covering the whole initial arena forces the bound
        // to double until a candidate lands outside it.
        let players = SharedCollection::new();
        let mut wall = Player::new(1, "wall".into(), 0, 0);
        wall.radius = 2.0 * MAX_X;
        players.add(wall.shared());

        let (x, y) = spawn_coords(20.0, &players, None);
        assert!(x * x + y * y > (20.0 + 2.0 * MAX_X) * (20.0 + 2.0 * MAX_X));
    }
}
