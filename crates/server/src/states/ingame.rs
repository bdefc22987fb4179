//! In-game session state: simulation, anti-cheat validation, and event
//! handling.

use crate::client::Client;
use crate::hub::MAX_SPORES;
use crate::objects::{
    self, lock_player, mass_from_radius, next_radius, spawn_coords, Player, SharedPlayer, Spore,
};
use crate::states::ClientState;
use anyhow::{anyhow, bail, Result};
use protocol::packets::{GameBounds, Msg, PlayerInfo, SporeInfo};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Simulation step, seconds.
const TICK_DELTA: f64 = 0.05;
/// Width of the soft boundary band, world units.
const RUBBER_BAND_ZONE: f64 = 200.0;
/// Distance slack for consumption checks. Generous on purpose: it has to
/// absorb a network round trip plus one server tick.
const VALIDATION_BUFFER: f64 = 100.0;
/// Initial spore streaming: spores per batch and pause between batches.
const SPORE_BATCH_SIZE: usize = 50;
const SPORE_BATCH_DELAY: Duration = Duration::from_millis(50);
const BEST_SCORE_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// A session with exactly one live player in the arena.
pub struct InGame {
    player: SharedPlayer,
    /// Position tick; started lazily on the first direction report.
    tick_task: Option<JoinHandle<()>>,
    score_task: Option<JoinHandle<()>>,
}

impl InGame {
    pub fn new(player: Player) -> Self {
        Self {
            player: player.shared(),
            tick_task: None,
            score_task: None,
        }
    }

    pub async fn on_enter(&mut self, client: &Arc<Client>) {
        let id = client.id();
        let objects = client.shared_game_objects();

        // Reset gameplay fields before looking for a spawn point.
        let initial = {
            let mut p = lock_player(&self.player);
            p.speed = 150.0;
            p.radius = 20.0;
            let (x, y) = spawn_coords(p.radius, &objects.players, None);
            p.x = x;
            p.y = y;
            p.info(id)
        };
        info!(
            "Client {id}: player {} spawned at ({:.2}, {:.2})",
            initial.name, initial.x, initial.y
        );

        // Publish the player so peers see it, keyed by our client id.
        objects.players.add_with_id(self.player.clone(), id);

        // The client enforces the arena locally and renders from the
        // initial snapshot.
        client.socket_send(Msg::GameBounds(GameBounds {
            min_x: objects::MIN_X,
            max_x: objects::MAX_X,
            min_y: objects::MIN_Y,
            max_y: objects::MAX_Y,
        }));
        client.socket_send(Msg::Player(initial));

        tokio::spawn(send_initial_spores(
            client.clone(),
            SPORE_BATCH_SIZE,
            SPORE_BATCH_DELAY,
        ));

        let score_client = client.clone();
        let score_player = self.player.clone();
        self.score_task = Some(tokio::spawn(async move {
            best_score_sync_loop(score_client, score_player).await;
        }));
    }

    pub fn on_exit(&mut self, client: &Arc<Client>) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        if let Some(task) = self.score_task.take() {
            task.abort();
        }
        client.shared_game_objects().players.remove(client.id());

        // One last sync so the score survives the session.
        let final_client = client.clone();
        let final_player = self.player.clone();
        tokio::spawn(async move {
            sync_player_best_score(&final_client, &final_player).await;
        });
    }

    pub fn handle_message(
        &mut self,
        client: &Arc<Client>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        match msg {
            Msg::Player(info) => self.handle_player(client, sender_id, info),
            Msg::Chat(text) => self.handle_chat(client, sender_id, text),
            Msg::PlayerDirection(direction) => {
                self.handle_player_direction(client, sender_id, direction)
            }
            Msg::Spore(info) => self.handle_spore(client, sender_id, info),
            Msg::SporeConsumed(spore_id) => self.handle_spore_consumed(client, sender_id, spore_id),
            Msg::PlayerConsumed(player_id) => {
                self.handle_player_consumed(client, sender_id, player_id)
            }
            Msg::Disconnect(reason) => self.handle_disconnect(client, sender_id, reason),
            other => {
                debug!("Client {}: ignoring {} packet in game", client.id(), other.name());
            }
        }
        None
    }

    fn handle_player(&self, client: &Arc<Client>, sender_id: u64, info: PlayerInfo) {
        if sender_id == client.id() {
            // The server is the authority on our own player.
            debug!("Client {}: ignoring player packet from own client", client.id());
            return;
        }
        client.socket_send_as(Msg::Player(info), sender_id);
    }

    fn handle_chat(&self, client: &Arc<Client>, sender_id: u64, text: String) {
        if sender_id == client.id() {
            client.broadcast(Msg::Chat(text));
        } else {
            client.socket_send_as(Msg::Chat(text), sender_id);
        }
    }

    fn handle_player_direction(&mut self, client: &Arc<Client>, sender_id: u64, direction: f64) {
        if sender_id != client.id() {
            return;
        }
        lock_player(&self.player).direction = direction;

        if self.tick_task.is_none() {
            debug!("Client {}: starting position tick", client.id());
            let tick_client = client.clone();
            let tick_player = self.player.clone();
            self.tick_task = Some(tokio::spawn(async move {
                position_tick_loop(tick_client, tick_player).await;
            }));
        }
    }

    fn handle_spore(&self, client: &Arc<Client>, sender_id: u64, info: SporeInfo) {
        client.socket_send_as(Msg::Spore(info), sender_id);
    }

    fn handle_spore_consumed(&self, client: &Arc<Client>, sender_id: u64, spore_id: u64) {
        if sender_id != client.id() {
            client.socket_send_as(Msg::SporeConsumed(spore_id), sender_id);
            return;
        }
        if let Err(e) = self.try_consume_spore(client, spore_id) {
            warn!("Client {}: Could not verify spore consumption: {e}", client.id());
            return;
        }
        // Peers delete the spore locally off this broadcast.
        client.broadcast(Msg::SporeConsumed(spore_id));
    }

    fn try_consume_spore(&self, client: &Arc<Client>, spore_id: u64) -> Result<()> {
        let objects = client.shared_game_objects();
        let spore = objects
            .spores
            .get(spore_id)
            .ok_or_else(|| anyhow!("spore with id {spore_id} does not exist"))?;

        let mut player = lock_player(&self.player);
        validate_close_to(&player, spore.x, spore.y, spore.radius, VALIDATION_BUFFER)?;
        validate_drop_cooldown(&player, client.id(), &spore, VALIDATION_BUFFER)?;

        player.radius = next_radius(player.radius, mass_from_radius(spore.radius));
        drop(player);

        objects.spores.remove(spore_id);
        Ok(())
    }

    fn handle_player_consumed(&self, client: &Arc<Client>, sender_id: u64, player_id: u64) {
        if sender_id != client.id() {
            client.socket_send_as(Msg::PlayerConsumed(player_id), sender_id);

            if player_id == client.id() {
                info!("Client {}: player was consumed, respawning", client.id());
                let respawn = {
                    let p = lock_player(&self.player);
                    Player::new(p.db_id, p.name.clone(), p.best_score, p.color)
                };
                // Transition on a fresh task: we are inside the hub's
                // broadcast dispatch right now.
                let respawn_client = client.clone();
                tokio::spawn(async move {
                    respawn_client.set_state(Some(ClientState::in_game(respawn))).await;
                });
            }
            return;
        }

        if let Err(e) = self.try_consume_player(client, player_id) {
            warn!("Client {}: Could not verify player consumption: {e}", client.id());
            return;
        }
        client.broadcast(Msg::PlayerConsumed(player_id));
    }

    fn try_consume_player(&self, client: &Arc<Client>, other_id: u64) -> Result<()> {
        let objects = client.shared_game_objects();
        let other = objects
            .players
            .get(other_id)
            .ok_or_else(|| anyhow!("player with id {other_id} does not exist"))?;

        // Copy the peer's scalars first; never hold two player locks.
        let (other_x, other_y, other_radius) = {
            let other = lock_player(&other);
            (other.x, other.y, other.radius)
        };

        let mut player = lock_player(&self.player);
        let our_mass = mass_from_radius(player.radius);
        let other_mass = mass_from_radius(other_radius);
        if our_mass <= other_mass * 1.5 {
            bail!(
                "player not massive enough to consume the other player (our radius: {}, other radius: {})",
                player.radius,
                other_radius
            );
        }
        validate_close_to(&player, other_x, other_y, other_radius, VALIDATION_BUFFER)?;

        player.radius = next_radius(player.radius, other_mass);
        drop(player);

        objects.players.remove(other_id);
        Ok(())
    }

    fn handle_disconnect(&self, client: &Arc<Client>, sender_id: u64, reason: String) {
        if sender_id == client.id() {
            client.broadcast(Msg::Disconnect(reason));
            let back_client = client.clone();
            tokio::spawn(async move {
                back_client.set_state(Some(ClientState::connected())).await;
            });
        } else {
            client.socket_send_as(Msg::Disconnect(reason), sender_id);
        }
    }
}

/// Reject a consumption claim when the player is too far from the target.
fn validate_close_to(player: &Player, obj_x: f64, obj_y: f64, obj_radius: f64, buffer: f64) -> Result<()> {
    let dx = player.x - obj_x;
    let dy = player.y - obj_y;
    let dist_sq = dx * dx + dy * dy;

    let threshold = player.radius + buffer + obj_radius;
    let threshold_sq = threshold * threshold;

    if dist_sq > threshold_sq {
        bail!("player is too far from the object (distSq: {dist_sq:.2}, thresholdSq: {threshold_sq:.2})");
    }
    Ok(())
}

/// Reject a claim to re-eat a spore this player just shed. The cooldown is
/// the time it would take to travel back to the spore at current speed.
fn validate_drop_cooldown(player: &Player, player_id: u64, spore: &Spore, buffer: f64) -> Result<()> {
    if spore.dropped_by != Some(player_id) {
        return Ok(());
    }
    let min_distance = spore.radius + player.radius + buffer;
    let min_elapsed = Duration::from_millis((min_distance / player.speed * 1000.0) as u64);
    let since_drop = spore.dropped_at.elapsed();
    if since_drop < min_elapsed {
        bail!("player dropped the spore too recently (since drop: {since_drop:?}, min: {min_elapsed:?})");
    }
    Ok(())
}

/// Advance one step and apply the soft boundary. Returns the clamped
/// position.
fn integrate_position(player: &Player, delta: f64) -> (f64, f64) {
    let new_x = player.x + player.speed * player.direction.cos() * delta;
    let new_y = player.y + player.speed * player.direction.sin() * delta;

    let buffer = player.radius;
    let new_x = rubber_band(new_x, objects::MIN_X + buffer, objects::MAX_X - buffer, player.speed, delta);
    let new_y = rubber_band(new_y, objects::MIN_Y + buffer, objects::MAX_Y - buffer, player.speed, delta);
    (new_x, new_y)
}

/// Quadratic push-back inside the boundary band; hard clamp past the wall.
fn rubber_band(pos: f64, min_bound: f64, max_bound: f64, speed: f64, delta: f64) -> f64 {
    let mut pos = pos;

    if pos < min_bound {
        pos = min_bound;
    } else if pos < min_bound + RUBBER_BAND_ZONE {
        let distance_into_zone = min_bound + RUBBER_BAND_ZONE - pos;
        let resistance = distance_into_zone / RUBBER_BAND_ZONE;
        pos += resistance * resistance * speed * delta * 2.0;
    }

    if pos > max_bound {
        pos = max_bound;
    } else if pos > max_bound - RUBBER_BAND_ZONE {
        let distance_into_zone = pos - (max_bound - RUBBER_BAND_ZONE);
        let resistance = distance_into_zone / RUBBER_BAND_ZONE;
        pos -= resistance * resistance * speed * delta * 2.0;
    }

    pos
}

async fn position_tick_loop(client: Arc<Client>, player: SharedPlayer) {
    let period = Duration::from_millis((TICK_DELTA * 1000.0) as u64);
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        sync_player(&client, &player, TICK_DELTA);
    }
}

/// One simulation tick: integrate, maybe shed a spore, publish the update.
/// Runs entirely on the tick task, so a tick is atomic from the player's
/// perspective.
fn sync_player(client: &Arc<Client>, player: &SharedPlayer, delta: f64) {
    let objects = client.shared_game_objects();
    let mut shed: Option<SporeInfo> = None;

    let update = {
        let mut p = lock_player(player);
        let (x, y) = integrate_position(&p, delta);
        p.x = x;
        p.y = y;

        // Shed at the clamped position so spores never land outside a wall.
        let probability = p.radius / (MAX_SPORES as f64 * 5.0);
        if p.radius > 10.0 && rand::rng().random::<f64>() < probability {
            let spore = Arc::new(Spore {
                x: p.x,
                y: p.y,
                radius: (5.0 + p.radius / 50.0).min(15.0),
                dropped_by: Some(client.id()),
                dropped_at: Instant::now(),
            });
            let spore_id = objects.spores.add(spore.clone());
            p.radius = next_radius(p.radius, -mass_from_radius(spore.radius));
            shed = Some(spore.info(spore_id));
        }

        p.info(client.id())
    };

    if let Some(info) = shed {
        client.broadcast(Msg::Spore(info));
        client.socket_send(Msg::Spore(info));
    }
    client.broadcast(Msg::Player(update.clone()));
    client.socket_send(Msg::Player(update));
}

/// Stream the spores visible at entry in fixed-size batches. Works over the
/// snapshot taken here; anything shed afterwards arrives as an ordinary
/// `Spore` broadcast.
async fn send_initial_spores(client: Arc<Client>, batch_size: usize, delay: Duration) {
    let mut snapshot = Vec::new();
    client
        .shared_game_objects()
        .spores
        .for_each(|id, spore| snapshot.push(spore.info(id)));

    for chunk in snapshot.chunks(batch_size) {
        client.socket_send(Msg::SporeBatch(chunk.to_vec()));
        if chunk.len() == batch_size {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn best_score_sync_loop(client: Arc<Client>, player: SharedPlayer) {
    let mut ticker = interval_at(
        tokio::time::Instant::now() + BEST_SCORE_SYNC_INTERVAL,
        BEST_SCORE_SYNC_INTERVAL,
    );
    loop {
        ticker.tick().await;
        sync_player_best_score(&client, &player).await;
    }
}

/// Persist the score when it beats the stored best. Failures are logged
/// and the game carries on.
async fn sync_player_best_score(client: &Arc<Client>, player: &SharedPlayer) {
    let (db_id, best, current) = {
        let p = lock_player(player);
        (p.db_id, p.best_score, mass_from_radius(p.radius).round() as i32)
    };
    if current <= best {
        return;
    }
    lock_player(player).best_score = current;

    if let Err(e) = client
        .db_tx()
        .queries
        .update_player_best_score(db_id, current)
        .await
    {
        warn!("Client {}: error updating player best score: {e}", client.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player_at(x: f64, y: f64, radius: f64) -> Player {
        let mut player = Player::new(1, "tester".into(), 0, 0);
        player.x = x;
        player.y = y;
        player.radius = radius;
        player
    }

    fn seeded_spore(x: f64, y: f64, radius: f64, dropped_by: Option<u64>) -> Spore {
        Spore {
            x,
            y,
            radius,
            dropped_by,
            dropped_at: Instant::now(),
        }
    }

    #[test]
    fn test_proximity_accepts_nearby_spore() {
        let player = player_at(0.0, 0.0, 20.0);
        assert!(validate_close_to(&player, 10.0, 0.0, 5.0, VALIDATION_BUFFER).is_ok());
    }

    #[test]
    fn test_proximity_rejects_distant_spore() {
        let player = player_at(0.0, 0.0, 20.0);
        // Threshold is 20 + 100 + 5 = 125; the spore sits at 500.
        assert!(validate_close_to(&player, 500.0, 0.0, 5.0, VALIDATION_BUFFER).is_err());
    }

    #[test]
    fn test_proximity_threshold_is_inclusive() {
        let player = player_at(0.0, 0.0, 20.0);
        assert!(validate_close_to(&player, 125.0, 0.0, 5.0, VALIDATION_BUFFER).is_ok());
        assert!(validate_close_to(&player, 125.1, 0.0, 5.0, VALIDATION_BUFFER).is_err());
    }

    #[test]
    fn test_drop_cooldown_blocks_fresh_self_drop() {
        let player = player_at(0.0, 0.0, 20.0);
        let spore = seeded_spore(5.0, 0.0, 5.0, Some(1));
        assert!(validate_drop_cooldown(&player, 1, &spore, VALIDATION_BUFFER).is_err());
    }

    #[test]
    fn test_drop_cooldown_ignores_foreign_drops() {
        let player = player_at(0.0, 0.0, 20.0);
        let spore = seeded_spore(5.0, 0.0, 5.0, Some(99));
        assert!(validate_drop_cooldown(&player, 1, &spore, VALIDATION_BUFFER).is_ok());
        let seeded = seeded_spore(5.0, 0.0, 5.0, None);
        assert!(validate_drop_cooldown(&player, 1, &seeded, VALIDATION_BUFFER).is_ok());
    }

    #[test]
    fn test_drop_cooldown_expires() {
        let player = player_at(0.0, 0.0, 20.0);
        // Cooldown for radius 5 + 20 + 100 at speed 150 is ~833ms.
        let mut spore = seeded_spore(5.0, 0.0, 5.0, Some(1));
        spore.dropped_at = Instant::now() - Duration::from_secs(2);
        assert!(validate_drop_cooldown(&player, 1, &spore, VALIDATION_BUFFER).is_ok());
    }

    #[test]
    fn test_mass_threshold_table() {
        // (our mass, other mass, may consume)
        let cases = [
            (200.0, 100.0, true),
            (150.0, 100.0, false), // exactly 1.5x is not enough
            (151.0, 100.0, true),
            (149.0, 100.0, false),
            (100.0, 100.0, false),
            (50.0, 100.0, false),
        ];
        for (ours, theirs, expected) in cases {
            let allowed = ours > theirs * 1.5;
            assert_eq!(allowed, expected, "ours={ours} theirs={theirs}");
        }
    }

    #[test]
    fn test_mass_threshold_from_radii() {
        // radius 30 vs 20: 900π > 600π.
        assert!(mass_from_radius(30.0) > mass_from_radius(20.0) * 1.5);
        // radius 22 vs 20: 484π <= 600π.
        assert!(mass_from_radius(22.0) <= mass_from_radius(20.0) * 1.5);
    }

    #[test]
    fn test_integrate_moves_east_at_direction_zero() {
        let mut player = player_at(0.0, 0.0, 20.0);
        player.direction = 0.0;
        let (x, y) = integrate_position(&player, TICK_DELTA);
        assert!((x - 150.0 * TICK_DELTA).abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn test_rubber_band_is_identity_in_open_field() {
        let pos = rubber_band(0.0, -2980.0, 2980.0, 150.0, TICK_DELTA);
        assert_eq!(pos, 0.0);
    }

    #[test]
    fn test_rubber_band_pushes_back_inside_zone() {
        let max_bound = objects::MAX_X - 20.0;
        // 50 units into the band.
        let pos = max_bound - RUBBER_BAND_ZONE + 50.0;
        let adjusted = rubber_band(pos, objects::MIN_X + 20.0, max_bound, 150.0, TICK_DELTA);
        assert!(adjusted < pos);
        // Push-back grows quadratically with depth.
        let deeper = max_bound - 10.0;
        let adjusted_deep = rubber_band(deeper, objects::MIN_X + 20.0, max_bound, 150.0, TICK_DELTA);
        assert!(deeper - adjusted_deep > pos - adjusted);
    }

    #[test]
    fn test_rubber_band_hard_clamps_past_the_wall() {
        let max_bound = objects::MAX_X - 20.0;
        let adjusted = rubber_band(objects::MAX_X + 500.0, objects::MIN_X + 20.0, max_bound, 150.0, TICK_DELTA);
        assert!(adjusted <= max_bound);

        let min_bound = objects::MIN_X + 20.0;
        let adjusted = rubber_band(objects::MIN_X - 500.0, min_bound, max_bound, 150.0, TICK_DELTA);
        assert!(adjusted >= min_bound);
    }

    #[test]
    fn test_shed_radius_is_capped() {
        for player_radius in [11.0, 50.0, 200.0, 1000.0] {
            let shed = (5.0 + player_radius / 50.0_f64).min(15.0);
            assert!((5.0..=15.0).contains(&shed));
        }
    }
}
