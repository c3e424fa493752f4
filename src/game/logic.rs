//! Per-tick simulation transforms: player movement, turret AI, bullet
//! ballistics
//!
//! Each transform is a free function over the authoritative state, run in
//! a fixed order by the session step. Turrets and bullets register the
//! entities they spawn or destroy with the spatial grid themselves.

use tracing::trace;

use crate::game::geom::Vec2;
use crate::game::grid::SpatialGrid;
use crate::game::state::{
    bullet_snapshot, turret_snapshot, EntityId, GameState, TURRET_COOLDOWN_TICKS,
};
use crate::ws::protocol::{BulletAction, BulletUpdate, TurretSnapshot};

/// Velocity cap per axis, px per tick
pub const MAX_PLAYER_VELOCITY: f32 = 5.0;
/// Velocity gained per tick while a direction key is held
pub const PLAYER_ACCELERATION: f32 = 2.0;
/// Velocity lost per tick toward zero with no key held
pub const VELOCITY_DECAY: f32 = 0.25;
/// Default turret sweep and the rotation cap while tracking, degrees per tick
pub const TURRET_SWEEP_SPEED: f32 = 2.0;
/// A turret tracks and fires only targets whose bearing is within this
/// many degrees of its current angle
pub const TURRET_TRIGGER_EPSILON: f32 = 3.0;
/// Bullet travel per tick, px
pub const BULLET_SPEED: f32 = 2.0;
pub const BULLET_RADIUS: f32 = 10.0;

/// One axis of the held-key velocity model: accelerate toward the cap
/// while a key is held, decay toward zero otherwise. Opposite keys cancel
/// into decay.
fn calculate_velocity(current: f32, positive: bool, negative: bool) -> f32 {
    if positive && !negative {
        (current + PLAYER_ACCELERATION).min(MAX_PLAYER_VELOCITY)
    } else if negative && !positive {
        (current - PLAYER_ACCELERATION).max(-MAX_PLAYER_VELOCITY)
    } else if current > 0.0 {
        (current - VELOCITY_DECAY).max(0.0)
    } else {
        (current + VELOCITY_DECAY).min(0.0)
    }
}

/// Integrate held keys into velocities and velocities into provisional
/// positions, clamped to the board. Overlaps introduced here are resolved
/// by the collision pass that follows.
pub fn tick_player_positions(state: &mut GameState) {
    let w = state.board_width();
    let h = state.board_height();
    for player in state.players.values_mut() {
        player.vel.x = calculate_velocity(player.vel.x, player.keys.d, player.keys.a);
        player.vel.y = calculate_velocity(player.vel.y, player.keys.s, player.keys.w);
        player.pos.x = (player.pos.x + player.vel.x).clamp(0.0, w);
        player.pos.y = (player.pos.y + player.vel.y).clamp(0.0, h);
    }
}

/// Bearing from one point to another, degrees [0, 360)
pub fn angle_between_points(from: Vec2, to: Vec2) -> f32 {
    let angle = (to.y - from.y).atan2(to.x - from.x).to_degrees();
    angle.rem_euclid(360.0)
}

/// Signed shortest rotation from one angle to another, degrees [-180, 180)
pub fn distance_to_angle(from: f32, to: f32) -> f32 {
    (to - from + 540.0).rem_euclid(360.0) - 180.0
}

/// Advance every turret by one tick.
///
/// A turret sweeps at its default speed until an enemy's bearing falls
/// inside the trigger window; it then tracks that target at capped speed
/// and fires once per cooldown. Targets outside the window never deflect
/// the sweep. Fired bullets spawn clear of the turret body and are
/// registered dynamic in the grid. Returns only the turrets whose angular
/// speed changed (plus any flagged for forced resync), so idle sweeps
/// stay off the wire.
pub fn tick_turrets(state: &mut GameState, grid: &mut SpatialGrid) -> Vec<TurretSnapshot> {
    let block = state.block_size;
    let mut enemy_positions: [Vec<Vec2>; 2] = [Vec::new(), Vec::new()];
    for player in state.players.values() {
        enemy_positions[player.team.opponent().index()].push(player.pos);
    }

    let mut changed = Vec::new();
    let ids: Vec<u32> = state.turrets.keys().copied().collect();
    for tid in ids {
        let turret = match state.turrets.get(&tid) {
            Some(turret) => turret.clone(),
            None => continue,
        };
        let center = Vec2::new(
            turret.location.x as f32 * block + block / 2.0,
            turret.location.y as f32 * block + block / 2.0,
        );

        let cooldown = turret.cooldown.saturating_sub(1);
        let nearest_delta = enemy_positions[turret.team.index()]
            .iter()
            .map(|&target| distance_to_angle(turret.angle, angle_between_points(center, target)))
            .min_by(|a, b| a.abs().total_cmp(&b.abs()));

        let mut new_cooldown = cooldown;
        let locked = matches!(nearest_delta, Some(d) if d.abs() <= TURRET_TRIGGER_EPSILON);
        let new_speed = match nearest_delta {
            Some(delta) if locked => delta.clamp(-TURRET_SWEEP_SPEED, TURRET_SWEEP_SPEED),
            // Outside the trigger window the sweep continues, keeping its
            // current direction
            _ => {
                if turret.speed < 0.0 {
                    -TURRET_SWEEP_SPEED
                } else {
                    TURRET_SWEEP_SPEED
                }
            }
        };
        let new_angle = (turret.angle + new_speed).rem_euclid(360.0);

        if locked && cooldown == 0 {
            let rad = new_angle.to_radians();
            let muzzle_offset = block * 0.75 + BULLET_RADIUS;
            let origin = center + Vec2::new(rad.cos(), rad.sin()) * muzzle_offset;
            let bid = state.create_bullet(origin, new_angle, BULLET_SPEED, BULLET_RADIUS, turret.team);
            grid.add_entity(EntityId::Bullet(bid), true, state);
            new_cooldown = TURRET_COOLDOWN_TICKS;
            trace!(turret_id = tid, bullet_id = bid, angle = new_angle, "Turret fired");
        }

        let speed_changed = (new_speed - turret.speed).abs() > f32::EPSILON;
        if let Some(turret) = state.turrets.get_mut(&tid) {
            let resync = turret.force_resync;
            turret.angle = new_angle;
            turret.speed = new_speed;
            turret.cooldown = new_cooldown;
            turret.force_resync = false;
            if speed_changed || resync {
                changed.push(turret_snapshot(turret));
            }
        }
    }
    changed
}

/// Integrate every bullet along its fixed heading and destroy whatever
/// leaves the board. Returns the tick's create/destroy deltas split by
/// owning team for scoped broadcast.
pub fn tick_bullets(state: &mut GameState, grid: &mut SpatialGrid) -> [Vec<BulletUpdate>; 2] {
    let ids: Vec<u32> = state.bullets.keys().copied().collect();
    for bid in ids {
        let (pos, angle, speed) = match state.bullets.get(&bid) {
            Some(bullet) => (bullet.pos, bullet.angle, bullet.speed),
            None => continue,
        };
        let rad = angle.to_radians();
        let next = pos + Vec2::new(rad.cos(), rad.sin()) * speed;
        if state.is_out_of_bounds(next.x, next.y) {
            if state.destroy_bullet(bid) {
                grid.delete_entity(EntityId::Bullet(bid));
            }
        } else if let Some(bullet) = state.bullets.get_mut(&bid) {
            bullet.pos = next;
        }
    }

    let mut per_team: [Vec<BulletUpdate>; 2] = [Vec::new(), Vec::new()];
    for (bid, (team, action)) in state.take_bullet_updates() {
        let snapshot = match action {
            BulletAction::Created => state.bullets.get(&bid).map(bullet_snapshot),
            BulletAction::Destroyed => None,
        };
        // A bullet created and destroyed before any broadcast never hits
        // the wire as Created; skip the orphan
        if action == BulletAction::Created && snapshot.is_none() {
            continue;
        }
        per_team[team.index()].push(BulletUpdate {
            bullet_id: bid,
            action,
            state: snapshot,
        });
    }
    per_team
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{BuildableKind, GridPos, KeySet, TeamId};
    use uuid::Uuid;

    fn setup() -> (GameState, SpatialGrid) {
        let state = GameState::new(Uuid::new_v4(), 20, 10, 50.0);
        let grid = SpatialGrid::new(50.0);
        (state, grid)
    }

    fn join_at(state: &mut GameState, grid: &mut SpatialGrid, name: &str, pos: Vec2) -> Uuid {
        let id = Uuid::new_v4();
        state.add_player(id, name).unwrap();
        state.update_player_position(id, pos);
        grid.add_entity(EntityId::Player(id), true, state);
        id
    }

    #[test]
    fn velocity_accelerates_to_cap_and_decays_to_rest() {
        let mut v = 0.0;
        for _ in 0..4 {
            v = calculate_velocity(v, true, false);
        }
        assert_eq!(v, MAX_PLAYER_VELOCITY);

        let decay_ticks = (MAX_PLAYER_VELOCITY / VELOCITY_DECAY) as usize;
        for _ in 0..decay_ticks {
            v = calculate_velocity(v, false, false);
            assert!(v >= 0.0, "decay never overshoots zero");
        }
        assert_eq!(v, 0.0);
    }

    #[test]
    fn velocity_model_is_symmetric_and_opposite_keys_cancel() {
        let forward = calculate_velocity(0.0, true, false);
        let backward = calculate_velocity(0.0, false, true);
        assert_eq!(forward, -backward);

        // Both keys held behaves exactly like no key held
        let both = calculate_velocity(3.0, true, true);
        let neither = calculate_velocity(3.0, false, false);
        assert_eq!(both, neither);
    }

    #[test]
    fn held_keys_move_the_player() {
        let (mut state, mut grid) = setup();
        let id = join_at(&mut state, &mut grid, "a", Vec2::new(300.0, 300.0));
        state.set_keys(
            id,
            KeySet {
                w: false,
                a: false,
                s: false,
                d: true,
            },
        );
        tick_player_positions(&mut state);
        let p = &state.players[&id];
        assert_eq!(p.vel.x, PLAYER_ACCELERATION);
        assert_eq!(p.pos.x, 300.0 + PLAYER_ACCELERATION);
        assert_eq!(p.pos.y, 300.0);
    }

    #[test]
    fn angle_helpers_wrap_and_take_shortest_path() {
        assert_eq!(angle_between_points(Vec2::ZERO, Vec2::new(10.0, 0.0)), 0.0);
        assert_eq!(angle_between_points(Vec2::ZERO, Vec2::new(0.0, 10.0)), 90.0);
        assert!((distance_to_angle(350.0, 10.0) - 20.0).abs() < 1e-4);
        assert!((distance_to_angle(10.0, 350.0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn idle_turret_completes_a_revolution_in_180_ticks() {
        let (mut state, mut grid) = setup();
        // The only player is the Left owner, so the Left turret sees no
        // enemies and keeps its default sweep
        let owner = join_at(&mut state, &mut grid, "a", Vec2::new(100.0, 100.0));
        let change = state
            .add_object(BuildableKind::Turret, GridPos::new(4, 4), owner)
            .unwrap();
        let tid = change.turret_id.unwrap();

        let start = state.turrets[&tid].angle;
        let ticks_per_revolution = (360.0 / TURRET_SWEEP_SPEED) as usize;
        for _ in 0..ticks_per_revolution {
            tick_turrets(&mut state, &mut grid);
        }
        let end = state.turrets[&tid].angle;
        assert!((end - start).abs() < 1e-3, "expected {} ~ {}", end, start);
        assert_eq!(ticks_per_revolution, 180);
    }

    #[test]
    fn sweep_ignores_targets_outside_the_trigger_window() {
        let (mut state, mut grid) = setup();
        let owner = join_at(&mut state, &mut grid, "a", Vec2::new(100.0, 450.0));
        // Enemy due west of the turret center, bearing 180 degrees; the
        // shortest rotation would be negative, the sweep stays positive
        let _enemy = join_at(&mut state, &mut grid, "b", Vec2::new(25.0, 225.0));
        let change = state
            .add_object(BuildableKind::Turret, GridPos::new(4, 4), owner)
            .unwrap();
        let tid = change.turret_id.unwrap();

        tick_turrets(&mut state, &mut grid);
        let turret = &state.turrets[&tid];
        assert_eq!(turret.speed, TURRET_SWEEP_SPEED);
        assert_eq!(turret.angle, TURRET_SWEEP_SPEED, "sweep must not home on the target");
        assert!(state.bullets.is_empty(), "no shot outside the trigger window");
    }

    #[test]
    fn locked_turret_fires_once_per_cooldown() {
        let (mut state, mut grid) = setup();
        let owner = join_at(&mut state, &mut grid, "a", Vec2::new(100.0, 450.0));
        // Enemy due east of the turret center, bearing 0 = initial angle
        let _enemy = join_at(&mut state, &mut grid, "b", Vec2::new(600.0, 225.0));
        let change = state
            .add_object(BuildableKind::Turret, GridPos::new(4, 4), owner)
            .unwrap();
        let tid = change.turret_id.unwrap();
        assert_eq!(state.turrets[&tid].cooldown, TURRET_COOLDOWN_TICKS);

        // The placement cooldown must run down before the first shot
        for _ in 0..(TURRET_COOLDOWN_TICKS - 1) {
            tick_turrets(&mut state, &mut grid);
        }
        assert!(state.bullets.is_empty(), "no shot during the placement cooldown");

        tick_turrets(&mut state, &mut grid);
        assert_eq!(state.bullets.len(), 1);
        let bullet = state.bullets.values().next().unwrap();
        assert_eq!(bullet.team, TeamId::Left);
        assert!(grid.is_registered(EntityId::Bullet(bullet.id)));
        assert_eq!(state.turrets[&tid].cooldown, TURRET_COOLDOWN_TICKS);

        // No second shot until the cooldown has run down again
        for _ in 0..(TURRET_COOLDOWN_TICKS - 1) {
            tick_turrets(&mut state, &mut grid);
        }
        assert_eq!(state.bullets.len(), 1);
        tick_turrets(&mut state, &mut grid);
        assert_eq!(state.bullets.len(), 2);
    }

    #[test]
    fn turret_deltas_are_sparse() {
        let (mut state, mut grid) = setup();
        let owner = join_at(&mut state, &mut grid, "a", Vec2::new(100.0, 100.0));
        state
            .add_object(BuildableKind::Turret, GridPos::new(4, 4), owner)
            .unwrap();

        // First tick reports the new turret (forced resync plus the sweep
        // spin-up); a steady sweep afterwards reports nothing
        assert_eq!(tick_turrets(&mut state, &mut grid).len(), 1);
        assert!(tick_turrets(&mut state, &mut grid).is_empty());
        assert!(tick_turrets(&mut state, &mut grid).is_empty());
    }

    #[test]
    fn out_of_bounds_bullet_is_destroyed_within_the_travel_bound() {
        let (mut state, mut grid) = setup();
        let bid = state.create_bullet(Vec2::new(990.0, 250.0), 0.0, BULLET_SPEED, BULLET_RADIUS, TeamId::Left);
        grid.add_entity(EntityId::Bullet(bid), true, &state);
        // Flush the creation delta
        tick_bullets(&mut state, &mut grid);

        let diagonal = (state.board_width().powi(2) + state.board_height().powi(2)).sqrt();
        let bound = (diagonal / BULLET_SPEED) as usize + 1;
        let mut destroyed_at = None;
        for i in 0..bound {
            let updates = tick_bullets(&mut state, &mut grid);
            let team_updates = &updates[TeamId::Left.index()];
            if team_updates
                .iter()
                .any(|u| u.bullet_id == bid && u.action == BulletAction::Destroyed)
            {
                destroyed_at = Some(i);
                break;
            }
        }
        assert!(destroyed_at.is_some(), "bullet must die within the bound");
        assert!(!state.bullets.contains_key(&bid));
        assert!(!grid.is_registered(EntityId::Bullet(bid)));
    }

    #[test]
    fn created_bullets_carry_a_snapshot_for_their_team_only() {
        let (mut state, mut grid) = setup();
        let bid = state.create_bullet(Vec2::new(500.0, 250.0), 45.0, BULLET_SPEED, BULLET_RADIUS, TeamId::Right);
        grid.add_entity(EntityId::Bullet(bid), true, &state);

        let updates = tick_bullets(&mut state, &mut grid);
        assert!(updates[TeamId::Left.index()].is_empty());
        let update = &updates[TeamId::Right.index()][0];
        assert_eq!(update.action, BulletAction::Created);
        let snapshot = update.state.as_ref().unwrap();
        assert_eq!(snapshot.team, TeamId::Right);
        assert_eq!(snapshot.angle, 45.0);
    }
}
