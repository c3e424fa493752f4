//! Spatial-grid broad phase and type-pair collision resolution
//!
//! The board is hashed into square cells of twice the block size, so any
//! entity bounded by one block overlaps at most four cells. Static
//! entities (walls, turrets, flag bases) are bucketed once when
//! registered; dynamic entities (players, bullets, flags) are rebucketed
//! every tick. Candidate pairs are deduplicated with a symmetric hash-id
//! key before the narrow phase runs.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::game::geom::{overlap, Shape, Vec2};
use crate::game::state::{
    EntityId, GameState, PlayerId, BULLET_DAMAGE, PLAYER_CONTACT_DAMAGE, PLAYER_TO_WALL_DAMAGE,
    WALL_CONTACT_DAMAGE,
};
use crate::ws::protocol::{GamePhase, GridPos, TeamId};

/// State changes produced by one collision pass, for broadcast
#[derive(Debug, Default)]
pub struct GridDeltas {
    pub walls_removed: Vec<(GridPos, TeamId)>,
    pub bullets_removed: Vec<u32>,
    pub player_health: HashMap<PlayerId, i32>,
    pub wall_health: HashMap<GridPos, i32>,
    pub scores_changed: bool,
}

struct EntityRecord {
    hash_id: u64,
    dynamic: bool,
    /// Cells occupied at registration; statics only
    cells: Vec<(i32, i32)>,
}

/// Broad-phase spatial hash over the session board
pub struct SpatialGrid {
    cell_size: f32,
    static_cells: HashMap<(i32, i32), Vec<EntityId>>,
    dynamic_cells: HashMap<(i32, i32), Vec<EntityId>>,
    entities: HashMap<EntityId, EntityRecord>,
    next_hash_id: u64,
}

impl SpatialGrid {
    pub fn new(block_size: f32) -> Self {
        Self {
            cell_size: block_size * 2.0,
            static_cells: HashMap::new(),
            dynamic_cells: HashMap::new(),
            entities: HashMap::new(),
            next_hash_id: 0,
        }
    }

    /// Register an entity. Statics are bucketed once, here; dynamics are
    /// rebucketed on every update. Registering twice is a logic error.
    pub fn add_entity(&mut self, id: EntityId, dynamic: bool, state: &GameState) {
        assert!(
            !self.entities.contains_key(&id),
            "entity registered twice: {:?}",
            id
        );
        let hash_id = self.next_hash_id;
        self.next_hash_id += 1;

        let mut cells = Vec::new();
        if !dynamic {
            let shape = match state.shape_of(id) {
                Some(shape) => shape,
                None => panic!("registering entity with no shape: {:?}", id),
            };
            cells = self.cells_for_shape(&shape);
            for cell in &cells {
                self.static_cells.entry(*cell).or_default().push(id);
            }
        }

        self.entities.insert(
            id,
            EntityRecord {
                hash_id,
                dynamic,
                cells,
            },
        );
    }

    /// Unregister an entity. Deleting an entity that was never registered
    /// is a logic error and aborts the session.
    pub fn delete_entity(&mut self, id: EntityId) {
        let record = match self.entities.remove(&id) {
            Some(record) => record,
            None => panic!("deleting unregistered entity: {:?}", id),
        };
        if !record.dynamic {
            for cell in record.cells {
                if let Some(bucket) = self.static_cells.get_mut(&cell) {
                    bucket.retain(|e| *e != id);
                    if bucket.is_empty() {
                        self.static_cells.remove(&cell);
                    }
                }
            }
        }
    }

    pub fn is_registered(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Cells covered by a shape. An entity bounded by one block fits in at
    /// most four cells, and its center cell is always among them.
    fn cells_for_shape(&self, shape: &Shape) -> Vec<(i32, i32)> {
        let (min, max) = shape_bounds(shape);
        assert!(
            shape.extent() <= self.cell_size,
            "entity larger than a grid cell"
        );
        let x0 = (min.x / self.cell_size).floor() as i32;
        let x1 = (max.x / self.cell_size).floor() as i32;
        let y0 = (min.y / self.cell_size).floor() as i32;
        let y1 = (max.y / self.cell_size).floor() as i32;

        let mut cells = Vec::with_capacity(4);
        for x in x0..=x1 {
            for y in y0..=y1 {
                cells.push((x, y));
            }
        }
        debug_assert!(cells.len() <= 4);
        debug_assert!({
            let center = shape_center(shape);
            cells.contains(&(
                (center.x / self.cell_size).floor() as i32,
                (center.y / self.cell_size).floor() as i32,
            ))
        });
        cells
    }

    /// Run one collision pass: rebucket dynamics, collect candidate pairs
    /// per cell (deduplicated by symmetric hash-id key), resolve each pair,
    /// and unregister anything destroyed along the way.
    pub fn update(&mut self, state: &mut GameState) -> GridDeltas {
        self.dynamic_cells.clear();

        let dynamics: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, r)| r.dynamic)
            .map(|(id, _)| *id)
            .collect();
        for id in &dynamics {
            // Shapeless dynamics were destroyed out of band; skip them
            if let Some(shape) = state.shape_of(*id) {
                for cell in self.cells_for_shape(&shape) {
                    self.dynamic_cells.entry(cell).or_default().push(*id);
                }
            }
        }

        let mut seen: HashSet<(u64, u64)> = HashSet::new();
        let mut pairs: Vec<(EntityId, EntityId)> = Vec::new();
        for (cell, dyns) in &self.dynamic_cells {
            let statics = self.static_cells.get(cell);
            for (i, &a) in dyns.iter().enumerate() {
                let ha = self.entities[&a].hash_id;
                for &b in &dyns[i + 1..] {
                    let hb = self.entities[&b].hash_id;
                    if seen.insert((ha.min(hb), ha.max(hb))) {
                        pairs.push((a, b));
                    }
                }
                if let Some(statics) = statics {
                    for &b in statics {
                        let hb = self.entities[&b].hash_id;
                        if seen.insert((ha.min(hb), ha.max(hb))) {
                            pairs.push((a, b));
                        }
                    }
                }
            }
        }

        let mut deltas = GridDeltas::default();
        let mut removed: HashSet<EntityId> = HashSet::new();
        for (a, b) in pairs {
            if removed.contains(&a) || removed.contains(&b) {
                continue;
            }
            resolve_pair(state, a, b, &mut deltas, &mut removed);
        }
        for id in removed {
            self.delete_entity(id);
        }
        deltas
    }
}

fn shape_bounds(shape: &Shape) -> (Vec2, Vec2) {
    match shape {
        Shape::Circle(c) => {
            let r = Vec2::new(c.radius, c.radius);
            (c.center - r, c.center + r)
        }
        Shape::Rect(r) => (r.min, r.max()),
    }
}

fn shape_center(shape: &Shape) -> Vec2 {
    match shape {
        Shape::Circle(c) => c.center,
        Shape::Rect(r) => r.center(),
    }
}

/// Ordering rank so every pair is dispatched dynamic-entity-first
fn rank(id: EntityId) -> u8 {
    match id {
        EntityId::Player(_) => 0,
        EntityId::Bullet(_) => 1,
        EntityId::Flag(_) => 2,
        EntityId::Wall(_) => 3,
        EntityId::Turret(_) => 4,
        EntityId::FlagBase(_) => 5,
    }
}

/// Narrow phase and per-type-pair resolution. Pairs whose entities were
/// deleted earlier this tick resolve to no shape and are skipped. Pairs
/// with no interaction rule are no-ops.
fn resolve_pair(
    state: &mut GameState,
    a: EntityId,
    b: EntityId,
    deltas: &mut GridDeltas,
    removed: &mut HashSet<EntityId>,
) {
    let (a, b) = if rank(a) <= rank(b) { (a, b) } else { (b, a) };
    let (sa, sb) = match (state.shape_of(a), state.shape_of(b)) {
        (Some(sa), Some(sb)) => (sa, sb),
        _ => return,
    };
    let mtv = match overlap(&sa, &sb) {
        Some(mtv) => mtv,
        None => return,
    };
    trace!(?a, ?b, "Resolving collision");

    match (a, b) {
        (EntityId::Player(pa), EntityId::Player(pb)) => {
            resolve_player_player(state, deltas, pa, pb, mtv);
        }
        (EntityId::Player(pid), EntityId::Bullet(bid)) => {
            resolve_player_bullet(state, deltas, removed, pid, bid);
        }
        (EntityId::Player(pid), EntityId::Flag(flag_team)) => {
            resolve_player_flag(state, pid, flag_team);
        }
        (EntityId::Player(pid), EntityId::Wall(loc)) => {
            resolve_player_wall(state, deltas, removed, pid, loc, mtv);
        }
        (EntityId::Player(pid), EntityId::Turret(_)) => {
            // Turrets block movement for everyone, friend or foe
            if let Some(player) = state.players.get(&pid) {
                let pushed = player.pos + mtv;
                state.update_player_position(pid, pushed);
            }
        }
        (EntityId::Bullet(bid), EntityId::Wall(_)) | (EntityId::Bullet(bid), EntityId::Turret(_)) => {
            remove_bullet(state, deltas, removed, bid);
        }
        (EntityId::Flag(flag_team), EntityId::FlagBase(base_team)) => {
            resolve_flag_base(state, deltas, flag_team, base_team);
        }
        // No interaction rule for this pair
        _ => {}
    }
}

/// Players push each other apart; teammates additionally exchange
/// momentum. Opposing contact sends any carried flag home and damages
/// whichever of the two is past the midline.
fn resolve_player_player(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    pa: PlayerId,
    pb: PlayerId,
    mtv: Vec2,
) {
    let (a, b) = match (state.players.get(&pa), state.players.get(&pb)) {
        (Some(a), Some(b)) => (a, b),
        _ => return,
    };
    let (team_a, team_b) = (a.team, b.team);
    let (vel_a, vel_b) = (a.vel, b.vel);
    let pushed_a = a.pos + mtv * 0.5;
    let pushed_b = b.pos - mtv * 0.5;

    state.update_player_position(pa, pushed_a);
    state.update_player_position(pb, pushed_b);

    if team_a == team_b {
        if let Some(p) = state.players.get_mut(&pa) {
            p.vel = vel_b;
        }
        if let Some(p) = state.players.get_mut(&pb) {
            p.vel = vel_a;
        }
        return;
    }

    if state.phase == GamePhase::Play {
        state.strip_carried_flags(pa);
        state.strip_carried_flags(pb);
        if state.on_wrong_side(team_a, state.players[&pa].pos.x) {
            damage_player(state, deltas, pa, PLAYER_CONTACT_DAMAGE);
        }
        if state.on_wrong_side(team_b, state.players[&pb].pos.x) {
            damage_player(state, deltas, pb, PLAYER_CONTACT_DAMAGE);
        }
    }
}

/// Walls stop players outright. In the play phase an opposing wall grinds
/// the player down while the player chips the wall.
fn resolve_player_wall(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    removed: &mut HashSet<EntityId>,
    pid: PlayerId,
    loc: GridPos,
    mtv: Vec2,
) {
    let player_team = match state.players.get(&pid) {
        Some(player) => {
            let pushed = player.pos + mtv;
            let team = player.team;
            state.update_player_position(pid, pushed);
            team
        }
        None => return,
    };
    let wall_team = match state.objects.get(&loc) {
        Some(wall) => wall.team,
        None => return,
    };
    if state.phase == GamePhase::Play && wall_team != player_team {
        damage_player(state, deltas, pid, WALL_CONTACT_DAMAGE);
        damage_wall(state, deltas, removed, loc, PLAYER_TO_WALL_DAMAGE);
    }
}

/// Bullets pass through their own team and detonate on opponents
fn resolve_player_bullet(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    removed: &mut HashSet<EntityId>,
    pid: PlayerId,
    bid: u32,
) {
    let bullet_team = match state.bullets.get(&bid) {
        Some(bullet) => bullet.team,
        None => return,
    };
    let player_team = match state.players.get(&pid) {
        Some(player) => player.team,
        None => return,
    };
    if bullet_team == player_team {
        return;
    }
    remove_bullet(state, deltas, removed, bid);
    damage_player(state, deltas, pid, BULLET_DAMAGE);
}

/// A teammate's touch sends their flag home, whether it is being carried
/// or lying dropped; an enemy's touch captures it when loose
fn resolve_player_flag(state: &mut GameState, pid: PlayerId, flag_team: TeamId) {
    if state.phase != GamePhase::Play {
        return;
    }
    let player_team = match state.players.get(&pid) {
        Some(player) => player.team,
        None => return,
    };
    if player_team == flag_team {
        if state.flag(flag_team).captor.is_some() || !state.flag_is_home(flag_team) {
            state.return_flag(flag_team);
        }
    } else if state.flag(flag_team).captor.is_none() {
        state.capture_flag(flag_team, pid);
    }
}

/// A captured flag touching the captor's own base scores
fn resolve_flag_base(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    flag_team: TeamId,
    base_team: TeamId,
) {
    if state.phase != GamePhase::Play {
        return;
    }
    let captor = match state.flag(flag_team).captor {
        Some(captor) => captor,
        None => return,
    };
    let captor_team = match state.players.get(&captor) {
        Some(player) => player.team,
        None => return,
    };
    if captor_team == base_team && base_team != flag_team {
        state.award_capture(flag_team, base_team);
        deltas.scores_changed = true;
    }
}

fn damage_player(state: &mut GameState, deltas: &mut GridDeltas, id: PlayerId, damage: i32) {
    if let Some(health) = state.apply_player_damage(id, damage) {
        deltas.player_health.insert(id, health);
    }
}

fn damage_wall(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    removed: &mut HashSet<EntityId>,
    loc: GridPos,
    damage: i32,
) {
    if let Some(health) = state.apply_wall_damage(loc, damage) {
        if health <= 0 {
            if let Some(wall) = state.delete_object(loc) {
                deltas.walls_removed.push((loc, wall.team));
                deltas.wall_health.remove(&loc);
                removed.insert(EntityId::Wall(loc));
            }
        } else {
            deltas.wall_health.insert(loc, health);
        }
    }
}

fn remove_bullet(
    state: &mut GameState,
    deltas: &mut GridDeltas,
    removed: &mut HashSet<EntityId>,
    bid: u32,
) {
    if state.destroy_bullet(bid) {
        deltas.bullets_removed.push(bid);
        removed.insert(EntityId::Bullet(bid));
    }
}
