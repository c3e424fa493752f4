//! Authoritative game state for a single session
//!
//! Owns every entity: players, teams, buildable objects, turrets, bullets,
//! flags, and scores. All lifecycle (creation, damage, respawn, deletion)
//! goes through this type; the spatial grid only holds entity ids for
//! lookup.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use crate::game::geom::{Shape, Vec2};
use crate::ws::protocol::{
    BuildableKind, BulletAction, BulletSnapshot, FlagBaseSnapshot, FlagSnapshot, GamePhase,
    GridPos, KeySet, ObjectSnapshot, PlayerEntry, ScoreSnapshot, TeamId, TurretSnapshot,
};

pub type PlayerId = Uuid;

/// Maximum player health; health resets here on respawn
pub const MAX_PLAYER_HEALTH: i32 = 100;
/// Maximum wall health; walls are removed at zero
pub const MAX_WALL_HEALTH: i32 = 100;
/// Damage a bullet applies to a player on impact
pub const BULLET_DAMAGE: i32 = 10;
/// Damage applied to a player caught on the wrong side of the midline
/// when touching an opposing player
pub const PLAYER_CONTACT_DAMAGE: i32 = 5;
/// Damage an opposing wall applies to a player per contact resolution
pub const WALL_CONTACT_DAMAGE: i32 = 2;
/// Damage a player applies to an opposing wall per contact resolution
pub const PLAYER_TO_WALL_DAMAGE: i32 = 5;
/// Turret cap per team
pub const MAX_TURRETS_PER_TEAM: u32 = 4;
/// Ticks between turret shots; fresh turrets start on a full cooldown
pub const TURRET_COOLDOWN_TICKS: u32 = 30;

const SPAWN_POINTS_PER_TEAM: u32 = 4;

/// Stable identity of a collidable entity.
///
/// The grid stores these; the shape behind an id is always fetched from
/// GameState so a deleted entity simply resolves to no shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    Player(PlayerId),
    Wall(GridPos),
    Turret(GridPos),
    Bullet(u32),
    Flag(TeamId),
    FlagBase(TeamId),
}

/// A connected player
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub team: TeamId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub health: i32,
    pub keys: KeySet,
}

/// One team: membership, spawn rotation, flag base, turret budget, score
#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub players: HashSet<PlayerId>,
    pub spawn_points: Vec<Vec2>,
    next_spawn: usize,
    pub turret_count: u32,
    pub score: u32,
    pub base_pos: Vec2,
}

impl Team {
    /// Next spawn point in rotation, advancing the cursor
    fn take_spawn(&mut self) -> Vec2 {
        let point = self.spawn_points[self.next_spawn % self.spawn_points.len()];
        self.next_spawn += 1;
        point
    }
}

/// A team's flag: sits at its base until an enemy captor carries it
#[derive(Debug, Clone)]
pub struct Flag {
    pub team: TeamId,
    pub pos: Vec2,
    pub home: Vec2,
    pub captor: Option<PlayerId>,
}

/// A placed wall or turret, keyed by grid location
#[derive(Debug, Clone)]
pub struct BuildableObject {
    pub kind: BuildableKind,
    pub location: GridPos,
    pub team: TeamId,
    /// Players who have cast a veto; each counts once
    pub voters: HashSet<PlayerId>,
    /// Set for turrets only, binding to a TurretState
    pub turret_id: Option<u32>,
}

/// Mutable turret AI state, bound to a turret BuildableObject
#[derive(Debug, Clone)]
pub struct TurretState {
    pub id: u32,
    pub location: GridPos,
    pub team: TeamId,
    /// Degrees [0, 360)
    pub angle: f32,
    /// Signed degrees per tick
    pub speed: f32,
    /// Ticks until the turret may fire again
    pub cooldown: u32,
    /// Set on creation so the first tick always reports this turret
    pub force_resync: bool,
}

/// A fired bullet; trajectory parameters are immutable after creation
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: u32,
    pub origin: Vec2,
    pub pos: Vec2,
    /// Heading in degrees
    pub angle: f32,
    /// Distance per tick
    pub speed: f32,
    pub radius: f32,
    pub team: TeamId,
    pub created_tick: u64,
}

/// Result of a build action, broadcast to the owning team
#[derive(Debug, Clone)]
pub struct ObjectChange {
    pub location: GridPos,
    pub kind: BuildableKind,
    pub team: TeamId,
    /// -1 signals deletion
    pub veto_count: i32,
    pub deleted: bool,
    pub turret_id: Option<u32>,
}

/// Join failures surfaced to the requesting client
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("invalid name")]
    InvalidName,
    #[error("session is full")]
    SessionFull,
}

/// Authoritative state of one game session
pub struct GameState {
    pub session_id: Uuid,
    pub tick: u64,
    pub phase: GamePhase,
    pub width_blocks: u32,
    pub height_blocks: u32,
    pub block_size: f32,
    pub players: HashMap<PlayerId, Player>,
    names: HashSet<String>,
    teams: [Team; 2],
    flags: [Flag; 2],
    pub objects: HashMap<GridPos, BuildableObject>,
    pub wall_health: HashMap<GridPos, i32>,
    pub turrets: HashMap<u32, TurretState>,
    pub bullets: HashMap<u32, Bullet>,
    /// Create/destroy deltas buffered for the next broadcast, tagged with
    /// the owning team for scoped fan-out
    bullet_updates: HashMap<u32, (TeamId, BulletAction)>,
    next_bullet_id: u32,
    next_turret_id: u32,
}

impl GameState {
    pub fn new(session_id: Uuid, width_blocks: u32, height_blocks: u32, block_size: f32) -> Self {
        let w = width_blocks as f32 * block_size;
        let h = height_blocks as f32 * block_size;

        let make_team = |id: TeamId| {
            let spawn_x = match id {
                TeamId::Left => w / 4.0,
                TeamId::Right => w * 3.0 / 4.0,
            };
            let spawn_points = (0..SPAWN_POINTS_PER_TEAM)
                .map(|i| {
                    let y = h * (i + 1) as f32 / (SPAWN_POINTS_PER_TEAM + 1) as f32;
                    Vec2::new(spawn_x, y)
                })
                .collect();
            let base_x = match id {
                TeamId::Left => block_size,
                TeamId::Right => w - block_size,
            };
            Team {
                id,
                players: HashSet::new(),
                spawn_points,
                next_spawn: 0,
                turret_count: 0,
                score: 0,
                base_pos: Vec2::new(base_x, h / 2.0),
            }
        };

        let teams = [make_team(TeamId::Left), make_team(TeamId::Right)];
        let flags = TeamId::ALL.map(|id| {
            let home = teams[id.index()].base_pos;
            Flag {
                team: id,
                pos: home,
                home,
                captor: None,
            }
        });

        Self {
            session_id,
            tick: 0,
            phase: GamePhase::Build,
            width_blocks,
            height_blocks,
            block_size,
            players: HashMap::new(),
            names: HashSet::new(),
            teams,
            flags,
            objects: HashMap::new(),
            wall_health: HashMap::new(),
            turrets: HashMap::new(),
            bullets: HashMap::new(),
            bullet_updates: HashMap::new(),
            next_bullet_id: 0,
            next_turret_id: 0,
        }
    }

    // =========================================================================
    // Board geometry
    // =========================================================================

    pub fn board_width(&self) -> f32 {
        self.width_blocks as f32 * self.block_size
    }

    pub fn board_height(&self) -> f32 {
        self.height_blocks as f32 * self.block_size
    }

    pub fn is_out_of_bounds(&self, x: f32, y: f32) -> bool {
        x < 0.0 || y < 0.0 || x > self.board_width() || y > self.board_height()
    }

    pub fn in_grid_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.x < self.width_blocks as i32
            && pos.y < self.height_blocks as i32
    }

    pub fn midline(&self) -> f32 {
        self.board_width() / 2.0
    }

    /// A player is on the wrong side of the midline when past it
    /// relative to their own team's half
    pub fn on_wrong_side(&self, team: TeamId, x: f32) -> bool {
        match team {
            TeamId::Left => x > self.midline(),
            TeamId::Right => x < self.midline(),
        }
    }

    // =========================================================================
    // Teams and flags
    // =========================================================================

    pub fn team(&self, id: TeamId) -> &Team {
        &self.teams[id.index()]
    }

    fn team_mut(&mut self, id: TeamId) -> &mut Team {
        &mut self.teams[id.index()]
    }

    pub fn flag(&self, team: TeamId) -> &Flag {
        &self.flags[team.index()]
    }

    pub fn scores(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            left: self.teams[TeamId::Left.index()].score,
            right: self.teams[TeamId::Right.index()].score,
        }
    }

    /// Record a capture for `scoring_team` and send the carried flag home
    pub fn award_capture(&mut self, flag_team: TeamId, scoring_team: TeamId) {
        self.team_mut(scoring_team).score += 1;
        self.return_flag(flag_team);
        debug!(
            session_id = %self.session_id,
            team = ?scoring_team,
            "Flag captured, score incremented"
        );
    }

    pub fn capture_flag(&mut self, flag_team: TeamId, captor: PlayerId) {
        let flag = &mut self.flags[flag_team.index()];
        flag.captor = Some(captor);
    }

    pub fn return_flag(&mut self, flag_team: TeamId) {
        let flag = &mut self.flags[flag_team.index()];
        flag.captor = None;
        flag.pos = flag.home;
    }

    /// Drop any flag carried by `player` where it lies. A teammate walking
    /// over it sends it home; an enemy recaptures it.
    pub fn drop_flag_if_captor(&mut self, player: PlayerId) {
        for flag in &mut self.flags {
            if flag.captor == Some(player) {
                flag.captor = None;
            }
        }
    }

    /// Send home any flag the player is carrying
    pub fn strip_carried_flags(&mut self, player: PlayerId) {
        for i in 0..self.flags.len() {
            if self.flags[i].captor == Some(player) {
                let team = self.flags[i].team;
                self.return_flag(team);
            }
        }
    }

    pub fn flag_is_home(&self, team: TeamId) -> bool {
        let flag = self.flag(team);
        flag.pos.distance(flag.home) < 1e-3
    }

    /// Mirror captured flag positions onto their captors. Called once per
    /// tick after movement integration.
    pub fn sync_flag_positions(&mut self) {
        for i in 0..self.flags.len() {
            if let Some(captor) = self.flags[i].captor {
                match self.players.get(&captor) {
                    Some(player) => self.flags[i].pos = player.pos,
                    // Captor vanished out-of-band; flag stays where it fell
                    None => self.flags[i].captor = None,
                }
            }
        }
    }

    // =========================================================================
    // Player lifecycle
    // =========================================================================

    /// Add a player, balancing teams by current size (ties go Left).
    /// Names are unique within the session.
    pub fn add_player(&mut self, id: PlayerId, name: &str) -> Result<&Player, JoinError> {
        if self.names.contains(name) {
            return Err(JoinError::DuplicateName(name.to_string()));
        }

        let left = self.teams[TeamId::Left.index()].players.len();
        let right = self.teams[TeamId::Right.index()].players.len();
        let team_id = if right < left {
            TeamId::Right
        } else {
            TeamId::Left
        };

        let team = self.team_mut(team_id);
        let spawn = team.take_spawn();
        team.players.insert(id);

        self.names.insert(name.to_string());
        self.players.insert(
            id,
            Player {
                id,
                name: name.to_string(),
                team: team_id,
                pos: spawn,
                vel: Vec2::ZERO,
                health: MAX_PLAYER_HEALTH,
                keys: KeySet::default(),
            },
        );
        Ok(&self.players[&id])
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        self.names.remove(&player.name);
        self.team_mut(player.team).players.remove(&id);
        self.drop_flag_if_captor(id);
        Some(player)
    }

    pub fn set_keys(&mut self, id: PlayerId, keys: KeySet) {
        if let Some(player) = self.players.get_mut(&id) {
            player.keys = keys;
        }
    }

    /// Write a provisional position, clamped to board edges. The collision
    /// pass afterwards resolves any overlap this introduces.
    pub fn update_player_position(&mut self, id: PlayerId, pos: Vec2) {
        let w = self.board_width();
        let h = self.board_height();
        if let Some(player) = self.players.get_mut(&id) {
            player.pos = Vec2::new(pos.x.clamp(0.0, w), pos.y.clamp(0.0, h));
        }
    }

    /// Apply damage and return the health value to report. Health never
    /// persists at or below zero: the player respawns immediately, dropping
    /// any carried flag, and full health is reported.
    pub fn apply_player_damage(&mut self, id: PlayerId, damage: i32) -> Option<i32> {
        let player = self.players.get_mut(&id)?;
        player.health -= damage;
        if player.health <= 0 {
            self.respawn_player(id);
            Some(MAX_PLAYER_HEALTH)
        } else {
            Some(self.players[&id].health)
        }
    }

    /// Move a player to their team's next spawn point with full health
    pub fn respawn_player(&mut self, id: PlayerId) {
        let team_id = match self.players.get(&id) {
            Some(p) => p.team,
            None => return,
        };
        let spawn = self.team_mut(team_id).take_spawn();
        self.drop_flag_if_captor(id);
        if let Some(player) = self.players.get_mut(&id) {
            player.pos = spawn;
            player.vel = Vec2::ZERO;
            player.health = MAX_PLAYER_HEALTH;
        }
        debug!(session_id = %self.session_id, player_id = %id, "Player respawned");
    }

    // =========================================================================
    // Bullets
    // =========================================================================

    pub fn create_bullet(
        &mut self,
        origin: Vec2,
        angle: f32,
        speed: f32,
        radius: f32,
        team: TeamId,
    ) -> u32 {
        let id = self.next_bullet_id;
        self.next_bullet_id += 1;
        self.bullets.insert(
            id,
            Bullet {
                id,
                origin,
                pos: origin,
                angle,
                speed,
                radius,
                team,
                created_tick: self.tick,
            },
        );
        self.bullet_updates.insert(id, (team, BulletAction::Created));
        id
    }

    /// Remove a bullet, recording the delta. Returns false if it was
    /// already destroyed earlier this tick.
    pub fn destroy_bullet(&mut self, id: u32) -> bool {
        match self.bullets.remove(&id) {
            Some(bullet) => {
                self.bullet_updates
                    .insert(id, (bullet.team, BulletAction::Destroyed));
                true
            }
            None => false,
        }
    }

    /// Drain the buffered bullet deltas for broadcast
    pub fn take_bullet_updates(&mut self) -> HashMap<u32, (TeamId, BulletAction)> {
        std::mem::take(&mut self.bullet_updates)
    }

    // =========================================================================
    // Build protocol
    // =========================================================================

    /// Majority of the team's current size
    pub fn veto_quorum(&self, team: TeamId) -> usize {
        self.team(team).players.len() / 2 + 1
    }

    /// Place an object, or reinterpret a repeat placement from the owning
    /// team as "undo my veto". Returns the change to broadcast, or None if
    /// the action was rejected or changed nothing.
    pub fn add_object(
        &mut self,
        kind: BuildableKind,
        location: GridPos,
        player_id: PlayerId,
    ) -> Option<ObjectChange> {
        let player_team = self.players.get(&player_id)?.team;
        if !self.in_grid_bounds(location) {
            return None;
        }

        if let Some(existing) = self.objects.get_mut(&location) {
            // Repeat placement from the owning team undoes that player's veto
            if existing.team != player_team {
                return None;
            }
            if !existing.voters.remove(&player_id) {
                return None;
            }
            return Some(ObjectChange {
                location,
                kind: existing.kind,
                team: existing.team,
                veto_count: existing.voters.len() as i32,
                deleted: false,
                turret_id: existing.turret_id,
            });
        }

        let turret_id = match kind {
            BuildableKind::Wall => {
                self.wall_health.insert(location, MAX_WALL_HEALTH);
                None
            }
            BuildableKind::Turret => {
                if self.team(player_team).turret_count >= MAX_TURRETS_PER_TEAM {
                    return None;
                }
                self.team_mut(player_team).turret_count += 1;
                let id = self.next_turret_id;
                self.next_turret_id += 1;
                self.turrets.insert(
                    id,
                    TurretState {
                        id,
                        location,
                        team: player_team,
                        angle: 0.0,
                        speed: 0.0,
                        cooldown: TURRET_COOLDOWN_TICKS,
                        force_resync: true,
                    },
                );
                Some(id)
            }
        };

        self.objects.insert(
            location,
            BuildableObject {
                kind,
                location,
                team: player_team,
                voters: HashSet::new(),
                turret_id,
            },
        );
        Some(ObjectChange {
            location,
            kind,
            team: player_team,
            veto_count: 0,
            deleted: false,
            turret_id,
        })
    }

    /// Record a veto vote. Each player counts once; reaching the quorum
    /// deletes the object and reports `veto_count = -1`.
    pub fn increment_veto(
        &mut self,
        location: GridPos,
        player_id: PlayerId,
    ) -> Option<ObjectChange> {
        let player_team = self.players.get(&player_id)?.team;
        let object = self.objects.get_mut(&location)?;
        if object.team != player_team || !object.voters.insert(player_id) {
            return None;
        }

        let votes = object.voters.len();
        let kind = object.kind;
        let team = object.team;
        let turret_id = object.turret_id;

        if votes >= self.veto_quorum(team) {
            self.delete_object(location);
            return Some(ObjectChange {
                location,
                kind,
                team,
                veto_count: -1,
                deleted: true,
                turret_id,
            });
        }
        Some(ObjectChange {
            location,
            kind,
            team,
            veto_count: votes as i32,
            deleted: false,
            turret_id,
        })
    }

    /// Remove a buildable object, releasing its turret id and wall health.
    /// The caller unregisters the matching grid entity.
    pub fn delete_object(&mut self, location: GridPos) -> Option<BuildableObject> {
        let object = self.objects.remove(&location)?;
        match object.kind {
            BuildableKind::Wall => {
                self.wall_health.remove(&location);
            }
            BuildableKind::Turret => {
                if let Some(turret_id) = object.turret_id {
                    self.turrets.remove(&turret_id);
                }
                let team = self.team_mut(object.team);
                team.turret_count = team.turret_count.saturating_sub(1);
            }
        }
        Some(object)
    }

    /// Apply damage to a wall, returning its new health (walls at or below
    /// zero are deleted by the collision resolver)
    pub fn apply_wall_damage(&mut self, location: GridPos, damage: i32) -> Option<i32> {
        let health = self.wall_health.get_mut(&location)?;
        *health -= damage;
        Some(*health)
    }

    // =========================================================================
    // Shapes
    // =========================================================================

    /// Bounding shape for an entity, or None if it no longer exists.
    /// Shapes derive from authoritative positions, so they are always in
    /// sync with the entity.
    pub fn shape_of(&self, id: EntityId) -> Option<Shape> {
        let block = self.block_size;
        match id {
            EntityId::Player(pid) => {
                let player = self.players.get(&pid)?;
                Some(Shape::circle(player.pos, block / 2.0))
            }
            EntityId::Wall(pos) => {
                let object = self.objects.get(&pos)?;
                (object.kind == BuildableKind::Wall).then(|| grid_block_shape(pos, block))
            }
            EntityId::Turret(pos) => {
                let object = self.objects.get(&pos)?;
                (object.kind == BuildableKind::Turret).then(|| grid_block_shape(pos, block))
            }
            EntityId::Bullet(bid) => {
                let bullet = self.bullets.get(&bid)?;
                Some(Shape::circle(bullet.pos, bullet.radius))
            }
            EntityId::Flag(team) => {
                let flag = self.flag(team);
                Some(Shape::circle(flag.pos, block / 4.0))
            }
            EntityId::FlagBase(team) => Some(Shape::Rect(crate::game::geom::Rect::centered(
                self.team(team).base_pos,
                block,
                block,
            ))),
        }
    }

    // =========================================================================
    // Snapshots for the join handshake and broadcasts
    // =========================================================================

    pub fn player_entries(&self) -> Vec<PlayerEntry> {
        self.players
            .values()
            .map(|p| PlayerEntry {
                player_id: p.id,
                name: p.name.clone(),
                team: p.team,
                position: p.pos.to_array(),
            })
            .collect()
    }

    pub fn object_snapshots(&self) -> Vec<ObjectSnapshot> {
        self.objects
            .values()
            .map(|o| ObjectSnapshot {
                location: o.location,
                kind: o.kind,
                team: o.team,
                veto_count: o.voters.len() as i32,
                turret_id: o.turret_id,
                health: self.wall_health.get(&o.location).copied(),
            })
            .collect()
    }

    pub fn turret_snapshots_for(&self, team: TeamId) -> Vec<TurretSnapshot> {
        self.turrets
            .values()
            .filter(|t| t.team == team)
            .map(turret_snapshot)
            .collect()
    }

    pub fn bullet_snapshots_for(&self, team: TeamId) -> Vec<BulletSnapshot> {
        self.bullets
            .values()
            .filter(|b| b.team == team)
            .map(bullet_snapshot)
            .collect()
    }

    pub fn flag_snapshots(&self) -> Vec<FlagSnapshot> {
        self.flags
            .iter()
            .map(|f| FlagSnapshot {
                team: f.team,
                position: f.pos.to_array(),
                captor: f.captor,
            })
            .collect()
    }

    pub fn flag_base_snapshots(&self) -> Vec<FlagBaseSnapshot> {
        self.teams
            .iter()
            .map(|t| FlagBaseSnapshot {
                team: t.id,
                position: t.base_pos.to_array(),
            })
            .collect()
    }
}

fn grid_block_shape(pos: GridPos, block: f32) -> Shape {
    Shape::rect(
        Vec2::new(pos.x as f32 * block, pos.y as f32 * block),
        block,
        block,
    )
}

pub fn turret_snapshot(t: &TurretState) -> TurretSnapshot {
    TurretSnapshot {
        turret_id: t.id,
        location: t.location,
        team: t.team,
        angle: t.angle,
        speed: t.speed,
    }
}

pub fn bullet_snapshot(b: &Bullet) -> BulletSnapshot {
    BulletSnapshot {
        bullet_id: b.id,
        origin: b.origin.to_array(),
        position: b.pos.to_array(),
        angle: b.angle,
        speed: b.speed,
        radius: b.radius,
        team: b.team,
        created_tick: b.created_tick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> GameState {
        // 1000 x 500 board with 50 px blocks
        GameState::new(Uuid::new_v4(), 20, 10, 50.0)
    }

    fn join(state: &mut GameState, name: &str) -> PlayerId {
        let id = Uuid::new_v4();
        state.add_player(id, name).unwrap();
        id
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut state = test_state();
        join(&mut state, "ada");
        let err = state.add_player(Uuid::new_v4(), "ada").unwrap_err();
        assert!(matches!(err, JoinError::DuplicateName(_)));
    }

    #[test]
    fn players_are_balanced_across_teams() {
        let mut state = test_state();
        let a = join(&mut state, "a");
        let b = join(&mut state, "b");
        let c = join(&mut state, "c");
        let d = join(&mut state, "d");

        assert_eq!(state.players[&a].team, TeamId::Left);
        assert_eq!(state.players[&b].team, TeamId::Right);
        assert_eq!(state.players[&c].team, TeamId::Left);
        assert_eq!(state.players[&d].team, TeamId::Right);

        // Membership partitions all players
        let left = &state.team(TeamId::Left).players;
        let right = &state.team(TeamId::Right).players;
        assert!(left.is_disjoint(right));
        assert_eq!(left.len() + right.len(), state.players.len());
    }

    #[test]
    fn positions_clamp_to_board_edges() {
        let mut state = test_state();
        let id = join(&mut state, "ada");
        state.update_player_position(id, Vec2::new(-50.0, 9999.0));
        let pos = state.players[&id].pos;
        assert_eq!(pos.x, 0.0);
        assert_eq!(pos.y, 500.0);
    }

    #[test]
    fn damage_terminates_in_respawn_and_never_stays_negative() {
        let mut state = test_state();
        let id = join(&mut state, "ada");

        let hits_to_kill = (MAX_PLAYER_HEALTH as f32 / BULLET_DAMAGE as f32).ceil() as usize;
        for i in 0..hits_to_kill {
            let reported = state.apply_player_damage(id, BULLET_DAMAGE).unwrap();
            assert!(reported > 0, "health must never be reported dead");
            if i + 1 == hits_to_kill {
                assert_eq!(reported, MAX_PLAYER_HEALTH, "final hit respawns");
            }
        }
        assert_eq!(state.players[&id].health, MAX_PLAYER_HEALTH);
    }

    #[test]
    fn respawn_rotates_spawn_points_and_drops_flag() {
        let mut state = test_state();
        let left = join(&mut state, "l");
        let right = join(&mut state, "r");

        // Right player captures the left flag and carries it somewhere
        state.capture_flag(TeamId::Left, right);
        state.update_player_position(right, Vec2::new(600.0, 300.0));
        state.sync_flag_positions();

        let before = state.players[&right].pos;
        state.respawn_player(right);
        let after = state.players[&right].pos;
        assert_ne!(before, after, "spawn rotation should move the player");

        // Flag is dropped in place, not sent home
        assert_eq!(state.flag(TeamId::Left).captor, None);
        assert_eq!(state.flag(TeamId::Left).pos, Vec2::new(600.0, 300.0));
        assert!(!state.flag_is_home(TeamId::Left));

        let _ = left;
    }

    #[test]
    fn captured_flag_mirrors_captor_position() {
        let mut state = test_state();
        let left = join(&mut state, "l");
        let right = join(&mut state, "r");
        state.capture_flag(TeamId::Right, left);

        state.update_player_position(left, Vec2::new(321.0, 123.0));
        state.sync_flag_positions();
        assert_eq!(state.flag(TeamId::Right).pos, Vec2::new(321.0, 123.0));

        let _ = right;
    }

    #[test]
    fn stripping_a_captor_sends_the_flag_home() {
        let mut state = test_state();
        let left = join(&mut state, "l");
        state.capture_flag(TeamId::Right, left);
        state.update_player_position(left, Vec2::new(600.0, 300.0));
        state.sync_flag_positions();

        state.strip_carried_flags(left);
        assert_eq!(state.flag(TeamId::Right).captor, None);
        assert!(state.flag_is_home(TeamId::Right));

        // No-op for a player carrying nothing
        state.strip_carried_flags(left);
        assert!(state.flag_is_home(TeamId::Right));
    }

    #[test]
    fn scoring_returns_flag_and_increments_once() {
        let mut state = test_state();
        let left = join(&mut state, "l");
        state.capture_flag(TeamId::Right, left);
        state.award_capture(TeamId::Right, TeamId::Left);

        assert_eq!(state.scores().left, 1);
        assert_eq!(state.scores().right, 0);
        assert_eq!(state.flag(TeamId::Right).captor, None);
        assert_eq!(state.flag(TeamId::Right).pos, state.flag(TeamId::Right).home);
    }

    #[test]
    fn veto_quorum_deletes_object_and_counts_each_player_once() {
        let mut state = test_state();
        let a = join(&mut state, "a"); // Left
        let _b = join(&mut state, "b"); // Right
        let c = join(&mut state, "c"); // Left

        // Two-member quorum for a two-member team
        assert_eq!(state.veto_quorum(TeamId::Left), 2);

        let loc = GridPos::new(4, 4);
        let change = state.add_object(BuildableKind::Wall, loc, a).unwrap();
        assert_eq!(change.veto_count, 0);
        assert!(!change.deleted);

        let change = state.increment_veto(loc, c).unwrap();
        assert_eq!(change.veto_count, 1);
        assert!(!change.deleted);

        // Same player voting again changes nothing
        assert!(state.increment_veto(loc, c).is_none());

        let change = state.increment_veto(loc, a).unwrap();
        assert!(change.deleted);
        assert_eq!(change.veto_count, -1);
        assert!(!state.objects.contains_key(&loc));
        assert!(!state.wall_health.contains_key(&loc));
    }

    #[test]
    fn repeat_select_undoes_own_veto() {
        let mut state = test_state();
        let a = join(&mut state, "a"); // Left
        let _b = join(&mut state, "b"); // Right
        let c = join(&mut state, "c"); // Left

        let loc = GridPos::new(4, 4);
        state.add_object(BuildableKind::Wall, loc, a).unwrap();
        state.increment_veto(loc, c).unwrap();

        let change = state.add_object(BuildableKind::Wall, loc, c).unwrap();
        assert_eq!(change.veto_count, 0);
        assert!(!change.deleted);

        // A player with no veto to undo changes nothing
        assert!(state.add_object(BuildableKind::Wall, loc, a).is_none());
    }

    #[test]
    fn foreign_team_cannot_veto_or_replace() {
        let mut state = test_state();
        let a = join(&mut state, "a"); // Left
        let b = join(&mut state, "b"); // Right

        let loc = GridPos::new(4, 4);
        state.add_object(BuildableKind::Wall, loc, a).unwrap();
        assert!(state.increment_veto(loc, b).is_none());
        assert!(state.add_object(BuildableKind::Wall, loc, b).is_none());
    }

    #[test]
    fn turret_cap_enforced_and_released_on_delete() {
        let mut state = test_state();
        let a = join(&mut state, "a"); // Left
        let _b = join(&mut state, "b");
        let c = join(&mut state, "c"); // Left, to reach quorum

        for i in 0..MAX_TURRETS_PER_TEAM {
            let change = state
                .add_object(BuildableKind::Turret, GridPos::new(i as i32, 0), a)
                .unwrap();
            assert!(change.turret_id.is_some());
        }
        assert!(state
            .add_object(BuildableKind::Turret, GridPos::new(9, 9), a)
            .is_none());

        // Deleting one frees a slot and releases the turret state
        let loc = GridPos::new(0, 0);
        let turret_id = state.objects[&loc].turret_id.unwrap();
        state.increment_veto(loc, a).unwrap();
        let change = state.increment_veto(loc, c).unwrap();
        assert!(change.deleted);
        assert!(!state.turrets.contains_key(&turret_id));
        assert_eq!(state.team(TeamId::Left).turret_count, MAX_TURRETS_PER_TEAM - 1);
        assert!(state
            .add_object(BuildableKind::Turret, GridPos::new(9, 9), a)
            .is_some());
    }

    #[test]
    fn bullet_lifecycle_records_deltas_once() {
        let mut state = test_state();
        let id = state.create_bullet(Vec2::new(100.0, 100.0), 45.0, 2.0, 10.0, TeamId::Left);
        assert!(state.bullets.contains_key(&id));

        assert!(state.destroy_bullet(id));
        assert!(!state.destroy_bullet(id), "double destroy is a no-op");

        let updates = state.take_bullet_updates();
        // Created then destroyed within the same tick collapses to Destroyed
        assert_eq!(updates.get(&id), Some(&(TeamId::Left, BulletAction::Destroyed)));
        assert!(state.take_bullet_updates().is_empty());
    }

    #[test]
    fn shape_lookup_is_none_for_deleted_entities() {
        let mut state = test_state();
        let a = join(&mut state, "a");
        let loc = GridPos::new(4, 4);
        state.add_object(BuildableKind::Wall, loc, a).unwrap();

        assert!(state.shape_of(EntityId::Wall(loc)).is_some());
        assert!(state.shape_of(EntityId::Turret(loc)).is_none());

        state.delete_object(loc);
        assert!(state.shape_of(EntityId::Wall(loc)).is_none());

        let bullet = state.create_bullet(Vec2::ZERO, 0.0, 2.0, 10.0, TeamId::Left);
        state.destroy_bullet(bullet);
        assert!(state.shape_of(EntityId::Bullet(bullet)).is_none());
    }
}
