//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two teams of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamId {
    Left,
    Right,
}

impl TeamId {
    pub const ALL: [TeamId; 2] = [TeamId::Left, TeamId::Right];

    pub fn opponent(self) -> TeamId {
        match self {
            TeamId::Left => TeamId::Right,
            TeamId::Right => TeamId::Left,
        }
    }

    /// Index into per-team arrays
    pub fn index(self) -> usize {
        match self {
            TeamId::Left => 0,
            TeamId::Right => 1,
        }
    }
}

/// Session phase: teams build their forts, then fight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Build,
    Play,
}

/// Integer grid-block coordinate, used as the key for buildable objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Object types that can be placed during the build phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildableKind {
    Wall,
    Turret,
}

impl BuildableKind {
    pub const ALL: [BuildableKind; 2] = [BuildableKind::Wall, BuildableKind::Turret];
}

/// Build-phase action on a grid location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildAction {
    Select,
    Veto,
}

/// Movement keys currently held by a player (last value wins)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a session under a display name
    Join { name: String },

    /// Build-phase placement or veto on a grid location
    SelectObject {
        kind: BuildableKind,
        location: GridPos,
        action: BuildAction,
    },

    /// Currently-held movement keys; affects next tick only, no ack
    UpdateKeys { keys: KeySet },

    /// Clock calibration request
    ClockSync {
        /// Client timestamp in unix millis
        client_time: u64,
    },

    /// Leave the session
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Initial snapshot after a successful join
    JoinAccepted {
        player_id: Uuid,
        session_id: Uuid,
        team: TeamId,
        spawn_point: [f32; 2],
        /// Board dimensions in grid-block units
        board_blocks: [u32; 2],
        block_size: f32,
        phase: GamePhase,
        max_player_health: i32,
        max_wall_health: i32,
        buildable_kinds: Vec<BuildableKind>,
        players: Vec<PlayerEntry>,
        objects: Vec<ObjectSnapshot>,
        /// Turret states for the joining player's team only
        turrets: Vec<TurretSnapshot>,
        /// Bullet states for the joining player's team only
        bullets: Vec<BulletSnapshot>,
        flag_bases: Vec<FlagBaseSnapshot>,
        flags: Vec<FlagSnapshot>,
        scores: ScoreSnapshot,
    },

    /// Join refused (duplicate name)
    JoinDenied { reason: String },

    /// Result of a build action, sent to the owning team only.
    /// `deleted = true` with `veto_count = -1` signals removal.
    ObjectUpdate {
        location: GridPos,
        kind: BuildableKind,
        veto_count: i32,
        team: TeamId,
        deleted: bool,
        turret_id: Option<u32>,
    },

    /// Authoritative player positions for this tick
    PlayerPositions {
        tick: u64,
        positions: Vec<PlayerPosition>,
    },

    /// Turret state deltas; `full = true` on the periodic resync cycle
    TurretStates {
        tick: u64,
        full: bool,
        turrets: Vec<TurretSnapshot>,
    },

    /// Bullet create/destroy deltas
    BulletUpdates { tick: u64, updates: Vec<BulletUpdate> },

    /// Player and wall health deltas for this tick
    HealthUpdates {
        tick: u64,
        players: Vec<PlayerHealth>,
        walls: Vec<WallHealth>,
    },

    /// Flag positions and captors
    FlagUpdate { tick: u64, flags: Vec<FlagSnapshot> },

    /// Team scores
    Scores { scores: ScoreSnapshot },

    /// Build phase ended, combat started
    PhaseChanged { phase: GamePhase },

    /// A new player joined the session
    PlayerJoined { player: PlayerEntry },

    /// Player disconnected
    PlayerLeft { player_id: Uuid },

    /// Clock calibration reply: the client derives one-way latency and
    /// clock offset, and extrapolates with the averaged tick rate
    ClockSyncReply {
        server_time: u64,
        /// server_time - client_time
        clock_offset: i64,
        /// Smoothed true ticks per second achieved by the loop
        tick_rate: f64,
    },
}

/// Player identity and position at join time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub player_id: Uuid,
    pub name: String,
    pub team: TeamId,
    pub position: [f32; 2],
}

/// Per-tick player position sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub player_id: Uuid,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

/// Buildable object state on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub location: GridPos,
    pub kind: BuildableKind,
    pub team: TeamId,
    pub veto_count: i32,
    pub turret_id: Option<u32>,
    pub health: Option<i32>,
}

/// Turret state on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurretSnapshot {
    pub turret_id: u32,
    pub location: GridPos,
    pub team: TeamId,
    /// Current angle in degrees [0, 360)
    pub angle: f32,
    /// Signed angular speed in degrees per tick
    pub speed: f32,
}

/// Bullet trajectory parameters; clients integrate positions themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletSnapshot {
    pub bullet_id: u32,
    pub origin: [f32; 2],
    pub position: [f32; 2],
    /// Heading in degrees
    pub angle: f32,
    /// Distance per tick
    pub speed: f32,
    pub radius: f32,
    pub team: TeamId,
    pub created_tick: u64,
}

/// Bullet lifecycle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletAction {
    Created,
    Destroyed,
}

/// One bullet delta: `state` is present for `Created` only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletUpdate {
    pub bullet_id: u32,
    pub action: BulletAction,
    pub state: Option<BulletSnapshot>,
}

/// Player health sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHealth {
    pub player_id: Uuid,
    pub health: i32,
}

/// Wall health sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallHealth {
    pub location: GridPos,
    pub health: i32,
}

/// Flag state: at its base unless a captor is carrying it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub team: TeamId,
    pub position: [f32; 2],
    pub captor: Option<Uuid>,
}

/// Stationary flag base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagBaseSnapshot {
    pub team: TeamId,
    pub position: [f32; 2],
}

/// Per-team scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub left: u32,
    pub right: u32,
}
