//! One game session: input buffering, the per-tick step sequence, and
//! team-scoped broadcast
//!
//! Every session is mutated by exactly one logical writer: the tick driver
//! holds the session mutex for the whole step, and lobby joins or leaves
//! take the same mutex between ticks. Client intent arrives on a buffered
//! channel and is drained at the start of the step, so the last key state
//! sent before the tick wins.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::game::grid::{GridDeltas, SpatialGrid};
use crate::game::logic::{tick_bullets, tick_player_positions, tick_turrets};
use crate::game::state::{EntityId, GameState, JoinError, PlayerId, MAX_PLAYER_HEALTH, MAX_WALL_HEALTH};
use crate::util::time::{SIMULATION_TPS, TURRET_RESYNC_TICKS};
use crate::ws::protocol::{
    BuildAction, BuildableKind, BulletUpdate, ClientMsg, GamePhase, GridPos, PlayerEntry,
    PlayerHealth, PlayerPosition, ServerMsg, TeamId, TurretSnapshot, WallHealth,
};

const INPUT_BUFFER: usize = 256;
const BROADCAST_BUFFER: usize = 256;

/// One buffered client intent, consumed at the next tick start
#[derive(Debug)]
pub struct PlayerInput {
    pub player_id: PlayerId,
    pub msg: ClientMsg,
}

/// Everything a connection needs after a successful join
pub struct JoinBundle {
    pub player_id: PlayerId,
    pub session_id: Uuid,
    pub team: TeamId,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub team_rx: broadcast::Receiver<ServerMsg>,
    pub accepted: ServerMsg,
}

/// A single running game session
pub struct GameSession {
    pub id: Uuid,
    state: GameState,
    grid: SpatialGrid,
    input_rx: mpsc::Receiver<PlayerInput>,
    input_tx: mpsc::Sender<PlayerInput>,
    team_tx: [broadcast::Sender<ServerMsg>; 2],
    build_ticks_remaining: u64,
    resync_countdown: u64,
    max_players: usize,
}

impl GameSession {
    pub fn new(config: &Config) -> Self {
        let id = Uuid::new_v4();
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let team_tx = [
            broadcast::channel(BROADCAST_BUFFER).0,
            broadcast::channel(BROADCAST_BUFFER).0,
        ];
        let state = GameState::new(
            id,
            config.board_width_blocks,
            config.board_height_blocks,
            config.block_size,
        );
        let mut grid = SpatialGrid::new(config.block_size);
        for team in TeamId::ALL {
            grid.add_entity(EntityId::Flag(team), true, &state);
            grid.add_entity(EntityId::FlagBase(team), false, &state);
        }

        info!(session_id = %id, "Session created");
        Self {
            id,
            state,
            grid,
            input_rx,
            input_tx,
            team_tx,
            build_ticks_remaining: config.build_phase_secs * SIMULATION_TPS as u64,
            resync_countdown: TURRET_RESYNC_TICKS,
            max_players: config.max_players_per_session,
        }
    }

    pub fn player_count(&self) -> usize {
        self.state.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.players.len() >= self.max_players
    }

    /// Admit a player, wire up their channels, and build the join snapshot.
    /// Existing clients learn about the newcomer via a broadcast.
    pub fn add_player(&mut self, name: &str) -> Result<JoinBundle, JoinError> {
        if self.is_full() {
            return Err(JoinError::SessionFull);
        }
        let player_id = Uuid::new_v4();
        let (team, spawn) = {
            let player = self.state.add_player(player_id, name)?;
            (player.team, player.pos)
        };
        self.grid
            .add_entity(EntityId::Player(player_id), true, &self.state);

        self.broadcast_all(ServerMsg::PlayerJoined {
            player: PlayerEntry {
                player_id,
                name: name.to_string(),
                team,
                position: spawn.to_array(),
            },
        });
        info!(session_id = %self.id, player_id = %player_id, name, ?team, "Player joined");

        Ok(JoinBundle {
            player_id,
            session_id: self.id,
            team,
            input_tx: self.input_tx.clone(),
            team_rx: self.team_tx[team.index()].subscribe(),
            accepted: self.join_snapshot(player_id, team, spawn.to_array()),
        })
    }

    /// Drop a player, returning their display name for lobby bookkeeping
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<String> {
        let player = self.state.remove_player(player_id)?;
        self.grid.delete_entity(EntityId::Player(player_id));
        self.broadcast_all(ServerMsg::PlayerLeft { player_id });
        info!(session_id = %self.id, player_id = %player_id, "Player left");
        Some(player.name)
    }

    fn join_snapshot(&self, player_id: PlayerId, team: TeamId, spawn: [f32; 2]) -> ServerMsg {
        ServerMsg::JoinAccepted {
            player_id,
            session_id: self.id,
            team,
            spawn_point: spawn,
            board_blocks: [self.state.width_blocks, self.state.height_blocks],
            block_size: self.state.block_size,
            phase: self.state.phase,
            max_player_health: MAX_PLAYER_HEALTH,
            max_wall_health: MAX_WALL_HEALTH,
            buildable_kinds: BuildableKind::ALL.to_vec(),
            players: self.state.player_entries(),
            objects: self.state.object_snapshots(),
            turrets: self.state.turret_snapshots_for(team),
            bullets: self.state.bullet_snapshots_for(team),
            flag_bases: self.state.flag_base_snapshots(),
            flags: self.state.flag_snapshots(),
            scores: self.state.scores(),
        }
    }

    /// Advance the session by one tick
    pub fn step(&mut self) {
        self.state.tick += 1;
        self.process_inputs();

        tick_player_positions(&mut self.state);
        self.state.sync_flag_positions();
        let deltas = self.grid.update(&mut self.state);
        self.broadcast_positions();

        if self.state.phase == GamePhase::Build {
            self.tick_build_phase();
            return;
        }

        let turret_changes = tick_turrets(&mut self.state, &mut self.grid);
        let bullet_updates = tick_bullets(&mut self.state, &mut self.grid);
        self.broadcast_combat(deltas, turret_changes, bullet_updates);
    }

    fn tick_build_phase(&mut self) {
        self.build_ticks_remaining = self.build_ticks_remaining.saturating_sub(1);
        if self.build_ticks_remaining == 0 {
            self.state.phase = GamePhase::Play;
            self.broadcast_all(ServerMsg::PhaseChanged {
                phase: GamePhase::Play,
            });
            info!(session_id = %self.id, "Build phase over, combat started");
        }
    }

    /// Drain all buffered inputs. Later key updates overwrite earlier ones,
    /// so the last value sent before this tick wins.
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            match input.msg {
                ClientMsg::UpdateKeys { keys } => self.state.set_keys(input.player_id, keys),
                ClientMsg::SelectObject {
                    kind,
                    location,
                    action,
                } => self.handle_build(input.player_id, kind, location, action),
                // Join, clock sync, and leave are handled on the
                // connection path, never through the input buffer
                other => {
                    debug!(session_id = %self.id, msg = ?other, "Ignoring misrouted input");
                }
            }
        }
    }

    fn handle_build(
        &mut self,
        player_id: PlayerId,
        kind: BuildableKind,
        location: GridPos,
        action: BuildAction,
    ) {
        if self.state.phase != GamePhase::Build {
            debug!(session_id = %self.id, player_id = %player_id, "Build action outside build phase");
            return;
        }
        let change = match action {
            BuildAction::Select => self.state.add_object(kind, location, player_id),
            BuildAction::Veto => self.state.increment_veto(location, player_id),
        };
        let change = match change {
            Some(change) => change,
            None => return,
        };

        let entity = match change.kind {
            BuildableKind::Wall => EntityId::Wall(change.location),
            BuildableKind::Turret => EntityId::Turret(change.location),
        };
        if change.deleted {
            self.grid.delete_entity(entity);
        } else if !self.grid.is_registered(entity) {
            self.grid.add_entity(entity, false, &self.state);
        }

        self.broadcast_team(
            change.team,
            ServerMsg::ObjectUpdate {
                location: change.location,
                kind: change.kind,
                veto_count: change.veto_count,
                team: change.team,
                deleted: change.deleted,
                turret_id: change.turret_id,
            },
        );
    }

    fn broadcast_positions(&self) {
        let positions: Vec<PlayerPosition> = self
            .state
            .players
            .values()
            .map(|p| PlayerPosition {
                player_id: p.id,
                position: p.pos.to_array(),
                velocity: p.vel.to_array(),
            })
            .collect();
        self.broadcast_all(ServerMsg::PlayerPositions {
            tick: self.state.tick,
            positions,
        });
    }

    fn broadcast_combat(
        &mut self,
        deltas: GridDeltas,
        turret_changes: Vec<TurretSnapshot>,
        bullet_updates: [Vec<BulletUpdate>; 2],
    ) {
        let tick = self.state.tick;

        // Turrets: periodic full resync, sparse deltas in between
        self.resync_countdown = self.resync_countdown.saturating_sub(1);
        if self.resync_countdown == 0 {
            self.resync_countdown = TURRET_RESYNC_TICKS;
            for team in TeamId::ALL {
                self.broadcast_team(
                    team,
                    ServerMsg::TurretStates {
                        tick,
                        full: true,
                        turrets: self.state.turret_snapshots_for(team),
                    },
                );
            }
        } else if !turret_changes.is_empty() {
            for team in TeamId::ALL {
                let turrets: Vec<_> = turret_changes
                    .iter()
                    .filter(|t| t.team == team)
                    .cloned()
                    .collect();
                if !turrets.is_empty() {
                    self.broadcast_team(
                        team,
                        ServerMsg::TurretStates {
                            tick,
                            full: false,
                            turrets,
                        },
                    );
                }
            }
        }

        for team in TeamId::ALL {
            let updates = &bullet_updates[team.index()];
            if !updates.is_empty() {
                self.broadcast_team(
                    team,
                    ServerMsg::BulletUpdates {
                        tick,
                        updates: updates.clone(),
                    },
                );
            }
        }

        if !deltas.player_health.is_empty() || !deltas.wall_health.is_empty() {
            let players: Vec<PlayerHealth> = deltas
                .player_health
                .iter()
                .map(|(&player_id, &health)| PlayerHealth { player_id, health })
                .collect();
            let walls: Vec<WallHealth> = deltas
                .wall_health
                .iter()
                .map(|(&location, &health)| WallHealth { location, health })
                .collect();
            self.broadcast_all(ServerMsg::HealthUpdates {
                tick,
                players,
                walls,
            });
        }

        for (location, team) in &deltas.walls_removed {
            self.broadcast_team(
                *team,
                ServerMsg::ObjectUpdate {
                    location: *location,
                    kind: BuildableKind::Wall,
                    veto_count: -1,
                    team: *team,
                    deleted: true,
                    turret_id: None,
                },
            );
        }

        self.broadcast_all(ServerMsg::FlagUpdate {
            tick,
            flags: self.state.flag_snapshots(),
        });

        if deltas.scores_changed {
            self.broadcast_all(ServerMsg::Scores {
                scores: self.state.scores(),
            });
        }
    }

    fn broadcast_team(&self, team: TeamId, msg: ServerMsg) {
        // Send errors just mean no subscriber is listening right now
        let _ = self.team_tx[team.index()].send(msg);
    }

    fn broadcast_all(&self, msg: ServerMsg) {
        for team in TeamId::ALL {
            self.broadcast_team(team, msg.clone());
        }
    }
}

/// All live sessions, shared between the lobby, the tick driver, and the
/// health endpoint
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Mutex<GameSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: GameSession) -> Arc<Mutex<GameSession>> {
        let id = session.id;
        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(id, shared.clone());
        shared
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<GameSession>>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: Uuid) {
        self.sessions.remove(&id);
    }

    /// A random session with a free slot, if any. Random placement keeps
    /// new players spread across concurrent sessions.
    pub fn find_open(&self) -> Option<Arc<Mutex<GameSession>>> {
        use rand::seq::SliceRandom;
        let open: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().lock().is_full())
            .map(|entry| entry.value().clone())
            .collect();
        open.choose(&mut rand::thread_rng()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Mutex<GameSession>>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn player_count(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().lock().player_count())
            .sum()
    }
}
