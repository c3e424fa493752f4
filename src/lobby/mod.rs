//! Lobby: global display-name bookkeeping and session placement
//!
//! Display names are unique across the whole process, not just one
//! session, so score lines and kill messages stay unambiguous wherever a
//! player ends up. Placement finds an open session or spins up a new one.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::session::{GameSession, JoinBundle, SessionRegistry};
use crate::game::state::{JoinError, PlayerId};

const MAX_NAME_LEN: usize = 24;

pub struct LobbyService {
    config: Config,
    registry: Arc<SessionRegistry>,
    names: Mutex<HashSet<String>>,
}

impl LobbyService {
    pub fn new(config: Config, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            names: Mutex::new(HashSet::new()),
        }
    }

    /// Claim the name, place the player in an open session (creating one
    /// if every session is full), and hand back the join bundle.
    pub fn join(&self, name: &str) -> Result<JoinBundle, JoinError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(JoinError::InvalidName);
        }
        {
            let mut names = self.names.lock();
            if !names.insert(name.to_string()) {
                warn!(name, "Join refused, name already taken");
                return Err(JoinError::DuplicateName(name.to_string()));
            }
        }

        let result = match self.registry.find_open() {
            Some(session) => {
                let attempt = session.lock().add_player(name);
                match attempt {
                    // The open slot was taken before we got the lock
                    Err(JoinError::SessionFull) => self.create_session_with(name),
                    other => other,
                }
            }
            None => self.create_session_with(name),
        };

        if result.is_err() {
            self.names.lock().remove(name);
        }
        result
    }

    /// Spin up a fresh session with its first player already admitted, so
    /// the driver never sees it empty and reaps it
    fn create_session_with(&self, name: &str) -> Result<JoinBundle, JoinError> {
        let mut session = GameSession::new(&self.config);
        let bundle = session.add_player(name)?;
        self.registry.insert(session);
        Ok(bundle)
    }

    /// Remove the player from their session and release the name. Empty
    /// sessions are reaped by the tick driver afterwards.
    pub fn leave(&self, session_id: Uuid, player_id: PlayerId) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let name = session.lock().remove_player(player_id);
        if let Some(name) = name {
            self.names.lock().remove(&name);
            info!(name, "Name released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lobby() -> (LobbyService, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let config = Config {
            addr: "127.0.0.1:0".parse().unwrap(),
            client_origin: "*".to_string(),
            board_width_blocks: 20,
            board_height_blocks: 10,
            block_size: 50.0,
            build_phase_secs: 45,
            max_players_per_session: 2,
        };
        (LobbyService::new(config, registry.clone()), registry)
    }

    #[test]
    fn first_join_creates_a_session() {
        let (lobby, registry) = test_lobby();
        let bundle = lobby.join("ada").unwrap();
        assert_eq!(registry.session_count(), 1);
        assert!(registry.get(bundle.session_id).is_some());
    }

    #[test]
    fn names_are_unique_across_sessions() {
        let (lobby, _registry) = test_lobby();
        lobby.join("ada").unwrap();
        lobby.join("bob").unwrap();
        // Sessions cap at 2, so this lands in a fresh session where the
        // name would be locally free, and is still refused
        assert!(matches!(
            lobby.join("ada"),
            Err(JoinError::DuplicateName(_))
        ));
    }

    #[test]
    fn full_sessions_overflow_into_new_ones() {
        let (lobby, registry) = test_lobby();
        lobby.join("a").unwrap();
        lobby.join("b").unwrap();
        assert_eq!(registry.session_count(), 1);
        lobby.join("c").unwrap();
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn leaving_releases_the_name_for_reuse() {
        let (lobby, _registry) = test_lobby();
        let bundle = lobby.join("ada").unwrap();
        lobby.leave(bundle.session_id, bundle.player_id);
        assert!(lobby.join("ada").is_ok());
    }

    #[test]
    fn blank_and_oversized_names_are_invalid() {
        let (lobby, _registry) = test_lobby();
        assert!(matches!(lobby.join("   "), Err(JoinError::InvalidName)));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(lobby.join(&long), Err(JoinError::InvalidName)));
    }
}
