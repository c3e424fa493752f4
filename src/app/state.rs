//! Shared application state handed to every request handler

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::game::driver::TickRateHandle;
use crate::game::session::SessionRegistry;
use crate::lobby::LobbyService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub lobby: Arc<LobbyService>,
    pub tick_rate: TickRateHandle,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let lobby = Arc::new(LobbyService::new(config.clone(), sessions.clone()));
        Self {
            config: Arc::new(config),
            sessions,
            lobby,
            tick_rate: TickRateHandle::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
