//! Environment-variable configuration

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Server configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Allowed CORS origin; "*" allows any
    pub client_origin: String,
    pub board_width_blocks: u32,
    pub board_height_blocks: u32,
    pub block_size: f32,
    pub build_phase_secs: u64,
    pub max_players_per_session: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = parse_var("PORT", 8080)?;
        let host = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| ConfigError::Invalid("SERVER_ADDR", format!("{host}: {e}")))?;

        let config = Self {
            addr,
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            board_width_blocks: parse_var("BOARD_WIDTH_BLOCKS", 20)?,
            board_height_blocks: parse_var("BOARD_HEIGHT_BLOCKS", 10)?,
            block_size: parse_var("BLOCK_SIZE", 50.0)?,
            build_phase_secs: parse_var("BUILD_PHASE_SECS", 45)?,
            max_players_per_session: parse_var("MAX_PLAYERS_PER_SESSION", 8)?,
        };

        if config.board_width_blocks == 0 || config.board_height_blocks == 0 {
            return Err(ConfigError::Invalid(
                "BOARD_WIDTH_BLOCKS",
                "board must have at least one block per axis".to_string(),
            ));
        }
        if config.block_size <= 0.0 {
            return Err(ConfigError::Invalid(
                "BLOCK_SIZE",
                config.block_size.to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::Invalid(name, format!("{raw}: {e}"))),
        Err(_) => Ok(default),
    }
}
