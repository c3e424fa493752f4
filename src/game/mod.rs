//! The authoritative simulation: state, geometry, collision, per-tick
//! logic, sessions, and the fixed-rate driver

pub mod driver;
pub mod geom;
pub mod grid;
pub mod logic;
pub mod session;
pub mod state;
