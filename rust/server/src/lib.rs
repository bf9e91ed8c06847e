//! Ludo match server: per-match actors behind an axum HTTP/WebSocket API,
//! plus the stateless AI scoring endpoint.

pub mod actor;
pub mod config;
pub mod error;
pub mod routes;
pub mod session;
pub mod store;

pub use actor::{spawn_match, Command, MatchHandle, MatchServices};
pub use config::{MatchSettings, ServerConfig, Timing};
pub use error::ApiError;
pub use routes::{router, AppState, RouterTransport};
pub use session::{MatchSession, MatchView, SessionError};
pub use store::{MatchRecord, Stores};
