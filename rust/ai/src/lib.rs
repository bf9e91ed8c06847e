//! Ludo AI runtime: the weighted heuristic and the move chooser backends
//! (in-process heuristic, or a remote scoring service over HTTP).

use engine::{deserialize_state, legal_moves_for, serialize_state, GameState, PlayerId, Snapshot, TokenId};
use futures_util::future::{ready, BoxFuture};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod heuristic;
pub mod remote;

pub use heuristic::{base_score, choose_move, evaluate_move, score_candidates, threat_count};
pub use remote::{HttpTransport, RemoteChooser, ScoringTransport, AI_MOVE_PATH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("no legal moves")]
    NoLegalMoves,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("scoring service answered with status {0}")]
    Status(u16),
    #[error("malformed scoring response: {0}")]
    Decode(String),
    #[error("scoring request timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn multiplier(self) -> f64 {
        match self {
            Difficulty::Easy => 1.0,
            Difficulty::Medium => 1.4,
            Difficulty::Hard => 1.8,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(label)
    }
}

impl FromStr for Difficulty {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(AiError::InvalidRequest(format!("unknown difficulty {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AiBackend {
    #[default]
    Local,
    Remote,
}

pub fn parse_backend(token: &str) -> AiBackend {
    match token.trim().to_ascii_lowercase().as_str() {
        "remote" | "http" => AiBackend::Remote,
        _ => AiBackend::Local,
    }
}

/// Body of a scoring request, as sent to `POST /api/ai-move`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChooseRequest {
    pub state: Snapshot,
    pub player_id: PlayerId,
    pub roll: u8,
    #[serde(default)]
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseResponse {
    pub token_id: Option<TokenId>,
}

pub fn build_request(state: &GameState, roll: u8, difficulty: Difficulty) -> ChooseRequest {
    ChooseRequest {
        state: serialize_state(state),
        player_id: state.current_player_id(),
        roll,
        difficulty,
    }
}

/// First legal token in token order; the deterministic fallback for a failed decision.
pub fn first_legal(state: &GameState, player: PlayerId, roll: u8) -> Option<TokenId> {
    legal_moves_for(state, player, roll).first().copied()
}

/// Picks a token for the player to move. `Ok(None)` means nothing is movable.
pub trait MoveChooser: Send + Sync {
    fn choose<'a>(
        &'a self,
        request: &'a ChooseRequest,
    ) -> BoxFuture<'a, Result<Option<TokenId>, AiError>>;
}

// ---------------- Local backend ----------------

pub struct LocalChooser {
    rng: Mutex<StdRng>,
}

impl fmt::Debug for LocalChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChooser").finish_non_exhaustive()
    }
}

impl Default for LocalChooser {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChooser {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Validate the request and run the heuristic synchronously.
    pub fn choose_now(&self, request: &ChooseRequest) -> Result<Option<TokenId>, AiError> {
        if !(1..=6).contains(&request.roll) {
            return Err(AiError::InvalidRequest(format!(
                "roll must be 1-6, got {}",
                request.roll
            )));
        }
        let state = deserialize_state(&request.state)
            .map_err(|err| AiError::InvalidRequest(err.to_string()))?;
        if state.player(request.player_id).is_none() {
            return Err(AiError::InvalidRequest(format!(
                "unknown player {}",
                request.player_id
            )));
        }
        let mut rng = self.rng.lock();
        Ok(choose_move(
            &state,
            request.player_id,
            request.roll,
            request.difficulty,
            &mut *rng,
        ))
    }
}

impl MoveChooser for LocalChooser {
    fn choose<'a>(
        &'a self,
        request: &'a ChooseRequest,
    ) -> BoxFuture<'a, Result<Option<TokenId>, AiError>> {
        Box::pin(ready(self.choose_now(request)))
    }
}

// ---------------- Backend selection ----------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChooserConfig {
    pub backend: AiBackend,
    pub url: String,
    pub timeout: Duration,
}

impl Default for ChooserConfig {
    fn default() -> Self {
        Self {
            backend: AiBackend::Local,
            url: "http://127.0.0.1:4000".to_string(),
            timeout: Duration::from_millis(2000),
        }
    }
}

pub fn build_chooser(config: &ChooserConfig) -> Result<Arc<dyn MoveChooser>, AiError> {
    match config.backend {
        AiBackend::Local => Ok(Arc::new(LocalChooser::new())),
        AiBackend::Remote => {
            let transport = HttpTransport::new(&config.url, config.timeout)?;
            Ok(Arc::new(RemoteChooser::new(transport)))
        }
    }
}
