//! Core Ludo (four-quadrant race and capture) rules engine.
//! Shared by the AI crate and the match server for identical move logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod board;
pub mod rules;
pub mod snapshot;
pub mod turn;

pub use board::{
    global_index, is_safe_cell, position, Position, FINAL_STEP, HOME_LENGTH, MAX_PLAYERS,
    MIN_PLAYERS, PEN_STEPS, SAFE_CELLS, TOKENS_PER_PLAYER, TRACK_LENGTH,
};
pub use rules::{
    apply_move, capture_targets, has_finished_all, is_legal_move, landing_steps, legal_moves,
    legal_moves_for, ranking_snapshot, try_apply_move, MoveResult, Standing,
};
pub use snapshot::{deserialize_state, serialize_state, Snapshot};
pub use turn::{roll_die, RollOutcome, TurnError, MAX_SIX_STREAK, ROLL_HISTORY_LEN};

pub type PlayerId = u8;

pub const PLAYER_NAMES: [&str; 4] = ["Red", "Blue", "Yellow", "Green"];
pub const PLAYER_COLORS: [&str; 4] = ["#e74c3c", "#3498db", "#f1c40f", "#2ecc71"];
pub const AVATARS: [&str; 8] = ["🦊", "🐼", "🦁", "🐸", "🐯", "🐧", "🦄", "🐲"];
pub const MAX_NAME_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown token: {0}")]
    UnknownToken(TokenId),
    #[error("invalid token id: {0}")]
    InvalidTokenId(String),
    #[error("unknown player: {0}")]
    UnknownPlayer(PlayerId),
    #[error("dice value out of range: {0}")]
    InvalidRoll(u8),
    #[error("a six is required to leave the pen")]
    PenRequiresSix,
    #[error("move overshoots the final cell")]
    Overshoot,
    #[error("token already finished")]
    AlreadyFinished,
    #[error("player count must be between 2 and 4, got {0}")]
    InvalidPlayerCount(usize),
    #[error("invalid player profile: {0}")]
    InvalidProfile(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Token identifier, `player * 4 + index`. Travels as `"token-<n>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(pub u8);

impl TokenId {
    pub fn new(player: PlayerId, index: u8) -> Self {
        TokenId(player * TOKENS_PER_PLAYER + index)
    }

    pub fn player(self) -> PlayerId {
        self.0 / TOKENS_PER_PLAYER
    }

    pub fn index(self) -> u8 {
        self.0 % TOKENS_PER_PLAYER
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token-{}", self.0)
    }
}

impl FromStr for TokenId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("token-")
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<u8>().ok())
            .map(TokenId)
            .ok_or_else(|| EngineError::InvalidTokenId(s.to_string()))
    }
}

impl TryFrom<String> for TokenId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenId> for String {
    fn from(id: TokenId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub player_id: PlayerId,
    pub index: u8,
    /// -1 in the pen, 0..52 on the shared track, 52..=57 on the home stretch.
    pub steps: i8,
}

impl Token {
    pub fn new(player_id: PlayerId, index: u8) -> Self {
        Self {
            id: TokenId::new(player_id, index),
            player_id,
            index,
            steps: PEN_STEPS,
        }
    }

    pub fn in_pen(&self) -> bool {
        self.steps < 0
    }

    pub fn on_track(&self) -> bool {
        (0..TRACK_LENGTH).contains(&self.steps)
    }

    pub fn in_home_stretch(&self) -> bool {
        self.steps >= TRACK_LENGTH
    }

    pub fn is_finished(&self) -> bool {
        self.steps == FINAL_STEP
    }

    pub fn global_index(&self) -> Option<u8> {
        board::global_index(self.steps, self.player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub avatar: String,
    pub is_ai: bool,
}

/// `Ai` seats computer players everywhere except seat 0; `Pass` is pass-and-play.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    #[default]
    Ai,
    Pass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Playing,
    Paused,
    Gameover,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "phase", content = "value", rename_all = "lowercase")]
pub enum Dice {
    #[default]
    Idle,
    Rolling,
    Resolved(u8),
}

impl Dice {
    pub fn value(self) -> Option<u8> {
        match self {
            Dice::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_idle(self) -> bool {
        self == Dice::Idle
    }

    pub fn is_rolling(self) -> bool {
        self == Dice::Rolling
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    pub player_id: PlayerId,
    pub token_id: TokenId,
    pub roll: u8,
    pub from_steps: i8,
    pub to_steps: i8,
    pub captured: Vec<TokenId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    pub players: Vec<Player>,
    pub tokens: Vec<Token>,
    pub current_player: usize,
    pub dice: Dice,
    pub roll_history: Vec<u8>,
    pub six_streak: u8,
    pub status: Status,
    /// Players in the order they brought all four tokens home.
    pub ranking: Vec<PlayerId>,
    pub last_move: Option<LastMove>,
    /// Single-slot undo buffer; the stored snapshot never holds its own.
    pub previous: Option<Box<GameState>>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::build(MIN_PLAYERS, PlayMode::Ai)
    }
}

impl GameState {
    pub fn new(player_count: usize, mode: PlayMode) -> Result<Self, EngineError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_count) {
            return Err(EngineError::InvalidPlayerCount(player_count));
        }
        Ok(Self::build(player_count, mode))
    }

    fn build(player_count: usize, mode: PlayMode) -> Self {
        let players = (0..player_count)
            .map(|idx| Player {
                id: idx as PlayerId,
                name: PLAYER_NAMES[idx].to_string(),
                color: PLAYER_COLORS[idx].to_string(),
                avatar: AVATARS[idx % AVATARS.len()].to_string(),
                is_ai: mode == PlayMode::Ai && idx != 0,
            })
            .collect();
        let tokens = (0..player_count as PlayerId)
            .flat_map(|player| (0..TOKENS_PER_PLAYER).map(move |index| Token::new(player, index)))
            .collect();
        Self {
            players,
            tokens,
            current_player: 0,
            dice: Dice::Idle,
            roll_history: Vec::new(),
            six_streak: 0,
            status: Status::Playing,
            ranking: Vec::new(),
            last_move: None,
            previous: None,
        }
    }

    pub fn active(&self) -> bool {
        self.status == Status::Playing
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn current(&self) -> &Player {
        &self.players[self.current_player]
    }

    pub fn current_player_id(&self) -> PlayerId {
        self.current().id
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    pub fn tokens_of(&self, player: PlayerId) -> impl Iterator<Item = &Token> + '_ {
        self.tokens.iter().filter(move |t| t.player_id == player)
    }

    pub fn can_undo(&self) -> bool {
        self.previous.is_some()
    }

    /// Rename a player and/or change their avatar. Game progress is untouched.
    pub fn with_player_profile(
        &self,
        player_id: PlayerId,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<GameState, EngineError> {
        let mut next = self.clone();
        let player = next
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or(EngineError::UnknownPlayer(player_id))?;
        if let Some(name) = name {
            let name = name.trim();
            let len = name.chars().count();
            if len == 0 || len > MAX_NAME_LEN {
                return Err(EngineError::InvalidProfile(format!(
                    "name must be 1-{MAX_NAME_LEN} characters"
                )));
            }
            player.name = name.to_string();
        }
        if let Some(avatar) = avatar {
            if !AVATARS.contains(&avatar) {
                return Err(EngineError::InvalidProfile(format!("unknown avatar {avatar}")));
            }
            player.avatar = avatar.to_string();
        }
        Ok(next)
    }
}
