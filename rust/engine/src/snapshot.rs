use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::board::{FINAL_STEP, MAX_PLAYERS, MIN_PLAYERS, PEN_STEPS, TOKENS_PER_PLAYER};
use crate::turn::{MAX_SIX_STREAK, ROLL_HISTORY_LEN};
use crate::{Dice, EngineError, GameState, LastMove, Player, PlayerId, Status, Token};

// --- Serialization ---

/// Wire form of a [`GameState`]. The undo buffer stays server-side; only its presence travels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub players: Vec<Player>,
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub current_player: usize,
    #[serde(default)]
    pub dice: Dice,
    #[serde(default)]
    pub roll_history: Vec<u8>,
    #[serde(default)]
    pub six_streak: u8,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub ranking: Vec<PlayerId>,
    #[serde(default)]
    pub last_move: Option<LastMove>,
    #[serde(default)]
    pub can_undo: bool,
}

pub fn serialize_state(state: &GameState) -> Snapshot {
    Snapshot {
        players: state.players.clone(),
        tokens: state.tokens.clone(),
        current_player: state.current_player,
        dice: state.dice,
        roll_history: state.roll_history.clone(),
        six_streak: state.six_streak,
        status: state.status,
        ranking: state.ranking.clone(),
        last_move: state.last_move.clone(),
        can_undo: state.can_undo(),
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidSnapshot(msg.into())
}

fn valid_die(value: u8) -> bool {
    (1..=6).contains(&value)
}

pub fn deserialize_state(payload: &Snapshot) -> Result<GameState, EngineError> {
    let count = payload.players.len();
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
        return Err(EngineError::InvalidPlayerCount(count));
    }
    for (idx, player) in payload.players.iter().enumerate() {
        if player.id as usize != idx {
            return Err(invalid(format!("player at seat {idx} has id {}", player.id)));
        }
    }

    let expected = count * TOKENS_PER_PLAYER as usize;
    if payload.tokens.len() != expected {
        return Err(invalid(format!(
            "expected {expected} tokens, got {}",
            payload.tokens.len()
        )));
    }
    let mut seen = HashSet::new();
    for token in &payload.tokens {
        if token.id.player() != token.player_id || token.id.index() != token.index {
            return Err(invalid(format!("{} does not match its owner or index", token.id)));
        }
        if token.player_id as usize >= count {
            return Err(EngineError::UnknownPlayer(token.player_id));
        }
        if !(PEN_STEPS..=FINAL_STEP).contains(&token.steps) {
            return Err(invalid(format!("{} has steps {}", token.id, token.steps)));
        }
        if !seen.insert(token.id) {
            return Err(invalid(format!("duplicate {}", token.id)));
        }
    }
    let mut tokens = payload.tokens.clone();
    tokens.sort_by_key(|t| t.id);

    if payload.current_player >= count {
        return Err(invalid(format!(
            "current player {} out of range",
            payload.current_player
        )));
    }
    if let Some(value) = payload.dice.value() {
        if !valid_die(value) {
            return Err(EngineError::InvalidRoll(value));
        }
    }
    if payload.roll_history.len() > ROLL_HISTORY_LEN {
        return Err(invalid("roll history too long"));
    }
    if let Some(bad) = payload.roll_history.iter().copied().find(|v| !valid_die(*v)) {
        return Err(EngineError::InvalidRoll(bad));
    }
    if payload.six_streak >= MAX_SIX_STREAK {
        return Err(invalid(format!("six streak {}", payload.six_streak)));
    }
    let mut ranked = HashSet::new();
    for player in &payload.ranking {
        if *player as usize >= count || !ranked.insert(*player) {
            return Err(invalid(format!("bad ranking entry {player}")));
        }
    }

    Ok(GameState {
        players: payload.players.clone(),
        tokens,
        current_player: payload.current_player,
        dice: payload.dice,
        roll_history: payload.roll_history.clone(),
        six_streak: payload.six_streak,
        status: payload.status,
        ranking: payload.ranking.clone(),
        last_move: payload.last_move.clone(),
        previous: None,
    })
}
