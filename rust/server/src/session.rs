//! Synchronous match orchestration over the engine's turn machine.
//!
//! A [`MatchSession`] is owned by exactly one actor task; every method takes
//! `&mut self` and either commits a new engine state or leaves it untouched.

use ai::{build_request, first_legal, AiError, ChooseRequest};
use engine::{
    position, ranking_snapshot, serialize_state, EngineError, GameState, MoveResult, PlayerId,
    Position, RollOutcome, Snapshot, Standing, Status, TokenId, TurnError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MatchSettings;
use crate::store::MatchRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("it is an AI player's turn")]
    AiTurn,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("match is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub token_id: TokenId,
    pub position: Position,
}

/// Everything a client needs to render a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchView {
    pub id: String,
    pub settings: MatchSettings,
    pub state: Snapshot,
    pub legal_moves: Vec<TokenId>,
    pub standings: Vec<Standing>,
    pub positions: Vec<TokenPosition>,
    /// What the match is waiting on (`"roll"`, `"ai_think"`, ...), if anything.
    pub pending: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayOutcome {
    pub result: MoveResult,
    /// Set when this move ended the match.
    pub completed: Option<MatchRecord>,
}

#[derive(Debug, Clone)]
pub struct MatchSession {
    id: String,
    settings: MatchSettings,
    state: GameState,
}

impl MatchSession {
    pub fn new(id: impl Into<String>, settings: MatchSettings) -> Result<Self, SessionError> {
        let state = settings
            .build_state()
            .map_err(|err| SessionError::InvalidSettings(err.to_string()))?;
        Ok(Self::from_state(id, settings, state))
    }

    pub fn from_state(id: impl Into<String>, settings: MatchSettings, state: GameState) -> Self {
        Self {
            id: id.into(),
            settings,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> MatchSettings {
        self.settings
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn view(&self) -> MatchView {
        MatchView {
            id: self.id.clone(),
            settings: self.settings,
            state: serialize_state(&self.state),
            legal_moves: self.state.legal_moves_now(),
            standings: ranking_snapshot(&self.state.players, &self.state.tokens),
            positions: self
                .state
                .tokens
                .iter()
                .map(|t| TokenPosition {
                    token_id: t.id,
                    position: position(t),
                })
                .collect(),
            pending: None,
        }
    }

    pub fn is_ai_turn(&self) -> bool {
        self.state.active() && self.state.current().is_ai
    }

    /// Rejects externally driven turn actions while an AI player is to move.
    pub fn require_human(&self) -> Result<(), SessionError> {
        if self.is_ai_turn() {
            Err(SessionError::AiTurn)
        } else {
            Ok(())
        }
    }

    pub fn begin_roll(&mut self) -> Result<(), SessionError> {
        self.state = self.state.begin_roll()?;
        debug!(match_id = %self.id, player = self.state.current_player_id(), "rolling");
        Ok(())
    }

    pub fn resolve_roll(&mut self, value: u8) -> Result<RollOutcome, SessionError> {
        let (next, outcome) = self.state.resolve_roll(value)?;
        self.state = next;
        match &outcome {
            RollOutcome::Rolled { value, movable } => {
                info!(match_id = %self.id, value, movable = movable.len(), "rolled");
            }
            RollOutcome::Forfeited { player_id } => {
                info!(match_id = %self.id, player_id, "third six, turn forfeited");
            }
        }
        Ok(outcome)
    }

    pub fn play(&mut self, token_id: TokenId) -> Result<PlayOutcome, SessionError> {
        let was_over = self.state.status == Status::Gameover;
        let (next, result) = self.state.move_token(token_id)?;
        self.state = next;
        info!(match_id = %self.id, token = %token_id, captured = result.captured.len(), "moved");
        for captured in &result.captured {
            info!(match_id = %self.id, token = %captured, "captured");
        }

        let completed = if !was_over && self.state.status == Status::Gameover {
            info!(match_id = %self.id, ranking = ?self.state.ranking, "game over");
            Some(MatchRecord::from_state(&self.id, &self.state))
        } else {
            None
        };
        Ok(PlayOutcome { result, completed })
    }

    pub fn skip(&mut self) -> Result<(), SessionError> {
        let skipped = self.state.current_player_id();
        self.state = self.state.skip_turn()?;
        info!(match_id = %self.id, player_id = skipped, "no legal move, turn skipped");
        Ok(())
    }

    pub fn undo(&mut self) -> Result<(), SessionError> {
        self.state = self.state.undo()?;
        info!(match_id = %self.id, "undo");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.state = self.state.pause()?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.state = self.state.resume()?;
        Ok(())
    }

    /// Fresh game from `settings`, or from the current settings when `None`.
    pub fn restart(&mut self, settings: Option<MatchSettings>) -> Result<(), SessionError> {
        let settings = settings.unwrap_or(self.settings);
        let state = settings
            .build_state()
            .map_err(|err| SessionError::InvalidSettings(err.to_string()))?;
        self.settings = settings;
        self.state = state;
        info!(match_id = %self.id, players = settings.player_count, "restarted");
        Ok(())
    }

    pub fn update_player(
        &mut self,
        player_id: PlayerId,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<(), SessionError> {
        self.state = self.state.with_player_profile(player_id, name, avatar)?;
        Ok(())
    }

    /// Scoring request for the AI player to move, once its roll is resolved.
    pub fn ai_request(&self) -> Option<ChooseRequest> {
        if !self.is_ai_turn() {
            return None;
        }
        let roll = self.state.dice.value()?;
        Some(build_request(&self.state, roll, self.settings.ai_difficulty))
    }

    /// Turn a chooser answer into a playable token, falling back to the first legal one.
    pub fn resolve_choice(&self, choice: Result<Option<TokenId>, AiError>) -> Option<TokenId> {
        let roll = self.state.dice.value()?;
        let player = self.state.current_player_id();
        let legal = self.state.legal_moves_now();
        let fallback = first_legal(&self.state, player, roll);
        match choice {
            Ok(Some(token)) if legal.contains(&token) => Some(token),
            Ok(Some(token)) => {
                warn!(match_id = %self.id, token = %token, "chooser picked an illegal token");
                fallback
            }
            Ok(None) => {
                if fallback.is_some() {
                    warn!(match_id = %self.id, "chooser returned no token");
                }
                fallback
            }
            Err(err) => {
                warn!(match_id = %self.id, %err, "chooser failed");
                fallback
            }
        }
    }
}
