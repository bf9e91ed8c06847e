//! Turn state machine: dice phases, six streaks, turn rotation, pause and undo.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::{has_finished_all, legal_moves_for, try_apply_move, MoveResult};
use crate::{Dice, EngineError, GameState, LastMove, PlayerId, Status, TokenId};

/// Most recent rolls kept for display.
pub const ROLL_HISTORY_LEN: usize = 3;
/// Consecutive sixes that forfeit the turn.
pub const MAX_SIX_STREAK: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("game is not in progress")]
    NotPlaying,
    #[error("game is not paused")]
    NotPaused,
    #[error("a roll is already pending")]
    RollPending,
    #[error("no roll is in progress")]
    NotRolling,
    #[error("roll the dice first")]
    NoDiceValue,
    #[error("{0} does not belong to the current player")]
    NotYourToken(TokenId),
    #[error("illegal move: {0}")]
    IllegalMove(#[from] EngineError),
    #[error("a legal move is available")]
    MoveAvailable,
    #[error("nothing to undo")]
    UndoUnavailable,
    #[error("cannot undo while a roll is pending")]
    UndoWhileDicePending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollOutcome {
    Rolled { value: u8, movable: Vec<TokenId> },
    /// Third six in a row; the turn passed without a move.
    Forfeited { player_id: PlayerId },
}

pub fn roll_die<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.gen_range(1..=6)
}

impl GameState {
    /// Tokens the current player may move with the resolved dice value.
    pub fn legal_moves_now(&self) -> Vec<TokenId> {
        match self.dice.value() {
            Some(roll) if self.active() => legal_moves_for(self, self.current_player_id(), roll),
            _ => Vec::new(),
        }
    }

    pub fn begin_roll(&self) -> Result<GameState, TurnError> {
        self.require_playing()?;
        if !self.dice.is_idle() {
            return Err(TurnError::RollPending);
        }
        let mut next = self.clone();
        next.dice = Dice::Rolling;
        Ok(next)
    }

    pub fn resolve_roll(&self, value: u8) -> Result<(GameState, RollOutcome), TurnError> {
        self.require_playing()?;
        if !self.dice.is_rolling() {
            return Err(TurnError::NotRolling);
        }
        if !(1..=6).contains(&value) {
            return Err(EngineError::InvalidRoll(value).into());
        }

        let mut next = self.clone();
        next.roll_history.push(value);
        if next.roll_history.len() > ROLL_HISTORY_LEN {
            let excess = next.roll_history.len() - ROLL_HISTORY_LEN;
            next.roll_history.drain(..excess);
        }
        next.six_streak = if value == 6 { next.six_streak + 1 } else { 0 };

        if next.six_streak >= MAX_SIX_STREAK {
            let player_id = next.current_player_id();
            next.dice = Dice::Idle;
            next.six_streak = 0;
            next.advance_turn();
            return Ok((next, RollOutcome::Forfeited { player_id }));
        }

        next.dice = Dice::Resolved(value);
        let movable = next.legal_moves_now();
        Ok((next, RollOutcome::Rolled { value, movable }))
    }

    /// Begin and resolve a roll in one step.
    pub fn roll_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(GameState, RollOutcome), TurnError> {
        self.begin_roll()?.resolve_roll(roll_die(rng))
    }

    pub fn move_token(&self, token_id: TokenId) -> Result<(GameState, MoveResult), TurnError> {
        self.require_playing()?;
        let roll = self.dice.value().ok_or(TurnError::NoDiceValue)?;
        let mover = self.current_player_id();
        let from_steps = match self.token(token_id) {
            Some(token) if token.player_id == mover => token.steps,
            _ => return Err(TurnError::NotYourToken(token_id)),
        };

        let (mut next, mut result) = try_apply_move(self, token_id, roll)?;

        let mut snapshot = self.clone();
        snapshot.previous = None;
        next.previous = Some(Box::new(snapshot));
        next.dice = Dice::Idle;
        next.last_move = Some(LastMove {
            player_id: mover,
            token_id,
            roll,
            from_steps,
            to_steps: next.token(token_id).map_or(from_steps, |t| t.steps),
            captured: result.captured.clone(),
        });

        if has_finished_all(&next.tokens, mover) && !next.ranking.contains(&mover) {
            next.ranking.push(mover);
            if next.ranking.len() == next.player_count() {
                next.status = Status::Gameover;
                return Ok((next, result));
            }
            // A ranked player has nothing left to move, so a closing six passes the turn.
            result.extra_turn = false;
        }

        if !result.extra_turn {
            next.six_streak = 0;
            next.advance_turn();
        }
        Ok((next, result))
    }

    /// Pass the turn when the resolved roll leaves nothing to move.
    pub fn skip_turn(&self) -> Result<GameState, TurnError> {
        self.require_playing()?;
        if self.dice.value().is_none() {
            return Err(TurnError::NoDiceValue);
        }
        if !self.legal_moves_now().is_empty() {
            return Err(TurnError::MoveAvailable);
        }
        let mut next = self.clone();
        next.dice = Dice::Idle;
        next.six_streak = 0;
        next.advance_turn();
        Ok(next)
    }

    pub fn pause(&self) -> Result<GameState, TurnError> {
        self.require_playing()?;
        let mut next = self.clone();
        next.status = Status::Paused;
        Ok(next)
    }

    pub fn resume(&self) -> Result<GameState, TurnError> {
        if self.status != Status::Paused {
            return Err(TurnError::NotPaused);
        }
        let mut next = self.clone();
        next.status = Status::Playing;
        Ok(next)
    }

    pub fn toggle_pause(&self) -> Result<GameState, TurnError> {
        match self.status {
            Status::Paused => self.resume(),
            _ => self.pause(),
        }
    }

    /// Restore the state captured before the last move.
    pub fn undo(&self) -> Result<GameState, TurnError> {
        self.require_playing()?;
        if !self.dice.is_idle() {
            return Err(TurnError::UndoWhileDicePending);
        }
        self.previous
            .as_deref()
            .cloned()
            .ok_or(TurnError::UndoUnavailable)
    }

    fn require_playing(&self) -> Result<(), TurnError> {
        if self.active() {
            Ok(())
        } else {
            Err(TurnError::NotPlaying)
        }
    }

    // Players who already brought every token home are passed over.
    fn advance_turn(&mut self) {
        let count = self.player_count();
        for step in 1..=count {
            let candidate = (self.current_player + step) % count;
            if !self.ranking.contains(&self.players[candidate].id) {
                self.current_player = candidate;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{FINAL_STEP, PEN_STEPS};
    use crate::PlayMode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rolled(state: &GameState, value: u8) -> GameState {
        state.begin_roll().unwrap().resolve_roll(value).unwrap().0
    }

    fn place(state: &mut GameState, id: TokenId, steps: i8) {
        state.tokens.iter_mut().find(|t| t.id == id).unwrap().steps = steps;
    }

    fn pass_game(players: usize) -> GameState {
        GameState::new(players, PlayMode::Pass).unwrap()
    }

    #[test]
    fn roll_die_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            assert!((1..=6).contains(&roll_die(&mut rng)));
        }
    }

    #[test]
    fn roll_requires_idle_dice() {
        let state = pass_game(2).begin_roll().unwrap();
        assert_eq!(state.dice, Dice::Rolling);
        assert_eq!(state.begin_roll(), Err(TurnError::RollPending));
        let resolved = state.resolve_roll(4).unwrap().0;
        assert_eq!(resolved.begin_roll(), Err(TurnError::RollPending));
        assert_eq!(
            pass_game(2).resolve_roll(4).unwrap_err(),
            TurnError::NotRolling
        );
    }

    #[test]
    fn resolve_rejects_out_of_range_value() {
        let state = pass_game(2).begin_roll().unwrap();
        assert_eq!(
            state.resolve_roll(0).unwrap_err(),
            TurnError::IllegalMove(EngineError::InvalidRoll(0))
        );
    }

    #[test]
    fn roll_with_resolves_in_one_step() {
        let mut rng = StdRng::seed_from_u64(11);
        let (state, outcome) = pass_game(2).roll_with(&mut rng).unwrap();
        let value = state.dice.value().unwrap();
        assert_eq!(state.roll_history, vec![value]);
        assert!(matches!(outcome, RollOutcome::Rolled { value: v, .. } if v == value));
    }

    #[test]
    fn roll_reports_movable_tokens() {
        let (_, outcome) = pass_game(2).begin_roll().unwrap().resolve_roll(6).unwrap();
        assert_eq!(
            outcome,
            RollOutcome::Rolled {
                value: 6,
                movable: vec![TokenId(0), TokenId(1), TokenId(2), TokenId(3)],
            }
        );
    }

    #[test]
    fn history_keeps_last_three_rolls() {
        let mut state = pass_game(2);
        for value in [1, 2, 3, 4] {
            state = rolled(&state, value);
            state = state.skip_turn().unwrap();
        }
        assert_eq!(state.roll_history, vec![2, 3, 4]);
    }

    #[test]
    fn third_six_forfeits_turn() {
        let mut state = pass_game(2);
        place(&mut state, TokenId(0), 10);
        state = rolled(&state, 6);
        state = state.move_token(TokenId(0)).unwrap().0;
        state = rolled(&state, 6);
        state = state.move_token(TokenId(0)).unwrap().0;
        assert_eq!(state.six_streak, 2);
        assert_eq!(state.current_player, 0);

        let (state, outcome) = state.begin_roll().unwrap().resolve_roll(6).unwrap();
        assert_eq!(outcome, RollOutcome::Forfeited { player_id: 0 });
        assert_eq!(state.current_player, 1);
        assert_eq!(state.dice, Dice::Idle);
        assert_eq!(state.six_streak, 0);
        assert_eq!(state.roll_history, vec![6, 6, 6]);
        assert_eq!(state.token(TokenId(0)).unwrap().steps, 22);
    }

    #[test]
    fn non_six_resets_streak() {
        let mut state = pass_game(2);
        place(&mut state, TokenId(0), 10);
        state = rolled(&state, 6);
        state = state.move_token(TokenId(0)).unwrap().0;
        assert_eq!(state.six_streak, 1);
        state = rolled(&state, 2);
        assert_eq!(state.six_streak, 0);
    }

    #[test]
    fn scenario_roll_three_with_all_in_pen_skips() {
        let state = rolled(&pass_game(2), 3);
        assert!(state.legal_moves_now().is_empty());
        let next = state.skip_turn().unwrap();
        assert_eq!(next.current_player, 1);
        assert_eq!(next.dice, Dice::Idle);
    }

    #[test]
    fn skip_refused_when_move_available() {
        let state = rolled(&pass_game(2), 6);
        assert_eq!(state.skip_turn(), Err(TurnError::MoveAvailable));
        assert_eq!(pass_game(2).skip_turn(), Err(TurnError::NoDiceValue));
    }

    #[test]
    fn six_grants_extra_turn() {
        let state = rolled(&pass_game(2), 6);
        let (next, result) = state.move_token(TokenId(0)).unwrap();
        assert!(result.extra_turn);
        assert_eq!(next.current_player, 0);
        assert_eq!(next.dice, Dice::Idle);
        assert_eq!(next.token(TokenId(0)).unwrap().steps, 0);
    }

    #[test]
    fn move_rejects_wrong_owner_and_missing_roll() {
        let mut state = pass_game(2);
        place(&mut state, TokenId(0), 4);
        assert_eq!(state.move_token(TokenId(0)), Err(TurnError::NoDiceValue));
        let state = rolled(&state, 2);
        assert_eq!(
            state.move_token(TokenId(4)),
            Err(TurnError::NotYourToken(TokenId(4)))
        );
        assert_eq!(
            state.move_token(TokenId(1)),
            Err(TurnError::IllegalMove(EngineError::PenRequiresSix))
        );
    }

    #[test]
    fn move_records_last_move_and_capture() {
        let mut state = pass_game(2);
        place(&mut state, TokenId(0), 3);
        place(&mut state, TokenId(4), 45);
        let state = rolled(&state, 3);
        let (next, result) = state.move_token(TokenId(0)).unwrap();
        assert_eq!(result.captured, vec![TokenId(4)]);
        assert_eq!(next.current_player, 1);
        assert_eq!(
            next.last_move,
            Some(LastMove {
                player_id: 0,
                token_id: TokenId(0),
                roll: 3,
                from_steps: 3,
                to_steps: 6,
                captured: vec![TokenId(4)],
            })
        );
        assert_eq!(next.token(TokenId(4)).unwrap().steps, PEN_STEPS);
    }

    #[test]
    fn undo_restores_pre_move_state() {
        let state = rolled(&pass_game(2), 6);
        let (moved, _) = state.move_token(TokenId(0)).unwrap();
        assert!(moved.can_undo());
        let restored = moved.undo().unwrap();
        assert_eq!(restored, state);
        assert!(!restored.can_undo());
        assert_eq!(restored.undo(), Err(TurnError::UndoWhileDicePending));
    }

    #[test]
    fn undo_is_single_level() {
        let state = rolled(&pass_game(2), 6);
        let (first, _) = state.move_token(TokenId(0)).unwrap();
        let (second, _) = rolled(&first, 6).move_token(TokenId(1)).unwrap();
        let restored = second.undo().unwrap();
        assert_eq!(restored.dice, Dice::Resolved(6));
        assert!(restored.previous.is_none());
    }

    #[test]
    fn undo_needs_a_snapshot_and_idle_dice() {
        assert_eq!(pass_game(2).undo(), Err(TurnError::UndoUnavailable));
        let state = rolled(&pass_game(2), 6);
        let (moved, _) = state.move_token(TokenId(0)).unwrap();
        let rolling = moved.begin_roll().unwrap();
        assert_eq!(rolling.undo(), Err(TurnError::UndoWhileDicePending));
    }

    #[test]
    fn rolls_and_skips_carry_the_snapshot_forward() {
        let mut state = pass_game(2);
        place(&mut state, TokenId(0), 10);
        let before = rolled(&state, 2);
        let (moved, _) = before.move_token(TokenId(0)).unwrap();
        assert_eq!(moved.current_player, 1);

        let skipped = rolled(&moved, 3).skip_turn().unwrap();
        assert!(skipped.can_undo());
        assert_eq!(skipped.undo().unwrap(), before);
    }

    #[test]
    fn pause_blocks_actions_until_resume() {
        let paused = pass_game(2).pause().unwrap();
        assert_eq!(paused.status, Status::Paused);
        assert_eq!(paused.begin_roll(), Err(TurnError::NotPlaying));
        assert_eq!(paused.pause(), Err(TurnError::NotPlaying));
        let resumed = paused.toggle_pause().unwrap();
        assert_eq!(resumed.status, Status::Playing);
        assert_eq!(resumed.resume(), Err(TurnError::NotPaused));
        assert_eq!(resumed.toggle_pause().unwrap().status, Status::Paused);
    }

    #[test]
    fn finishing_all_tokens_ranks_player_and_ends_two_player_game() {
        let mut state = pass_game(2);
        for (index, steps) in [(0, FINAL_STEP), (1, FINAL_STEP), (2, FINAL_STEP), (3, 55)] {
            place(&mut state, TokenId(index), steps);
        }
        place(&mut state, TokenId(4), 20);
        let state = rolled(&state, 2);
        let (next, result) = state.move_token(TokenId(3)).unwrap();
        assert!(result.finished);
        assert_eq!(next.ranking, vec![0]);
        assert_eq!(next.status, Status::Playing);
        assert_eq!(next.current_player, 1);

        let mut last = next;
        for index in 4..8 {
            place(&mut last, TokenId(index), FINAL_STEP);
        }
        place(&mut last, TokenId(7), 56);
        let (done, _) = rolled(&last, 1).move_token(TokenId(7)).unwrap();
        assert_eq!(done.ranking, vec![0, 1]);
        assert_eq!(done.status, Status::Gameover);
        assert_eq!(done.begin_roll(), Err(TurnError::NotPlaying));
        assert_eq!(done.pause(), Err(TurnError::NotPlaying));
        assert_eq!(done.undo(), Err(TurnError::NotPlaying));
    }

    #[test]
    fn finished_players_are_passed_over() {
        let mut state = pass_game(3);
        for index in 4..8 {
            place(&mut state, TokenId(index), FINAL_STEP);
        }
        state.ranking.push(1);

        let after_skip = rolled(&state, 3).skip_turn().unwrap();
        assert_eq!(after_skip.current_player, 2);

        place(&mut state, TokenId(0), 10);
        let (after_move, _) = rolled(&state, 2).move_token(TokenId(0)).unwrap();
        assert_eq!(after_move.current_player, 2);

        let mut forfeit = state.clone();
        forfeit.six_streak = 2;
        let (after_forfeit, outcome) = forfeit.begin_roll().unwrap().resolve_roll(6).unwrap();
        assert_eq!(outcome, RollOutcome::Forfeited { player_id: 0 });
        assert_eq!(after_forfeit.current_player, 2);

        let mut wrap = state;
        wrap.current_player = 2;
        let next = rolled(&wrap, 3).skip_turn().unwrap();
        assert_eq!(next.current_player, 0);
    }

    #[test]
    fn closing_six_passes_the_turn_once_ranked() {
        let mut state = pass_game(3);
        for index in 0..3 {
            place(&mut state, TokenId(index), FINAL_STEP);
        }
        place(&mut state, TokenId(3), 51);
        place(&mut state, TokenId(4), 20);
        let state = rolled(&state, 6);
        let (next, result) = state.move_token(TokenId(3)).unwrap();
        assert!(result.finished);
        assert!(!result.extra_turn);
        assert_eq!(next.ranking, vec![0]);
        assert_eq!(next.status, Status::Playing);
        assert_eq!(next.current_player, 1);
        assert_eq!(next.six_streak, 0);
        assert_eq!(next.dice, Dice::Idle);
    }

    #[test]
    fn six_without_a_legal_move_still_passes_the_turn() {
        let mut state = pass_game(2);
        for index in 0..4 {
            place(&mut state, TokenId(index), 54);
        }
        let state = rolled(&state, 6);
        assert_eq!(state.six_streak, 1);
        assert!(state.legal_moves_now().is_empty());
        let next = state.skip_turn().unwrap();
        assert_eq!(next.current_player, 1);
        assert_eq!(next.dice, Dice::Idle);
        assert_eq!(next.six_streak, 0);
    }
}
