//! Pure move rules: legality, move application, capture resolution and standings.

use serde::{Deserialize, Serialize};

use crate::board::{global_index, is_safe_cell, FINAL_STEP, PEN_STEPS};
use crate::{EngineError, GameState, Player, PlayerId, Token, TokenId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResult {
    pub captured: Vec<TokenId>,
    pub finished: bool,
    pub extra_turn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: PlayerId,
    pub finished: usize,
}

/// Step counter `token` would reach with `roll`, or why it cannot move.
pub fn check_move(token: &Token, roll: u8) -> Result<i8, EngineError> {
    if !(1..=6).contains(&roll) {
        return Err(EngineError::InvalidRoll(roll));
    }
    if token.in_pen() {
        return if roll == 6 {
            Ok(0)
        } else {
            Err(EngineError::PenRequiresSix)
        };
    }
    if token.steps >= FINAL_STEP {
        return Err(EngineError::AlreadyFinished);
    }
    let target = token.steps + roll as i8;
    if target > FINAL_STEP {
        return Err(EngineError::Overshoot);
    }
    Ok(target)
}

pub fn landing_steps(token: &Token, roll: u8) -> Option<i8> {
    check_move(token, roll).ok()
}

pub fn is_legal_move(token: &Token, roll: u8) -> bool {
    check_move(token, roll).is_ok()
}

/// Movable tokens among `tokens`, in their original order.
pub fn legal_moves(tokens: &[Token], roll: u8) -> Vec<TokenId> {
    tokens
        .iter()
        .filter(|t| is_legal_move(t, roll))
        .map(|t| t.id)
        .collect()
}

pub fn legal_moves_for(state: &GameState, player: PlayerId, roll: u8) -> Vec<TokenId> {
    state
        .tokens_of(player)
        .filter(|t| is_legal_move(t, roll))
        .map(|t| t.id)
        .collect()
}

/// Opposing tokens a `mover` token landing on `cell` would send home.
pub fn capture_targets(tokens: &[Token], mover: PlayerId, cell: u8) -> Vec<TokenId> {
    if is_safe_cell(cell) {
        return Vec::new();
    }
    tokens
        .iter()
        .filter(|t| t.player_id != mover && t.global_index() == Some(cell))
        .map(|t| t.id)
        .collect()
}

pub fn try_apply_move(
    state: &GameState,
    token_id: TokenId,
    roll: u8,
) -> Result<(GameState, MoveResult), EngineError> {
    let token = *state
        .token(token_id)
        .ok_or(EngineError::UnknownToken(token_id))?;
    let new_steps = check_move(&token, roll)?;

    let captured = global_index(new_steps, token.player_id)
        .map(|cell| capture_targets(&state.tokens, token.player_id, cell))
        .unwrap_or_default();

    let mut next = state.clone();
    for other in next.tokens.iter_mut() {
        if other.id == token_id {
            other.steps = new_steps;
        } else if captured.contains(&other.id) {
            other.steps = PEN_STEPS;
        }
    }

    let result = MoveResult {
        captured,
        finished: new_steps == FINAL_STEP,
        extra_turn: roll == 6,
    };
    Ok((next, result))
}

/// Like [`try_apply_move`], but a refused move yields the unchanged state and an empty result.
pub fn apply_move(state: &GameState, token_id: TokenId, roll: u8) -> (GameState, MoveResult) {
    try_apply_move(state, token_id, roll)
        .unwrap_or_else(|_| (state.clone(), MoveResult::default()))
}

pub fn has_finished_all(tokens: &[Token], player: PlayerId) -> bool {
    let mut owned = tokens.iter().filter(|t| t.player_id == player).peekable();
    owned.peek().is_some() && owned.all(Token::is_finished)
}

/// Finished-token counts per player, most advanced first.
pub fn ranking_snapshot(players: &[Player], tokens: &[Token]) -> Vec<Standing> {
    let mut standings: Vec<Standing> = players
        .iter()
        .map(|player| Standing {
            player_id: player.id,
            finished: tokens
                .iter()
                .filter(|t| t.player_id == player.id && t.is_finished())
                .count(),
        })
        .collect();
    standings.sort_by(|a, b| b.finished.cmp(&a.finished));
    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{SAFE_CELLS, TRACK_LENGTH};
    use crate::PlayMode;
    use proptest::prelude::*;

    fn state_with(player_count: usize, placements: &[(TokenId, i8)]) -> GameState {
        let mut state = GameState::new(player_count, PlayMode::Pass).unwrap();
        for (id, steps) in placements {
            state.tokens.iter_mut().find(|t| t.id == *id).unwrap().steps = *steps;
        }
        state
    }

    fn steps_of(state: &GameState, id: TokenId) -> i8 {
        state.token(id).unwrap().steps
    }

    #[test]
    fn pen_token_needs_six() {
        let token = Token::new(0, 0);
        for roll in 1..=5 {
            assert!(!is_legal_move(&token, roll));
        }
        assert!(is_legal_move(&token, 6));
    }

    #[test]
    fn overshoot_and_finished_tokens_cannot_move() {
        let mut token = Token::new(0, 0);
        token.steps = 55;
        assert!(is_legal_move(&token, 2));
        assert!(!is_legal_move(&token, 3));
        token.steps = FINAL_STEP;
        for roll in 1..=6 {
            assert_eq!(check_move(&token, roll), Err(EngineError::AlreadyFinished));
        }
    }

    #[test]
    fn out_of_range_rolls_are_illegal() {
        let mut token = Token::new(0, 0);
        token.steps = 10;
        assert_eq!(check_move(&token, 0), Err(EngineError::InvalidRoll(0)));
        assert_eq!(check_move(&token, 7), Err(EngineError::InvalidRoll(7)));
    }

    #[test]
    fn legal_moves_keeps_token_order() {
        let state = state_with(2, &[(TokenId(1), 10), (TokenId(3), 56)]);
        let own: Vec<Token> = state.tokens_of(0).copied().collect();
        assert_eq!(legal_moves(&own, 6), vec![TokenId(0), TokenId(1), TokenId(2)]);
        assert_eq!(legal_moves(&own, 1), vec![TokenId(1), TokenId(3)]);
        assert_eq!(legal_moves_for(&state, 0, 2), vec![TokenId(1)]);
    }

    #[test]
    fn entering_from_pen_lands_on_step_zero() {
        let state = GameState::default();
        let (next, result) = apply_move(&state, TokenId(0), 6);
        assert_eq!(steps_of(&next, TokenId(0)), 0);
        assert!(result.extra_turn);
        assert!(result.captured.is_empty());
    }

    #[test]
    fn capture_on_open_cell() {
        // Player 1 at steps 45 sits on global cell (13 + 45) % 52 = 6.
        let state = state_with(2, &[(TokenId(0), 3), (TokenId(4), 45)]);
        assert_eq!(state.token(TokenId(4)).unwrap().global_index(), Some(6));
        let (next, result) = apply_move(&state, TokenId(0), 3);
        assert_eq!(steps_of(&next, TokenId(0)), 6);
        assert_eq!(steps_of(&next, TokenId(4)), PEN_STEPS);
        assert_eq!(result.captured, vec![TokenId(4)]);
        assert!(!result.extra_turn);
    }

    #[test]
    fn multiple_opponents_captured_together() {
        // Cell 30: player 1 at steps 17, player 2 at steps 4.
        let state = state_with(
            3,
            &[(TokenId(0), 27), (TokenId(4), 17), (TokenId(5), 17), (TokenId(8), 4)],
        );
        let (next, result) = apply_move(&state, TokenId(0), 3);
        assert_eq!(result.captured, vec![TokenId(4), TokenId(5), TokenId(8)]);
        for id in [TokenId(4), TokenId(5), TokenId(8)] {
            assert_eq!(steps_of(&next, id), PEN_STEPS);
        }
    }

    #[test]
    fn own_tokens_stack_without_capture() {
        let state = state_with(2, &[(TokenId(0), 3), (TokenId(1), 6)]);
        let (next, result) = apply_move(&state, TokenId(0), 3);
        assert!(result.captured.is_empty());
        assert_eq!(steps_of(&next, TokenId(1)), 6);
    }

    #[test]
    fn safe_cell_protects_occupant() {
        // Cell 8 is a star cell; player 1 reaches it at steps 47.
        let state = state_with(2, &[(TokenId(0), 5), (TokenId(4), 47)]);
        let (next, result) = apply_move(&state, TokenId(0), 3);
        assert!(result.captured.is_empty());
        assert_eq!(steps_of(&next, TokenId(4)), 47);
    }

    #[test]
    fn home_stretch_tokens_are_never_captured() {
        let state = state_with(2, &[(TokenId(0), 50), (TokenId(4), 54)]);
        let (_, result) = apply_move(&state, TokenId(0), 4);
        assert!(result.captured.is_empty());
    }

    #[test]
    fn finishing_move_reports_finished() {
        let state = state_with(2, &[(TokenId(2), 56)]);
        let (next, result) = apply_move(&state, TokenId(2), 1);
        assert_eq!(steps_of(&next, TokenId(2)), FINAL_STEP);
        assert!(result.finished);
    }

    #[test]
    fn refused_moves_are_silent_no_ops() {
        let state = state_with(2, &[(TokenId(1), 55)]);
        for (id, roll) in [(TokenId(0), 3), (TokenId(1), 5), (TokenId(40), 6)] {
            let (next, result) = apply_move(&state, id, roll);
            assert_eq!(next, state);
            assert_eq!(result, MoveResult::default());
        }
        assert_eq!(
            try_apply_move(&state, TokenId(40), 6).unwrap_err(),
            EngineError::UnknownToken(TokenId(40))
        );
    }

    #[test]
    fn standings_count_finished_tokens() {
        let state = state_with(
            3,
            &[(TokenId(4), FINAL_STEP), (TokenId(5), FINAL_STEP), (TokenId(8), FINAL_STEP)],
        );
        let standings = ranking_snapshot(&state.players, &state.tokens);
        assert_eq!(
            standings,
            vec![
                Standing { player_id: 1, finished: 2 },
                Standing { player_id: 2, finished: 1 },
                Standing { player_id: 0, finished: 0 },
            ]
        );
        assert!(!has_finished_all(&state.tokens, 1));
        assert!(!has_finished_all(&state.tokens, 9));
    }

    fn arb_state() -> impl Strategy<Value = GameState> {
        (2usize..=4).prop_flat_map(|players| {
            prop::collection::vec(PEN_STEPS..=FINAL_STEP, players * 4).prop_map(move |steps| {
                let mut state = GameState::new(players, PlayMode::Pass).unwrap();
                for (token, s) in state.tokens.iter_mut().zip(steps) {
                    token.steps = s;
                }
                state
            })
        })
    }

    proptest! {
        #[test]
        fn steps_never_exceed_final_cell(state in arb_state(), pick in 0usize..16, roll in 1u8..=6) {
            let id = state.tokens[pick % state.tokens.len()].id;
            let (next, _) = apply_move(&state, id, roll);
            prop_assert!(next.tokens.iter().all(|t| (PEN_STEPS..=FINAL_STEP).contains(&t.steps)));
        }

        #[test]
        fn pen_token_only_leaves_on_six(state in arb_state(), pick in 0usize..16, roll in 1u8..=6) {
            let mut state = state;
            let idx = pick % state.tokens.len();
            state.tokens[idx].steps = PEN_STEPS;
            let id = state.tokens[idx].id;
            let (next, result) = apply_move(&state, id, roll);
            if roll == 6 {
                prop_assert_eq!(next.token(id).unwrap().steps, 0);
            } else {
                prop_assert_eq!(&next, &state);
                prop_assert_eq!(result, MoveResult::default());
            }
        }

        #[test]
        fn captures_hit_exactly_the_opponents_on_an_open_landing(
            state in arb_state(),
            pick in 0usize..16,
            roll in 1u8..=6,
        ) {
            let token = state.tokens[pick % state.tokens.len()];
            let (next, result) = apply_move(&state, token.id, roll);
            let landing = landing_steps(&token, roll).and_then(|s| global_index(s, token.player_id));
            match landing {
                Some(cell) if !SAFE_CELLS.contains(&cell) => {
                    let expected: Vec<TokenId> = state
                        .tokens
                        .iter()
                        .filter(|t| t.player_id != token.player_id && t.global_index() == Some(cell))
                        .map(|t| t.id)
                        .collect();
                    prop_assert_eq!(&result.captured, &expected);
                    for other in &next.tokens {
                        if other.player_id == token.player_id && other.id != token.id {
                            prop_assert_eq!(Some(other), state.token(other.id));
                        }
                    }
                }
                _ => prop_assert!(result.captured.is_empty()),
            }
        }

        #[test]
        fn legal_moves_is_idempotent(state in arb_state(), roll in 1u8..=6) {
            let before = state.tokens.clone();
            let first = legal_moves(&state.tokens, roll);
            let second = legal_moves(&state.tokens, roll);
            prop_assert_eq!(first, second);
            prop_assert_eq!(before, state.tokens);
        }

        #[test]
        fn apply_move_is_deterministic(state in arb_state(), pick in 0usize..16, roll in 1u8..=6) {
            let id = state.tokens[pick % state.tokens.len()].id;
            prop_assert_eq!(apply_move(&state, id, roll), apply_move(&state, id, roll));
        }

        #[test]
        fn home_entry_never_has_a_track_cell(steps in TRACK_LENGTH..=FINAL_STEP, player in 0u8..4) {
            prop_assert_eq!(global_index(steps, player), None);
        }
    }
}
