//! Weighted move heuristic shared by every difficulty tier.

use engine::board::{cells_between, global_index, is_safe_cell, TRACK_LENGTH};
use engine::{
    capture_targets, landing_steps, legal_moves_for, GameState, PlayerId, Token, TokenId,
};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::Difficulty;

const UNLOCK_BONUS: f64 = 10.0;
const PROGRESS_WEIGHT: f64 = 0.6;
const HOME_STRETCH_BONUS: f64 = 12.0;
const SAFE_LANDING_BONUS: f64 = 8.0;
const CAPTURE_BONUS: f64 = 30.0;
const CAPTURE_PER_TOKEN: f64 = 8.0;
const THREAT_PENALTY: f64 = 6.0;
const THREAT_RANGE: u8 = 6;

/// Opposing tokens on the shared track that sit 1..=6 cells behind `cell`.
pub fn threat_count(state: &GameState, mover: PlayerId, cell: u8) -> usize {
    state
        .tokens
        .iter()
        .filter(|other| other.player_id != mover)
        .filter_map(Token::global_index)
        .filter(|&idx| (1..=THREAT_RANGE).contains(&cells_between(idx, cell)))
        .count()
}

/// Jitter-free score of moving `token` by `roll`. Illegal moves score zero.
pub fn base_score(state: &GameState, token: &Token, roll: u8) -> f64 {
    let Some(new_steps) = landing_steps(token, roll) else {
        return 0.0;
    };
    let unlocking = token.in_pen();
    let landing = global_index(new_steps, token.player_id);

    let mut score = 0.0;
    if unlocking {
        score += UNLOCK_BONUS;
    }
    score += f64::from(new_steps) * PROGRESS_WEIGHT;
    if new_steps >= TRACK_LENGTH {
        score += HOME_STRETCH_BONUS;
    }

    let Some(cell) = landing else {
        return score;
    };
    if is_safe_cell(cell) {
        return score + SAFE_LANDING_BONUS;
    }
    let captures = capture_targets(&state.tokens, token.player_id, cell).len();
    if captures > 0 {
        score += CAPTURE_BONUS + CAPTURE_PER_TOKEN * captures as f64;
    }
    score - THREAT_PENALTY * threat_count(state, token.player_id, cell) as f64
}

pub fn evaluate_move<R: Rng + ?Sized>(
    state: &GameState,
    token: &Token,
    roll: u8,
    difficulty: Difficulty,
    rng: &mut R,
) -> f64 {
    base_score(state, token, roll) * difficulty.multiplier() + rng.gen::<f64>()
}

/// Scored legal candidates in token order.
pub fn score_candidates<R: Rng + ?Sized>(
    state: &GameState,
    player: PlayerId,
    roll: u8,
    difficulty: Difficulty,
    rng: &mut R,
) -> Vec<(TokenId, f64)> {
    legal_moves_for(state, player, roll)
        .into_iter()
        .filter_map(|id| state.token(id))
        .map(|token| (token.id, evaluate_move(state, token, roll, difficulty, rng)))
        .collect()
}

pub fn choose_move<R: Rng + ?Sized>(
    state: &GameState,
    player: PlayerId,
    roll: u8,
    difficulty: Difficulty,
    rng: &mut R,
) -> Option<TokenId> {
    if difficulty == Difficulty::Easy {
        return legal_moves_for(state, player, roll).choose(rng).copied();
    }
    let mut best: Option<(TokenId, f64)> = None;
    for (id, score) in score_candidates(state, player, roll, difficulty, rng) {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((id, score)),
        }
    }
    best.map(|(id, _)| id)
}
