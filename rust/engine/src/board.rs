//! Track geometry: step counters to shared-track cells and logical board zones.

use serde::{Deserialize, Serialize};

use crate::{PlayerId, Token};

pub const TRACK_LENGTH: i8 = 52;
pub const HOME_LENGTH: i8 = 6;
pub const FINAL_STEP: i8 = TRACK_LENGTH + HOME_LENGTH - 1;
pub const PEN_STEPS: i8 = -1;
pub const ENTRY_SPACING: u8 = 13;
pub const TOKENS_PER_PLAYER: u8 = 4;
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
pub const SAFE_CELLS: [u8; 8] = [0, 8, 13, 21, 26, 34, 39, 47];

/// Cell on the shared track where `player` enters from the pen.
pub fn entry_offset(player: PlayerId) -> u8 {
    player * ENTRY_SPACING
}

/// Shared-track cell for a token of `player` that has walked `steps`.
///
/// `None` while the token is in the pen or on its private home stretch.
pub fn global_index(steps: i8, player: PlayerId) -> Option<u8> {
    if !(0..TRACK_LENGTH).contains(&steps) {
        return None;
    }
    let cell = (u16::from(entry_offset(player)) + steps as u16) % TRACK_LENGTH as u16;
    Some(cell as u8)
}

pub fn is_safe_cell(cell: u8) -> bool {
    SAFE_CELLS.contains(&cell)
}

/// Forward distance along the track from `behind` to `ahead`, in 0..52.
pub fn cells_between(behind: u8, ahead: u8) -> u8 {
    let track = TRACK_LENGTH as u8;
    (ahead % track + track - behind % track) % track
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "zone", rename_all = "snake_case")]
pub enum Position {
    Pen { slot: u8 },
    Track { cell: u8 },
    HomeStretch { lane: u8 },
    Finished,
}

pub fn position(token: &Token) -> Position {
    if token.steps < 0 {
        return Position::Pen { slot: token.index };
    }
    if let Some(cell) = global_index(token.steps, token.player_id) {
        return Position::Track { cell };
    }
    if token.steps < FINAL_STEP {
        Position::HomeStretch {
            lane: (token.steps - TRACK_LENGTH) as u8,
        }
    } else {
        Position::Finished
    }
}
