use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Smallest accepted spectator bet, in SOL.
pub const MIN_BET: f64 = 0.01;

/// Largest accepted spectator bet, in SOL.
pub const MAX_BET: f64 = 100.0;

/// Amounts offered by the bet picker, in SOL.
pub const PRESET_AMOUNTS: [f64; 6] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Pre-selected amount for someone who has never placed a bet.
pub const FIRST_TIME_DEFAULT_AMOUNT: f64 = 0.05;

/// Pre-selected amount for returning bettors.
pub const RETURNING_DEFAULT_AMOUNT: f64 = 0.1;

pub fn default_amount(first_time: bool) -> f64 {
    if first_time {
        FIRST_TIME_DEFAULT_AMOUNT
    } else {
        RETURNING_DEFAULT_AMOUNT
    }
}

/// Reject amounts that are not finite, not positive, or outside the bet bounds.
pub fn check_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidAmount(amount));
    }
    if amount < MIN_BET {
        return Err(Error::BetBelowMinimum {
            amount,
            min: MIN_BET,
        });
    }
    if amount > MAX_BET {
        return Err(Error::BetAboveMaximum {
            amount,
            max: MAX_BET,
        });
    }
    Ok(())
}

/// Balance fractions offered as one-tap bet sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickSize {
    Quarter,
    Half,
    Max,
}

impl QuickSize {
    /// Share of the balance, as a divisor.
    fn divisor(&self) -> u64 {
        match self {
            QuickSize::Quarter => 4,
            QuickSize::Half => 2,
            QuickSize::Max => 1,
        }
    }
}

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Granularity of quick bet sizes (0.01 SOL).
const QUICK_STEP_LAMPORTS: u64 = 10_000_000;

/// Convert a SOL amount to whole lamports, rounding to the nearest lamport.
pub fn to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

pub fn to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Compute a quick bet size from a wallet balance.
///
/// The result is rounded down to 0.01 SOL and clamped into
/// [MIN_BET, MAX_BET]. Returns `None` if the balance cannot cover the minimum.
pub fn quick_amount(balance: f64, size: QuickSize) -> Option<f64> {
    if !balance.is_finite() || balance < 0.0 {
        return None;
    }
    let balance = to_lamports(balance);
    let (min, max) = (to_lamports(MIN_BET), to_lamports(MAX_BET));
    if balance < min {
        return None;
    }
    let share = balance / size.divisor();
    let floored = share / QUICK_STEP_LAMPORTS * QUICK_STEP_LAMPORTS;
    Some(to_sol(floored.clamp(min, max)))
}

/// Which of the two battle participants a swipe backs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FighterSide {
    Left,
    Right,
}

/// A bet the user has confirmed with a gesture but not yet submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBet {
    pub amount: f64,
    pub side: FighterSide,
    /// Display name of the backed fighter.
    pub fighter: String,
    pub fighter_wallet: String,
}

/// Acknowledgement broadcast once a spectator bet has been recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetPlaced {
    pub battle_id: String,
    pub backed_wallet: String,
    pub amount: f64,
    pub betting_wallet: String,
}
