//! Open/close decisions. Pure functions of prices and thresholds.

use rust_decimal::Decimal;

use crate::config::PairThresholds;
use crate::state::OpenPosition;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// `(a - b) / b` in percent. `None` when `b` is not a usable price.
pub fn divergence_pct(a: Decimal, b: Decimal) -> Option<Decimal> {
    if a <= Decimal::ZERO || b <= Decimal::ZERO {
        return None;
    }
    Some((a - b) / b * HUNDRED)
}

/// Direction of a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDirection {
    /// Leg A is rich: short A, long B.
    ShortALongB,
    /// Leg A is cheap: long A, short B.
    LongAShortB,
}

impl OpenDirection {
    /// Exposure of leg `index` (0 = A, 1 = B).
    pub fn is_long(self, index: usize) -> bool {
        match self {
            OpenDirection::ShortALongB => index == 1,
            OpenDirection::LongAShortB => index == 0,
        }
    }
}

pub fn should_open(divergence: Decimal, t: &PairThresholds) -> Option<OpenDirection> {
    if divergence.abs() <= t.open_threshold {
        return None;
    }
    if divergence > Decimal::ZERO {
        Some(OpenDirection::ShortALongB)
    } else {
        Some(OpenDirection::LongAShortB)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Leg `leg` moved `adverse_pct` percent against its open price.
    StopLoss { leg: usize, adverse_pct: Decimal },
    Converged { divergence: Decimal },
}

/// Percent the price moved against a leg since it was opened.
pub fn adverse_move_pct(long: bool, open_price: Decimal, now: Decimal) -> Decimal {
    if open_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let moved = if long { open_price - now } else { now - open_price };
    moved / open_price * HUNDRED
}

/// Stop-loss is checked before convergence.
pub fn close_reason(position: &OpenPosition, prices: [Decimal; 2], t: &PairThresholds) -> Option<CloseReason> {
    for (leg, (open, now)) in position.legs.iter().zip(prices).enumerate() {
        let adverse_pct = adverse_move_pct(open.side.is_long_exposure(), open.open_price, now);
        if adverse_pct > t.limit_close {
            return Some(CloseReason::StopLoss { leg, adverse_pct });
        }
    }

    let divergence = divergence_pct(prices[0], prices[1])?;
    if divergence.abs() < t.close_threshold {
        return Some(CloseReason::Converged { divergence });
    }
    None
}
