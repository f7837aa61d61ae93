//! Execution price estimation.
//!
//! Walks one side of a book from the best level outward until a target
//! quantity (or quote notional) is covered. The average price tells what the
//! fill would cost; the last touched level is the limit price that actually
//! guarantees the fill, so that is the price orders are placed at.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{BookSide, DepthLevel};

/// What the target amount measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTarget {
    /// Base-asset quantity.
    Quantity,
    /// Quote-asset notional (price × quantity).
    Notional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEstimate {
    /// Size-weighted price over the consumed levels.
    pub average_price: Decimal,
    /// Price of the deepest level touched.
    pub last_price: Decimal,
    /// Base quantity consumed.
    pub filled_quantity: Decimal,
    /// Quote notional consumed.
    pub notional: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimateError {
    #[error("target must be positive, got {0}")]
    InvalidTarget(Decimal),

    #[error("insufficient depth: wanted {target}, book holds {available}")]
    InsufficientDepth { target: Decimal, available: Decimal },
}

/// Estimate the fill of `target` against `depth`, which must be in `side`
/// order (best first).
pub fn estimate_fill(
    side: BookSide,
    depth: &[DepthLevel],
    target: Decimal,
    kind: FillTarget,
) -> Result<FillEstimate, EstimateError> {
    if target <= Decimal::ZERO {
        return Err(EstimateError::InvalidTarget(target));
    }
    debug_assert!(side.is_sorted(depth), "depth not in {side:?} order");

    let mut filled_quantity = Decimal::ZERO;
    let mut notional = Decimal::ZERO;

    for level in depth {
        if level.quantity <= Decimal::ZERO || level.price <= Decimal::ZERO {
            continue;
        }

        let covered = match kind {
            FillTarget::Quantity => filled_quantity,
            FillTarget::Notional => notional,
        };
        let remaining = target - covered;

        let level_amount = match kind {
            FillTarget::Quantity => level.quantity,
            FillTarget::Notional => level.notional(),
        };

        if level_amount >= remaining {
            let take = match kind {
                FillTarget::Quantity => remaining,
                FillTarget::Notional => remaining / level.price,
            };
            filled_quantity += take;
            notional += take * level.price;

            return Ok(FillEstimate {
                average_price: notional / filled_quantity,
                last_price: level.price,
                filled_quantity,
                notional,
            });
        }

        filled_quantity += level.quantity;
        notional += level.notional();
    }

    Err(EstimateError::InsufficientDepth {
        target,
        available: match kind {
            FillTarget::Quantity => filled_quantity,
            FillTarget::Notional => notional,
        },
    })
}
