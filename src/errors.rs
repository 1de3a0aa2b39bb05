use thiserror::Error;

use crate::orders::OrderId;

/// Invariant violations raised by the matching core.
///
/// Domain-level rejections (an unmatchable fill-and-kill, a duplicate id, a
/// cancel for an unknown order) are not errors; they come back as empty
/// results. These variants only fire when the book is asked to break its own
/// bookkeeping, and callers should treat them as fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OrderBookError {
    #[error("order {0} cannot be filled for more than its remaining quantity")]
    Overfill(OrderId),

    #[error("order {0} is not a market order and cannot be repriced")]
    NotAMarketOrder(OrderId),
}
