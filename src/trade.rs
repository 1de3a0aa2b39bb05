use serde::{Deserialize, Serialize};

use crate::orders::{OrderId, Price, Quantity};

/// One side's view of an execution: which order traded, at its own resting
/// price, for how many units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInfo {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
}

/// A trade represents a matched transaction between two orders.
///
/// Each half records *its own* resting price: an aggressor crossing into the
/// book trades at the passive order's price on that side and at its own
/// submitted price on its side. Downstream consumers interpret the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub bid: TradeInfo,
    pub ask: TradeInfo,
}

impl Trade {
    pub fn new(bid: TradeInfo, ask: TradeInfo) -> Self {
        Self { bid, ask }
    }
}

/// One incoming order can fill against many resting orders, so matching
/// produces a list of trades.
pub type Trades = Vec<Trade>;
