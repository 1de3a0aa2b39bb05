use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::orders::{Price, Quantity};

/// Aggregate of all orders resting at one price: total remaining quantity and
/// order count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LevelData {
    pub quantity: Quantity,
    pub count: u32,
}

/// How a state transition of a resting order adjusts its level aggregate.
#[derive(Debug, Clone, Copy)]
enum LevelAction {
    Add,
    Remove,
    Match,
}

/// Per-price depth totals, maintained in the same critical section as every
/// bucket change, never lazily.
///
/// Resting bids and asks can never cross, so prices are unique across sides
/// and a single map keyed by price serves both. The fill-or-kill admission
/// check reads these totals instead of walking order queues.
#[derive(Debug, Default)]
pub(crate) struct LevelTotals {
    data: HashMap<Price, LevelData>,
}

impl LevelTotals {
    pub fn on_order_added(&mut self, price: Price, quantity: Quantity) {
        self.update(price, quantity, LevelAction::Add);
    }

    pub fn on_order_cancelled(&mut self, price: Price, quantity: Quantity) {
        self.update(price, quantity, LevelAction::Remove);
    }

    /// A match that drains the resting order also removes it from the level;
    /// a partial match only reduces the level quantity.
    pub fn on_order_matched(&mut self, price: Price, quantity: Quantity, fully_filled: bool) {
        let action = if fully_filled {
            LevelAction::Remove
        } else {
            LevelAction::Match
        };
        self.update(price, quantity, action);
    }

    /// Total remaining quantity resting at `price`, zero if the level is gone.
    pub fn quantity_at(&self, price: Price) -> Quantity {
        self.data.get(&price).map_or(0, |level| level.quantity)
    }

    fn update(&mut self, price: Price, quantity: Quantity, action: LevelAction) {
        let level = self.data.entry(price).or_default();
        match action {
            LevelAction::Add => {
                level.count += 1;
                level.quantity += quantity;
            }
            LevelAction::Remove => {
                level.count -= 1;
                level.quantity -= quantity;
            }
            LevelAction::Match => {
                level.quantity -= quantity;
            }
        }
        if level.count == 0 {
            self.data.remove(&price);
        }
    }

    #[cfg(test)]
    pub fn count_at(&self, price: Price) -> u32 {
        self.data.get(&price).map_or(0, |level| level.count)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One row of a depth snapshot: a resting price and the total remaining
/// quantity at that price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub price: Price,
    pub quantity: Quantity,
}

/// Point-in-time view of the book's depth, best price first on both sides
/// (highest bid first, lowest ask first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<LevelInfo>,
    pub asks: Vec<LevelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_round_trip() {
        let mut totals = LevelTotals::default();
        totals.on_order_added(100, 10);
        totals.on_order_added(100, 5);
        assert_eq!(totals.quantity_at(100), 15);
        assert_eq!(totals.count_at(100), 2);

        totals.on_order_cancelled(100, 10);
        assert_eq!(totals.quantity_at(100), 5);
        assert_eq!(totals.count_at(100), 1);

        totals.on_order_cancelled(100, 5);
        assert!(totals.is_empty());
    }

    #[test]
    fn test_partial_match_keeps_the_order_counted() {
        let mut totals = LevelTotals::default();
        totals.on_order_added(101, 10);

        totals.on_order_matched(101, 4, false);
        assert_eq!(totals.quantity_at(101), 6);
        assert_eq!(totals.count_at(101), 1);
    }

    #[test]
    fn test_draining_match_applies_a_single_remove() {
        let mut totals = LevelTotals::default();
        totals.on_order_added(101, 10);
        totals.on_order_added(101, 3);

        totals.on_order_matched(101, 10, true);
        assert_eq!(totals.quantity_at(101), 3);
        assert_eq!(totals.count_at(101), 1);

        totals.on_order_matched(101, 3, true);
        assert!(totals.is_empty());
    }

    #[test]
    fn test_empty_levels_are_erased_not_zeroed() {
        let mut totals = LevelTotals::default();
        totals.on_order_added(100, 1);
        totals.on_order_cancelled(100, 1);
        assert_eq!(totals.quantity_at(100), 0);
        assert!(totals.is_empty());
    }
}
