use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local, NaiveTime};
use tracing::{debug, info, warn};

use crate::errors::OrderBookError;
use crate::ladder::{Handle, Ladder};
use crate::levels::{BookSnapshot, LevelInfo, LevelTotals};
use crate::orders::{Order, OrderId, OrderModify, OrderType, Price, Quantity, Side};
use crate::pruner;
use crate::trade::{Trade, TradeInfo, Trades};

/// Book state guarded by the facade's mutex: the two-sided price ladder, the
/// id index, and the per-price depth totals. The three are mutated together
/// inside every critical section, so at rest the index covers exactly the
/// resting orders and the totals mirror bucket occupancy.
#[derive(Default)]
struct BookCore {
    ladder: Ladder,
    index: HashMap<OrderId, Handle>,
    totals: LevelTotals,
}

impl BookCore {
    /// Whether an order at `price` on `side` would cross the opposite best.
    fn can_match(&self, side: Side, price: Price) -> bool {
        match (side, self.ladder.best_price(side.opposite())) {
            (_, None) => false,
            (Side::Buy, Some(best_ask)) => price >= best_ask,
            (Side::Sell, Some(best_bid)) => price <= best_bid,
        }
    }

    /// Whether enough liquidity rests at acceptable prices to fill `quantity`
    /// in one sweep. Walks the opposite side best-to-worst, accumulating the
    /// per-level totals, and stops at the first level worse than `price`.
    /// Only fill-or-kill admission asks this question.
    fn can_fully_fill(&self, side: Side, price: Price, quantity: Quantity) -> bool {
        if !self.can_match(side, price) {
            return false;
        }

        let mut outstanding = quantity;
        for level_price in self.ladder.prices(side.opposite()) {
            let acceptable = match side {
                Side::Buy => level_price <= price,
                Side::Sell => level_price >= price,
            };
            if !acceptable {
                break;
            }
            let available = self.totals.quantity_at(level_price);
            if outstanding <= available {
                return true;
            }
            outstanding -= available;
        }
        false
    }

    /// Admits `order` into the book and runs the matcher.
    ///
    /// # Admission, in order
    /// - A duplicate id is a no-op with an empty result.
    /// - A market order against an empty opposite side is rejected silently;
    ///   otherwise it is promoted to good-til-cancel at the worst resting
    ///   opposite price and proceeds as a limit order.
    /// - Fill-and-kill is rejected unless it crosses immediately.
    /// - Fill-or-kill is rejected unless the whole quantity can fill.
    /// - Good-til-cancel and good-for-day are always admitted.
    ///
    /// Rejections are defined results, not errors: the book is untouched and
    /// the returned trade list is empty.
    fn add_order(&mut self, mut order: Order) -> Result<Trades, OrderBookError> {
        if self.index.contains_key(&order.id()) {
            debug!(order_id = order.id(), "duplicate order id ignored");
            return Ok(Trades::new());
        }

        if order.order_type() == OrderType::Market {
            match self.ladder.worst_price(order.side().opposite()) {
                Some(worst) => order.to_good_til_cancel(worst)?,
                None => {
                    debug!(order_id = order.id(), "market order with empty opposite side rejected");
                    return Ok(Trades::new());
                }
            }
        }

        let Some(price) = order.price() else {
            warn!(order_id = order.id(), "unpriced order cannot rest in the book, rejected");
            return Ok(Trades::new());
        };

        if order.order_type() == OrderType::FillAndKill && !self.can_match(order.side(), price) {
            debug!(order_id = order.id(), "fill-and-kill with no immediate cross rejected");
            return Ok(Trades::new());
        }

        if order.order_type() == OrderType::FillOrKill
            && !self.can_fully_fill(order.side(), price, order.remaining_quantity())
        {
            debug!(order_id = order.id(), "fill-or-kill with insufficient liquidity rejected");
            return Ok(Trades::new());
        }

        let id = order.id();
        let side = order.side();
        let quantity = order.remaining_quantity();

        let handle = self.ladder.push_back(order, price, side);
        self.index.insert(id, handle);
        self.totals.on_order_added(price, quantity);

        self.match_orders()
    }

    /// Crosses the book while the best bid meets the best ask.
    ///
    /// Within each crossed pair of levels the two FIFO heads fill each other
    /// by `min(bid.remaining, ask.remaining)`; each trade half records its own
    /// resting price. Filled orders are popped and untracked on the spot, and
    /// drained levels disappear with them. After the loop, an unfilled
    /// fill-and-kill remainder left at the top of either side is withdrawn.
    fn match_orders(&mut self) -> Result<Trades, OrderBookError> {
        let mut trades = Trades::new();

        loop {
            let (Some(bid_price), Some(ask_price)) = (
                self.ladder.best_price(Side::Buy),
                self.ladder.best_price(Side::Sell),
            ) else {
                break;
            };
            if bid_price < ask_price {
                break;
            }

            while let (Some(bid), Some(ask)) = (
                self.ladder.front(Side::Buy, bid_price),
                self.ladder.front(Side::Sell, ask_price),
            ) {
                let quantity = self
                    .ladder
                    .order(bid)
                    .remaining_quantity()
                    .min(self.ladder.order(ask).remaining_quantity());

                self.ladder.order_mut(bid).fill(quantity)?;
                self.ladder.order_mut(ask).fill(quantity)?;

                let bid_filled = self.ladder.order(bid).is_filled();
                let ask_filled = self.ladder.order(ask).is_filled();

                trades.push(Trade::new(
                    TradeInfo {
                        order_id: self.ladder.order(bid).id(),
                        price: bid_price,
                        quantity,
                    },
                    TradeInfo {
                        order_id: self.ladder.order(ask).id(),
                        price: ask_price,
                        quantity,
                    },
                ));

                self.totals.on_order_matched(bid_price, quantity, bid_filled);
                self.totals.on_order_matched(ask_price, quantity, ask_filled);

                if bid_filled {
                    let node = self.ladder.unlink(bid);
                    self.index.remove(&node.order.id());
                }
                if ask_filled {
                    let node = self.ladder.unlink(ask);
                    self.index.remove(&node.order.id());
                }
            }
        }

        self.cancel_fill_and_kill_head(Side::Buy);
        self.cancel_fill_and_kill_head(Side::Sell);

        if !trades.is_empty() {
            info!(count = trades.len(), "orders matched");
        }
        Ok(trades)
    }

    /// Fill-and-kill semantics: whatever did not fill during the cross is
    /// withdrawn before control returns to the caller.
    fn cancel_fill_and_kill_head(&mut self, side: Side) {
        let Some(price) = self.ladder.best_price(side) else {
            return;
        };
        let Some(handle) = self.ladder.front(side, price) else {
            return;
        };
        let order = self.ladder.order(handle);
        let id = order.id();
        if order.order_type() != OrderType::FillAndKill {
            return;
        }
        self.cancel_order(id);
    }

    /// Removes a resting order. Unknown ids are logged and ignored, which
    /// also makes cancellation idempotent.
    fn cancel_order(&mut self, order_id: OrderId) {
        let Some(handle) = self.index.remove(&order_id) else {
            debug!(order_id, "cancel for unknown order ignored");
            return;
        };
        let node = self.ladder.unlink(handle);
        self.totals
            .on_order_cancelled(node.price, node.order.remaining_quantity());
        debug!(order_id, price = node.price, "order cancelled");
    }

    /// Replaces a resting order with fresh terms, keeping its original type.
    /// The replacement is a cancel-then-add, so it joins the tail of its new
    /// level and loses time priority.
    fn modify_order(&mut self, modify: OrderModify) -> Result<Trades, OrderBookError> {
        let Some(&handle) = self.index.get(&modify.id) else {
            warn!(order_id = modify.id, "modify for unknown order ignored");
            return Ok(Trades::new());
        };
        let order_type = self.ladder.order(handle).order_type();
        self.cancel_order(modify.id);
        self.add_order(modify.to_order(order_type))
    }

    fn size(&self) -> usize {
        self.index.len()
    }

    fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self
                .ladder
                .level_totals(Side::Buy)
                .map(|(price, quantity)| LevelInfo { price, quantity })
                .collect(),
            asks: self
                .ladder
                .level_totals(Side::Sell)
                .map(|(price, quantity)| LevelInfo { price, quantity })
                .collect(),
        }
    }

    /// Ids of every resting good-for-day order, for the session-close sweep.
    fn day_order_ids(&self) -> Vec<OrderId> {
        self.ladder
            .orders()
            .filter(|order| order.order_type() == OrderType::GoodForDay)
            .map(|order| order.id())
            .collect()
    }
}

/// State shared between the facade and its pruner thread.
///
/// `wake_lock`/`wake_cv` exist solely so the pruner can sleep without holding
/// the book mutex; only shutdown ever notifies the condition variable.
pub(crate) struct BookShared {
    core: Mutex<BookCore>,
    shutdown: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    session_close: NaiveTime,
}

impl BookShared {
    pub(crate) fn session_close(&self) -> NaiveTime {
        self.session_close
    }

    /// Blocks the pruner thread until shutdown is signalled (returns `true`)
    /// or `deadline` passes (returns `false`). Tolerates spurious wake-ups.
    pub(crate) fn wait_for_shutdown_until(&self, deadline: DateTime<Local>) -> bool {
        let mut guard = self.wake_lock.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return true;
            }
            let Ok(remaining) = (deadline - Local::now()).to_std() else {
                return false;
            };
            let (next_guard, _) = self.wake_cv.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
        }
    }

    /// Snapshot of the resting good-for-day ids, taken under the book lock
    /// and released before the batched cancel re-takes it.
    pub(crate) fn collect_day_order_ids(&self) -> Vec<OrderId> {
        self.core.lock().unwrap().day_order_ids()
    }

    /// Cancels a batch of orders under a single lock acquisition.
    pub(crate) fn cancel_batch(&self, order_ids: &[OrderId]) {
        let mut core = self.core.lock().unwrap();
        for &order_id in order_ids {
            core.cancel_order(order_id);
        }
    }
}

/// Thread-safe limit order book for a single instrument.
///
/// Orders rest in price-time priority: better prices match first, and within
/// a price level the earliest arrival fills first. All public operations take
/// the one book mutex for their full duration, so callers observe a single
/// total order of submissions, cancels, modifies, and reads. Construction
/// starts a background thread that expires good-for-day orders at the session
/// close; dropping the book shuts that thread down and joins it.
///
/// ```
/// use limit_order_book::{Order, OrderBook, OrderType, Side};
///
/// let book = OrderBook::new();
/// book.add_order(Order::new(OrderType::GoodTilCancel, 1, Side::Buy, 100, 10)).unwrap();
/// let trades = book.add_order(Order::new(OrderType::GoodTilCancel, 2, Side::Sell, 100, 4)).unwrap();
///
/// assert_eq!(trades.len(), 1);
/// assert_eq!(trades[0].bid.quantity, 4);
/// assert_eq!(book.size(), 1);
/// ```
pub struct OrderBook {
    shared: Arc<BookShared>,
    pruner: Option<JoinHandle<()>>,
}

impl OrderBook {
    /// Creates a book whose day orders expire at 16:00:00 local time.
    pub fn new() -> Self {
        Self::with_session_close(pruner::default_session_close())
    }

    /// Creates a book with a custom session close for day-order expiry.
    pub fn with_session_close(session_close: NaiveTime) -> Self {
        let shared = Arc::new(BookShared {
            core: Mutex::new(BookCore::default()),
            shutdown: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            session_close,
        });

        let pruner_shared = Arc::clone(&shared);
        let pruner = thread::Builder::new()
            .name("gfd-pruner".into())
            .spawn(move || pruner::run(&pruner_shared))
            .expect("failed to spawn the day-order pruner thread");

        Self {
            shared,
            pruner: Some(pruner),
        }
    }

    /// Submits an order and returns the trades produced by the subsequent
    /// match, possibly empty. See [`OrderType`] for the per-type admission
    /// and cleanup policies. Rejected admissions and duplicate ids leave the
    /// book untouched and return an empty list.
    pub fn add_order(&self, order: Order) -> Result<Trades, OrderBookError> {
        self.shared.core.lock().unwrap().add_order(order)
    }

    /// Cancels a resting order. Unknown ids are ignored.
    pub fn cancel_order(&self, order_id: OrderId) {
        self.shared.core.lock().unwrap().cancel_order(order_id);
    }

    /// Replaces a resting order with the terms in `modify`, keeping its
    /// original order type, and returns any trades the replacement triggers.
    /// The replacement re-queues at the tail of its level: time priority is
    /// deliberately lost. Unknown ids are ignored with an empty result.
    pub fn modify_order(&self, modify: OrderModify) -> Result<Trades, OrderBookError> {
        self.shared.core.lock().unwrap().modify_order(modify)
    }

    /// Number of orders currently resting in the book.
    pub fn size(&self) -> usize {
        self.shared.core.lock().unwrap().size()
    }

    /// Highest resting bid price, if any.
    pub fn best_bid(&self) -> Option<Price> {
        self.shared.core.lock().unwrap().ladder.best_price(Side::Buy)
    }

    /// Lowest resting ask price, if any.
    pub fn best_ask(&self) -> Option<Price> {
        self.shared.core.lock().unwrap().ladder.best_price(Side::Sell)
    }

    /// Depth snapshot of both sides, best price first.
    pub fn snapshot(&self) -> BookSnapshot {
        self.shared.core.lock().unwrap().snapshot()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OrderBook {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // taking the wake lock orders the store before the notify, so the
        // pruner cannot miss the signal between its flag check and its wait
        drop(self.shared.wake_lock.lock().unwrap());
        self.shared.wake_cv.notify_all();
        if let Some(pruner) = self.pruner.take() {
            let _ = pruner.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gtc(id: OrderId, side: Side, price: Price, quantity: Quantity) -> Order {
        Order::new(OrderType::GoodTilCancel, id, side, price, quantity)
    }

    /// The at-rest invariants: index coverage, aggregate consistency, no
    /// empty buckets, and an uncrossed book.
    fn assert_consistent(core: &BookCore) {
        assert_eq!(core.index.len(), core.ladder.len());

        for side in [Side::Buy, Side::Sell] {
            for (price, quantity) in core.ladder.level_totals(side) {
                assert!(quantity > 0, "level {price} retained while empty");
                assert_eq!(core.totals.quantity_at(price), quantity);
            }
        }

        if let (Some(bid), Some(ask)) = (
            core.ladder.best_price(Side::Buy),
            core.ladder.best_price(Side::Sell),
        ) {
            assert!(bid < ask, "book at rest is crossed: bid {bid} >= ask {ask}");
        }
    }

    #[test]
    fn test_resting_order_produces_no_trades() {
        let mut core = BookCore::default();
        let trades = core.add_order(gtc(1, Side::Buy, 100, 10)).unwrap();
        assert!(trades.is_empty());
        assert_eq!(core.size(), 1);
        assert_consistent(&core);
    }

    #[test]
    fn test_crossing_orders_trade_at_each_sides_own_price() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 100, 5)).unwrap();
        let trades = core.add_order(gtc(2, Side::Buy, 102, 5)).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].bid.price, 102);
        assert_eq!(trades[0].ask.price, 100);
        assert_eq!(core.size(), 0);
        assert_consistent(&core);
    }

    #[test]
    fn test_partial_fill_leaves_the_remainder_resting() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 100, 10)).unwrap();
        let trades = core.add_order(gtc(2, Side::Buy, 100, 4)).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].ask.quantity, 4);
        assert_eq!(core.size(), 1);
        assert_eq!(core.totals.quantity_at(100), 6);
        assert_consistent(&core);
    }

    #[test]
    fn test_sweep_consumes_levels_in_price_order() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 101, 5)).unwrap();
        core.add_order(gtc(2, Side::Sell, 100, 5)).unwrap();

        let trades = core.add_order(gtc(3, Side::Buy, 101, 8)).unwrap();

        assert_eq!(trades.len(), 2);
        // the cheaper ask fills first
        assert_eq!(trades[0].ask.order_id, 2);
        assert_eq!(trades[0].ask.quantity, 5);
        assert_eq!(trades[1].ask.order_id, 1);
        assert_eq!(trades[1].ask.quantity, 3);
        assert_consistent(&core);
    }

    #[test]
    fn test_market_order_is_pegged_to_the_worst_opposite_price() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 100, 4)).unwrap();
        core.add_order(gtc(2, Side::Sell, 105, 4)).unwrap();

        let trades = core.add_order(Order::market(3, Side::Buy, 6)).unwrap();

        assert_eq!(trades.len(), 2);
        // the promoted bid reports the worst resting ask as its own price
        assert_eq!(trades[0].bid.price, 105);
        assert_eq!(trades[1].bid.price, 105);
        assert_eq!(trades[1].ask.price, 105);
        assert_eq!(trades[1].ask.quantity, 2);
        assert_consistent(&core);
    }

    #[test]
    fn test_market_remainder_rests_at_the_promoted_price() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 100, 4)).unwrap();

        core.add_order(Order::market(2, Side::Buy, 10)).unwrap();

        // the sweep took everything visible; the rest sits at the promoted price
        assert_eq!(core.size(), 1);
        assert_eq!(core.ladder.best_price(Side::Buy), Some(100));
        assert_eq!(core.totals.quantity_at(100), 6);
        assert_consistent(&core);
    }

    #[test]
    fn test_market_order_against_an_empty_book_is_rejected() {
        let mut core = BookCore::default();
        let trades = core.add_order(Order::market(1, Side::Buy, 10)).unwrap();
        assert!(trades.is_empty());
        assert_eq!(core.size(), 0);
    }

    #[test]
    fn test_fill_and_kill_without_a_cross_is_rejected() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 105, 5)).unwrap();

        let trades = core
            .add_order(Order::new(OrderType::FillAndKill, 2, Side::Buy, 104, 5))
            .unwrap();

        assert!(trades.is_empty());
        assert_eq!(core.size(), 1);
        assert_consistent(&core);
    }

    #[test]
    fn test_fill_and_kill_remainder_is_withdrawn_after_the_cross() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 101, 3)).unwrap();

        let trades = core
            .add_order(Order::new(OrderType::FillAndKill, 2, Side::Buy, 101, 10))
            .unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].bid.quantity, 3);
        assert_eq!(core.size(), 0, "the unfilled remainder must not rest");
        assert_consistent(&core);
    }

    #[test]
    fn test_fill_or_kill_needs_the_whole_quantity_at_acceptable_prices() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Sell, 100, 4)).unwrap();
        core.add_order(gtc(2, Side::Sell, 101, 4)).unwrap();
        core.add_order(gtc(3, Side::Sell, 110, 50)).unwrap();

        // 8 units rest at <= 101; the 50 at 110 are out of reach
        let rejected = core
            .add_order(Order::new(OrderType::FillOrKill, 4, Side::Buy, 101, 9))
            .unwrap();
        assert!(rejected.is_empty());
        assert_eq!(core.size(), 3);

        let filled = core
            .add_order(Order::new(OrderType::FillOrKill, 5, Side::Buy, 101, 8))
            .unwrap();
        assert_eq!(filled.len(), 2);
        assert_eq!(core.size(), 1);
        assert_consistent(&core);
    }

    #[test]
    fn test_duplicate_ids_do_not_touch_the_book() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Buy, 100, 10)).unwrap();
        let trades = core.add_order(gtc(1, Side::Buy, 105, 99)).unwrap();

        assert!(trades.is_empty());
        assert_eq!(core.size(), 1);
        assert_eq!(core.totals.quantity_at(100), 10);
        assert_eq!(core.totals.quantity_at(105), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Buy, 100, 10)).unwrap();

        core.cancel_order(1);
        core.cancel_order(1);

        assert_eq!(core.size(), 0);
        assert!(core.totals.is_empty());
        assert_consistent(&core);
    }

    #[test]
    fn test_modify_keeps_the_original_order_type() {
        let mut core = BookCore::default();
        core.add_order(Order::new(OrderType::GoodForDay, 1, Side::Buy, 100, 10))
            .unwrap();

        core.modify_order(OrderModify::new(1, Side::Buy, 99, 5)).unwrap();

        assert_eq!(core.day_order_ids(), vec![1]);
        assert_eq!(core.totals.quantity_at(99), 5);
        assert_consistent(&core);
    }

    #[test]
    fn test_modify_for_an_unknown_order_is_a_no_op() {
        let mut core = BookCore::default();
        let trades = core.modify_order(OrderModify::new(42, Side::Buy, 100, 5)).unwrap();
        assert!(trades.is_empty());
        assert_eq!(core.size(), 0);
    }

    #[test]
    fn test_level_totals_follow_adds_cancels_and_matches() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Buy, 100, 10)).unwrap();
        core.add_order(gtc(2, Side::Buy, 100, 5)).unwrap();
        assert_eq!(core.totals.quantity_at(100), 15);
        assert_eq!(core.totals.count_at(100), 2);

        core.add_order(gtc(3, Side::Sell, 100, 12)).unwrap();
        // order 1 drained (10), order 2 partially matched (2 of 5)
        assert_eq!(core.totals.quantity_at(100), 3);
        assert_eq!(core.totals.count_at(100), 1);

        core.cancel_order(2);
        assert!(core.totals.is_empty());
        assert_consistent(&core);
    }

    #[test]
    fn test_day_order_ids_select_only_good_for_day() {
        let mut core = BookCore::default();
        core.add_order(gtc(1, Side::Buy, 100, 1)).unwrap();
        core.add_order(Order::new(OrderType::GoodForDay, 2, Side::Buy, 99, 1))
            .unwrap();
        core.add_order(Order::new(OrderType::GoodForDay, 3, Side::Sell, 105, 1))
            .unwrap();

        let mut ids = core.day_order_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);
    }
}
