use serde::{Deserialize, Serialize};

use crate::errors::OrderBookError;

/// Price in integer ticks. Signed so spreads and price deltas stay in-domain.
pub type Price = i64;

/// Number of units to trade.
pub type Quantity = u64;

/// Opaque unique order identifier, assigned by the submitter.
pub type OrderId = u64;

/// Which side of the market an order trades on.
///
/// The book keeps each side best-price-forward (highest bid first, lowest ask
/// first), so an arriving order is always confronted with the most aggressive
/// resting price on the opposite side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// The side this order trades against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Lifetime and execution policy attached to an order.
///
/// - `GoodTilCancel`: rests until filled or explicitly cancelled
/// - `FillAndKill`: fills whatever crosses immediately, the remainder is withdrawn
/// - `FillOrKill`: admitted only if the whole quantity can fill immediately
/// - `GoodForDay`: like `GoodTilCancel`, but expires at the session close
/// - `Market`: takes the best available prices until filled, never rests unpromoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    GoodTilCancel,
    FillAndKill,
    FillOrKill,
    GoodForDay,
    Market,
}

/// An order submitted by a trader.
///
/// `price` is `None` only while a market order is unpromoted; every resting
/// order carries a concrete price. Quantity bookkeeping is private: the only
/// mutations are [`fill`](Order::fill) and the market-to-limit promotion, so
/// `remaining_quantity <= initial_quantity` holds for the order's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    order_type: OrderType,
    id: OrderId,
    side: Side,
    price: Option<Price>,
    initial_quantity: Quantity,
    remaining_quantity: Quantity,
}

impl Order {
    /// Creates a priced order of any non-market type.
    ///
    /// Market orders carry no price until the book promotes them; build those
    /// with [`Order::market`] instead.
    pub fn new(order_type: OrderType, id: OrderId, side: Side, price: Price, quantity: Quantity) -> Self {
        debug_assert!(
            order_type != OrderType::Market,
            "market orders are unpriced, build them with Order::market"
        );
        Self {
            order_type,
            id,
            side,
            price: Some(price),
            initial_quantity: quantity,
            remaining_quantity: quantity,
        }
    }

    /// Creates a market order. It has no price until the book promotes it.
    pub fn market(id: OrderId, side: Side, quantity: Quantity) -> Self {
        Self {
            order_type: OrderType::Market,
            id,
            side,
            price: None,
            initial_quantity: quantity,
            remaining_quantity: quantity,
        }
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn price(&self) -> Option<Price> {
        self.price
    }

    pub fn initial_quantity(&self) -> Quantity {
        self.initial_quantity
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.remaining_quantity
    }

    pub fn filled_quantity(&self) -> Quantity {
        self.initial_quantity - self.remaining_quantity
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity == 0
    }

    /// Reduces the remaining quantity by `quantity`.
    ///
    /// Filling past the remaining quantity is an invariant violation, not a
    /// domain outcome, and surfaces as [`OrderBookError::Overfill`].
    pub(crate) fn fill(&mut self, quantity: Quantity) -> Result<(), OrderBookError> {
        if quantity > self.remaining_quantity {
            return Err(OrderBookError::Overfill(self.id));
        }
        self.remaining_quantity -= quantity;
        Ok(())
    }

    /// Promotes a market order to a good-til-cancel limit order at `price`.
    ///
    /// The book pegs market orders to the worst price currently resting on the
    /// opposite side, which bounds the sweep to visible liquidity and keeps a
    /// partially filled remainder from resting away from the book.
    pub(crate) fn to_good_til_cancel(&mut self, price: Price) -> Result<(), OrderBookError> {
        if self.order_type != OrderType::Market {
            return Err(OrderBookError::NotAMarketOrder(self.id));
        }
        self.price = Some(price);
        self.order_type = OrderType::GoodTilCancel;
        Ok(())
    }
}

/// Replacement terms for a resting order.
///
/// A modify is executed as cancel-then-add, so the replacement joins the tail
/// of its (possibly new) price level and gives up its queue position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderModify {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
}

impl OrderModify {
    pub fn new(id: OrderId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id,
            side,
            price,
            quantity,
        }
    }

    /// Materializes a fresh order carrying these terms and the given type.
    pub fn to_order(self, order_type: OrderType) -> Order {
        Order::new(order_type, self.id, self.side, self.price, self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_reduces_remaining_quantity() {
        let mut order = Order::new(OrderType::GoodTilCancel, 1, Side::Buy, 100, 10);
        order.fill(4).unwrap();
        assert_eq!(order.remaining_quantity(), 6);
        assert_eq!(order.filled_quantity(), 4);
        assert!(!order.is_filled());

        order.fill(6).unwrap();
        assert!(order.is_filled());
    }

    #[test]
    fn test_fill_rejects_overfill() {
        let mut order = Order::new(OrderType::GoodTilCancel, 7, Side::Sell, 100, 3);
        assert_eq!(order.fill(4), Err(OrderBookError::Overfill(7)));
        // the failed fill must not touch the order
        assert_eq!(order.remaining_quantity(), 3);
    }

    #[test]
    fn test_market_order_promotes_to_good_til_cancel() {
        let mut order = Order::market(2, Side::Buy, 5);
        assert_eq!(order.price(), None);

        order.to_good_til_cancel(105).unwrap();
        assert_eq!(order.order_type(), OrderType::GoodTilCancel);
        assert_eq!(order.price(), Some(105));
    }

    #[test]
    fn test_promotion_rejects_non_market_orders() {
        let mut order = Order::new(OrderType::GoodForDay, 3, Side::Sell, 99, 1);
        assert_eq!(order.to_good_til_cancel(100), Err(OrderBookError::NotAMarketOrder(3)));
        assert_eq!(order.price(), Some(99));
    }

    #[test]
    fn test_modify_materializes_order_of_requested_type() {
        let modify = OrderModify::new(9, Side::Buy, 101, 20);
        let order = modify.to_order(OrderType::GoodForDay);
        assert_eq!(order.order_type(), OrderType::GoodForDay);
        assert_eq!(order.id(), 9);
        assert_eq!(order.price(), Some(101));
        assert_eq!(order.remaining_quantity(), 20);
    }
}
