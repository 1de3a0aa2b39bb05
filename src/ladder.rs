use std::collections::btree_map;
use std::collections::BTreeMap;

use slab::Slab;

use crate::orders::{Order, Price, Quantity, Side};

/// Stable reference to a resting order's node. A slab key is not reused until
/// its node is removed, so a handle stays valid across unrelated insertions
/// and removals, which is the property the order index depends on.
pub(crate) type Handle = usize;

/// A resting order plus its links in the FIFO chain of its price level.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) order: Order,
    pub(crate) price: Price,
    pub(crate) side: Side,
    prev: Option<Handle>,
    next: Option<Handle>,
}

/// FIFO of orders at one price on one side, threaded through the node slab.
/// Insertion at the tail, removal anywhere via a handle.
#[derive(Debug, Default)]
struct Level {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

/// Internal enum to unify forward (`Iter`) and reverse (`Rev<Iter>`) BTreeMap
/// iteration, so both sides expose a single best-first level walk.
enum LevelIter<'a> {
    Fwd(btree_map::Iter<'a, Price, Level>),
    Rev(std::iter::Rev<btree_map::Iter<'a, Price, Level>>),
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = (&'a Price, &'a Level);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LevelIter::Fwd(iter) => iter.next(),
            LevelIter::Rev(iter) => iter.next(),
        }
    }
}

/// Two-sided price ladder.
///
/// Price levels live in one [`BTreeMap`] per side (bids walked in reverse so
/// the highest price comes first), while the orders themselves sit in a
/// shared [`Slab`] arena, linked into per-level FIFO chains. Levels are
/// erased the moment they empty; no side ever retains an empty bucket.
#[derive(Debug, Default)]
pub(crate) struct Ladder {
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    nodes: Slab<Node>,
}

impl Ladder {
    /// Appends `order` to the tail of its (side, price) level, creating the
    /// level if needed, and returns the stable handle to the new node.
    pub fn push_back(&mut self, order: Order, price: Price, side: Side) -> Handle {
        let handle = self.nodes.insert(Node {
            order,
            price,
            side,
            prev: None,
            next: None,
        });

        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = levels.entry(price).or_default();

        if let Some(tail) = level.tail {
            self.nodes[tail].next = Some(handle);
            self.nodes[handle].prev = Some(tail);
        } else {
            level.head = Some(handle);
        }
        level.tail = Some(handle);
        level.len += 1;

        handle
    }

    /// Removes the node behind `handle` from its level in O(1), erasing the
    /// level if it empties, and returns the node.
    pub fn unlink(&mut self, handle: Handle) -> Node {
        let node = self.nodes.remove(handle);

        if let Some(prev) = node.prev {
            self.nodes[prev].next = node.next;
        }
        if let Some(next) = node.next {
            self.nodes[next].prev = node.prev;
        }

        let levels = match node.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let drained = match levels.get_mut(&node.price) {
            Some(level) => {
                if level.head == Some(handle) {
                    level.head = node.next;
                }
                if level.tail == Some(handle) {
                    level.tail = node.prev;
                }
                level.len -= 1;
                level.len == 0
            }
            None => false,
        };
        if drained {
            levels.remove(&node.price);
        }

        node
    }

    /// Best resting price on `side`: highest bid, lowest ask.
    pub fn best_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    /// Worst resting price on `side`: lowest bid, highest ask.
    pub fn worst_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.bids.keys().next().copied(),
            Side::Sell => self.asks.keys().next_back().copied(),
        }
    }

    /// Head of the FIFO at (side, price), if that level exists.
    pub fn front(&self, side: Side, price: Price) -> Option<Handle> {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.get(&price).and_then(|level| level.head)
    }

    pub fn order(&self, handle: Handle) -> &Order {
        &self.nodes[handle].order
    }

    pub fn order_mut(&mut self, handle: Handle) -> &mut Order {
        &mut self.nodes[handle].order
    }

    /// Number of orders resting across both sides.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Resting prices on `side`, best first.
    pub fn prices(&self, side: Side) -> impl Iterator<Item = Price> + '_ {
        self.levels_best_first(side).map(|(price, _)| *price)
    }

    /// Walks `side` best-first, yielding each price with the total remaining
    /// quantity resting there.
    pub fn level_totals(&self, side: Side) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.levels_best_first(side)
            .map(move |(price, level)| (*price, self.level_quantity(level)))
    }

    /// Every resting order, in no particular order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.nodes.iter().map(|(_, node)| &node.order)
    }

    fn levels_best_first(&self, side: Side) -> LevelIter<'_> {
        match side {
            Side::Buy => LevelIter::Rev(self.bids.iter().rev()),
            Side::Sell => LevelIter::Fwd(self.asks.iter()),
        }
    }

    fn level_quantity(&self, level: &Level) -> Quantity {
        let mut total = 0;
        let mut cursor = level.head;
        while let Some(handle) = cursor {
            let node = &self.nodes[handle];
            total += node.order.remaining_quantity();
            cursor = node.next;
        }
        total
    }
}
