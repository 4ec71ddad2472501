//! Pure, allocation-only order book and price-time-priority matching
//! kernel. No I/O, no async: prices and quantities are integer scalars
//! throughout, never fractional.
//!
//! A driving `core` crate is responsible for funds locking, persistence,
//! and turning [`Fill`]s into trades; this crate only knows about price
//! levels and FIFO queues.

use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

pub type OrderId = Uuid;
pub type Price = i64;
pub type Quantity = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub maker_order_id: OrderId,
    pub price: Price,
    pub qty: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidityProbe {
    /// Total quantity resting on the opposite side.
    pub available: Quantity,
    /// The worst (least favorable to the taker) price that would need to
    /// be touched to fill the requested quantity. `None` when the
    /// opposite side is empty.
    pub worst_price: Option<Price>,
}

#[derive(Debug, Clone)]
struct RestingOrder {
    id: OrderId,
    remaining: Quantity,
}

#[derive(Debug, Clone, Default)]
struct PriceLevel {
    orders: VecDeque<RestingOrder>,
    total_qty: Quantity,
}

impl PriceLevel {
    fn push(&mut self, order: RestingOrder) {
        self.total_qty += order.remaining;
        self.orders.push_back(order);
    }

    fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Per-instrument bid/ask book. Only resting LIMIT orders live here;
/// MARKET orders are matched and discarded without ever being inserted.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    index: HashMap<OrderId, (Side, Price)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, side: Side) -> &BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn book_mut(&mut self, side: Side) -> &mut BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn best(&self, side: Side) -> Option<Price> {
        match side {
            Side::Bid => self.bids.keys().next_back().copied(),
            Side::Ask => self.asks.keys().next().copied(),
        }
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best(Side::Ask), self.best(Side::Bid)) {
            (Some(ask), Some(bid)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    pub fn qty_at(&self, side: Side, price: Price) -> Quantity {
        self.book(side).get(&price).map_or(0, |l| l.total_qty)
    }

    pub fn is_resting(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    /// Aggregated top `depth` price levels per side, best price first.
    pub fn snapshot(&self, depth: usize) -> (Vec<(Price, Quantity)>, Vec<(Price, Quantity)>) {
        let bid_levels = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(p, l)| (*p, l.total_qty))
            .collect();
        let ask_levels = self
            .asks
            .iter()
            .take(depth)
            .map(|(p, l)| (*p, l.total_qty))
            .collect();
        (bid_levels, ask_levels)
    }

    /// Walk the opposite side of `side` without mutating the book,
    /// summing remaining quantity until `qty` is reached or the book is
    /// exhausted. Used to size a market order's worst-case fund lock
    /// before any matching happens.
    pub fn probe_market_liquidity(&self, side: Side, qty: Quantity) -> LiquidityProbe {
        let opposite = side.opposite();
        let mut remaining = qty;
        let mut worst_price = None;
        let mut available = 0;

        let prices: Box<dyn Iterator<Item = (&Price, &PriceLevel)>> = match opposite {
            Side::Ask => Box::new(self.asks.iter()),
            Side::Bid => Box::new(self.bids.iter().rev()),
        };

        for (price, level) in prices {
            available += level.total_qty;
            if remaining > 0 {
                worst_price = Some(*price);
                remaining -= level.total_qty.min(remaining);
            }
        }

        LiquidityProbe {
            available,
            worst_price,
        }
    }

    /// Match an incoming order of `qty` on `side` against the opposite
    /// book in strict price-time priority. `limit_price` constrains how
    /// far into the book the order may walk; `None` means MARKET (walk
    /// until `qty` is exhausted or the book runs dry, ignoring price).
    /// Returns the fills generated, in maker-price order, and the
    /// quantity left unmatched.
    pub fn match_incoming(
        &mut self,
        side: Side,
        mut qty: Quantity,
        limit_price: Option<Price>,
    ) -> (Vec<Fill>, Quantity) {
        let opposite = side.opposite();
        let mut fills = Vec::new();
        let mut drained_prices = Vec::new();

        let candidate_prices: Vec<Price> = match opposite {
            Side::Ask => self.book(opposite).keys().copied().collect(),
            Side::Bid => self.book(opposite).keys().rev().copied().collect(),
        };

        for price in candidate_prices {
            if qty == 0 {
                break;
            }
            if let Some(limit) = limit_price {
                let crosses = match side {
                    Side::Bid => price <= limit,
                    Side::Ask => price >= limit,
                };
                if !crosses {
                    break;
                }
            }

            let Self { bids, asks, index } = &mut *self;
            let opposite_book = match opposite {
                Side::Bid => &mut *bids,
                Side::Ask => &mut *asks,
            };
            let level = match opposite_book.get_mut(&price) {
                Some(l) => l,
                None => continue,
            };

            while qty > 0 && !level.orders.is_empty() {
                let mut maker = level.orders.pop_front().expect("checked non-empty");
                let matched = qty.min(maker.remaining);

                maker.remaining -= matched;
                level.total_qty -= matched;
                qty -= matched;

                fills.push(Fill {
                    maker_order_id: maker.id,
                    price,
                    qty: matched,
                });

                if maker.remaining == 0 {
                    index.remove(&maker.id);
                } else {
                    level.orders.push_front(maker);
                }
            }

            if level.is_empty() {
                drained_prices.push(price);
            }
        }

        for price in drained_prices {
            self.book_mut(opposite).remove(&price);
        }

        (fills, qty)
    }

    /// Insert a LIMIT order's unmatched remainder into the book.
    pub fn insert_resting(&mut self, id: OrderId, side: Side, price: Price, qty: Quantity) {
        self.index.insert(id, (side, price));
        self.book_mut(side)
            .entry(price)
            .or_default()
            .push(RestingOrder { id, remaining: qty });
    }

    /// Remove a resting order (cancellation, or instrument delist).
    /// Returns its remaining quantity.
    pub fn cancel(&mut self, id: OrderId) -> Option<Quantity> {
        let (side, price) = self.index.remove(&id)?;
        let book = self.book_mut(side);
        let level = book.get_mut(&price)?;

        let mut removed = 0;
        level.orders.retain(|o| {
            if o.id == id {
                removed = o.remaining;
                false
            } else {
                true
            }
        });
        level.total_qty -= removed;

        if level.is_empty() {
            book.remove(&price);
        }

        Some(removed)
    }

    /// Remove every resting order, e.g. on instrument delist. Returns
    /// `(id, side, price, remaining)` for each, so the caller can unlock
    /// funds and flip order status.
    pub fn drain_all(&mut self) -> Vec<(OrderId, Side, Price, Quantity)> {
        let ids: Vec<OrderId> = self.index.keys().copied().collect();
        let mut out = Vec::with_capacity(ids.len());
        for oid in ids {
            if let Some((side, price)) = self.index.get(&oid).copied() {
                if let Some(remaining) = self.cancel(oid) {
                    out.push((oid, side, price, remaining));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> OrderId {
        Uuid::new_v4()
    }

    #[test]
    fn empty_book_has_no_best_or_spread() {
        let ob = OrderBook::new();
        assert_eq!(ob.best(Side::Bid), None);
        assert_eq!(ob.best(Side::Ask), None);
        assert_eq!(ob.spread(), None);
    }

    #[test]
    fn resting_orders_show_up_at_top_of_book() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Bid, 99, 10);
        ob.insert_resting(id(), Side::Ask, 101, 10);

        assert_eq!(ob.best(Side::Bid), Some(99));
        assert_eq!(ob.best(Side::Ask), Some(101));
        assert_eq!(ob.spread(), Some(2));
    }

    #[test]
    fn match_at_maker_price_not_taker_price() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 80, 5);

        let (fills, remaining) = ob.match_incoming(Side::Bid, 5, Some(100));
        assert_eq!(remaining, 0);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 80);
        assert_eq!(fills[0].qty, 5);
    }

    #[test]
    fn partial_fill_leaves_remainder_to_rest() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 50, 3);

        let (fills, remaining) = ob.match_incoming(Side::Bid, 7, Some(60));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].qty, 3);
        assert_eq!(remaining, 4);
    }

    #[test]
    fn price_time_priority_across_levels_and_within_a_level() {
        let mut ob = OrderBook::new();
        let first = id();
        let second = id();
        let third = id();
        ob.insert_resting(first, Side::Ask, 10, 2);
        ob.insert_resting(second, Side::Ask, 10, 2);
        ob.insert_resting(third, Side::Ask, 11, 5);

        let (fills, remaining) = ob.match_incoming(Side::Bid, 3, None);
        assert_eq!(remaining, 0);
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].maker_order_id, first);
        assert_eq!(fills[0].qty, 2);
        assert_eq!(fills[1].maker_order_id, second);
        assert_eq!(fills[1].qty, 1);
        assert_eq!(ob.qty_at(Side::Ask, 10), 1);
        assert_eq!(ob.qty_at(Side::Ask, 11), 5);
    }

    #[test]
    fn market_order_against_empty_book_matches_nothing() {
        let mut ob = OrderBook::new();
        let (fills, remaining) = ob.match_incoming(Side::Bid, 5, None);
        assert!(fills.is_empty());
        assert_eq!(remaining, 5);
    }

    #[test]
    fn probe_market_liquidity_reports_insufficient_depth() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 10, 2);

        let probe = ob.probe_market_liquidity(Side::Bid, 5);
        assert_eq!(probe.available, 2);
        assert_eq!(probe.worst_price, Some(10));
    }

    #[test]
    fn probe_market_liquidity_reports_worst_price_needed() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 10, 2);
        ob.insert_resting(id(), Side::Ask, 11, 5);

        let probe = ob.probe_market_liquidity(Side::Bid, 3);
        assert_eq!(probe.available, 7);
        assert_eq!(probe.worst_price, Some(11));
    }

    #[test]
    fn cancel_removes_resting_order_and_is_idempotent() {
        let mut ob = OrderBook::new();
        let oid = id();
        ob.insert_resting(oid, Side::Bid, 100, 10);

        assert_eq!(ob.cancel(oid), Some(10));
        assert_eq!(ob.best(Side::Bid), None);
        assert_eq!(ob.cancel(oid), None);
    }

    #[test]
    fn cancel_partially_filled_order_releases_only_remainder() {
        let mut ob = OrderBook::new();
        let resting = id();
        ob.insert_resting(resting, Side::Bid, 100, 20);

        let (fills, _) = ob.match_incoming(Side::Ask, 5, Some(100));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].maker_order_id, resting);
        assert_eq!(ob.qty_at(Side::Bid, 100), 15);

        assert_eq!(ob.cancel(resting), Some(15));
    }

    #[test]
    fn snapshot_aggregates_by_price_best_first() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Bid, 98, 5);
        ob.insert_resting(id(), Side::Bid, 99, 3);
        ob.insert_resting(id(), Side::Bid, 99, 4);
        ob.insert_resting(id(), Side::Ask, 101, 2);
        ob.insert_resting(id(), Side::Ask, 102, 6);

        let (bids, asks) = ob.snapshot(10);
        assert_eq!(bids, vec![(99, 7), (98, 5)]);
        assert_eq!(asks, vec![(101, 2), (102, 6)]);
    }

    #[test]
    fn snapshot_respects_depth() {
        let mut ob = OrderBook::new();
        for p in 90..100 {
            ob.insert_resting(id(), Side::Bid, p, 1);
        }
        let (bids, _) = ob.snapshot(3);
        assert_eq!(bids, vec![(99, 1), (98, 1), (97, 1)]);
    }

    #[test]
    fn no_match_when_prices_do_not_cross() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 101, 10);

        let (fills, remaining) = ob.match_incoming(Side::Bid, 10, Some(99));
        assert!(fills.is_empty());
        assert_eq!(remaining, 10);
        assert_eq!(ob.best(Side::Ask), Some(101));
    }

    #[test]
    fn drain_all_empties_book_and_reports_every_resting_order() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Bid, 100, 5);
        ob.insert_resting(id(), Side::Ask, 105, 7);

        let drained = ob.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(ob.best(Side::Bid), None);
        assert_eq!(ob.best(Side::Ask), None);
    }

    #[test]
    fn market_buy_worst_case_and_partial_liquidity_book_empties_fully() {
        let mut ob = OrderBook::new();
        ob.insert_resting(id(), Side::Ask, 10, 3);
        ob.insert_resting(id(), Side::Ask, 12, 3);

        let probe = ob.probe_market_liquidity(Side::Bid, 10);
        assert_eq!(probe.available, 6);
        assert_eq!(probe.worst_price, Some(12));

        let (fills, remaining) = ob.match_incoming(Side::Bid, 6, None);
        assert_eq!(remaining, 0);
        assert_eq!(fills.iter().map(|f| f.qty).sum::<i64>(), 6);
        assert_eq!(ob.best(Side::Ask), None);
    }
}
