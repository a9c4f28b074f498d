use crate::Side;
use itertools::Either;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Mapping of price to resting quantity for one [`Side`] of a [`BookState`].
pub type PriceLevels = BTreeMap<Decimal, Decimal>;

/// Order book state reflecting every recorded change up to and including `nonce`.
///
/// Invariants upheld by every mutation:
/// - each price is present at most once per side.
/// - no price maps to a zero or negative quantity (such a level is absent).
///
/// A [`BookState`] has a single writer. Sharing one between callers is done through a
/// [`SessionHandle`](crate::session::SessionHandle).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct BookState {
    nonce: u64,
    #[serde(default)]
    bids: PriceLevels,
    #[serde(default)]
    asks: PriceLevels,
}

impl BookState {
    /// Construct a new [`BookState`] at the provided `nonce`.
    ///
    /// Levels do not need to be pre-sorted. Levels with a non-positive quantity are skipped.
    pub fn new<IterBids, IterAsks, L>(nonce: u64, bids: IterBids, asks: IterAsks) -> Self
    where
        IterBids: IntoIterator<Item = L>,
        IterAsks: IntoIterator<Item = L>,
        L: Into<Level>,
    {
        let mut book = Self {
            nonce,
            ..Self::default()
        };

        bids.into_iter()
            .for_each(|level| book.upsert(Side::Bid, level.into()));
        asks.into_iter()
            .for_each(|level| book.upsert(Side::Ask, level.into()));

        book
    }

    /// Nonce of the last recorded change this [`BookState`] reflects.
    pub fn current_nonce(&self) -> u64 {
        self.nonce
    }

    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    /// Set the resting quantity of a price level.
    ///
    /// ### Scenarios
    /// 1) quantity > 0: insert the level, or overwrite the existing quantity.
    /// 2) quantity == 0: remove the level if present, else no-op.
    /// 3) quantity < 0: never stored, log warn and remove the level if present.
    pub fn set_level(&mut self, side: Side, price: Decimal, quantity: Decimal) {
        if quantity > Decimal::ZERO {
            self.side_mut(side).insert(price, quantity);
            return;
        }

        if quantity < Decimal::ZERO {
            warn!(
                %side,
                %price,
                %quantity,
                nonce = self.nonce,
                "refusing to store negative quantity level, removing it instead"
            );
        }

        self.remove_level(side, price);
    }

    /// Remove a price level, returning the quantity it held.
    ///
    /// Removing an absent level is a no-op.
    pub fn remove_level(&mut self, side: Side, price: Decimal) -> Option<Decimal> {
        let removed = self.side_mut(side).remove(&price);
        if removed.is_none() {
            trace!(%side, %price, nonce = self.nonce, "removal of absent level ignored");
        }
        removed
    }

    /// Write the outcome of an update rule: `Some` sets the level, `None` removes it.
    pub(crate) fn write_level(&mut self, side: Side, price: Decimal, quantity: Option<Decimal>) {
        match quantity {
            Some(quantity) => self.set_level(side, price, quantity),
            None => {
                let _removed = self.remove_level(side, price);
            }
        }
    }

    /// Resting quantity at `price`, if the level is present.
    pub fn level(&self, side: Side, price: Decimal) -> Option<Decimal> {
        self.side(side).get(&price).copied()
    }

    /// Return a reference to the raw price levels of a [`Side`].
    pub fn side(&self, side: Side) -> &PriceLevels {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut PriceLevels {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Iterate the [`Level`]s of a [`Side`] best price first (bids descending, asks ascending).
    pub fn levels(&self, side: Side) -> impl Iterator<Item = Level> + '_ {
        let levels = self.side(side).iter();
        match side {
            Side::Bid => Either::Left(levels.rev()),
            Side::Ask => Either::Right(levels),
        }
        .map(|(price, quantity)| Level::new(*price, *quantity))
    }

    /// Best (highest) bid [`Level`].
    pub fn best_bid(&self) -> Option<Level> {
        self.levels(Side::Bid).next()
    }

    /// Best (lowest) ask [`Level`].
    pub fn best_ask(&self) -> Option<Level> {
        self.levels(Side::Ask).next()
    }

    /// Difference between the best ask and best bid prices.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(best_bid), Some(best_ask)) => Some(best_ask.price - best_bid.price),
            _ => None,
        }
    }

    /// Sum of the resting quantity on a [`Side`].
    pub fn total_quantity(&self, side: Side) -> Decimal {
        self.side(side).values().copied().sum()
    }

    /// Number of price levels on a [`Side`].
    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    /// Returns true if neither side holds any level.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn upsert(&mut self, side: Side, level: Level) {
        if level.quantity > Decimal::ZERO {
            self.side_mut(side).insert(level.price, level.quantity);
        } else {
            trace!(%side, ?level, nonce = self.nonce, "skipping non-positive level");
        }
    }
}

/// Order book price [`Level`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl<T> From<(T, T)> for Level
where
    T: Into<Decimal>,
{
    fn from((price, quantity): (T, T)) -> Self {
        Self::new(price, quantity)
    }
}

impl Level {
    pub fn new<T>(price: T, quantity: T) -> Self
    where
        T: Into<Decimal>,
    {
        Self {
            price: price.into(),
            quantity: quantity.into(),
        }
    }
}
