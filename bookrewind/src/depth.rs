use crate::{
    Side,
    book::{BookState, Level},
};
use derive_more::Constructor;
use itertools::{Itertools, MinMaxResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Cumulative resting quantity from the best price of a [`Side`] out to `price`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct DepthPoint {
    pub price: Decimal,
    pub cumulative: Decimal,
    pub side: Side,
}

/// Cumulative quantity decreased moving outward from the best price, a sign of a corrupt book.
///
/// `index` counts from the best price of the `side`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct DepthDiagnostic {
    pub side: Side,
    pub index: usize,
    pub previous: Decimal,
    pub current: Decimal,
}

/// Visualisation ready cumulative order book.
///
/// Points are ordered for a single combined price axis: bids from the furthest out price up to
/// the best bid, followed by asks from the best ask outward.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct DepthChart {
    points: Vec<DepthPoint>,
    bid_count: usize,
    diagnostics: Vec<DepthDiagnostic>,
}

impl DepthChart {
    pub fn points(&self) -> &[DepthPoint] {
        &self.points
    }

    /// Bid points, lowest price first.
    pub fn bids(&self) -> &[DepthPoint] {
        &self.points[..self.bid_count]
    }

    /// Ask points, lowest price first.
    pub fn asks(&self) -> &[DepthPoint] {
        &self.points[self.bid_count..]
    }

    pub fn diagnostics(&self) -> &[DepthDiagnostic] {
        &self.diagnostics
    }

    /// Returns true if neither side violated cumulative monotonicity.
    pub fn is_consistent(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Largest cumulative quantity, ie/ the vertical extent of the chart.
    pub fn max_cumulative(&self) -> Option<Decimal> {
        self.points.iter().map(|point| point.cumulative).max()
    }

    /// Lowest and highest price of the chart.
    pub fn price_range(&self) -> Option<(Decimal, Decimal)> {
        match self.points.iter().map(|point| point.price).minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(price) => Some((price, price)),
            MinMaxResult::MinMax(min, max) => Some((min, max)),
        }
    }

    pub fn into_points(self) -> Vec<DepthPoint> {
        self.points
    }
}

/// Aggregate a [`BookState`] into its [`DepthChart`].
///
/// Pure function of the book. Monotonicity violations are logged and returned as
/// [`DepthDiagnostic`]s alongside the best-effort chart.
pub fn compute_depth(book: &BookState) -> DepthChart {
    let (mut bids, mut diagnostics) = cumulative_depth(Side::Bid, book.levels(Side::Bid));
    let (asks, ask_diagnostics) = cumulative_depth(Side::Ask, book.levels(Side::Ask));

    bids.reverse();
    let bid_count = bids.len();
    diagnostics.extend(ask_diagnostics);

    let mut points = bids;
    points.extend(asks);

    DepthChart {
        points,
        bid_count,
        diagnostics,
    }
}

/// Running cumulative sum of one [`Side`]'s levels, best price first.
///
/// Levels do not need to be pre-sorted: bids are sorted descending by price, asks ascending.
pub fn cumulative_depth<Iter, L>(side: Side, levels: Iter) -> (Vec<DepthPoint>, Vec<DepthDiagnostic>)
where
    Iter: IntoIterator<Item = L>,
    L: Into<Level>,
{
    let mut levels = levels.into_iter().map(L::into).collect::<Vec<_>>();
    match side {
        Side::Bid => levels.sort_by(|a, b| a.price.cmp(&b.price).reverse()),
        Side::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
    }

    let points = levels
        .into_iter()
        .scan(Decimal::ZERO, |total, level| {
            *total += level.quantity;
            Some(DepthPoint::new(level.price, *total, side))
        })
        .collect::<Vec<_>>();

    let diagnostics = points
        .iter()
        .enumerate()
        .tuple_windows()
        .filter(|((_, previous), (_, current))| current.cumulative < previous.cumulative)
        .map(|((_, previous), (index, current))| {
            let diagnostic = DepthDiagnostic {
                side,
                index,
                previous: previous.cumulative,
                current: current.cumulative,
            };
            warn!(?diagnostic, "cumulative depth decreased moving away from the best price");
            diagnostic
        })
        .collect();

    (points, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_compute_depth() {
        struct TestCase {
            input: BookState,
            expected: Vec<DepthPoint>,
        }

        let tests = vec![
            TestCase {
                // TC0: empty book
                input: BookState::default(),
                expected: vec![],
            },
            TestCase {
                // TC1: bids reversed low-to-high, then asks ascending
                input: BookState::new(
                    100,
                    [(dec!(10), dec!(5)), (dec!(9), dec!(3))],
                    [(dec!(11), dec!(4)), (dec!(12), dec!(2))],
                ),
                expected: vec![
                    DepthPoint::new(dec!(9), dec!(8), Side::Bid),
                    DepthPoint::new(dec!(10), dec!(5), Side::Bid),
                    DepthPoint::new(dec!(11), dec!(4), Side::Ask),
                    DepthPoint::new(dec!(12), dec!(6), Side::Ask),
                ],
            },
            TestCase {
                // TC2: asks only
                input: BookState::new(
                    100,
                    Vec::<Level>::new(),
                    vec![Level::new(dec!(12), dec!(2)), Level::new(dec!(11), dec!(4))],
                ),
                expected: vec![
                    DepthPoint::new(dec!(11), dec!(4), Side::Ask),
                    DepthPoint::new(dec!(12), dec!(6), Side::Ask),
                ],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = compute_depth(&test.input);
            assert_eq!(actual.points(), test.expected.as_slice(), "TC{index} failed");
            assert!(actual.is_consistent(), "TC{index} failed");
        }
    }

    #[test]
    fn test_compute_depth_does_not_mutate_book() {
        let book = BookState::new(7, [(dec!(1), dec!(1))], [(dec!(2), dec!(1))]);
        let before = book.clone();

        let chart = compute_depth(&book);

        assert_eq!(book, before);
        assert_eq!(chart.bids().len(), 1);
        assert_eq!(chart.asks().len(), 1);
        assert_eq!(chart.max_cumulative(), Some(dec!(1)));
        assert_eq!(chart.price_range(), Some((dec!(1), dec!(2))));
    }

    #[test]
    fn test_cumulative_depth_sorts_unsorted_levels() {
        let (points, diagnostics) = cumulative_depth(
            Side::Bid,
            [(dec!(8), dec!(1)), (dec!(10), dec!(5)), (dec!(9), dec!(3))],
        );

        assert_eq!(
            points,
            vec![
                DepthPoint::new(dec!(10), dec!(5), Side::Bid),
                DepthPoint::new(dec!(9), dec!(8), Side::Bid),
                DepthPoint::new(dec!(8), dec!(9), Side::Bid),
            ]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_cumulative_depth_reports_monotonicity_violation() {
        // Corrupt input: a negative quantity can never come from a BookState
        let (points, diagnostics) = cumulative_depth(
            Side::Ask,
            [(dec!(11), dec!(4)), (dec!(12), dec!(-1)), (dec!(13), dec!(2))],
        );

        assert_eq!(points.len(), 3, "best-effort output is still produced");
        assert_eq!(
            diagnostics,
            vec![DepthDiagnostic {
                side: Side::Ask,
                index: 1,
                previous: dec!(4),
                current: dec!(3),
            }]
        );
    }
}
