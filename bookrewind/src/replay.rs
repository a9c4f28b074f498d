use crate::{
    Side,
    book::BookState,
    dataset::{DeltaLog, Snapshot},
    delta::{ChangeKind, Delta, apply_backward, apply_forward},
    error::ReplayError,
};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace, warn};

/// Direction a [`ReplayEngine`] walks the delta log in.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum Direction {
    Forward,
    Backward,
}

/// Phase of a [`ReplayEngine`].
///
/// The only transitions are [`ReplayPhase::begin`] (`Idle` -> `Replaying`) and dropping the
/// returned [`ReplayGuard`] (`Replaying` -> `Idle`).
///
/// Note that [`ReplayEngine`] replays through `&mut self`, so the borrow checker already stops a
/// second request reaching an engine mid-replay and `begin` never observes `Replaying` there.
/// The phase records progress for callers inspecting the engine. Re-entrant and concurrent
/// requests are rejected by [`SessionHandle`](crate::session::SessionHandle), whose `try_lock`
/// fails while a replay holds the session.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum ReplayPhase {
    #[default]
    Idle,
    Replaying,
}

impl ReplayPhase {
    /// Enter the `Replaying` phase, or reject with [`ReplayError::Busy`] if already in it.
    pub fn begin(&mut self) -> Result<ReplayGuard<'_>, ReplayError> {
        match *self {
            ReplayPhase::Idle => {
                *self = ReplayPhase::Replaying;
                Ok(ReplayGuard { phase: self })
            }
            ReplayPhase::Replaying => {
                debug!("rejecting re-entrant replay request");
                Err(ReplayError::Busy)
            }
        }
    }
}

/// Returns its [`ReplayPhase`] to `Idle` when dropped.
#[derive(Debug)]
pub struct ReplayGuard<'a> {
    phase: &'a mut ReplayPhase,
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        *self.phase = ReplayPhase::Idle;
    }
}

/// Validated slice of the [`DeltaLog`] moving a book from nonce `from` to nonce `to`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ReplayPlan {
    pub from: u64,
    pub to: u64,
    pub direction: Direction,
    /// Indexes of the [`DeltaLog`] entries to apply (or undo).
    pub entries: Range<usize>,
}

impl ReplayPlan {
    /// Select the deltas between nonce `from` and nonce `to`.
    ///
    /// - Forward (`from <= to`): deltas with `from < nonce <= to`, ascending.
    /// - Backward (`from > to`): deltas with `to < nonce <= from`, undone descending.
    pub fn new(log: &DeltaLog, from: u64, to: u64) -> Result<Self, ReplayError> {
        let start = log.boundary(from)?;
        let end = log.boundary(to)?;

        let (direction, entries) = if from <= to {
            (Direction::Forward, start..end)
        } else {
            (Direction::Backward, end..start)
        };

        Ok(Self {
            from,
            to,
            direction,
            entries,
        })
    }

    /// Number of deltas the plan applies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One delta applied to the book during a replay.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ReplayStep {
    /// Nonce of the applied (or undone) delta.
    pub nonce: u64,
    /// Nonce the book reflects after the step.
    pub book_nonce: u64,
    pub direction: Direction,
    pub side: Side,
    pub kind: ChangeKind,
    pub price: Decimal,
    pub before: Option<Decimal>,
    pub after: Option<Decimal>,
}

/// Receives every [`ReplayStep`] of a replay, in application order.
///
/// Runs while the replay is in progress, so a navigation requested from inside it is rejected.
pub trait ReplayObserver {
    fn on_step(&mut self, step: &ReplayStep);
}

impl<F> ReplayObserver for F
where
    F: FnMut(&ReplayStep),
{
    fn on_step(&mut self, step: &ReplayStep) {
        self(step)
    }
}

/// [`ReplayObserver`] that ignores every step.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoObserver;

impl ReplayObserver for NoObserver {
    fn on_step(&mut self, _: &ReplayStep) {}
}

/// Outcome of a successful replay.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ReplaySummary {
    pub from: u64,
    pub to: u64,
    pub direction: Direction,
    /// Number of deltas applied (or undone).
    pub steps: usize,
    /// Nonce of the snapshot the book was re-anchored on before replaying, if any.
    pub anchor: Option<u64>,
}

/// Moves a [`BookState`] between nonces of a [`DeltaLog`].
///
/// Every request is validated in full before the first mutation, so a rejected request leaves
/// the book untouched.
#[derive(Debug, Default)]
pub struct ReplayEngine {
    phase: ReplayPhase,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    /// Replay the `book` from its current nonce to `target`.
    pub fn replay<Observer>(
        &mut self,
        book: &mut BookState,
        log: &DeltaLog,
        target: u64,
        observer: &mut Observer,
    ) -> Result<ReplaySummary, ReplayError>
    where
        Observer: ReplayObserver,
    {
        let _guard = self.phase.begin()?;
        let plan = plan_or_report(log, book.current_nonce(), target)?;

        apply_plan(book, log, &plan, observer);

        Ok(ReplaySummary {
            from: plan.from,
            to: plan.to,
            direction: plan.direction,
            steps: plan.len(),
            anchor: None,
        })
    }

    /// Reset the `book` to the `anchor` snapshot, then replay it to `target`.
    pub fn replay_from_anchor<Observer>(
        &mut self,
        book: &mut BookState,
        anchor: &Snapshot,
        log: &DeltaLog,
        target: u64,
        observer: &mut Observer,
    ) -> Result<ReplaySummary, ReplayError>
    where
        Observer: ReplayObserver,
    {
        let _guard = self.phase.begin()?;
        let from = book.current_nonce();
        let plan = plan_or_report(log, anchor.current_nonce(), target)?;

        debug!(
            from,
            anchor = anchor.current_nonce(),
            target,
            "re-anchoring order book on recorded snapshot"
        );
        book.clone_from(anchor);
        apply_plan(book, log, &plan, observer);

        Ok(ReplaySummary {
            from,
            to: plan.to,
            direction: plan.direction,
            steps: plan.len(),
            anchor: Some(anchor.current_nonce()),
        })
    }
}

fn plan_or_report(log: &DeltaLog, from: u64, to: u64) -> Result<ReplayPlan, ReplayError> {
    ReplayPlan::new(log, from, to).inspect_err(|error| {
        warn!(from, to, %error, "rejecting replay request, order book left unchanged");
    })
}

fn apply_plan<Observer>(
    book: &mut BookState,
    log: &DeltaLog,
    plan: &ReplayPlan,
    observer: &mut Observer,
) where
    Observer: ReplayObserver,
{
    let entries = log.entries();

    debug!(
        from = plan.from,
        to = plan.to,
        direction = %plan.direction,
        steps = plan.len(),
        "replaying order book deltas"
    );

    match plan.direction {
        Direction::Forward => {
            for entry in &entries[plan.entries.clone()] {
                let delta = &entry.delta;
                let before = book.level(delta.side, delta.price);
                let after = apply_forward(delta);

                book.write_level(delta.side, delta.price, after);
                book.set_nonce(delta.nonce);

                step(observer, book, delta, Direction::Forward, before, after);
            }
        }
        Direction::Backward => {
            for index in plan.entries.clone().rev() {
                let entry = &entries[index];
                let delta = &entry.delta;
                let before = book.level(delta.side, delta.price);
                let after = apply_backward(delta, entry.prior);

                // Undoing a delta leaves the book at the preceding delta, or at the target if
                // the preceding delta is outside of the plan
                let book_nonce = if index > plan.entries.start {
                    entries[index - 1].delta.nonce
                } else {
                    plan.to
                };

                book.write_level(delta.side, delta.price, after);
                book.set_nonce(book_nonce);

                step(observer, book, delta, Direction::Backward, before, after);
            }
        }
    }

    // Covers the empty plan, and a target inside a gap of the delta log
    book.set_nonce(plan.to);
}

fn step<Observer>(
    observer: &mut Observer,
    book: &BookState,
    delta: &Delta,
    direction: Direction,
    before: Option<Decimal>,
    after: Option<Decimal>,
) where
    Observer: ReplayObserver,
{
    let step = ReplayStep {
        nonce: delta.nonce,
        book_nonce: book.current_nonce(),
        direction,
        side: delta.side,
        kind: delta.kind,
        price: delta.price,
        before,
        after,
    };

    trace!(?step, "applied order book delta");
    observer.on_step(&step);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ValidationConfig, dataset::Dataset};
    use rust_decimal_macros::dec;

    fn dataset() -> Dataset {
        Dataset::new(
            vec![BookState::new(
                100,
                [(dec!(10), dec!(5)), (dec!(9), dec!(3))],
                [(dec!(11), dec!(4))],
            )],
            vec![
                Delta::new(101, Side::Bid, ChangeKind::Update, dec!(10), dec!(8)),
                Delta::new(102, Side::Bid, ChangeKind::Delete, dec!(9), dec!(3)),
                Delta::new(104, Side::Ask, ChangeKind::Insert, dec!(12), dec!(2)),
            ],
            &ValidationConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_replay_phase_transitions() {
        let mut phase = ReplayPhase::default();

        {
            let _guard = phase.begin().unwrap();
        }
        assert_eq!(phase, ReplayPhase::Idle);

        // A leaked guard leaves the phase Replaying, so the next request is rejected
        std::mem::forget(phase.begin().unwrap());
        assert_eq!(phase, ReplayPhase::Replaying);
        assert_eq!(phase.begin().unwrap_err(), ReplayError::Busy);
    }

    #[test]
    fn test_replay_plan() {
        struct TestCase {
            from: u64,
            to: u64,
            expected: Result<(Direction, Range<usize>), ReplayError>,
        }

        let dataset = dataset();

        let tests = vec![
            TestCase {
                // TC0: forward from the anchor
                from: 100,
                to: 102,
                expected: Ok((Direction::Forward, 0..2)),
            },
            TestCase {
                // TC1: backward to the anchor
                from: 104,
                to: 100,
                expected: Ok((Direction::Backward, 0..3)),
            },
            TestCase {
                // TC2: empty plan
                from: 101,
                to: 101,
                expected: Ok((Direction::Forward, 1..1)),
            },
            TestCase {
                // TC3: target in a gap of the log
                from: 100,
                to: 103,
                expected: Err(ReplayError::NonceNotFound { nonce: 103 }),
            },
            TestCase {
                // TC4: current nonce in a gap of the log
                from: 103,
                to: 100,
                expected: Err(ReplayError::NonceNotFound { nonce: 103 }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = ReplayPlan::new(dataset.log(), test.from, test.to)
                .map(|plan| (plan.direction, plan.entries));
            assert_eq!(actual, test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_replay_forward_then_backward() {
        let dataset = dataset();
        let mut engine = ReplayEngine::new();
        let mut book = dataset.anchor().clone();

        let summary = engine
            .replay(&mut book, dataset.log(), 101, &mut NoObserver)
            .unwrap();
        assert_eq!(summary.steps, 1);
        assert_eq!(book.level(Side::Bid, dec!(10)), Some(dec!(8)));
        assert_eq!(book.level(Side::Bid, dec!(9)), Some(dec!(3)));
        assert_eq!(book.current_nonce(), 101);

        engine
            .replay(&mut book, dataset.log(), 102, &mut NoObserver)
            .unwrap();
        assert_eq!(book.level(Side::Bid, dec!(9)), None);
        assert_eq!(book.len(Side::Bid), 1);

        let summary = engine
            .replay(&mut book, dataset.log(), 100, &mut NoObserver)
            .unwrap();
        assert_eq!(summary.direction, Direction::Backward);
        assert_eq!(summary.steps, 2);
        assert_eq!(&book, dataset.anchor());
        assert_eq!(engine.phase(), ReplayPhase::Idle);
    }

    #[test]
    fn test_replay_steps_track_book_nonce() {
        let dataset = dataset();
        let mut engine = ReplayEngine::new();
        let mut book = dataset.anchor().clone();
        engine
            .replay(&mut book, dataset.log(), 104, &mut NoObserver)
            .unwrap();

        let mut steps = Vec::new();
        let mut observer = |step: &ReplayStep| steps.push((step.nonce, step.book_nonce));
        engine
            .replay(&mut book, dataset.log(), 100, &mut observer)
            .unwrap();

        assert_eq!(steps, vec![(104, 102), (102, 101), (101, 100)]);
    }

    #[test]
    fn test_replay_lookup_failure_leaves_book_unchanged() {
        let dataset = dataset();
        let mut engine = ReplayEngine::new();
        let mut book = dataset.anchor().clone();
        engine
            .replay(&mut book, dataset.log(), 102, &mut NoObserver)
            .unwrap();
        let before = book.clone();

        let actual = engine.replay(&mut book, dataset.log(), 103, &mut NoObserver);

        assert_eq!(actual, Err(ReplayError::NonceNotFound { nonce: 103 }));
        assert_eq!(book, before);
        assert_eq!(engine.phase(), ReplayPhase::Idle);
    }

    #[test]
    fn test_replay_from_anchor() {
        let dataset = dataset();
        let mut engine = ReplayEngine::new();
        let mut book = dataset.anchor().clone();
        engine
            .replay(&mut book, dataset.log(), 104, &mut NoObserver)
            .unwrap();

        let summary = engine
            .replay_from_anchor(&mut book, dataset.anchor(), dataset.log(), 101, &mut NoObserver)
            .unwrap();

        assert_eq!(summary.from, 104);
        assert_eq!(summary.anchor, Some(100));
        assert_eq!(summary.direction, Direction::Forward);
        assert_eq!(summary.steps, 1);
        assert_eq!(book.current_nonce(), 101);
        assert_eq!(book.level(Side::Bid, dec!(10)), Some(dec!(8)));
        assert_eq!(book.level(Side::Ask, dec!(12)), None);
    }
}
