use crate::{
    Side,
    book::BookState,
    config::{ValidationConfig, ValidationMode},
    delta::{ChangeKind, Delta, Prior, apply_forward},
    error::{DatasetError, ReplayError},
};
use derive_more::Constructor;
use itertools::{EitherOrBoth, Itertools};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{io::Read, ops::RangeInclusive};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

/// Name of the span wrapping the load time journaling pass over the delta log.
pub const JOURNAL_SPAN_NAME: &str = "journal_recorded_deltas";

/// Fully specified [`BookState`] recorded at a nonce, used as a replay anchor.
pub type Snapshot = BookState;

/// Recorded order book dump, as produced by the data loading collaborator.
///
/// ```json
/// {
///     "states": [{ "nonce": 100, "bids": { "10": 5 }, "asks": { "11": 4 } }],
///     "deltas": [{ "type": "BID", "nonce": 101, "R": 10, "Q": 8, "TY": 2 }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct RecordedBook {
    #[serde(alias = "snapshots")]
    pub states: Vec<Snapshot>,
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

/// [`Delta`] paired with the [`Prior`] quantity of its level, journaled at load time.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct JournaledDelta {
    pub delta: Delta,
    pub prior: Prior,
}

/// Integrity issue found while journaling the recorded delta log.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum Inconsistency {
    #[error(
        "delta {nonce} deletes {side} {price} carrying {carried}, but the level rested with {prior}"
    )]
    DeleteQuantityMismatch {
        nonce: u64,
        side: Side,
        price: Decimal,
        carried: Decimal,
        prior: Decimal,
    },

    #[error("delta {nonce} inserts {side} {price} over an existing level of {existing}")]
    InsertOverExisting {
        nonce: u64,
        side: Side,
        price: Decimal,
        existing: Decimal,
    },

    #[error("delta {nonce} ({kind}) references absent level {side} {price}")]
    MissingLevel {
        nonce: u64,
        side: Side,
        price: Decimal,
        kind: ChangeKind,
    },

    #[error(
        "snapshot {nonce} records {side} {price} as {recorded:?}, but replay produced {replayed:?}"
    )]
    SnapshotMismatch {
        nonce: u64,
        side: Side,
        price: Decimal,
        recorded: Option<Decimal>,
        replayed: Option<Decimal>,
    },
}

impl Inconsistency {
    /// Determine if the issue means backward replay would not reproduce the recorded book.
    ///
    /// A [`ValidationMode::Strict`] dataset is rejected on the first such issue.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            Inconsistency::DeleteQuantityMismatch { .. } => true,
            Inconsistency::SnapshotMismatch { .. } => true,
            _ => false,
        }
    }

    /// Nonce of the delta or snapshot the issue was found at.
    pub fn nonce(&self) -> u64 {
        match self {
            Inconsistency::DeleteQuantityMismatch { nonce, .. }
            | Inconsistency::InsertOverExisting { nonce, .. }
            | Inconsistency::MissingLevel { nonce, .. }
            | Inconsistency::SnapshotMismatch { nonce, .. } => *nonce,
        }
    }
}

/// Navigable delta log: every recorded [`Delta`] after the anchor snapshot, in ascending nonce
/// order, each with its journaled [`Prior`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaLog {
    anchor: u64,
    snapshot_nonces: Vec<u64>,
    entries: Vec<JournaledDelta>,
}

impl DeltaLog {
    /// Nonce of the anchor snapshot, the earliest reconstructable state.
    pub fn min_nonce(&self) -> u64 {
        self.anchor
    }

    /// Latest reconstructable nonce.
    pub fn max_nonce(&self) -> u64 {
        let last_delta = self
            .entries
            .last()
            .map_or(self.anchor, |entry| entry.delta.nonce);
        let last_snapshot = self.snapshot_nonces.last().copied().unwrap_or(self.anchor);
        last_delta.max(last_snapshot)
    }

    pub fn entries(&self) -> &[JournaledDelta] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `nonce` names a reconstructable state: the anchor, a recorded snapshot or
    /// a recorded delta.
    pub fn contains(&self, nonce: u64) -> bool {
        nonce == self.anchor
            || self.snapshot_nonces.binary_search(&nonce).is_ok()
            || self
                .entries
                .binary_search_by_key(&nonce, |entry| entry.delta.nonce)
                .is_ok()
    }

    /// Index of the first entry *not* reflected by the state at `nonce`.
    ///
    /// The entries `[..boundary]` are exactly the deltas with a nonce `<= nonce`.
    pub fn boundary(&self, nonce: u64) -> Result<usize, ReplayError> {
        let (min, max) = (self.min_nonce(), self.max_nonce());
        if nonce < min || nonce > max {
            return Err(ReplayError::OutOfRange { nonce, min, max });
        }

        if !self.contains(nonce) {
            return Err(ReplayError::NonceNotFound { nonce });
        }

        Ok(self
            .entries
            .partition_point(|entry| entry.delta.nonce <= nonce))
    }
}

/// Immutable recorded history of one order book: snapshots plus the journaled [`DeltaLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    snapshots: Vec<Snapshot>,
    /// Indexes of the snapshots the journaled log reproduces exactly, ie/ safe to re-anchor on.
    anchors: Vec<usize>,
    log: DeltaLog,
    inconsistencies: Vec<Inconsistency>,
}

impl Dataset {
    /// Validate and journal a recorded order book history.
    ///
    /// Snapshots do not need to be pre-sorted. Of several snapshots sharing a nonce the first is
    /// kept, and any that differ from it are reported as [`Inconsistency::SnapshotMismatch`].
    /// Deltas must be strictly increasing by nonce. Deltas at or before the earliest snapshot
    /// are already reflected by it, and are dropped.
    pub fn new(
        mut snapshots: Vec<Snapshot>,
        deltas: Vec<Delta>,
        config: &ValidationConfig,
    ) -> Result<Self, DatasetError> {
        snapshots.sort_by_key(BookState::current_nonce);

        let mut conflicts = Vec::new();
        snapshots.dedup_by(|duplicate, kept| {
            let same_nonce = duplicate.current_nonce() == kept.current_nonce();
            if same_nonce {
                conflicts.extend(compare_snapshot(duplicate, kept));
            }
            same_nonce
        });

        let Some((anchor, later)) = snapshots.split_first() else {
            return Err(DatasetError::SnapshotsEmpty);
        };

        snapshots.iter().try_for_each(validate_snapshot)?;
        validate_nonces(&deltas)?;

        let first_pending = deltas.partition_point(|delta| delta.nonce <= anchor.current_nonce());
        if first_pending > 0 {
            debug!(
                anchor = anchor.current_nonce(),
                skipped = first_pending,
                "dropping deltas already reflected by the anchor snapshot"
            );
        }

        let mut journal = Journal::new(anchor.clone(), config);
        conflicts
            .into_iter()
            .try_for_each(|conflict| journal.record(conflict))?;
        info_span!(JOURNAL_SPAN_NAME, anchor = anchor.current_nonce())
            .in_scope(|| journal.run(&deltas[first_pending..], later))?;
        let Journal {
            entries,
            inconsistencies,
            verified,
            ..
        } = journal;

        let anchors = snapshots
            .iter()
            .enumerate()
            .filter(|(index, snapshot)| {
                *index == 0 || verified.binary_search(&snapshot.current_nonce()).is_ok()
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        let log = DeltaLog {
            anchor: anchor.current_nonce(),
            snapshot_nonces: snapshots.iter().map(BookState::current_nonce).collect(),
            entries,
        };

        info!(
            snapshots = snapshots.len(),
            deltas = log.len(),
            min_nonce = log.min_nonce(),
            max_nonce = log.max_nonce(),
            inconsistencies = inconsistencies.len(),
            anchors = anchors.len(),
            "loaded recorded order book dataset"
        );

        Ok(Self {
            snapshots,
            anchors,
            log,
            inconsistencies,
        })
    }

    /// Validate and journal a [`RecordedBook`] dump.
    pub fn from_recorded(
        recorded: RecordedBook,
        config: &ValidationConfig,
    ) -> Result<Self, DatasetError> {
        Self::new(recorded.states, recorded.deltas, config)
    }

    /// Deserialise a JSON [`RecordedBook`] dump from a reader, then validate and journal it.
    pub fn from_reader<R>(reader: R, config: &ValidationConfig) -> Result<Self, DatasetError>
    where
        R: Read,
    {
        let recorded = serde_json::from_reader::<_, RecordedBook>(reader)?;
        Self::from_recorded(recorded, config)
    }

    /// Deserialise a JSON [`RecordedBook`] dump from a string, then validate and journal it.
    pub fn from_json_str(input: &str, config: &ValidationConfig) -> Result<Self, DatasetError> {
        let recorded = serde_json::from_str::<RecordedBook>(input)?;
        Self::from_recorded(recorded, config)
    }

    /// Earliest snapshot, the session start anchor.
    pub fn anchor(&self) -> &Snapshot {
        &self.snapshots[0]
    }

    /// All snapshots in ascending nonce order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Latest snapshot at or before `target` that is safe to re-anchor on, with its index in
    /// [`Self::snapshots`].
    ///
    /// Only the earliest snapshot and later snapshots the journaled log was verified to reproduce
    /// qualify. A snapshot that failed (or skipped) verification would put the book on a
    /// different history than the journaled priors undo.
    pub fn nearest_snapshot(&self, target: u64) -> Option<(usize, &Snapshot)> {
        let position = self
            .anchors
            .partition_point(|index| self.snapshots[*index].current_nonce() <= target);

        position.checked_sub(1).map(|position| {
            let index = self.anchors[position];
            (index, &self.snapshots[index])
        })
    }

    pub fn log(&self) -> &DeltaLog {
        &self.log
    }

    /// Issues found at load time and kept by a [`ValidationMode::Lenient`] validation.
    pub fn inconsistencies(&self) -> &[Inconsistency] {
        &self.inconsistencies
    }

    pub fn min_nonce(&self) -> u64 {
        self.log.min_nonce()
    }

    pub fn max_nonce(&self) -> u64 {
        self.log.max_nonce()
    }

    /// Range of nonces a navigation control may request.
    pub fn nonce_range(&self) -> RangeInclusive<u64> {
        self.min_nonce()..=self.max_nonce()
    }
}

/// Single forward pass over the delta log recording each level's [`Prior`] and checking the
/// recorded history against itself.
#[derive(Debug)]
struct Journal {
    book: BookState,
    config: ValidationConfig,
    entries: Vec<JournaledDelta>,
    inconsistencies: Vec<Inconsistency>,
    /// Nonces of later snapshots that matched the replayed book, ascending.
    verified: Vec<u64>,
}

impl Journal {
    fn new(anchor: BookState, config: &ValidationConfig) -> Self {
        Self {
            book: anchor,
            config: *config,
            entries: Vec::new(),
            inconsistencies: Vec::new(),
            verified: Vec::new(),
        }
    }

    fn run(&mut self, deltas: &[Delta], later: &[Snapshot]) -> Result<(), DatasetError> {
        self.entries.reserve(deltas.len());
        let mut later = later.iter().peekable();

        for delta in deltas {
            while let Some(snapshot) =
                later.next_if(|snapshot| snapshot.current_nonce() < delta.nonce)
            {
                self.verify_snapshot(snapshot)?;
            }

            let prior = self.book.level(delta.side, delta.price);
            if let Some(inconsistency) = check_delta(delta, prior) {
                self.record(inconsistency)?;
            }

            self.book
                .write_level(delta.side, delta.price, apply_forward(delta));
            self.book.set_nonce(delta.nonce);
            self.entries
                .push(JournaledDelta::new(*delta, Prior::from(prior)));
        }

        later.try_for_each(|snapshot| self.verify_snapshot(snapshot))
    }

    fn verify_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), DatasetError> {
        if !self.config.verify_snapshots {
            return Ok(());
        }

        let mismatches = compare_snapshot(snapshot, &self.book);
        if mismatches.is_empty() {
            debug!(
                nonce = snapshot.current_nonce(),
                "snapshot matches replayed order book"
            );
            self.verified.push(snapshot.current_nonce());
        }

        mismatches
            .into_iter()
            .try_for_each(|mismatch| self.record(mismatch))
    }

    fn record(&mut self, inconsistency: Inconsistency) -> Result<(), DatasetError> {
        warn!(
            nonce = inconsistency.nonce(),
            %inconsistency,
            "recorded order book history is inconsistent"
        );

        if self.config.mode == ValidationMode::Strict && inconsistency.is_integrity_violation() {
            return Err(DatasetError::Inconsistent(inconsistency));
        }

        self.inconsistencies.push(inconsistency);
        Ok(())
    }
}

fn check_delta(delta: &Delta, prior: Option<Decimal>) -> Option<Inconsistency> {
    let Delta {
        nonce,
        side,
        kind,
        price,
        quantity,
    } = *delta;

    match (kind, prior) {
        (ChangeKind::Insert, Some(existing)) => Some(Inconsistency::InsertOverExisting {
            nonce,
            side,
            price,
            existing,
        }),
        (ChangeKind::Delete | ChangeKind::Update, None) => Some(Inconsistency::MissingLevel {
            nonce,
            side,
            price,
            kind,
        }),
        (ChangeKind::Delete, Some(prior)) if prior != quantity => {
            Some(Inconsistency::DeleteQuantityMismatch {
                nonce,
                side,
                price,
                carried: quantity,
                prior,
            })
        }
        _ => None,
    }
}

fn compare_snapshot(snapshot: &Snapshot, replayed: &BookState) -> Vec<Inconsistency> {
    let nonce = snapshot.current_nonce();

    [Side::Bid, Side::Ask]
        .into_iter()
        .flat_map(move |side| {
            snapshot
                .side(side)
                .iter()
                .merge_join_by(replayed.side(side).iter(), |(a, _), (b, _)| a.cmp(b))
                .filter_map(move |pair| {
                    let (price, recorded, replayed) = match pair {
                        EitherOrBoth::Both((price, recorded), (_, replayed)) => {
                            if recorded == replayed {
                                return None;
                            }
                            (*price, Some(*recorded), Some(*replayed))
                        }
                        EitherOrBoth::Left((price, recorded)) => (*price, Some(*recorded), None),
                        EitherOrBoth::Right((price, replayed)) => (*price, None, Some(*replayed)),
                    };

                    Some(Inconsistency::SnapshotMismatch {
                        nonce,
                        side,
                        price,
                        recorded,
                        replayed,
                    })
                })
        })
        .collect()
}

fn validate_snapshot(snapshot: &Snapshot) -> Result<(), DatasetError> {
    [Side::Bid, Side::Ask].into_iter().try_for_each(|side| {
        match snapshot
            .side(side)
            .iter()
            .find(|(_, quantity)| **quantity <= Decimal::ZERO)
        {
            Some((price, quantity)) => Err(DatasetError::InvalidSnapshot {
                nonce: snapshot.current_nonce(),
                side,
                price: *price,
                quantity: *quantity,
            }),
            None => Ok(()),
        }
    })
}

fn validate_nonces(deltas: &[Delta]) -> Result<(), DatasetError> {
    match deltas
        .iter()
        .tuple_windows()
        .find(|(prev, next)| next.nonce <= prev.nonce)
    {
        Some((prev, next)) => Err(DatasetError::NonceNotIncreasing {
            prev: prev.nonce,
            next: next.nonce,
        }),
        None => Ok(()),
    }
}
