use crate::{
    book::BookState,
    config::{AnchorPolicy, ReplayConfig},
    dataset::{Dataset, RecordedBook},
    depth::{DepthChart, compute_depth},
    error::{BookRewindError, ReplayError},
    replay::{NoObserver, ReplayEngine, ReplayObserver, ReplayPhase, ReplaySummary},
};
use parking_lot::Mutex;
use std::{ops::RangeInclusive, sync::Arc};
use tracing::{debug, info};

/// Caller owned replay context: the recorded [`Dataset`], the [`BookState`] being navigated and
/// the [`ReplayEngine`] moving it.
#[derive(Debug)]
pub struct Session {
    dataset: Dataset,
    book: BookState,
    engine: ReplayEngine,
    config: ReplayConfig,
}

impl Session {
    /// Start a session on the earliest snapshot of the [`Dataset`], or on the configured
    /// `start_nonce`.
    pub fn new(dataset: Dataset, config: &ReplayConfig) -> Result<Self, ReplayError> {
        let mut session = Self {
            book: dataset.anchor().clone(),
            dataset,
            engine: ReplayEngine::new(),
            config: *config,
        };

        if let Some(start) = config.start_nonce {
            session.replay_to(start)?;
        }

        info!(
            nonce = session.current_nonce(),
            min_nonce = session.dataset.min_nonce(),
            max_nonce = session.dataset.max_nonce(),
            anchor = ?session.config.anchor,
            "started order book replay session"
        );

        Ok(session)
    }

    /// Validate a [`RecordedBook`] dump and start a session on it.
    pub fn from_recorded(
        recorded: RecordedBook,
        config: &ReplayConfig,
    ) -> Result<Self, BookRewindError> {
        let dataset = Dataset::from_recorded(recorded, &config.validation)?;
        Self::new(dataset, config).map_err(BookRewindError::from)
    }

    pub fn state(&self) -> &BookState {
        &self.book
    }

    pub fn current_nonce(&self) -> u64 {
        self.book.current_nonce()
    }

    /// Range of nonces [`Self::reconstruct_state`] may be requested with.
    pub fn nonce_range(&self) -> RangeInclusive<u64> {
        self.dataset.nonce_range()
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn phase(&self) -> ReplayPhase {
        self.engine.phase()
    }

    /// Move the session's [`BookState`] to the `target` nonce.
    pub fn replay_to(&mut self, target: u64) -> Result<ReplaySummary, ReplayError> {
        self.replay_to_with(target, &mut NoObserver)
    }

    /// Move the session's [`BookState`] to the `target` nonce, reporting every applied delta to
    /// the `observer`.
    pub fn replay_to_with<Observer>(
        &mut self,
        target: u64,
        observer: &mut Observer,
    ) -> Result<ReplaySummary, ReplayError>
    where
        Observer: ReplayObserver,
    {
        match self.anchor_for(target) {
            Some(index) => {
                let anchor = &self.dataset.snapshots()[index];
                info!(
                    from = self.book.current_nonce(),
                    anchor = anchor.current_nonce(),
                    target,
                    "re-anchoring replay on nearest recorded snapshot"
                );
                self.engine.replay_from_anchor(
                    &mut self.book,
                    anchor,
                    self.dataset.log(),
                    target,
                    observer,
                )
            }
            None => self
                .engine
                .replay(&mut self.book, self.dataset.log(), target, observer),
        }
    }

    /// Reconstruct the [`BookState`] at the `target` nonce.
    ///
    /// On error the current state is left unchanged.
    pub fn reconstruct_state(&mut self, target: u64) -> Result<&BookState, ReplayError> {
        self.replay_to(target)?;
        Ok(&self.book)
    }

    pub fn reconstruct_state_with<Observer>(
        &mut self,
        target: u64,
        observer: &mut Observer,
    ) -> Result<&BookState, ReplayError>
    where
        Observer: ReplayObserver,
    {
        self.replay_to_with(target, observer)?;
        Ok(&self.book)
    }

    /// Cumulative depth of the current [`BookState`].
    pub fn compute_depth(&self) -> DepthChart {
        compute_depth(&self.book)
    }

    /// Index of the snapshot to re-anchor on before replaying to `target`, if any.
    ///
    /// Only a snapshot [`Dataset::nearest_snapshot`] considers safe, and fewer deltas away from
    /// `target` than the current state, is worth re-anchoring on. An invalid `target` yields
    /// `None`, leaving the engine to report it.
    fn anchor_for(&self, target: u64) -> Option<usize> {
        if self.config.anchor == AnchorPolicy::Current {
            return None;
        }

        let log = self.dataset.log();
        let target_boundary = log.boundary(target).ok()?;
        let current_boundary = log.boundary(self.book.current_nonce()).ok()?;

        let (index, snapshot) = self.dataset.nearest_snapshot(target)?;
        let snapshot_boundary = log.boundary(snapshot.current_nonce()).ok()?;

        let from_current = current_boundary.abs_diff(target_boundary);
        let from_snapshot = target_boundary - snapshot_boundary;

        (from_snapshot < from_current).then_some(index)
    }
}

/// Cloneable shared handle to a [`Session`], for callers that may issue navigation requests
/// while a replay is already running (eg/ from a [`ReplayObserver`] or another thread).
///
/// Requests never block: if the [`Session`] is in use they are rejected with
/// [`ReplayError::Busy`] and no state is touched.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Move the shared [`Session`] to the `target` nonce.
    pub fn navigate(&self, target: u64) -> Result<ReplaySummary, ReplayError> {
        self.navigate_with(target, &mut NoObserver)
    }

    pub fn navigate_with<Observer>(
        &self,
        target: u64,
        observer: &mut Observer,
    ) -> Result<ReplaySummary, ReplayError>
    where
        Observer: ReplayObserver,
    {
        let Some(mut session) = self.session.try_lock() else {
            debug!(target, "rejecting navigation request, replay in progress");
            return Err(ReplayError::Busy);
        };

        session.replay_to_with(target, observer)
    }

    /// Cumulative depth of the shared [`Session`]'s current state.
    pub fn depth(&self) -> Result<DepthChart, ReplayError> {
        self.with_session(Session::compute_depth)
    }

    /// Snapshot of the shared [`Session`]'s current state.
    pub fn state(&self) -> Result<BookState, ReplayError> {
        self.with_session(|session| session.state().clone())
    }

    pub fn current_nonce(&self) -> Result<u64, ReplayError> {
        self.with_session(Session::current_nonce)
    }

    fn with_session<F, T>(&self, read: F) -> Result<T, ReplayError>
    where
        F: FnOnce(&Session) -> T,
    {
        self.session
            .try_lock()
            .map(|session| read(&session))
            .ok_or(ReplayError::Busy)
    }
}
