#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # BookRewind
//! BookRewind reconstructs a recorded limit order book at any nonce of its event stream by
//! replaying signed deltas, forwards or backwards, from a known snapshot.
//!
//! ## Overview
//! * **Book**: the [`BookState`](book::BookState) store of price levels per [`Side`], tagged with
//!   the nonce it reflects.
//! * **Delta**: recorded [`Delta`](delta::Delta) events and the direction-dependent update rule
//!   ([`apply_forward`](delta::apply_forward) & [`apply_backward`](delta::apply_backward)).
//! * **Dataset**: immutable snapshots and the journaled [`DeltaLog`](dataset::DeltaLog), validated
//!   once at load time.
//! * **Replay**: the [`ReplayEngine`](replay::ReplayEngine) moving a book between nonces, guarded
//!   by an explicit [`ReplayPhase`](replay::ReplayPhase) state machine.
//! * **Depth**: the cumulative depth chart consumed by rendering sinks.
//! * **Session**: the caller owned context tying the above together, plus a shared
//!   [`SessionHandle`](session::SessionHandle) that rejects re-entrant navigation.
//!
//! ## Getting Started
//! ```
//! use bookrewind::{
//!     Side,
//!     book::BookState,
//!     config::ReplayConfig,
//!     dataset::Dataset,
//!     delta::{ChangeKind, Delta},
//!     session::Session,
//! };
//! use rust_decimal::Decimal;
//!
//! let snapshot = BookState::new(
//!     100,
//!     [(Decimal::from(10), Decimal::from(5)), (Decimal::from(9), Decimal::from(3))],
//!     [(Decimal::from(11), Decimal::from(4))],
//! );
//! let deltas = vec![
//!     Delta::new(101, Side::Bid, ChangeKind::Update, Decimal::from(10), Decimal::from(8)),
//!     Delta::new(102, Side::Bid, ChangeKind::Delete, Decimal::from(9), Decimal::from(3)),
//! ];
//!
//! let config = ReplayConfig::default();
//! let dataset = Dataset::new(vec![snapshot.clone()], deltas, &config.validation).unwrap();
//! let mut session = Session::new(dataset, &config).unwrap();
//!
//! session.reconstruct_state(102).unwrap();
//! assert_eq!(session.state().level(Side::Bid, Decimal::from(9)), None);
//!
//! let rewound = session.reconstruct_state(100).unwrap();
//! assert_eq!(rewound, &snapshot);
//!
//! let depth = session.compute_depth();
//! assert_eq!(depth.points().len(), 3);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// [`BookState`](book::BookState) price level store and [`Level`](book::Level) type.
pub mod book;

/// Recorded order book [`Delta`](delta::Delta)s and the invertible update rule.
pub mod delta;

/// Immutable recorded snapshots & delta log, with load time validation.
pub mod dataset;

/// Delta selection and application between two nonces.
pub mod replay;

/// Cumulative depth aggregation of a [`BookState`](book::BookState).
pub mod depth;

/// Caller owned replay [`Session`](session::Session) and its shared handle.
pub mod session;

/// Serde deserialisable [`ReplayConfig`](config::ReplayConfig).
pub mod config;

/// All errors generated in `bookrewind`.
pub mod error;

/// Default `tracing` subscriber initialisation.
pub mod logging;

/// Side of the order book a price level rests on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Side {
    #[serde(rename = "BID", alias = "bid", alias = "Bid", alias = "bids")]
    Bid,
    #[serde(rename = "ASK", alias = "ask", alias = "Ask", alias = "asks")]
    Ask,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Bid => "bid",
                Side::Ask => "ask",
            }
        )
    }
}
