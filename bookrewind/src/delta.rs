use crate::Side;
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of change a recorded [`Delta`] made to a price level.
///
/// Recorded as an integer code: `0 = Insert`, `1 = Delete`, `2 = Update`.
///
/// Note that the effect of a kind depends on the replay direction, see [`apply_forward`] and
/// [`apply_backward`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeKind {
    Insert,
    Delete,
    Update,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("unknown ChangeKind code: {0}")]
pub struct UnknownChangeKind(pub u8);

impl TryFrom<u8> for ChangeKind {
    type Error = UnknownChangeKind;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ChangeKind::Insert),
            1 => Ok(ChangeKind::Delete),
            2 => Ok(ChangeKind::Update),
            other => Err(UnknownChangeKind(other)),
        }
    }
}

impl From<ChangeKind> for u8 {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Insert => 0,
            ChangeKind::Delete => 1,
            ChangeKind::Update => 2,
        }
    }
}

/// Recorded change to one price level of the order book.
///
/// `quantity` is the level's quantity *after* an `Insert` or `Update`, and the quantity that
/// rested on the level *before* a `Delete`.
///
/// Deserialises from the recorded dump encoding (`type`, `TY`, `R`, `Q`) as well as from
/// descriptive field names.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Delta {
    pub nonce: u64,
    #[serde(rename = "type", alias = "side")]
    pub side: Side,
    #[serde(rename = "TY", alias = "kind")]
    pub kind: ChangeKind,
    #[serde(rename = "R", alias = "price")]
    pub price: Decimal,
    #[serde(rename = "Q", alias = "quantity")]
    pub quantity: Decimal,
}

/// Quantity a level held immediately before a [`Delta`] was applied forwards.
///
/// Journaled once at load time by the [`Dataset`](crate::dataset::Dataset), since an `Update`
/// does not carry the quantity it replaced.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum Prior {
    /// Not journaled, undo falls back to the [`ChangeKind`] rule.
    #[default]
    Unknown,
    /// The level was absent.
    Absent,
    /// The level rested with this quantity.
    Level(Decimal),
}

impl From<Option<Decimal>> for Prior {
    fn from(value: Option<Decimal>) -> Self {
        match value {
            Some(quantity) => Prior::Level(quantity),
            None => Prior::Absent,
        }
    }
}

/// Next quantity of the [`Delta`]'s level when replaying forwards, `None` meaning absent.
///
/// | kind     | next                |
/// |----------|---------------------|
/// | `Delete` | absent              |
/// | `Insert` | carried quantity    |
/// | `Update` | carried quantity    |
pub fn apply_forward(delta: &Delta) -> Option<Decimal> {
    match delta.kind {
        ChangeKind::Delete => None,
        ChangeKind::Insert | ChangeKind::Update => positive(delta.quantity),
    }
}

/// Next quantity of the [`Delta`]'s level when undoing it, `None` meaning absent.
///
/// | prior      | kind               | next                   |
/// |------------|--------------------|------------------------|
/// | `Level(q)` | any                | `q`                    |
/// | `Absent`   | any                | absent                 |
/// | `Unknown`  | `Delete`           | carried quantity       |
/// | `Unknown`  | `Insert`, `Update` | absent                 |
pub fn apply_backward(delta: &Delta, prior: Prior) -> Option<Decimal> {
    match (prior, delta.kind) {
        (Prior::Level(quantity), _) => positive(quantity),
        (Prior::Absent, _) => None,
        (Prior::Unknown, ChangeKind::Delete) => positive(delta.quantity),
        (Prior::Unknown, ChangeKind::Insert | ChangeKind::Update) => None,
    }
}

fn positive(quantity: Decimal) -> Option<Decimal> {
    (quantity > Decimal::ZERO).then_some(quantity)
}
