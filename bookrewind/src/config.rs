use serde::{Deserialize, Serialize};

/// Top-level configuration of a replay [`Session`](crate::session::Session).
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub struct ReplayConfig {
    /// How a navigation request picks the state it replays from.
    #[serde(default)]
    pub anchor: AnchorPolicy,

    /// Nonce to reconstruct when the session starts, instead of the earliest snapshot.
    #[serde(default)]
    pub start_nonce: Option<u64>,

    /// Load time validation of the recorded dataset.
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Replay anchor selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    /// Re-anchor on a recorded snapshot whenever it is fewer deltas away from the target than
    /// the current state.
    #[default]
    Nearest,

    /// Always replay from the current state.
    Current,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,

    /// Compare every later snapshot with the state replayed up to its nonce.
    #[serde(default = "default_verify_snapshots")]
    pub verify_snapshots: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            verify_snapshots: default_verify_snapshots(),
        }
    }
}

fn default_verify_snapshots() -> bool {
    true
}

/// Treatment of integrity violations found while loading a dataset.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Log and keep the violation as a diagnostic.
    #[default]
    Lenient,

    /// Reject the dataset on the first violation.
    Strict,
}
