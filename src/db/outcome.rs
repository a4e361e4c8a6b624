//! Outcome of a mutating store operation

use serde::{Deserialize, Serialize};

/// Success flag, number of affected records and a diagnostic message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub ok: bool,
    pub num_affected: u64,
    #[serde(default)]
    pub message: String,
}

impl Outcome {
    pub fn success(num_affected: u64) -> Self {
        Self {
            ok: true,
            num_affected,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            num_affected: 0,
            message: message.into(),
        }
    }

    /// Outcome for a store that had nothing to do
    pub fn untouched() -> Self {
        Self::success(0)
    }
}

/// Aggregation over the per-collection outcomes of one logical operation
pub trait OutcomeSet {
    /// True only when every component succeeded
    fn all_ok(&self) -> bool;

    /// Count policy for adds: every collection must have taken the records
    fn min_affected(&self) -> u64;

    /// Count policy for updates and deletes: any collection may be the one hit
    fn max_affected(&self) -> u64;

    /// Messages of failed components
    fn failure_messages(&self) -> Vec<&str>;
}

impl OutcomeSet for [Outcome] {
    fn all_ok(&self) -> bool {
        self.iter().all(|o| o.ok)
    }

    fn min_affected(&self) -> u64 {
        self.iter().map(|o| o.num_affected).min().unwrap_or(0)
    }

    fn max_affected(&self) -> u64 {
        self.iter().map(|o| o.num_affected).max().unwrap_or(0)
    }

    fn failure_messages(&self) -> Vec<&str> {
        self.iter()
            .filter(|o| !o.ok)
            .map(|o| o.message.as_str())
            .collect()
    }
}
