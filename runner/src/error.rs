//! Scenario error taxonomy

use alloy_primitives::Address;
use risk_ledger::LedgerError;
use risk_model::{ModelError, ScaleError, Wad};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    /// Bad network, address, parameter or feed setup; nothing was attempted
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Requested borrow is above `maxDebt`; raised before any ledger write
    #[error("insufficient capacity: requested ${requested} of debt, max debt is ${max_debt}")]
    InsufficientCapacity { requested: Wad, max_debt: Wad },

    /// Any failed ledger call; fatal to the scenario, never retried
    #[error("ledger call failed: {0}")]
    LedgerCall(#[from] LedgerError),

    #[error("search exhausted after {steps} steps")]
    SearchExhausted { steps: u32 },

    #[error("non-monotonic predicate: true at step {triggered_at}, false again at step {flipped_at}")]
    NonMonotonicPredicate { triggered_at: u32, flipped_at: u32 },

    /// Missing feed or quote for a held asset
    #[error("stale read: no price for asset {asset} (feed {feed:?})")]
    StaleRead { asset: Address, feed: Option<Address> },

    #[error(transparent)]
    Scale(#[from] ScaleError),
}

impl From<ModelError> for ScenarioError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::StaleRead { asset, feed } => ScenarioError::StaleRead { asset, feed },
            ModelError::Scale(err) => ScenarioError::Scale(err),
        }
    }
}

impl ScenarioError {
    pub fn config(detail: impl Into<String>) -> Self {
        ScenarioError::Configuration(detail.into())
    }
}

pub type Result<T> = std::result::Result<T, ScenarioError>;
