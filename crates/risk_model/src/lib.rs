//! Pure economic model for lending-market risk scenarios
//! No ledger access, no I/O: fixed-point scaling, rate curves, capacity math

pub mod market;
pub mod rate;
pub mod scale;

// Re-export commonly used types
pub use market::*;
pub use rate::{MarketRates, RateCurve, SECONDS_PER_YEAR};
pub use scale::{ScaleError, Wad};
