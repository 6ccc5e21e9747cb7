//! Stable exit codes for the scenario CLI.

/// Every scenario completed (liquidation triggered, or no stress phase).
pub const OK: i32 = 0;
/// Bad config, unknown scenario or network, or an unreadable config file.
pub const INVALID: i32 = 1;
/// The threshold search spent its budget without the account becoming liquidatable.
pub const EXHAUSTED: i32 = 2;
/// A scenario aborted on a ledger failure, capacity check or non-monotonic predicate.
pub const ABORTED: i32 = 3;
