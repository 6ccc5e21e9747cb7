//! Lending-market risk scenario engine
//!
//! Funds an account, builds a leveraged position, perturbs a price or the
//! passage of time until the position becomes liquidatable, absorbs it and
//! reports the state before and after.

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod funding;
pub mod model;
pub mod oracle;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod search;

pub use config::Config;
pub use error::{Result, ScenarioError};
pub use funding::{fund_account, ImpersonationGuard};
pub use model::MarketModel;
pub use oracle::OracleController;
pub use report::{Phase, ScenarioOutcome, ScenarioResult};
pub use runner::{BorrowTarget, Perturbation, ScenarioPlan, ScenarioRunner};
pub use scenarios::{build_plan, run_all, run_named, Overrides, ScenarioKind};
pub use search::{SearchOutcome, ThresholdSearch};
