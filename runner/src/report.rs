//! Scenario results and their text/JSON rendering

use crate::exit_codes;
use alloy_primitives::Address;
use risk_model::Wad;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Runner state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Funding,
    Positioned,
    Searching,
    Liquidating,
    Completed,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Funding => "funding",
            Phase::Positioned => "positioned",
            Phase::Searching => "searching",
            Phase::Liquidating => "liquidating",
            Phase::Completed => "completed",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Fund,
    Approve,
    Supply,
    Borrow,
    Perturb,
    Liquidate,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Fund => "fund",
            ActionKind::Approve => "approve",
            ActionKind::Supply => "supply",
            ActionKind::Borrow => "borrow",
            ActionKind::Perturb => "perturb",
            ActionKind::Liquidate => "liquidate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub asset: Address,
    pub symbol: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub feed: Address,
    pub price: String,
}

/// Account and market state at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub block_number: u64,
    pub account: Address,
    pub collateral: Vec<Holding>,
    /// Signed base balance in whole tokens, negative when borrowed
    pub base_balance: String,
    pub collateral_value_usd: Wad,
    pub debt_value_usd: Wad,
    /// Liquidation capacity: debt above this makes the account liquidatable
    pub max_debt_usd: Wad,
    pub utilization: Wad,
    pub prices: Vec<PricePoint>,
    pub liquidatable: bool,
}

impl Snapshot {
    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.collateral.iter().find(|h| h.symbol == symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// 1-based position in the scenario
    pub index: u32,
    pub action: ActionKind,
    pub params: BTreeMap<String, String>,
    pub block_number: u64,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// Predicate held after `search_step` perturbations and the position was absorbed
    LiquidationTriggered { search_step: u32 },
    /// Search budget spent without the account becoming liquidatable
    Exhausted { steps: u32 },
    Aborted,
    /// No stress phase was planned
    Unstressed,
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOutcome::LiquidationTriggered { search_step } => {
                write!(f, "liquidation triggered at search step {search_step}")
            }
            ScenarioOutcome::Exhausted { steps } => write!(f, "exhausted after {steps} steps"),
            ScenarioOutcome::Aborted => f.write_str("aborted"),
            ScenarioOutcome::Unstressed => f.write_str("completed (no stress phase)"),
        }
    }
}

/// Where and why a scenario stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub phase: Phase,
    /// Index the failing step would have had
    pub step: u32,
    pub reason: String,
    /// Last snapshot taken before the failure
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateReport {
    pub label: String,
    pub utilization: Wad,
    pub supply_apr: String,
    pub borrow_apr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub network: String,
    pub account: Address,
    pub outcome: ScenarioOutcome,
    /// Completed or Aborted
    pub phase: Phase,
    /// Perturbations applied by the threshold search
    pub search_steps: u32,
    pub steps: Vec<ScenarioStep>,
    /// Position once established, before any stress
    pub before: Option<Snapshot>,
    /// Final state
    pub after: Option<Snapshot>,
    pub rates: Vec<RateReport>,
    pub abort: Option<AbortInfo>,
}

impl ScenarioResult {
    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            ScenarioOutcome::LiquidationTriggered { .. } | ScenarioOutcome::Unstressed => exit_codes::OK,
            ScenarioOutcome::Exhausted { .. } => exit_codes::EXHAUSTED,
            ScenarioOutcome::Aborted => exit_codes::ABORTED,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn write_snapshot(f: &mut fmt::Formatter<'_>, title: &str, snapshot: &Snapshot) -> fmt::Result {
    writeln!(f, "{} (block {})", title, snapshot.block_number)?;
    for holding in &snapshot.collateral {
        writeln!(f, "  collateral {:<8} {}", holding.symbol, holding.amount)?;
    }
    writeln!(f, "  base balance        {}", snapshot.base_balance)?;
    writeln!(f, "  collateral value    ${}", snapshot.collateral_value_usd)?;
    writeln!(f, "  debt value          ${}", snapshot.debt_value_usd)?;
    writeln!(f, "  max debt            ${}", snapshot.max_debt_usd)?;
    writeln!(f, "  utilization         {}", snapshot.utilization)?;
    for point in &snapshot.prices {
        writeln!(f, "  price {}  {}", point.feed, point.price)?;
    }
    writeln!(f, "  liquidatable        {}", snapshot.liquidatable)
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenario {} on {}", self.scenario, self.network)?;
        writeln!(f, "Account  {}", self.account)?;
        writeln!(f, "Outcome  {}", self.outcome)?;
        writeln!(f, "Phase    {}", self.phase)?;
        writeln!(f)?;

        writeln!(
            f,
            "{:>4}  {:<10} {:>10}  {:>22}  {:>22}  {:<5}  params",
            "#", "action", "block", "collateral $", "debt $", "liq"
        )?;
        for step in &self.steps {
            let params: Vec<String> = step.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            writeln!(
                f,
                "{:>4}  {:<10} {:>10}  {:>22}  {:>22}  {:<5}  {}",
                step.index,
                step.action.to_string(),
                step.block_number,
                step.snapshot.collateral_value_usd.to_string(),
                step.snapshot.debt_value_usd.to_string(),
                step.snapshot.liquidatable,
                params.join(" ")
            )?;
        }

        if let Some(before) = &self.before {
            writeln!(f)?;
            write_snapshot(f, "Before", before)?;
        }
        if let Some(after) = &self.after {
            writeln!(f)?;
            write_snapshot(f, "After", after)?;
        }

        if !self.rates.is_empty() {
            writeln!(f)?;
            writeln!(f, "Rates")?;
            for rate in &self.rates {
                writeln!(
                    f,
                    "  {:<14} utilization {}  supply APR {}  borrow APR {}",
                    rate.label, rate.utilization, rate.supply_apr, rate.borrow_apr
                )?;
            }
        }

        if let Some(abort) = &self.abort {
            writeln!(f)?;
            writeln!(f, "Aborted in {} at step {}: {}", abort.phase, abort.step, abort.reason)?;
            match &abort.snapshot {
                Some(snapshot) => write_snapshot(f, "Last known state", snapshot)?,
                None => writeln!(f, "No snapshot was taken before the failure")?,
            }
        }
        Ok(())
    }
}
