//! Scenario state machine
//!
//! `Init → Funding → Positioned → Searching → Liquidating → Completed`, with
//! `Aborted` reachable from every state. Each transition is a sequence of
//! ledger writes, and every write is followed by a snapshot that becomes the
//! step's observed post-state. A phase is entered before its first write, so
//! an abort names the transition that failed. Oracle overrides are torn down
//! on every exit.

use crate::error::{Result, ScenarioError};
use crate::funding::fund_account;
use crate::model::MarketModel;
use crate::oracle::OracleController;
use crate::report::{
    AbortInfo, ActionKind, Holding, Phase, PricePoint, RateReport, ScenarioOutcome, ScenarioResult,
    ScenarioStep, Snapshot,
};
use crate::search::{decayed_price, SearchOutcome, ThresholdSearch};
use alloy_primitives::{Address, U256};
use risk_ledger::{Erc20Token, LedgerClient};
use risk_model::rate::apr_percent;
use risk_model::scale::{format_signed, format_units};
use risk_model::{borrow_target, Wad};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioPlan {
    pub name: String,
    pub network: String,
    pub market: Address,
    pub funding: FundingPlan,
    /// None: stop after funding
    pub position: Option<PositionPlan>,
    /// None: stop once positioned
    pub stress: Option<StressPlan>,
    /// Native balance handed to the whale, hex wei
    pub whale_gas: String,
    /// Sample market rates around the position change
    pub report_rates: bool,
    /// Display names for token addresses
    pub labels: BTreeMap<Address, String>,
}

/// Seed transfer from an impersonated holder to the scenario account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPlan {
    pub token: Address,
    pub whale: Address,
    pub amount: U256,
}

/// Approve and supply the whole funded amount, then optionally borrow base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPlan {
    pub borrow: Option<BorrowTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowTarget {
    /// Fraction of `maxDebt`
    FractionOfCapacity(Wad),
    /// Exact base amount in smallest units
    Amount(U256),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressPlan {
    pub perturbation: Perturbation,
    pub search: ThresholdSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perturbation {
    /// `price_i = price_0 * decay^i` on a mocked feed
    PriceDecay { feed: Address, decay: Wad },
    /// Set the mocked feed to a fixed USD price
    PriceJump { feed: Address, price_usd: Wad },
    /// Advance ledger time so interest accrues on the debt
    DebtAccrual { interval_secs: u64 },
}

/// Perturbation with its feed setup resolved
#[derive(Clone, Copy)]
enum Driver {
    Decay { feed: Address, price_0: U256, decimals: u8, decay: Wad },
    Jump { feed: Address, price: U256, decimals: u8 },
    Accrue { interval_secs: u64 },
}

pub struct ScenarioRunner<'l, L: LedgerClient + ?Sized> {
    ledger: &'l L,
    plan: ScenarioPlan,
    model: MarketModel<'l, L>,
    oracle: OracleController<'l, L>,
    account: Address,
    liquidator: Address,
    phase: Phase,
    steps: Vec<ScenarioStep>,
    last_snapshot: Option<Snapshot>,
    before: Option<Snapshot>,
    rates: Vec<RateReport>,
    search_steps: u32,
}

impl<'l, L: LedgerClient + ?Sized> ScenarioRunner<'l, L> {
    /// Load the market and pick the position holder (first signer) and the
    /// liquidator (second signer)
    pub fn new(ledger: &'l L, plan: ScenarioPlan) -> Result<Self> {
        let signers = ledger.signers()?;
        let (account, liquidator) = match signers.as_slice() {
            [account, liquidator, ..] => (*account, *liquidator),
            _ => {
                return Err(ScenarioError::config(format!(
                    "need two signers (holder and liquidator), ledger has {}",
                    signers.len()
                )))
            }
        };

        let model = MarketModel::load(ledger, plan.market)?;

        Ok(Self {
            ledger,
            plan,
            model,
            oracle: OracleController::new(ledger),
            account,
            liquidator,
            phase: Phase::Init,
            steps: Vec::new(),
            last_snapshot: None,
            before: None,
            rates: Vec::new(),
            search_steps: 0,
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn liquidator(&self) -> Address {
        self.liquidator
    }

    /// Drive the plan to Completed or Aborted; failures land in the result
    pub fn run(mut self) -> ScenarioResult {
        log::info!("Scenario {} on {}: account {}", self.plan.name, self.plan.network, self.account);

        let executed = self.execute();
        let restored = self.oracle.restore_all();

        let (mut outcome, mut abort) = match executed {
            Ok(ScenarioOutcome::Exhausted { steps }) => {
                log::info!("Scenario {} exhausted its search after {} steps", self.plan.name, steps);
                let info = self.abort_info(&ScenarioError::SearchExhausted { steps });
                (ScenarioOutcome::Exhausted { steps }, Some(info))
            }
            Ok(outcome) => (outcome, None),
            Err(err) => {
                log::error!(
                    "Scenario {} aborted in {} at step {}: {}",
                    self.plan.name,
                    self.phase,
                    self.steps.len() + 1,
                    err
                );
                (ScenarioOutcome::Aborted, Some(self.abort_info(&err)))
            }
        };

        if let Err(err) = restored {
            if abort.is_none() {
                outcome = ScenarioOutcome::Aborted;
                abort = Some(self.abort_info(&err));
            }
        }

        self.phase = if abort.is_some() { Phase::Aborted } else { Phase::Completed };
        log::info!("Scenario {} finished: {}", self.plan.name, outcome);

        ScenarioResult {
            scenario: self.plan.name,
            network: self.plan.network,
            account: self.account,
            outcome,
            phase: self.phase,
            search_steps: self.search_steps,
            steps: self.steps,
            before: self.before,
            after: self.last_snapshot,
            rates: self.rates,
            abort,
        }
    }

    fn abort_info(&self, err: &ScenarioError) -> AbortInfo {
        AbortInfo {
            phase: self.phase,
            step: self.steps.len() as u32 + 1,
            reason: err.to_string(),
            snapshot: self.last_snapshot.clone(),
        }
    }

    fn execute(&mut self) -> Result<ScenarioOutcome> {
        self.enter(Phase::Funding);
        self.fund()?;

        let Some(position) = self.plan.position.clone() else {
            self.before = self.last_snapshot.clone();
            return Ok(ScenarioOutcome::Unstressed);
        };
        self.enter(Phase::Positioned);
        self.establish(&position)?;
        self.before = self.last_snapshot.clone();

        let Some(stress) = self.plan.stress.clone() else {
            return Ok(ScenarioOutcome::Unstressed);
        };
        self.enter(Phase::Searching);
        let Some(search_step) = self.search(&stress)? else {
            return Ok(ScenarioOutcome::Exhausted { steps: self.search_steps });
        };

        self.enter(Phase::Liquidating);
        self.liquidate()?;
        Ok(ScenarioOutcome::LiquidationTriggered { search_step })
    }

    fn enter(&mut self, next: Phase) {
        log::info!("Scenario {}: {} -> {}", self.plan.name, self.phase, next);
        self.phase = next;
    }

    fn label(&self, asset: Address) -> String {
        label(&self.plan.labels, asset)
    }

    /// Snapshot the post-state and append it as the next step
    fn record(&mut self, action: ActionKind, params: BTreeMap<String, String>) -> Result<()> {
        let snap = snapshot(self.ledger, &self.model, &self.oracle, self.account, &self.plan.labels)?;
        push_step(&mut self.steps, action, params, snap.clone());
        self.last_snapshot = Some(snap);
        Ok(())
    }

    fn fund(&mut self) -> Result<()> {
        let FundingPlan { token, whale, amount } = self.plan.funding.clone();
        let receipt = fund_account(self.ledger, token, whale, self.account, amount, &self.plan.whale_gas)?;

        let erc20 = Erc20Token::new(self.ledger, token);
        let decimals = erc20.decimals()?;
        let balance = erc20.balance_of(self.account)?;

        let params = BTreeMap::from([
            ("token".to_string(), self.label(token)),
            ("amount".to_string(), format_units(amount, decimals)),
            ("balance".to_string(), format_units(balance, decimals)),
            ("from".to_string(), whale.to_string()),
            ("tx".to_string(), receipt.tx_hash.to_string()),
        ]);
        self.record(ActionKind::Fund, params)
    }

    fn establish(&mut self, position: &PositionPlan) -> Result<()> {
        let FundingPlan { token, amount, .. } = self.plan.funding.clone();
        let market = self.model.market();
        let decimals = Erc20Token::new(self.ledger, token).decimals()?;
        let shown = format_units(amount, decimals);

        Erc20Token::new(self.ledger, token).approve(self.account, market.address(), amount)?;
        self.record(
            ActionKind::Approve,
            BTreeMap::from([
                ("token".to_string(), self.label(token)),
                ("spender".to_string(), market.address().to_string()),
                ("amount".to_string(), shown.clone()),
            ]),
        )?;

        let sample_around_supply = self.plan.report_rates && position.borrow.is_none();
        if sample_around_supply {
            self.sample_rates("before supply")?;
        }
        market.supply(self.account, token, amount)?;
        self.record(
            ActionKind::Supply,
            BTreeMap::from([("asset".to_string(), self.label(token)), ("amount".to_string(), shown)]),
        )?;
        if sample_around_supply {
            self.sample_rates("after supply")?;
        }

        if let Some(target) = position.borrow {
            if self.plan.report_rates {
                self.sample_rates("before borrow")?;
            }
            self.borrow(target)?;
            if self.plan.report_rates {
                self.sample_rates("after borrow")?;
            }
        }
        Ok(())
    }

    /// Borrow base up to `target`; the capacity check happens before any write
    fn borrow(&mut self, target: BorrowTarget) -> Result<()> {
        let state = self.model.refresh(self.account)?;
        let prices = self.model.read_prices(&self.oracle)?;
        let max_debt = self.model.liquidation_capacity_usd(&state, &prices)?;
        let borrow_capacity = self.model.borrow_capacity_usd(&state, &prices)?;
        let existing = self.model.debt_value_usd(&state, &prices)?;

        let info = self.model.info();
        let (base_token, base_decimals) = (info.base_token, info.base_decimals);
        let base_quote = prices
            .get(&info.base_price_feed)
            .copied()
            .ok_or(ScenarioError::StaleRead {
                asset: base_token,
                feed: Some(info.base_price_feed),
            })?;

        let (amount, value) = match target {
            BorrowTarget::FractionOfCapacity(fraction) => {
                let value = borrow_target(max_debt, fraction)?;
                (base_quote.amount_for(value, base_decimals)?, value)
            }
            BorrowTarget::Amount(amount) => (amount, base_quote.value_of(amount, base_decimals)?),
        };

        let requested = existing.checked_add(value)?;
        if requested > max_debt {
            return Err(ScenarioError::InsufficientCapacity { requested, max_debt });
        }

        log::info!(
            "Borrowing {} {} (${} of ${} max debt)",
            format_units(amount, base_decimals),
            self.label(base_token),
            value,
            max_debt
        );
        self.model.market().withdraw(self.account, base_token, amount)?;

        self.record(
            ActionKind::Borrow,
            BTreeMap::from([
                ("asset".to_string(), self.label(base_token)),
                ("amount".to_string(), format_units(amount, base_decimals)),
                ("value_usd".to_string(), value.to_string()),
                ("max_debt_usd".to_string(), max_debt.to_string()),
                ("borrow_capacity_usd".to_string(), borrow_capacity.to_string()),
            ]),
        )
    }

    fn sample_rates(&mut self, label: &str) -> Result<()> {
        let sample = self.model.rates()?;
        self.rates.push(RateReport {
            label: label.to_string(),
            utilization: sample.utilization,
            supply_apr: apr_percent(sample.supply_rate)?,
            borrow_apr: apr_percent(sample.borrow_rate)?,
        });
        Ok(())
    }

    fn driver(&mut self, perturbation: Perturbation) -> Result<Driver> {
        Ok(match perturbation {
            Perturbation::PriceDecay { feed, decay } => {
                let live = self.oracle.read(feed)?;
                self.oracle.install(feed, live.answer, live.decimals)?;
                Driver::Decay {
                    feed,
                    price_0: live.answer,
                    decimals: live.decimals,
                    decay,
                }
            }
            Perturbation::PriceJump { feed, price_usd } => {
                let live = self.oracle.read(feed)?;
                self.oracle.install(feed, live.answer, live.decimals)?;
                Driver::Jump {
                    feed,
                    price: price_usd.to_amount(live.decimals)?,
                    decimals: live.decimals,
                }
            }
            Perturbation::DebtAccrual { interval_secs } => Driver::Accrue { interval_secs },
        })
    }

    /// Run the threshold search; returns the step at which the account became
    /// liquidatable, or `None` when the budget ran out first
    fn search(&mut self, stress: &StressPlan) -> Result<Option<u32>> {
        let driver = self.driver(stress.perturbation)?;
        let initial = snapshot(self.ledger, &self.model, &self.oracle, self.account, &self.plan.labels)?;
        self.last_snapshot = Some(initial.clone());

        let ledger = self.ledger;
        let account = self.account;
        let model = &self.model;
        let oracle = &self.oracle;
        let labels = &self.plan.labels;
        let steps = &mut self.steps;
        let last_snapshot = &mut self.last_snapshot;

        let outcome = stress.search.run(
            initial,
            |i, _: &Snapshot| -> Result<Snapshot> {
                let mut params = BTreeMap::new();
                match driver {
                    Driver::Decay { feed, price_0, decimals, decay } => {
                        let price = decayed_price(price_0, decay, i)?;
                        oracle.set_price(feed, price)?;
                        params.insert("price".to_string(), format_units(price, decimals));
                    }
                    Driver::Jump { feed, price, decimals } => {
                        oracle.set_price(feed, price)?;
                        params.insert("price".to_string(), format_units(price, decimals));
                    }
                    Driver::Accrue { interval_secs } => {
                        ledger.increase_time(interval_secs)?;
                        let elapsed = interval_secs.saturating_mul(u64::from(i));
                        params.insert("elapsed_secs".to_string(), elapsed.to_string());
                    }
                }
                let snap = snapshot(ledger, model, oracle, account, labels)?;
                push_step(steps, ActionKind::Perturb, params, snap.clone());
                *last_snapshot = Some(snap.clone());
                Ok(snap)
            },
            |_, snap| Ok(snap.liquidatable),
        )?;

        match outcome {
            SearchOutcome::Triggered { step, confirmed_through, .. } => {
                self.search_steps = confirmed_through;
                Ok(Some(step))
            }
            SearchOutcome::Exhausted { steps, .. } => {
                self.search_steps = steps;
                Ok(None)
            }
            SearchOutcome::NonMonotonic { triggered_at, flipped_at, .. } => {
                self.search_steps = flipped_at;
                Err(ScenarioError::NonMonotonicPredicate { triggered_at, flipped_at })
            }
        }
    }

    fn liquidate(&mut self) -> Result<()> {
        let receipt = self.model.market().absorb(self.liquidator, &[self.account])?;
        log::info!("Absorbed {} by {} in block {}", self.account, self.liquidator, receipt.block_number);
        self.record(
            ActionKind::Liquidate,
            BTreeMap::from([
                ("liquidator".to_string(), self.liquidator.to_string()),
                ("tx".to_string(), receipt.tx_hash.to_string()),
            ]),
        )
    }
}

fn label(labels: &BTreeMap<Address, String>, asset: Address) -> String {
    labels.get(&asset).cloned().unwrap_or_else(|| asset.to_string())
}

fn push_step(steps: &mut Vec<ScenarioStep>, action: ActionKind, params: BTreeMap<String, String>, snapshot: Snapshot) {
    let index = steps.len() as u32 + 1;
    log::debug!("Step {} {} at block {}", index, action, snapshot.block_number);
    steps.push(ScenarioStep {
        index,
        action,
        params,
        block_number: snapshot.block_number,
        snapshot,
    });
}

/// Read the account and every feed at the current block
fn snapshot<'l, L: LedgerClient + ?Sized>(
    ledger: &'l L,
    model: &MarketModel<'l, L>,
    oracle: &OracleController<'l, L>,
    account: Address,
    labels: &BTreeMap<Address, String>,
) -> Result<Snapshot> {
    let state = model.refresh(account)?;
    let prices = model.read_prices(oracle)?;
    let info = model.info();

    let collateral = info
        .assets
        .iter()
        .map(|asset| Holding {
            asset: asset.asset,
            symbol: label(labels, asset.asset),
            amount: format_units(state.collateral_of(&asset.asset), asset.decimals),
        })
        .collect();

    Ok(Snapshot {
        block_number: ledger.block_number()?,
        account,
        collateral,
        base_balance: format_signed(state.base_balance, info.base_decimals),
        collateral_value_usd: model.collateral_value_usd(&state, &prices)?,
        debt_value_usd: model.debt_value_usd(&state, &prices)?,
        max_debt_usd: model.liquidation_capacity_usd(&state, &prices)?,
        utilization: state.utilization,
        prices: prices
            .values()
            .map(|quote| PricePoint {
                feed: quote.feed,
                price: quote.display_price(),
            })
            .collect(),
        liquidatable: model.is_liquidatable(account)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NetworkConfig};
    use crate::report::Phase;
    use alloy_primitives::Bytes;
    use risk_ledger::feed::MOCK_ANSWER_SLOT;
    use risk_ledger::{LedgerError, MemoryLedger, Receipt, SignerHandle, Value};
    use risk_model::scale::parse_units;

    fn network() -> NetworkConfig {
        Config::default_mainnet().network("mainnet").unwrap().clone()
    }

    fn plan(network: &NetworkConfig, collateral: &str, amount: &str) -> ScenarioPlan {
        let asset = network.asset(collateral).unwrap();
        let decimals = network.snapshot.token(&asset.token).unwrap().decimals;
        ScenarioPlan {
            name: "test".to_string(),
            network: "mainnet".to_string(),
            market: network.market,
            funding: FundingPlan {
                token: asset.token,
                whale: asset.whale,
                amount: parse_units(amount, decimals).unwrap(),
            },
            position: None,
            stress: None,
            whale_gas: "0x1000000000000000000".to_string(),
            report_rates: false,
            labels: network.assets.iter().map(|(s, a)| (a.token, s.clone())).collect(),
        }
    }

    #[test]
    fn test_fund_only_plan_is_unstressed() {
        let network = network();
        let ledger = MemoryLedger::fork(&network.snapshot).unwrap();
        let result = ScenarioRunner::new(&ledger, plan(&network, "USDC", "1000")).unwrap().run();

        assert_eq!(result.outcome, ScenarioOutcome::Unstressed);
        assert_eq!(result.phase, Phase::Completed);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].action, ActionKind::Fund);
        assert_eq!(result.steps[0].params["balance"], "1000.0");
        assert!(result.abort.is_none());
    }

    #[test]
    fn test_price_decay_liquidates() {
        let network = network();
        let ledger = MemoryLedger::fork(&network.snapshot).unwrap();
        let feed = network.asset("WETH").unwrap().price_feed;
        let mut plan = plan(&network, "WETH", "1");
        plan.position = Some(PositionPlan {
            borrow: Some(BorrowTarget::FractionOfCapacity(Wad::parse("0.95").unwrap())),
        });
        plan.stress = Some(StressPlan {
            perturbation: Perturbation::PriceDecay { feed, decay: Wad::parse("0.98").unwrap() },
            search: ThresholdSearch::default(),
        });

        let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

        // 2205 * 0.95 of debt against 0.9 * 2450 * 0.98^i of capacity
        assert_eq!(result.outcome, ScenarioOutcome::LiquidationTriggered { search_step: 3 });
        let actions: Vec<ActionKind> = result.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                ActionKind::Fund,
                ActionKind::Approve,
                ActionKind::Supply,
                ActionKind::Borrow,
                ActionKind::Perturb,
                ActionKind::Perturb,
                ActionKind::Perturb,
                ActionKind::Liquidate,
            ]
        );
        let before = result.before.unwrap();
        assert_eq!(before.max_debt_usd, Wad::from_units(2205));
        assert!(!before.liquidatable);
        let after = result.after.unwrap();
        assert_eq!(after.holding("WETH").unwrap().amount, "0.0");
        assert!(!after.liquidatable);
        // Live feed is back
        assert_eq!(
            risk_ledger::PriceFeed::new(&ledger, feed).latest_answer().unwrap(),
            parse_units("2450", 8).unwrap()
        );
    }

    #[test]
    fn test_over_capacity_borrow_aborts_before_write() {
        let network = network();
        let ledger = MemoryLedger::fork(&network.snapshot).unwrap();
        let mut plan = plan(&network, "USDT", "1000");
        plan.position = Some(PositionPlan {
            borrow: Some(BorrowTarget::Amount(parse_units("900", 6).unwrap())),
        });

        let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

        assert_eq!(result.outcome, ScenarioOutcome::Aborted);
        assert_eq!(result.phase, Phase::Aborted);
        let abort = result.abort.unwrap();
        assert_eq!(abort.phase, Phase::Positioned);
        assert_eq!(abort.step, 4);
        assert!(abort.reason.contains("insufficient capacity"));
        // Supply was the last write
        let supplied = abort.snapshot.unwrap();
        assert_eq!(supplied.block_number, ledger.block_number().unwrap());
        assert_eq!(supplied.base_balance, "0.0");
    }

    #[test]
    fn test_exhausted_search_restores_feed() {
        let network = network();
        let ledger = MemoryLedger::fork(&network.snapshot).unwrap();
        let feed = network.asset("WETH").unwrap().price_feed;
        let code = ledger.get_code(feed).unwrap();
        let mut plan = plan(&network, "WETH", "1");
        plan.position = Some(PositionPlan {
            borrow: Some(BorrowTarget::FractionOfCapacity(Wad::parse("0.5").unwrap())),
        });
        plan.stress = Some(StressPlan {
            perturbation: Perturbation::PriceDecay { feed, decay: Wad::parse("0.99").unwrap() },
            search: ThresholdSearch::new(5),
        });

        let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

        assert_eq!(result.outcome, ScenarioOutcome::Exhausted { steps: 5 });
        assert_eq!(result.search_steps, 5);
        assert_eq!(result.phase, Phase::Aborted);
        assert_eq!(result.abort.unwrap().phase, Phase::Searching);
        assert_eq!(ledger.get_code(feed).unwrap(), code);
    }

    /// Memory ledger whose feed answer jumps back to `rebound` on the n-th answer write
    struct Rebounding<'a> {
        inner: &'a MemoryLedger,
        feed: Address,
        rebound_on: u32,
        rebound: U256,
        answer_writes: std::cell::Cell<u32>,
    }

    impl LedgerClient for Rebounding<'_> {
        fn call(&self, contract: Address, method: &str, args: &[Value]) -> std::result::Result<Value, LedgerError> {
            self.inner.call(contract, method, args)
        }

        fn submit(
            &self,
            from: Address,
            contract: Address,
            method: &str,
            args: &[Value],
        ) -> std::result::Result<Receipt, LedgerError> {
            self.inner.submit(from, contract, method, args)
        }

        fn get_code(&self, address: Address) -> std::result::Result<Bytes, LedgerError> {
            self.inner.get_code(address)
        }

        fn set_feed_code(&self, feed: Address, code: Bytes) -> std::result::Result<(), LedgerError> {
            self.inner.set_feed_code(feed, code)
        }

        fn get_storage_slot(&self, address: Address, slot: U256) -> std::result::Result<U256, LedgerError> {
            self.inner.get_storage_slot(address, slot)
        }

        fn set_storage_slot(&self, address: Address, slot: U256, value: U256) -> std::result::Result<(), LedgerError> {
            let mut value = value;
            if address == self.feed && slot == MOCK_ANSWER_SLOT {
                let writes = self.answer_writes.get() + 1;
                self.answer_writes.set(writes);
                if writes == self.rebound_on {
                    value = self.rebound;
                }
            }
            self.inner.set_storage_slot(address, slot, value)
        }

        fn mine(&self) -> std::result::Result<u64, LedgerError> {
            self.inner.mine()
        }

        fn increase_time(&self, seconds: u64) -> std::result::Result<u64, LedgerError> {
            self.inner.increase_time(seconds)
        }

        fn impersonate(&self, address: Address) -> std::result::Result<SignerHandle, LedgerError> {
            self.inner.impersonate(address)
        }

        fn release(&self, handle: SignerHandle) -> std::result::Result<(), LedgerError> {
            self.inner.release(handle)
        }

        fn set_balance(&self, address: Address, wei_hex: &str) -> std::result::Result<(), LedgerError> {
            self.inner.set_balance(address, wei_hex)
        }

        fn signers(&self) -> std::result::Result<Vec<Address>, LedgerError> {
            self.inner.signers()
        }

        fn block_number(&self) -> std::result::Result<u64, LedgerError> {
            self.inner.block_number()
        }

        fn timestamp(&self) -> std::result::Result<u64, LedgerError> {
            self.inner.timestamp()
        }
    }

    #[test]
    fn test_price_rebound_during_confirmation_aborts() {
        let network = network();
        let memory = MemoryLedger::fork(&network.snapshot).unwrap();
        let feed = network.asset("WETH").unwrap().price_feed;
        // Writes: install, step 1, step 2
        let ledger = Rebounding {
            inner: &memory,
            feed,
            rebound_on: 3,
            rebound: parse_units("2450", 8).unwrap(),
            answer_writes: std::cell::Cell::new(0),
        };
        let mut plan = plan(&network, "WETH", "1");
        plan.position = Some(PositionPlan {
            borrow: Some(BorrowTarget::FractionOfCapacity(Wad::parse("0.95").unwrap())),
        });
        plan.stress = Some(StressPlan {
            perturbation: Perturbation::PriceDecay { feed, decay: Wad::parse("0.5").unwrap() },
            search: ThresholdSearch::default().with_confirmation(2),
        });

        let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

        assert_eq!(result.outcome, ScenarioOutcome::Aborted);
        assert_eq!(result.phase, Phase::Aborted);
        assert_eq!(result.exit_code(), crate::exit_codes::ABORTED);
        assert_eq!(result.search_steps, 2);
        let abort = result.abort.unwrap();
        assert_eq!(abort.phase, Phase::Searching);
        assert!(abort.reason.starts_with("non-monotonic predicate"), "{}", abort.reason);
        let last = abort.snapshot.unwrap();
        assert!(!last.liquidatable);
        assert!(result.steps.iter().all(|s| s.action != ActionKind::Liquidate));
        // Live feed is back
        assert_eq!(
            risk_ledger::PriceFeed::new(&memory, feed).latest_answer().unwrap(),
            parse_units("2450", 8).unwrap()
        );
    }

    #[test]
    fn test_single_signer_is_configuration_error() {
        let mut network = network();
        network.snapshot.signers.truncate(1);
        let ledger = MemoryLedger::fork(&network.snapshot).unwrap();
        let err = ScenarioRunner::new(&ledger, plan(&network, "USDC", "1")).err().unwrap();
        assert!(matches!(err, ScenarioError::Configuration(_)));
    }
}
