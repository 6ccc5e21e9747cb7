//! Named scenarios and their plans

use crate::config::{Config, NetworkConfig, ScenarioDefaults};
use crate::error::{Result, ScenarioError};
use crate::report::ScenarioResult;
use crate::runner::{
    BorrowTarget, FundingPlan, Perturbation, PositionPlan, ScenarioPlan, ScenarioRunner, StressPlan,
};
use crate::search::ThresholdSearch;
use alloy_primitives::Address;
use risk_ledger::MemoryLedger;
use risk_model::scale::parse_units;
use risk_model::Wad;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScenarioKind {
    PriceDecay,
    PriceShock,
    StablecoinDepeg,
    InterestRateSpike,
    SupplySimulation,
    FundAccount,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::PriceDecay,
        ScenarioKind::PriceShock,
        ScenarioKind::StablecoinDepeg,
        ScenarioKind::InterestRateSpike,
        ScenarioKind::SupplySimulation,
        ScenarioKind::FundAccount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScenarioKind::PriceDecay => "price-decay",
            ScenarioKind::PriceShock => "price-shock",
            ScenarioKind::StablecoinDepeg => "stablecoin-depeg",
            ScenarioKind::InterestRateSpike => "interest-rate-spike",
            ScenarioKind::SupplySimulation => "supply-simulation",
            ScenarioKind::FundAccount => "fund-account",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScenarioKind::PriceDecay => {
                "WETH collateral, borrow 95% of max debt, decay the ETH price until liquidatable"
            }
            ScenarioKind::PriceShock => "WETH collateral, borrow 95% of max debt, one jump to the shock price",
            ScenarioKind::StablecoinDepeg => {
                "USDT collateral, borrow 95% of max debt, walk USDT off its peg until liquidatable"
            }
            ScenarioKind::InterestRateSpike => {
                "WETH collateral, borrow 99% of max debt, advance time until interest makes it liquidatable"
            }
            ScenarioKind::SupplySimulation => "Supply the base asset and report rates before and after",
            ScenarioKind::FundAccount => "Fund the scenario account from a whale and stop",
        }
    }

    /// Collateral symbol, or None for scenarios that use the base asset
    fn collateral(self) -> Option<&'static str> {
        match self {
            ScenarioKind::PriceDecay | ScenarioKind::PriceShock | ScenarioKind::InterestRateSpike => Some("WETH"),
            ScenarioKind::StablecoinDepeg => Some("USDT"),
            ScenarioKind::SupplySimulation | ScenarioKind::FundAccount => None,
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self> {
        ScenarioKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ScenarioKind::ALL.iter().map(|k| k.name()).collect();
                ScenarioError::config(format!("unknown scenario {s:?} (known: {})", known.join(", ")))
            })
    }
}

/// Command-line overrides of network and scenario defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub block: Option<u64>,
    /// Whole tokens
    pub fund_amount: Option<String>,
    pub borrow_fraction: Option<Wad>,
    pub decay: Option<Wad>,
    pub max_steps: Option<u32>,
    pub confirm_steps: Option<u32>,
    /// USD
    pub shock_price: Option<String>,
    pub interval_secs: Option<u64>,
}

fn checked_decay(decay: Wad) -> Result<Wad> {
    if decay.is_zero() || decay >= Wad::ONE {
        return Err(ScenarioError::config(format!("decay must be in (0, 1), got {decay}")));
    }
    Ok(decay)
}

fn base_symbol(network: &NetworkConfig) -> Result<String> {
    let market = network
        .snapshot
        .market(&network.market)
        .ok_or_else(|| ScenarioError::config(format!("market {} is not in the snapshot", network.market)))?;
    network
        .assets
        .iter()
        .find(|(_, asset)| asset.token == market.base_token)
        .map(|(symbol, _)| symbol.clone())
        .ok_or_else(|| ScenarioError::config(format!("base token {} is not configured", market.base_token)))
}

/// Resolve a named scenario against a network and its defaults
pub fn build_plan(
    kind: ScenarioKind,
    network_name: &str,
    network: &NetworkConfig,
    defaults: &ScenarioDefaults,
    overrides: &Overrides,
) -> Result<ScenarioPlan> {
    let symbol = match kind.collateral() {
        Some(symbol) => symbol.to_string(),
        None => base_symbol(network)?,
    };
    let asset = network.asset(&symbol)?;
    let decimals = network
        .snapshot
        .token(&asset.token)
        .map(|token| token.decimals)
        .ok_or_else(|| ScenarioError::config(format!("token {} is not in the snapshot", asset.token)))?;

    let fund_amount = overrides.fund_amount.as_deref().unwrap_or(&asset.fund_amount);
    let amount = parse_units(fund_amount, decimals)
        .map_err(|e| ScenarioError::config(format!("fund amount {fund_amount:?}: {e}")))?;

    let search = ThresholdSearch::new(overrides.max_steps.unwrap_or(defaults.max_steps))
        .with_confirmation(overrides.confirm_steps.unwrap_or(defaults.confirm_steps));
    let fraction = |default: Wad| BorrowTarget::FractionOfCapacity(overrides.borrow_fraction.unwrap_or(default));
    let leveraged = |fraction: BorrowTarget| Some(PositionPlan { borrow: Some(fraction) });

    let (position, stress) = match kind {
        ScenarioKind::PriceDecay => (
            leveraged(fraction(defaults.borrow_fraction)),
            Some(StressPlan {
                perturbation: Perturbation::PriceDecay {
                    feed: asset.price_feed,
                    decay: checked_decay(overrides.decay.unwrap_or(defaults.decay))?,
                },
                search,
            }),
        ),
        ScenarioKind::PriceShock => {
            let shock = overrides.shock_price.as_deref().unwrap_or(&defaults.shock_price);
            let price_usd = Wad::parse(shock)
                .map_err(|e| ScenarioError::config(format!("shock price {shock:?}: {e}")))?;
            if price_usd.is_zero() {
                return Err(ScenarioError::config("shock price must be above zero"));
            }
            (
                leveraged(fraction(defaults.borrow_fraction)),
                Some(StressPlan {
                    perturbation: Perturbation::PriceJump {
                        feed: asset.price_feed,
                        price_usd,
                    },
                    // One jump, then either liquidatable or not
                    search: ThresholdSearch::new(1),
                }),
            )
        }
        ScenarioKind::StablecoinDepeg => (
            leveraged(fraction(defaults.borrow_fraction)),
            Some(StressPlan {
                perturbation: Perturbation::PriceDecay {
                    feed: asset.price_feed,
                    decay: checked_decay(overrides.decay.unwrap_or(defaults.depeg_decay))?,
                },
                search,
            }),
        ),
        ScenarioKind::InterestRateSpike => {
            let interval_secs = overrides.interval_secs.unwrap_or(defaults.interval_secs);
            if interval_secs == 0 {
                return Err(ScenarioError::config("interval must be at least one second"));
            }
            (
                leveraged(fraction(defaults.aggressive_borrow_fraction)),
                Some(StressPlan {
                    perturbation: Perturbation::DebtAccrual { interval_secs },
                    search,
                }),
            )
        }
        ScenarioKind::SupplySimulation => (Some(PositionPlan { borrow: None }), None),
        ScenarioKind::FundAccount => (None, None),
    };

    Ok(ScenarioPlan {
        name: kind.name().to_string(),
        network: network_name.to_string(),
        market: network.market,
        funding: FundingPlan {
            token: asset.token,
            whale: asset.whale,
            amount,
        },
        position,
        stress,
        whale_gas: defaults.whale_gas.clone(),
        report_rates: matches!(kind, ScenarioKind::InterestRateSpike | ScenarioKind::SupplySimulation),
        labels: network
            .assets
            .iter()
            .map(|(symbol, asset)| (asset.token, symbol.clone()))
            .collect::<std::collections::BTreeMap<Address, String>>(),
    })
}

/// Fork a fresh memory ledger for `network_name` and run `kind` on it
pub fn run_named(
    config: &Config,
    network_name: &str,
    kind: ScenarioKind,
    overrides: &Overrides,
) -> Result<ScenarioResult> {
    let network = config.network(network_name)?;
    let plan = build_plan(kind, network_name, network, &config.defaults, overrides)?;

    let mut snapshot = network.snapshot.clone();
    if let Some(block) = overrides.block.or(network.fork_block) {
        snapshot.block_number = block;
    }
    let rpc_url = overrides.rpc_url.as_deref().unwrap_or(&network.rpc_url);
    log::info!(
        "Forking {} at block {} into memory ({} is not contacted)",
        network_name,
        snapshot.block_number,
        rpc_url
    );

    let ledger = MemoryLedger::fork(&snapshot)?;
    let runner = ScenarioRunner::new(&ledger, plan)?;
    Ok(runner.run())
}

/// Run every named scenario concurrently, each on its own ledger
pub async fn run_all(
    config: Arc<Config>,
    network_name: String,
    overrides: Overrides,
) -> Vec<(ScenarioKind, Result<ScenarioResult>)> {
    let tasks = ScenarioKind::ALL.into_iter().map(|kind| {
        let config = Arc::clone(&config);
        let network_name = network_name.clone();
        let overrides = overrides.clone();
        async move {
            let joined =
                tokio::task::spawn_blocking(move || run_named(&config, &network_name, kind, &overrides)).await;
            let result = joined.unwrap_or_else(|e| {
                log::error!("Scenario {} worker failed: {}", kind, e);
                Err(ScenarioError::config(format!("scenario worker failed: {e}")))
            });
            (kind, result)
        }
    });

    futures::future::join_all(tasks).await
}
