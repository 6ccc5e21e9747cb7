//! Risk Scenario Integration Tests
//!
//! End-to-end scenarios against the in-memory ledger. The fixtures here start
//! from the built-in mainnet config and reshape its snapshot where a test needs
//! different feed precision or collateral factors.

use alloy_primitives::Address;
use risk_ledger::{ForkSnapshot, MemoryLedger};
use risk_model::Wad;
use risk_scenario::config::{Config, NetworkConfig};
use risk_scenario::{build_plan, Overrides, ScenarioKind, ScenarioPlan};

pub const NETWORK: &str = "mainnet";

pub fn mainnet() -> Config {
    Config::default_mainnet()
}

pub fn network(config: &Config) -> NetworkConfig {
    config
        .network(NETWORK)
        .expect("default config has mainnet")
        .clone()
}

pub fn fork(snapshot: &ForkSnapshot) -> MemoryLedger {
    MemoryLedger::fork(snapshot).expect("snapshot forks")
}

pub fn plan(kind: ScenarioKind, network: &NetworkConfig, overrides: &Overrides) -> ScenarioPlan {
    let config = mainnet();
    build_plan(kind, NETWORK, network, &config.defaults, overrides).expect("plan builds")
}

pub fn feed_of(network: &NetworkConfig, symbol: &str) -> Address {
    network.asset(symbol).expect("asset configured").price_feed
}

/// Reprice a feed and change its precision
pub fn set_feed(network: &mut NetworkConfig, symbol: &str, answer: &str, decimals: u8) {
    let feed = feed_of(network, symbol);
    let seed = network
        .snapshot
        .feeds
        .iter_mut()
        .find(|seed| seed.address == feed)
        .expect("feed seeded");
    seed.answer = answer.to_string();
    seed.decimals = decimals;
}

/// Set the borrow and liquidation collateral factors of one collateral asset
pub fn set_collateral_factors(network: &mut NetworkConfig, symbol: &str, factor: &str) {
    let token = network.asset(symbol).expect("asset configured").token;
    let factor = Wad::parse(factor).expect("factor parses");
    for market in &mut network.snapshot.markets {
        for asset in market.assets.iter_mut().filter(|asset| asset.asset == token) {
            asset.borrow_collateral_factor = factor;
            asset.liquidate_collateral_factor = factor;
        }
    }
}

pub fn wad(literal: &str) -> Wad {
    Wad::parse(literal).expect("wad parses")
}
