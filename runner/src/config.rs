//! Scenario engine configuration

use crate::error::ScenarioError;
use alloy_primitives::{address, Address};
use anyhow::{Context, Result};
use risk_ledger::{
    CollateralSeed, CurveSeed, FeedSeed, ForkSnapshot, HolderSeed, MarketSeed, TokenSeed,
};
use risk_model::Wad;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RISK_SCENARIO_CONFIG";

/// Config file used when neither `--config` nor [`CONFIG_ENV`] is set
pub const DEFAULT_CONFIG_PATH: &str = "risk-scenario.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Network used when `--network` is not given
    pub default_network: String,

    /// Scenario parameters used unless overridden on the command line
    pub defaults: ScenarioDefaults,

    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefaults {
    /// Fraction of `maxDebt` to borrow
    pub borrow_fraction: Wad,

    /// Fraction for scenarios that push closest to the edge (interest-rate-spike)
    pub aggressive_borrow_fraction: Wad,

    /// Per-step price multiplier for collateral decay
    pub decay: Wad,

    /// Per-step price multiplier for a stablecoin losing its peg
    pub depeg_decay: Wad,

    pub max_steps: u32,

    /// Extra evaluations after the predicate first holds (0 disables the check)
    pub confirm_steps: u32,

    /// Collateral price after a one-off shock, in USD
    pub shock_price: String,

    /// Ledger time advanced per debt-accrual step
    pub interval_secs: u64,

    /// Native balance given to a whale before it funds an account
    pub whale_gas: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Fork target; the memory ledger records it but never connects
    pub rpc_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_block: Option<u64>,

    /// Lending market under test
    pub market: Address,

    /// Tokens keyed by symbol
    pub assets: BTreeMap<String, AssetConfig>,

    /// Seed state for the memory ledger
    pub snapshot: ForkSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub token: Address,
    pub price_feed: Address,

    /// Holder impersonated to fund scenario accounts
    pub whale: Address,

    /// Default amount a scenario funds, in whole tokens
    pub fund_amount: String,
}

impl Config {
    /// Load configuration from TOML
    ///
    /// Path precedence: `explicit`, then [`CONFIG_ENV`], then [`DEFAULT_CONFIG_PATH`].
    /// A missing file falls back to [`Config::default_mainnet`]; an unreadable or
    /// malformed one is an error.
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        let config_path = explicit
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let expanded = shellexpand::tilde(&config_path);

        if !Path::new(expanded.as_ref()).exists() {
            log::warn!("No config at {}, using default mainnet config", config_path);
            return Ok(Self::default_mainnet());
        }

        Self::load_from(expanded.as_ref())
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config TOML")?;

        log::info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Write default config to file
    pub fn write_default(path: &str) -> Result<()> {
        let config = Self::default_mainnet();
        let toml_str = toml::to_string_pretty(&config)
            .context("Failed to serialize config")?;

        let expanded = shellexpand::tilde(path);
        std::fs::write(expanded.as_ref(), toml_str)
            .context(format!("Failed to write config to {}", path))?;

        log::info!("Created default config at {}", path);
        Ok(())
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig, ScenarioError> {
        self.networks.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            ScenarioError::config(format!(
                "network {name:?} is not configured (known: {})",
                known.join(", ")
            ))
        })
    }

    /// Mainnet USDC market at block 19,100,000
    pub fn default_mainnet() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert("mainnet".to_string(), mainnet());

        Self {
            default_network: "mainnet".to_string(),
            defaults: ScenarioDefaults::default(),
            networks,
        }
    }
}

impl Default for ScenarioDefaults {
    fn default() -> Self {
        Self {
            borrow_fraction: Wad::from_raw(wad_raw(950)),
            aggressive_borrow_fraction: Wad::from_raw(wad_raw(990)),
            decay: Wad::from_raw(wad_raw(980)),
            depeg_decay: Wad::from_raw(wad_raw(990)),
            max_steps: 120,
            confirm_steps: 0,
            shock_price: "500".to_string(),
            interval_secs: 86_400,
            whale_gas: "0x1000000000000000000".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn asset(&self, symbol: &str) -> Result<&AssetConfig, ScenarioError> {
        self.assets
            .get(symbol)
            .ok_or_else(|| ScenarioError::config(format!("asset {symbol} is not configured")))
    }
}

/// `thousandths / 1000` at 1e18 scale
const fn wad_raw(thousandths: u64) -> alloy_primitives::U256 {
    alloy_primitives::U256::from_limbs([thousandths * 1_000_000_000_000_000, 0, 0, 0])
}

const COMET_USDC: Address = address!("c3d688b66703497daa19211eedff47f25384cdc3");
const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
const USDT: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
const USDC_USD_FEED: Address = address!("8fffffd4afb6115b954bd326cbe7b4ba576818f6");
const ETH_USD_FEED: Address = address!("5f4ec3df9cbd43714fe2740f5e3616155c5b8419");
const USDT_USD_FEED: Address = address!("3e7d1eab13ad0104d2750b8863b489d65364e32d");
const USDC_WHALE: Address = address!("0a59649758aa4d66e25f08dd01271e891fe52199");
const WETH_WHALE: Address = address!("8eb8a3b98659cce290402893d0123abb75e3ab28");
const USDT_WHALE: Address = address!("f977814e90da44bfa03b6295a0616a897441acec");

fn mainnet() -> NetworkConfig {
    let mut assets = BTreeMap::new();
    for (symbol, token, price_feed, whale, fund_amount) in [
        ("USDC", USDC, USDC_USD_FEED, USDC_WHALE, "1000"),
        ("WETH", WETH, ETH_USD_FEED, WETH_WHALE, "1"),
        ("USDT", USDT, USDT_USD_FEED, USDT_WHALE, "1000"),
    ] {
        assets.insert(
            symbol.to_string(),
            AssetConfig {
                token,
                price_feed,
                whale,
                fund_amount: fund_amount.to_string(),
            },
        );
    }

    NetworkConfig {
        rpc_url: "https://eth-mainnet.g.alchemy.com/v2/<key>".to_string(),
        fork_block: Some(19_100_000),
        market: COMET_USDC,
        assets,
        snapshot: mainnet_snapshot(),
    }
}

fn token(address: Address, symbol: &str, decimals: u8, holder: Address, amount: &str) -> TokenSeed {
    TokenSeed {
        address,
        symbol: symbol.to_string(),
        decimals,
        holders: vec![HolderSeed {
            address: holder,
            amount: amount.to_string(),
        }],
    }
}

fn feed(address: Address, answer: &str) -> FeedSeed {
    FeedSeed {
        address,
        decimals: 8,
        answer: answer.to_string(),
    }
}

fn mainnet_snapshot() -> ForkSnapshot {
    ForkSnapshot {
        block_number: 19_100_000,
        timestamp: 1_706_140_800,
        // Default development mnemonic, accounts 0..3
        signers: vec![
            address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
            address!("70997970c51812dc3a010c7d01b50e0d17dc79c8"),
            address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc"),
        ],
        tokens: vec![
            token(USDC, "USDC", 6, USDC_WHALE, "50000000"),
            token(WETH, "WETH", 18, WETH_WHALE, "100000"),
            token(USDT, "USDT", 6, USDT_WHALE, "50000000"),
        ],
        feeds: vec![
            feed(USDC_USD_FEED, "1"),
            feed(ETH_USD_FEED, "2450"),
            feed(USDT_USD_FEED, "1"),
        ],
        markets: vec![MarketSeed {
            address: COMET_USDC,
            base_token: USDC,
            base_price_feed: USDC_USD_FEED,
            supply_curve: CurveSeed {
                base_apr: Wad::ZERO,
                slope1_apr: Wad::from_raw(wad_raw(35)),
                slope2_apr: Wad::ONE,
                kink: Wad::from_raw(wad_raw(900)),
            },
            borrow_curve: CurveSeed {
                base_apr: Wad::from_raw(wad_raw(15)),
                slope1_apr: Wad::from_raw(wad_raw(40)),
                slope2_apr: Wad::from_units(3),
                kink: Wad::from_raw(wad_raw(900)),
            },
            total_supply: "100000".to_string(),
            total_borrow: "93000".to_string(),
            assets: vec![
                CollateralSeed {
                    asset: WETH,
                    price_feed: ETH_USD_FEED,
                    borrow_collateral_factor: Wad::from_raw(wad_raw(895)),
                    liquidate_collateral_factor: Wad::from_raw(wad_raw(900)),
                    liquidation_factor: Wad::from_raw(wad_raw(950)),
                    supply_cap: "350000".to_string(),
                },
                CollateralSeed {
                    asset: USDT,
                    price_feed: USDT_USD_FEED,
                    borrow_collateral_factor: Wad::from_raw(wad_raw(850)),
                    liquidate_collateral_factor: Wad::from_raw(wad_raw(850)),
                    liquidation_factor: Wad::from_raw(wad_raw(950)),
                    supply_cap: "10000000".to_string(),
                },
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_mainnet();
        assert_eq!(config.default_network, "mainnet");
        assert_eq!(config.defaults.max_steps, 120);
        assert_eq!(config.defaults.decay, Wad::parse("0.98").unwrap());

        let mainnet = config.network("mainnet").unwrap();
        assert_eq!(mainnet.market, COMET_USDC);
        assert_eq!(mainnet.asset("WETH").unwrap().price_feed, ETH_USD_FEED);
    }

    #[test]
    fn test_unknown_network_is_configuration_error() {
        let config = Config::default_mainnet();
        let err = config.network("sepolia").unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(_)));
        assert!(err.to_string().contains("mainnet"));
    }

    #[test]
    fn test_unknown_asset_is_configuration_error() {
        let config = Config::default_mainnet();
        let err = config.network("mainnet").unwrap().asset("DAI").unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(_)));
    }

    #[test]
    fn test_write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk-scenario.toml");
        let path = path.to_str().unwrap();

        Config::write_default(path).unwrap();
        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded, Config::default_mainnet());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loaded = Config::load(path.to_str()).unwrap();
        assert_eq!(loaded, Config::default_mainnet());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "default_network = [").unwrap();
        assert!(Config::load(path.to_str()).is_err());
    }
}
