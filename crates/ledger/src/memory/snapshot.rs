//! Serializable seed for a memory ledger fork
//!
//! Amounts are human decimal strings ("1000", "0.5") scaled by the owning
//! token's or feed's decimals when the fork is built. Rate curves are given as
//! annual figures and converted to per-second rates.

use alloy_primitives::Address;
use risk_model::Wad;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkSnapshot {
    pub block_number: u64,

    /// Unix time of `block_number`
    pub timestamp: u64,

    /// Locally controlled accounts; each starts with 10,000 ether
    pub signers: Vec<Address>,

    pub tokens: Vec<TokenSeed>,

    pub feeds: Vec<FeedSeed>,

    pub markets: Vec<MarketSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSeed {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub holders: Vec<HolderSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderSeed {
    pub address: Address,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSeed {
    pub address: Address,
    pub decimals: u8,
    pub answer: String,
}

/// Annual rate curve parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSeed {
    pub base_apr: Wad,
    pub slope1_apr: Wad,
    pub slope2_apr: Wad,
    pub kink: Wad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSeed {
    pub address: Address,
    pub base_token: Address,
    pub base_price_feed: Address,
    pub supply_curve: CurveSeed,
    pub borrow_curve: CurveSeed,

    /// Base supplied by accounts outside the fork; the unborrowed part is
    /// credited to the market as token reserves
    pub total_supply: String,

    /// Base borrowed by accounts outside the fork
    pub total_borrow: String,

    pub assets: Vec<CollateralSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralSeed {
    pub asset: Address,
    pub price_feed: Address,
    pub borrow_collateral_factor: Wad,
    pub liquidate_collateral_factor: Wad,
    pub liquidation_factor: Wad,
    pub supply_cap: String,
}

impl ForkSnapshot {
    pub fn token(&self, address: &Address) -> Option<&TokenSeed> {
        self.tokens.iter().find(|token| token.address == *address)
    }

    pub fn feed(&self, address: &Address) -> Option<&FeedSeed> {
        self.feeds.iter().find(|feed| feed.address == *address)
    }

    pub fn market(&self, address: &Address) -> Option<&MarketSeed> {
        self.markets.iter().find(|market| market.address == *address)
    }
}
