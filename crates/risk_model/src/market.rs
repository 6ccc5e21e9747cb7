//! Account, asset and price types plus the capacity math built on them
//!
//! Pure data: nothing here talks to a ledger. The read-through model that fills
//! these structures lives with the scenario runner.

use crate::scale::{self, ScaleError, Wad};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A held asset has no configured feed, or its feed has no quote
    #[error("stale read: no price for asset {asset} (feed {feed:?})")]
    StaleRead { asset: Address, feed: Option<Address> },

    #[error(transparent)]
    Scale(#[from] ScaleError),
}

/// Raw feed answer with the feed's own decimal count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub feed: Address,
    pub answer: U256,
    pub decimals: u8,
}

impl PriceQuote {
    /// USD value of `amount` held in a token with `token_decimals`
    pub fn value_of(&self, amount: U256, token_decimals: u8) -> Result<Wad, ScaleError> {
        scale::value_usd(amount, token_decimals, self.answer, self.decimals)
    }

    /// Token amount worth `value` at this quote
    pub fn amount_for(&self, value: Wad, token_decimals: u8) -> Result<U256, ScaleError> {
        scale::amount_for_value(value, token_decimals, self.answer, self.decimals)
    }

    /// Human-readable price, e.g. "2450.0"
    pub fn display_price(&self) -> String {
        scale::format_units(self.answer, self.decimals)
    }
}

/// Quotes keyed by feed address
pub type PriceBook = BTreeMap<Address, PriceQuote>;

/// One collateral asset as the market reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub offset: u8,
    pub asset: Address,
    /// Token decimals
    pub decimals: u8,
    pub price_feed: Address,
    pub feed_decimals: u8,
    pub borrow_collateral_factor: Wad,
    pub liquidate_collateral_factor: Wad,
    pub liquidation_factor: Wad,
    pub supply_cap: U256,
}

/// Static description of a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub address: Address,
    pub base_token: Address,
    pub base_decimals: u8,
    pub base_price_feed: Address,
    pub base_feed_decimals: u8,
    pub assets: Vec<AssetInfo>,
}

impl MarketInfo {
    pub fn asset(&self, asset: &Address) -> Option<&AssetInfo> {
        self.assets.iter().find(|info| info.asset == *asset)
    }

    /// Feed address of every configured asset, base first
    pub fn feeds(&self) -> Vec<Address> {
        let mut feeds = vec![self.base_price_feed];
        for info in &self.assets {
            if !feeds.contains(&info.price_feed) {
                feeds.push(info.price_feed);
            }
        }
        feeds
    }
}

/// One account's position at a block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub account: Address,
    /// Collateral per asset, smallest units
    pub collateral: BTreeMap<Address, U256>,
    /// Present base balance: positive supplied, negative borrowed
    pub base_balance: i128,
    /// Market-wide utilization at the time of the read
    pub utilization: Wad,
}

impl AccountState {
    /// Outstanding base debt (zero when the balance is a supply)
    pub fn borrowed(&self) -> U256 {
        if self.base_balance < 0 {
            U256::from(self.base_balance.unsigned_abs())
        } else {
            U256::ZERO
        }
    }

    pub fn supplied(&self) -> U256 {
        if self.base_balance > 0 {
            U256::from(self.base_balance.unsigned_abs())
        } else {
            U256::ZERO
        }
    }

    pub fn collateral_of(&self, asset: &Address) -> U256 {
        self.collateral.get(asset).copied().unwrap_or(U256::ZERO)
    }

    pub fn has_collateral(&self) -> bool {
        self.collateral.values().any(|amount| !amount.is_zero())
    }
}

fn quote_for<'a>(
    market: &MarketInfo,
    prices: &'a PriceBook,
    asset: &Address,
) -> Result<(&'a PriceQuote, u8), ModelError> {
    let info = market.asset(asset).ok_or(ModelError::StaleRead {
        asset: *asset,
        feed: None,
    })?;
    let quote = prices.get(&info.price_feed).ok_or(ModelError::StaleRead {
        asset: *asset,
        feed: Some(info.price_feed),
    })?;
    Ok((quote, info.decimals))
}

/// Sum of held collateral in USD, each asset lifted to 18 decimals before summing
pub fn collateral_value_usd(
    account: &AccountState,
    market: &MarketInfo,
    prices: &PriceBook,
) -> Result<Wad, ModelError> {
    weighted_collateral_usd(account, market, prices, |_| Wad::ONE)
}

/// Σ value × liquidation collateral factor: the debt above which the account is liquidatable
pub fn liquidation_capacity_usd(
    account: &AccountState,
    market: &MarketInfo,
    prices: &PriceBook,
) -> Result<Wad, ModelError> {
    weighted_collateral_usd(account, market, prices, |info| info.liquidate_collateral_factor)
}

/// Σ value × borrow collateral factor: the debt a new borrow may reach
pub fn borrow_capacity_usd(
    account: &AccountState,
    market: &MarketInfo,
    prices: &PriceBook,
) -> Result<Wad, ModelError> {
    weighted_collateral_usd(account, market, prices, |info| info.borrow_collateral_factor)
}

fn weighted_collateral_usd(
    account: &AccountState,
    market: &MarketInfo,
    prices: &PriceBook,
    factor: impl Fn(&AssetInfo) -> Wad,
) -> Result<Wad, ModelError> {
    let mut total = Wad::ZERO;
    for (asset, amount) in &account.collateral {
        if amount.is_zero() {
            continue;
        }
        let (quote, decimals) = quote_for(market, prices, asset)?;
        let value = quote.value_of(*amount, decimals)?;
        // quote_for already proved the asset exists
        let weight = market.asset(asset).map(&factor).unwrap_or(Wad::ZERO);
        total = total.checked_add(value.mul_wad(weight)?)?;
    }
    Ok(total)
}

/// USD value of the account's base debt
pub fn debt_value_usd(
    account: &AccountState,
    market: &MarketInfo,
    prices: &PriceBook,
) -> Result<Wad, ModelError> {
    let debt = account.borrowed();
    if debt.is_zero() {
        return Ok(Wad::ZERO);
    }
    let quote = prices
        .get(&market.base_price_feed)
        .ok_or(ModelError::StaleRead {
            asset: market.base_token,
            feed: Some(market.base_price_feed),
        })?;
    Ok(quote.value_of(debt, market.base_decimals)?)
}

/// `collateral_value * liquidation_collateral_factor / 1e18`
pub fn max_debt(collateral_value: Wad, liquidation_collateral_factor: Wad) -> Result<Wad, ScaleError> {
    collateral_value.mul_wad(liquidation_collateral_factor)
}

/// Value to borrow for `fraction` of `max_debt`
pub fn borrow_target(max_debt: Wad, fraction: Wad) -> Result<Wad, ScaleError> {
    max_debt.mul_wad(fraction)
}
