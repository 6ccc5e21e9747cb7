//! Read-through market model
//!
//! Fills the pure [`risk_model`] structures from ledger reads. The static part
//! (assets, feeds, factors) is read once in [`MarketModel::load`]; balances and
//! utilization are read on every [`MarketModel::refresh`].

use crate::error::Result;
use crate::oracle::OracleController;
use alloy_primitives::Address;
use risk_ledger::{CometMarket, Erc20Token, LedgerClient, PriceFeed};
use risk_model::{
    borrow_capacity_usd, collateral_value_usd, debt_value_usd, liquidation_capacity_usd,
    AccountState, AssetInfo, MarketInfo, PriceBook, Wad,
};
use std::collections::BTreeMap;

/// Per-second rates at one utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSample {
    pub utilization: Wad,
    pub supply_rate: Wad,
    pub borrow_rate: Wad,
}

pub struct MarketModel<'l, L: ?Sized> {
    market: CometMarket<'l, L>,
    info: MarketInfo,
}

impl<'l, L: LedgerClient + ?Sized> MarketModel<'l, L> {
    pub fn load(ledger: &'l L, address: Address) -> Result<Self> {
        let market = CometMarket::new(ledger, address);

        let base_token = market.base_token()?;
        let base_price_feed = market.base_token_price_feed()?;
        let base_decimals = Erc20Token::new(ledger, base_token).decimals()?;
        let base_feed_decimals = PriceFeed::new(ledger, base_price_feed).decimals()?;

        let count = market.num_assets()?;
        let mut assets = Vec::with_capacity(count as usize);
        for index in 0..count {
            let raw = market.get_asset_info(index)?;
            assets.push(AssetInfo {
                offset: raw.offset,
                asset: raw.asset,
                decimals: raw.decimals()?,
                price_feed: raw.price_feed,
                feed_decimals: PriceFeed::new(ledger, raw.price_feed).decimals()?,
                borrow_collateral_factor: raw.borrow_collateral_factor,
                liquidate_collateral_factor: raw.liquidate_collateral_factor,
                liquidation_factor: raw.liquidation_factor,
                supply_cap: raw.supply_cap,
            });
        }

        log::info!(
            "Loaded market {} (base {}, {} collateral assets)",
            address,
            base_token,
            assets.len()
        );

        Ok(Self {
            market,
            info: MarketInfo {
                address,
                base_token,
                base_decimals,
                base_price_feed,
                base_feed_decimals,
                assets,
            },
        })
    }

    pub fn info(&self) -> &MarketInfo {
        &self.info
    }

    pub fn market(&self) -> CometMarket<'l, L> {
        self.market
    }

    /// Current balances of `account` plus market utilization
    pub fn refresh(&self, account: Address) -> Result<AccountState> {
        let mut collateral = BTreeMap::new();
        for info in &self.info.assets {
            collateral.insert(info.asset, self.market.collateral_balance_of(account, info.asset)?);
        }

        Ok(AccountState {
            account,
            collateral,
            base_balance: self.market.base_balance_of(account)?,
            utilization: self.utilization()?,
        })
    }

    pub fn utilization(&self) -> Result<Wad> {
        Ok(self.market.get_utilization()?)
    }

    pub fn is_liquidatable(&self, account: Address) -> Result<bool> {
        Ok(self.market.is_liquidatable(account)?)
    }

    /// Current rates as the market reports them
    pub fn rates(&self) -> Result<RateSample> {
        let utilization = self.utilization()?;
        Ok(RateSample {
            utilization,
            supply_rate: self.market.get_supply_rate(utilization)?,
            borrow_rate: self.market.get_borrow_rate(utilization)?,
        })
    }

    /// Quote every configured feed through the oracle read path
    pub fn read_prices(&self, oracle: &OracleController<'l, L>) -> Result<PriceBook> {
        let mut prices = PriceBook::new();
        for feed in self.info.feeds() {
            prices.insert(feed, oracle.read(feed)?);
        }
        Ok(prices)
    }

    pub fn collateral_value_usd(&self, state: &AccountState, prices: &PriceBook) -> Result<Wad> {
        Ok(collateral_value_usd(state, &self.info, prices)?)
    }

    /// `maxDebt`: collateral value weighted by each liquidation collateral factor
    pub fn liquidation_capacity_usd(&self, state: &AccountState, prices: &PriceBook) -> Result<Wad> {
        Ok(liquidation_capacity_usd(state, &self.info, prices)?)
    }

    pub fn borrow_capacity_usd(&self, state: &AccountState, prices: &PriceBook) -> Result<Wad> {
        Ok(borrow_capacity_usd(state, &self.info, prices)?)
    }

    pub fn debt_value_usd(&self, state: &AccountState, prices: &PriceBook) -> Result<Wad> {
        Ok(debt_value_usd(state, &self.info, prices)?)
    }
}
