//! Simplified lending market
//!
//! Base balances are stored as principal and scaled by a supply or borrow
//! index that accrues every time the clock moves. Collateral is held per
//! account and asset. This is enough bookkeeping to drive a position into
//! liquidation; it does not reproduce the real protocol's reserves, rewards
//! or rounding.

use super::token::TokenState;
use super::{arg_address, arg_addresses, arg_uint, revert};
use crate::client::{LedgerError, Value};
use alloy_primitives::{Address, U256};
use risk_model::scale::{self, mul_div, pow10, scale_by_wad, to_i128};
use risk_model::{
    borrow_capacity_usd, debt_value_usd, liquidation_capacity_usd, AccountState, MarketInfo,
    MarketRates, ModelError, PriceBook, ScaleError, Wad,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(super) struct MarketState {
    pub info: MarketInfo,
    rates: MarketRates,
    supply_index: Wad,
    borrow_index: Wad,
    /// Principal of every positive base balance, including accounts outside the fork
    total_supply_base: U256,
    /// Principal of every negative base balance, including accounts outside the fork
    total_borrow_base: U256,
    principals: BTreeMap<Address, i128>,
    collateral: BTreeMap<(Address, Address), U256>,
    total_collateral: BTreeMap<Address, U256>,
    last_accrual: u64,
}

fn model_error(market: Address, method: &str, err: ModelError) -> LedgerError {
    revert(market, method, &err.to_string())
}

impl MarketState {
    pub fn new(
        info: MarketInfo,
        rates: MarketRates,
        total_supply: U256,
        total_borrow: U256,
        now: u64,
    ) -> Self {
        Self {
            info,
            rates,
            supply_index: Wad::ONE,
            borrow_index: Wad::ONE,
            total_supply_base: total_supply,
            total_borrow_base: total_borrow,
            principals: BTreeMap::new(),
            collateral: BTreeMap::new(),
            total_collateral: BTreeMap::new(),
            last_accrual: now,
        }
    }

    /// Grow both indices by `rate * elapsed` at the current utilization
    pub fn accrue(&mut self, now: u64) -> Result<(), LedgerError> {
        let elapsed = now.saturating_sub(self.last_accrual);
        if elapsed == 0 {
            return Ok(());
        }

        let utilization = self.utilization()?;
        let supply_rate = self.rates.supply.rate(utilization)?;
        let borrow_rate = self.rates.borrow.rate(utilization)?;

        let supply_growth = self.supply_index.mul_wad(supply_rate.mul_int(elapsed)?)?;
        let borrow_growth = self.borrow_index.mul_wad(borrow_rate.mul_int(elapsed)?)?;
        self.supply_index = self.supply_index.checked_add(supply_growth)?;
        self.borrow_index = self.borrow_index.checked_add(borrow_growth)?;
        self.last_accrual = now;
        Ok(())
    }

    pub fn total_supply(&self) -> Result<U256, ScaleError> {
        scale_by_wad(self.total_supply_base, self.supply_index)
    }

    pub fn total_borrow(&self) -> Result<U256, ScaleError> {
        scale_by_wad(self.total_borrow_base, self.borrow_index)
    }

    pub fn utilization(&self) -> Result<Wad, ScaleError> {
        Ok(scale::utilization(self.total_supply()?, self.total_borrow()?))
    }

    fn present_value(&self, principal: i128) -> Result<i128, ScaleError> {
        let magnitude = U256::from(principal.unsigned_abs());
        if principal >= 0 {
            to_i128(scale_by_wad(magnitude, self.supply_index)?)
        } else {
            Ok(-to_i128(scale_by_wad(magnitude, self.borrow_index)?)?)
        }
    }

    /// Supply principal rounds down, borrow principal rounds up
    fn principal_value(&self, present: i128) -> Result<i128, ScaleError> {
        let magnitude = U256::from(present.unsigned_abs());
        if present >= 0 {
            to_i128(mul_div(magnitude, Wad::ONE.raw(), self.supply_index.raw())?)
        } else {
            let index = self.borrow_index.raw();
            let numerator = magnitude
                .checked_mul(Wad::ONE.raw())
                .and_then(|n| n.checked_add(index - U256::from(1u64)))
                .ok_or(ScaleError::Overflow("borrow principal"))?;
            Ok(-to_i128(numerator / index)?)
        }
    }

    pub fn base_balance(&self, account: Address) -> Result<i128, ScaleError> {
        self.present_value(self.principals.get(&account).copied().unwrap_or(0))
    }

    fn set_base_balance(&mut self, account: Address, present: i128) -> Result<(), ScaleError> {
        let old = self.principals.get(&account).copied().unwrap_or(0);
        let new = self.principal_value(present)?;

        let (old_supply, old_borrow) = split(old);
        let (new_supply, new_borrow) = split(new);
        self.total_supply_base = self
            .total_supply_base
            .saturating_sub(old_supply)
            .checked_add(new_supply)
            .ok_or(ScaleError::Overflow("total supply"))?;
        self.total_borrow_base = self
            .total_borrow_base
            .saturating_sub(old_borrow)
            .checked_add(new_borrow)
            .ok_or(ScaleError::Overflow("total borrow"))?;

        if new == 0 {
            self.principals.remove(&account);
        } else {
            self.principals.insert(account, new);
        }
        Ok(())
    }

    pub fn collateral_of(&self, account: Address, asset: Address) -> U256 {
        self.collateral
            .get(&(account, asset))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn account_state(&self, account: Address) -> Result<AccountState, ScaleError> {
        let collateral = self
            .info
            .assets
            .iter()
            .map(|info| (info.asset, self.collateral_of(account, info.asset)))
            .collect();
        Ok(AccountState {
            account,
            collateral,
            base_balance: self.base_balance(account)?,
            utilization: self.utilization()?,
        })
    }

    fn is_liquidatable(&self, account: Address, prices: &PriceBook) -> Result<bool, ModelError> {
        let state = self.account_state(account)?;
        if state.base_balance >= 0 {
            return Ok(false);
        }
        let debt = debt_value_usd(&state, &self.info, prices)?;
        let capacity = liquidation_capacity_usd(&state, &self.info, prices)?;
        Ok(debt > capacity)
    }

    fn is_borrow_collateralized(&self, account: Address, prices: &PriceBook) -> Result<bool, ModelError> {
        let state = self.account_state(account)?;
        if state.base_balance >= 0 {
            return Ok(true);
        }
        let debt = debt_value_usd(&state, &self.info, prices)?;
        let capacity = borrow_capacity_usd(&state, &self.info, prices)?;
        Ok(debt <= capacity)
    }

    pub fn call(
        &self,
        market: Address,
        method: &str,
        args: &[Value],
        prices: &PriceBook,
    ) -> Result<Value, LedgerError> {
        let value = match method {
            "getUtilization" => Value::Uint(self.utilization()?.raw()),
            "getSupplyRate" => {
                let utilization = Wad::from_raw(arg_uint(method, args, 0)?);
                Value::Uint(self.rates.supply.rate(utilization)?.raw())
            }
            "getBorrowRate" => {
                let utilization = Wad::from_raw(arg_uint(method, args, 0)?);
                Value::Uint(self.rates.borrow.rate(utilization)?.raw())
            }
            "collateralBalanceOf" => Value::Uint(self.collateral_of(
                arg_address(method, args, 0)?,
                arg_address(method, args, 1)?,
            )),
            "borrowBalanceOf" => {
                let balance = self.base_balance(arg_address(method, args, 0)?)?;
                let debt = if balance < 0 { balance.unsigned_abs() } else { 0 };
                Value::uint(debt)
            }
            "balanceOf" => {
                let balance = self.base_balance(arg_address(method, args, 0)?)?;
                let supplied = if balance > 0 { balance.unsigned_abs() } else { 0 };
                Value::uint(supplied)
            }
            "isLiquidatable" => Value::Bool(
                self.is_liquidatable(arg_address(method, args, 0)?, prices)
                    .map_err(|err| model_error(market, method, err))?,
            ),
            "numAssets" => Value::uint(self.info.assets.len() as u64),
            "getAssetInfo" => {
                let index = arg_uint(method, args, 0)?;
                let info = self
                    .info
                    .assets
                    .iter()
                    .find(|info| U256::from(info.offset) == index)
                    .ok_or_else(|| revert(market, method, "BadAsset"))?;
                Value::Tuple(vec![
                    Value::uint(info.offset),
                    Value::Address(info.asset),
                    Value::Address(info.price_feed),
                    Value::Uint(pow10(info.decimals)?),
                    Value::Uint(info.borrow_collateral_factor.raw()),
                    Value::Uint(info.liquidate_collateral_factor.raw()),
                    Value::Uint(info.liquidation_factor.raw()),
                    Value::Uint(info.supply_cap),
                ])
            }
            "baseToken" => Value::Address(self.info.base_token),
            "baseTokenPriceFeed" => Value::Address(self.info.base_price_feed),
            "totalSupply" => Value::Uint(self.total_supply()?),
            "totalBorrow" => Value::Uint(self.total_borrow()?),
            other => {
                return Err(LedgerError::UnknownMethod {
                    contract: market,
                    method: other.to_string(),
                })
            }
        };
        Ok(value)
    }

    pub fn submit(
        &mut self,
        market: Address,
        from: Address,
        method: &str,
        args: &[Value],
        tokens: &mut BTreeMap<Address, TokenState>,
        prices: &PriceBook,
    ) -> Result<(), LedgerError> {
        match method {
            "supply" => self.supply(
                market,
                from,
                arg_address(method, args, 0)?,
                arg_uint(method, args, 1)?,
                tokens,
            ),
            "withdraw" => self.withdraw(
                market,
                from,
                arg_address(method, args, 0)?,
                arg_uint(method, args, 1)?,
                tokens,
                prices,
            ),
            "absorb" => {
                let accounts = arg_addresses(method, args, 1)?.to_vec();
                self.absorb(market, &accounts, prices)
            }
            other => Err(LedgerError::UnknownMethod {
                contract: market,
                method: other.to_string(),
            }),
        }
    }

    fn supply(
        &mut self,
        market: Address,
        from: Address,
        asset: Address,
        amount: U256,
        tokens: &mut BTreeMap<Address, TokenState>,
    ) -> Result<(), LedgerError> {
        let method = "supply";
        if asset == self.info.base_token {
            token_mut(market, method, tokens, asset)?
                .transfer_from(asset, market, from, market, amount)?;
            let present = self
                .base_balance(from)?
                .checked_add(to_i128(amount)?)
                .ok_or(ScaleError::Overflow("supply"))?;
            self.set_base_balance(from, present)?;
            return Ok(());
        }

        let cap = self
            .info
            .asset(&asset)
            .map(|info| info.supply_cap)
            .ok_or_else(|| revert(market, method, "BadAsset"))?;
        let total = self
            .total_collateral
            .get(&asset)
            .copied()
            .unwrap_or(U256::ZERO)
            .checked_add(amount)
            .ok_or(ScaleError::Overflow("total collateral"))?;
        if total > cap {
            return Err(revert(market, method, "SupplyCapExceeded"));
        }

        token_mut(market, method, tokens, asset)?
            .transfer_from(asset, market, from, market, amount)?;
        let held = self.collateral_of(from, asset) + amount;
        self.collateral.insert((from, asset), held);
        self.total_collateral.insert(asset, total);
        Ok(())
    }

    fn withdraw(
        &mut self,
        market: Address,
        from: Address,
        asset: Address,
        amount: U256,
        tokens: &mut BTreeMap<Address, TokenState>,
        prices: &PriceBook,
    ) -> Result<(), LedgerError> {
        let method = "withdraw";
        if asset == self.info.base_token {
            let present = self
                .base_balance(from)?
                .checked_sub(to_i128(amount)?)
                .ok_or(ScaleError::Overflow("withdraw"))?;
            self.set_base_balance(from, present)?;
        } else {
            if self.info.asset(&asset).is_none() {
                return Err(revert(market, method, "BadAsset"));
            }
            let held = self.collateral_of(from, asset);
            if held < amount {
                return Err(revert(market, method, "insufficient collateral"));
            }
            self.collateral.insert((from, asset), held - amount);
            let total = self.total_collateral.get(&asset).copied().unwrap_or(U256::ZERO);
            self.total_collateral.insert(asset, total.saturating_sub(amount));
        }

        let collateralized = self
            .is_borrow_collateralized(from, prices)
            .map_err(|err| model_error(market, method, err))?;
        if !collateralized {
            return Err(revert(market, method, "NotCollateralized"));
        }

        token_mut(market, method, tokens, asset)?
            .transfer(asset, market, from, amount)
    }

    /// Seize every listed account's collateral and credit its value, discounted
    /// by each asset's liquidation factor, against the account's debt
    fn absorb(&mut self, market: Address, accounts: &[Address], prices: &PriceBook) -> Result<(), LedgerError> {
        let method = "absorb";
        let base_quote = *prices
            .get(&self.info.base_price_feed)
            .ok_or_else(|| revert(market, method, "no base price"))?;

        for account in accounts {
            let liquidatable = self
                .is_liquidatable(*account, prices)
                .map_err(|err| model_error(market, method, err))?;
            if !liquidatable {
                return Err(revert(market, method, "NotLiquidatable"));
            }

            let mut seized = Wad::ZERO;
            for info in self.info.assets.clone() {
                let held = self.collateral_of(*account, info.asset);
                if held.is_zero() {
                    continue;
                }
                let quote = prices
                    .get(&info.price_feed)
                    .ok_or_else(|| revert(market, method, &format!("no price for {}", info.asset)))?;
                let value = quote.value_of(held, info.decimals)?;
                seized = seized.checked_add(value.mul_wad(info.liquidation_factor)?)?;

                self.collateral.remove(&(*account, info.asset));
                let total = self.total_collateral.get(&info.asset).copied().unwrap_or(U256::ZERO);
                self.total_collateral.insert(info.asset, total.saturating_sub(held));
            }

            let credit = to_i128(base_quote.amount_for(seized, self.info.base_decimals)?)?;
            let present = self
                .base_balance(*account)?
                .checked_add(credit)
                .ok_or(ScaleError::Overflow("absorb"))?;
            // Any shortfall is written off by the market
            self.set_base_balance(*account, present.max(0))?;
        }
        Ok(())
    }
}

fn token_mut<'t>(
    market: Address,
    method: &str,
    tokens: &'t mut BTreeMap<Address, TokenState>,
    asset: Address,
) -> Result<&'t mut TokenState, LedgerError> {
    tokens
        .get_mut(&asset)
        .ok_or_else(|| revert(market, method, &format!("no token at {asset}")))
}

fn split(principal: i128) -> (U256, U256) {
    let magnitude = U256::from(principal.unsigned_abs());
    if principal >= 0 {
        (magnitude, U256::ZERO)
    } else {
        (U256::ZERO, magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_model::{AssetInfo, PriceQuote, RateCurve};

    const MARKET: Address = Address::repeat_byte(0xc3);
    const USDC: Address = Address::repeat_byte(0xa0);
    const WETH: Address = Address::repeat_byte(0xc0);
    const USDC_FEED: Address = Address::repeat_byte(0x8f);
    const WETH_FEED: Address = Address::repeat_byte(0x5f);
    const ALICE: Address = Address::repeat_byte(0x01);

    fn wad(literal: &str) -> Wad {
        Wad::parse(literal).unwrap()
    }

    fn units(literal: &str, decimals: u8) -> U256 {
        scale::parse_units(literal, decimals).unwrap()
    }

    fn market() -> MarketState {
        let curve = RateCurve::from_annual(wad("0.015"), wad("0.04"), wad("3"), wad("0.9")).unwrap();
        let info = MarketInfo {
            address: MARKET,
            base_token: USDC,
            base_decimals: 6,
            base_price_feed: USDC_FEED,
            base_feed_decimals: 8,
            assets: vec![AssetInfo {
                offset: 0,
                asset: WETH,
                decimals: 18,
                price_feed: WETH_FEED,
                feed_decimals: 8,
                borrow_collateral_factor: wad("0.8"),
                liquidate_collateral_factor: wad("0.85"),
                liquidation_factor: wad("0.95"),
                supply_cap: units("10", 18),
            }],
        };
        let rates = MarketRates { supply: curve, borrow: curve };
        MarketState::new(info, rates, units("100000", 6), units("50000", 6), 1_000)
    }

    fn tokens() -> BTreeMap<Address, TokenState> {
        let mut usdc = TokenState::new("USDC".to_string(), 6);
        usdc.credit(MARKET, units("50000", 6)).unwrap();
        let mut weth = TokenState::new("WETH".to_string(), 18);
        weth.credit(ALICE, units("2", 18)).unwrap();
        weth.approve(ALICE, MARKET, U256::MAX);
        BTreeMap::from([(USDC, usdc), (WETH, weth)])
    }

    fn prices(eth: &str) -> PriceBook {
        let mut book = PriceBook::new();
        for (feed, price) in [(USDC_FEED, "1"), (WETH_FEED, eth)] {
            book.insert(feed, PriceQuote { feed, answer: units(price, 8), decimals: 8 });
        }
        book
    }

    fn supply_weth(market: &mut MarketState, tokens: &mut BTreeMap<Address, TokenState>) {
        let args = [Value::Address(WETH), Value::Uint(units("1", 18))];
        market.submit(MARKET, ALICE, "supply", &args, tokens, &prices("2000")).unwrap();
    }

    #[test]
    fn test_borrow_within_capacity() {
        let (mut m, mut t) = (market(), tokens());
        supply_weth(&mut m, &mut t);

        let args = [Value::Address(USDC), Value::Uint(units("1600", 6))];
        m.submit(MARKET, ALICE, "withdraw", &args, &mut t, &prices("2000")).unwrap();

        assert_eq!(m.base_balance(ALICE).unwrap(), -1_600_000_000);
        assert_eq!(t[&USDC].balance(ALICE), units("1600", 6));
        assert_eq!(m.total_borrow().unwrap(), units("51600", 6));
    }

    #[test]
    fn test_borrow_beyond_capacity_reverts() {
        let (mut m, mut t) = (market(), tokens());
        supply_weth(&mut m, &mut t);

        let args = [Value::Address(USDC), Value::Uint(units("1601", 6))];
        let err = m.submit(MARKET, ALICE, "withdraw", &args, &mut t, &prices("2000")).unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { ref reason, .. } if reason == "NotCollateralized"));
    }

    #[test]
    fn test_supply_cap() {
        let (mut m, mut t) = (market(), tokens());
        t.get_mut(&WETH).unwrap().credit(ALICE, units("20", 18)).unwrap();
        let args = [Value::Address(WETH), Value::Uint(units("11", 18))];
        let err = m.submit(MARKET, ALICE, "supply", &args, &mut t, &prices("2000")).unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { ref reason, .. } if reason == "SupplyCapExceeded"));
    }

    #[test]
    fn test_liquidatable_after_price_drop_and_absorb() {
        let (mut m, mut t) = (market(), tokens());
        supply_weth(&mut m, &mut t);
        let args = [Value::Address(USDC), Value::Uint(units("1600", 6))];
        m.submit(MARKET, ALICE, "withdraw", &args, &mut t, &prices("2000")).unwrap();

        // 1600 debt vs 0.85 * price
        assert!(!m.is_liquidatable(ALICE, &prices("1900")).unwrap());
        assert!(m.is_liquidatable(ALICE, &prices("1880")).unwrap());

        let absorb = [Value::Address(ALICE), Value::Addresses(vec![ALICE])];
        m.submit(MARKET, ALICE, "absorb", &absorb, &mut t, &prices("1880")).unwrap();
        assert_eq!(m.collateral_of(ALICE, WETH), U256::ZERO);
        // 1880 * 0.95 = 1786 credited against 1600 debt
        assert_eq!(m.base_balance(ALICE).unwrap(), 186_000_000);
    }

    #[test]
    fn test_absorb_healthy_account_reverts() {
        let (mut m, mut t) = (market(), tokens());
        supply_weth(&mut m, &mut t);
        let absorb = [Value::Address(ALICE), Value::Addresses(vec![ALICE])];
        let err = m.submit(MARKET, ALICE, "absorb", &absorb, &mut t, &prices("2000")).unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { ref reason, .. } if reason == "NotLiquidatable"));
    }

    #[test]
    fn test_accrual_grows_debt() {
        let (mut m, mut t) = (market(), tokens());
        supply_weth(&mut m, &mut t);
        let args = [Value::Address(USDC), Value::Uint(units("1000", 6))];
        m.submit(MARKET, ALICE, "withdraw", &args, &mut t, &prices("2000")).unwrap();

        m.accrue(1_000 + 86_400 * 30).unwrap();
        assert!(m.base_balance(ALICE).unwrap() < -1_000_000_000);
        assert!(m.total_supply().unwrap() > units("100000", 6));
    }
}
