//! Typed handles over the untyped call surface
//!
//! Each handle borrows the ledger and pins one contract address. Reads go
//! through [`LedgerClient::call`], writes through [`LedgerClient::submit`].

use crate::client::{LedgerClient, LedgerError, Receipt, Value};
use alloy_primitives::{Address, U256};
use risk_model::scale::{decimals_from_scale, to_i128, to_u128};
use risk_model::{PriceQuote, Wad};

fn uint8(value: Value) -> Result<u8, LedgerError> {
    let raw = to_u128(value.as_uint()?)?;
    u8::try_from(raw).map_err(|_| LedgerError::Decode {
        expected: "uint8",
        got: raw.to_string(),
    })
}

/// ERC20 token
#[derive(Debug)]
pub struct Erc20Token<'l, L: ?Sized> {
    ledger: &'l L,
    address: Address,
}

impl<'l, L: LedgerClient + ?Sized> Erc20Token<'l, L> {
    pub fn new(ledger: &'l L, address: Address) -> Self {
        Self { ledger, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<Receipt, LedgerError> {
        self.ledger.submit(
            from,
            self.address,
            "transfer",
            &[Value::Address(to), Value::Uint(amount)],
        )
    }

    pub fn approve(&self, owner: Address, spender: Address, amount: U256) -> Result<Receipt, LedgerError> {
        self.ledger.submit(
            owner,
            self.address,
            "approve",
            &[Value::Address(spender), Value::Uint(amount)],
        )
    }

    pub fn balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        self.ledger
            .call(self.address, "balanceOf", &[Value::Address(account)])?
            .as_uint()
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> Result<U256, LedgerError> {
        self.ledger
            .call(
                self.address,
                "allowance",
                &[Value::Address(owner), Value::Address(spender)],
            )?
            .as_uint()
    }

    pub fn decimals(&self) -> Result<u8, LedgerError> {
        uint8(self.ledger.call(self.address, "decimals", &[])?)
    }
}

macro_rules! impl_copy {
    ($($handle:ident),*) => {$(
        impl<L: ?Sized> Clone for $handle<'_, L> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<L: ?Sized> Copy for $handle<'_, L> {}
    )*};
}

impl_copy!(Erc20Token, CometMarket, PriceFeed);

/// Raw `getAssetInfo` tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAssetInfo {
    pub offset: u8,
    pub asset: Address,
    pub price_feed: Address,
    pub scale: U256,
    pub borrow_collateral_factor: Wad,
    pub liquidate_collateral_factor: Wad,
    pub liquidation_factor: Wad,
    pub supply_cap: U256,
}

impl RawAssetInfo {
    pub fn decimals(&self) -> Result<u8, LedgerError> {
        Ok(decimals_from_scale(self.scale)?)
    }

    fn decode(value: Value) -> Result<Self, LedgerError> {
        let fields = value.into_tuple()?;
        if fields.len() != 8 {
            return Err(LedgerError::Decode {
                expected: "8-field asset info",
                got: format!("{} fields", fields.len()),
            });
        }
        let offset = uint8(fields[0].clone())?;
        Ok(Self {
            offset,
            asset: fields[1].as_address()?,
            price_feed: fields[2].as_address()?,
            scale: fields[3].as_uint()?,
            borrow_collateral_factor: Wad::from_raw(fields[4].as_uint()?),
            liquidate_collateral_factor: Wad::from_raw(fields[5].as_uint()?),
            liquidation_factor: Wad::from_raw(fields[6].as_uint()?),
            supply_cap: fields[7].as_uint()?,
        })
    }
}

/// Lending market with one base asset and several collateral assets
#[derive(Debug)]
pub struct CometMarket<'l, L: ?Sized> {
    ledger: &'l L,
    address: Address,
}

impl<'l, L: LedgerClient + ?Sized> CometMarket<'l, L> {
    pub fn new(ledger: &'l L, address: Address) -> Self {
        Self { ledger, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn read(&self, method: &str, args: &[Value]) -> Result<Value, LedgerError> {
        self.ledger.call(self.address, method, args)
    }

    pub fn get_utilization(&self) -> Result<Wad, LedgerError> {
        Ok(Wad::from_raw(self.read("getUtilization", &[])?.as_uint()?))
    }

    /// Per-second supply rate at `utilization`
    pub fn get_supply_rate(&self, utilization: Wad) -> Result<Wad, LedgerError> {
        let rate = self.read("getSupplyRate", &[Value::Uint(utilization.raw())])?;
        Ok(Wad::from_raw(rate.as_uint()?))
    }

    /// Per-second borrow rate at `utilization`
    pub fn get_borrow_rate(&self, utilization: Wad) -> Result<Wad, LedgerError> {
        let rate = self.read("getBorrowRate", &[Value::Uint(utilization.raw())])?;
        Ok(Wad::from_raw(rate.as_uint()?))
    }

    pub fn collateral_balance_of(&self, account: Address, asset: Address) -> Result<U256, LedgerError> {
        self.read(
            "collateralBalanceOf",
            &[Value::Address(account), Value::Address(asset)],
        )?
        .as_uint()
    }

    pub fn borrow_balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        self.read("borrowBalanceOf", &[Value::Address(account)])?.as_uint()
    }

    /// Supplied base balance
    pub fn balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        self.read("balanceOf", &[Value::Address(account)])?.as_uint()
    }

    /// Signed base balance: supplied minus borrowed
    pub fn base_balance_of(&self, account: Address) -> Result<i128, LedgerError> {
        let supplied = to_i128(self.balance_of(account)?)?;
        let borrowed = to_i128(self.borrow_balance_of(account)?)?;
        Ok(supplied - borrowed)
    }

    pub fn is_liquidatable(&self, account: Address) -> Result<bool, LedgerError> {
        self.read("isLiquidatable", &[Value::Address(account)])?.as_bool()
    }

    pub fn num_assets(&self) -> Result<u8, LedgerError> {
        uint8(self.read("numAssets", &[])?)
    }

    pub fn get_asset_info(&self, index: u8) -> Result<RawAssetInfo, LedgerError> {
        RawAssetInfo::decode(self.read("getAssetInfo", &[Value::uint(index)])?)
    }

    pub fn base_token(&self) -> Result<Address, LedgerError> {
        self.read("baseToken", &[])?.as_address()
    }

    pub fn base_token_price_feed(&self) -> Result<Address, LedgerError> {
        self.read("baseTokenPriceFeed", &[])?.as_address()
    }

    pub fn total_supply(&self) -> Result<U256, LedgerError> {
        self.read("totalSupply", &[])?.as_uint()
    }

    pub fn total_borrow(&self) -> Result<U256, LedgerError> {
        self.read("totalBorrow", &[])?.as_uint()
    }

    pub fn supply(&self, from: Address, asset: Address, amount: U256) -> Result<Receipt, LedgerError> {
        self.ledger.submit(
            from,
            self.address,
            "supply",
            &[Value::Address(asset), Value::Uint(amount)],
        )
    }

    /// Withdraw collateral, or borrow when `asset` is the base token
    pub fn withdraw(&self, from: Address, asset: Address, amount: U256) -> Result<Receipt, LedgerError> {
        self.ledger.submit(
            from,
            self.address,
            "withdraw",
            &[Value::Address(asset), Value::Uint(amount)],
        )
    }

    pub fn absorb(&self, liquidator: Address, accounts: &[Address]) -> Result<Receipt, LedgerError> {
        self.ledger.submit(
            liquidator,
            self.address,
            "absorb",
            &[Value::Address(liquidator), Value::Addresses(accounts.to_vec())],
        )
    }
}

/// Aggregator-style price feed
#[derive(Debug)]
pub struct PriceFeed<'l, L: ?Sized> {
    ledger: &'l L,
    address: Address,
}

impl<'l, L: LedgerClient + ?Sized> PriceFeed<'l, L> {
    pub fn new(ledger: &'l L, address: Address) -> Self {
        Self { ledger, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// `answer` field of `latestRoundData`
    pub fn latest_answer(&self) -> Result<U256, LedgerError> {
        let fields = self
            .ledger
            .call(self.address, "latestRoundData", &[])?
            .into_tuple()?;
        // (roundId, answer, startedAt, updatedAt, answeredInRound)
        let answer = fields.get(1).ok_or(LedgerError::Decode {
            expected: "round data",
            got: format!("{} fields", fields.len()),
        })?;
        let answer = answer.as_int()?;
        if answer < 0 {
            return Err(LedgerError::Decode {
                expected: "non-negative answer",
                got: answer.to_string(),
            });
        }
        Ok(U256::from(answer.unsigned_abs()))
    }

    pub fn decimals(&self) -> Result<u8, LedgerError> {
        uint8(self.ledger.call(self.address, "decimals", &[])?)
    }

    pub fn quote(&self) -> Result<PriceQuote, LedgerError> {
        Ok(PriceQuote {
            feed: self.address,
            answer: self.latest_answer()?,
            decimals: self.decimals()?,
        })
    }
}
