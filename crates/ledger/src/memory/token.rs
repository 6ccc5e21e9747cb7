//! ERC20 balances and allowances

use super::{arg_address, arg_uint, revert};
use crate::client::{LedgerError, Value};
use alloy_primitives::{Address, U256};
use risk_model::ScaleError;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(super) struct TokenState {
    pub symbol: String,
    pub decimals: u8,
    balances: BTreeMap<Address, U256>,
    allowances: BTreeMap<(Address, Address), U256>,
}

impl TokenState {
    pub fn new(symbol: String, decimals: u8) -> Self {
        Self {
            symbol,
            decimals,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    pub fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Mint out of thin air; only used while seeding a fork
    pub fn credit(&mut self, account: Address, amount: U256) -> Result<(), LedgerError> {
        let balance = self
            .balance(account)
            .checked_add(amount)
            .ok_or(ScaleError::Overflow("token credit"))?;
        self.balances.insert(account, balance);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let available = self.balance(from);
        if available < amount {
            return Err(revert(
                token,
                "transfer",
                &format!(
                    "{}: transfer amount exceeds balance ({} < {})",
                    self.symbol, available, amount
                ),
            ));
        }
        self.balances.insert(from, available - amount);
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or(ScaleError::Overflow("token transfer"))?;
        self.balances.insert(to, credited);
        Ok(())
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((owner, spender), amount);
    }

    /// Spend `spender`'s allowance over `owner`; an allowance of `U256::MAX` is never decreased
    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let allowed = self.allowance(owner, spender);
        if allowed < amount {
            return Err(revert(
                token,
                "transferFrom",
                &format!("{}: insufficient allowance ({} < {})", self.symbol, allowed, amount),
            ));
        }
        self.transfer(token, owner, to, amount)?;
        if allowed != U256::MAX {
            self.allowances.insert((owner, spender), allowed - amount);
        }
        Ok(())
    }

    pub fn call(&self, token: Address, method: &str, args: &[Value]) -> Result<Value, LedgerError> {
        match method {
            "balanceOf" => Ok(Value::Uint(self.balance(arg_address(method, args, 0)?))),
            "allowance" => Ok(Value::Uint(self.allowance(
                arg_address(method, args, 0)?,
                arg_address(method, args, 1)?,
            ))),
            "decimals" => Ok(Value::uint(self.decimals)),
            other => Err(LedgerError::UnknownMethod {
                contract: token,
                method: other.to_string(),
            }),
        }
    }

    pub fn submit(
        &mut self,
        token: Address,
        from: Address,
        method: &str,
        args: &[Value],
    ) -> Result<(), LedgerError> {
        match method {
            "transfer" => self.transfer(
                token,
                from,
                arg_address(method, args, 0)?,
                arg_uint(method, args, 1)?,
            ),
            "approve" => {
                self.approve(from, arg_address(method, args, 0)?, arg_uint(method, args, 1)?);
                Ok(())
            }
            other => Err(LedgerError::UnknownMethod {
                contract: token,
                method: other.to_string(),
            }),
        }
    }
}
