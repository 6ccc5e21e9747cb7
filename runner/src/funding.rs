//! Impersonated funding

use crate::error::Result;
use alloy_primitives::{Address, U256};
use risk_ledger::{Erc20Token, LedgerClient, LedgerError, Receipt, SignerHandle};

/// Impersonation that is released when the guard goes away
pub struct ImpersonationGuard<'l, L: LedgerClient + ?Sized> {
    ledger: &'l L,
    address: Address,
    handle: Option<SignerHandle>,
}

impl<'l, L: LedgerClient + ?Sized> ImpersonationGuard<'l, L> {
    pub fn acquire(ledger: &'l L, address: Address) -> std::result::Result<Self, LedgerError> {
        let handle = ledger.impersonate(address)?;
        log::debug!("Impersonating {}", address);
        Ok(Self {
            ledger,
            address,
            handle: Some(handle),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Release now and report the result; dropping releases too but can only log
    pub fn release(mut self) -> std::result::Result<(), LedgerError> {
        match self.handle.take() {
            Some(handle) => self.ledger.release(handle),
            None => Ok(()),
        }
    }
}

impl<L: LedgerClient + ?Sized> Drop for ImpersonationGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.ledger.release(handle) {
                log::error!("Failed to release impersonation of {}: {}", self.address, e);
            }
        }
    }
}

/// Send `amount` of `token` from `whale` to `recipient`
///
/// Gives the whale `whale_gas` wei, impersonates it for exactly one transfer
/// and releases it whether or not the transfer went through.
pub fn fund_account<L: LedgerClient + ?Sized>(
    ledger: &L,
    token: Address,
    whale: Address,
    recipient: Address,
    amount: U256,
    whale_gas: &str,
) -> Result<Receipt> {
    ledger.set_balance(whale, whale_gas)?;

    let guard = ImpersonationGuard::acquire(ledger, whale)?;
    let transfer = Erc20Token::new(ledger, token).transfer(guard.address(), recipient, amount);
    let released = guard.release();

    let receipt = transfer?;
    released?;
    log::info!("Funded {} with {} of {} from {}", recipient, amount, token, whale);
    Ok(receipt)
}
