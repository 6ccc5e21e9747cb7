//! Oracle price control
//!
//! Installs the mock aggregator over a live feed and drives its answer. The
//! original code and every overwritten storage slot are recorded at install
//! time and written back by [`OracleController::restore`]; anything still
//! installed when the controller is dropped is restored then.

use crate::error::{Result, ScenarioError};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use risk_ledger::feed::{mock_aggregator_code, MOCK_ANSWER_SLOT, MOCK_DECIMALS_SLOT};
use risk_ledger::{LedgerClient, PriceFeed};
use risk_model::PriceQuote;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Override {
    original_code: Bytes,
    code_hash: B256,
    /// (slot, value before install)
    slots: Vec<(U256, U256)>,
    decimals: u8,
}

pub struct OracleController<'l, L: LedgerClient + ?Sized> {
    ledger: &'l L,
    overrides: BTreeMap<Address, Override>,
}

impl<'l, L: LedgerClient + ?Sized> OracleController<'l, L> {
    pub fn new(ledger: &'l L) -> Self {
        Self {
            ledger,
            overrides: BTreeMap::new(),
        }
    }

    /// Replace `feed` with the mock aggregator answering `initial_price`
    ///
    /// `decimals` must match the live feed: a feed's precision never changes
    /// within a scenario. Mines exactly one block.
    pub fn install(&mut self, feed: Address, initial_price: U256, decimals: u8) -> Result<()> {
        if self.overrides.contains_key(&feed) {
            return Err(ScenarioError::config(format!("feed {feed} already has an override")));
        }

        let original_code = self.ledger.get_code(feed)?;
        if original_code.is_empty() {
            return Err(ScenarioError::config(format!("no feed deployed at {feed}")));
        }
        let live_decimals = PriceFeed::new(self.ledger, feed).decimals()?;
        if live_decimals != decimals {
            return Err(ScenarioError::config(format!(
                "feed {feed} reports {live_decimals} decimals, override asked for {decimals}"
            )));
        }

        let mut slots = Vec::with_capacity(2);
        for slot in [MOCK_ANSWER_SLOT, MOCK_DECIMALS_SLOT] {
            slots.push((slot, self.ledger.get_storage_slot(feed, slot)?));
        }

        // Record first so a failure below still gets rolled back
        self.overrides.insert(
            feed,
            Override {
                code_hash: keccak256(&original_code),
                original_code,
                slots,
                decimals,
            },
        );

        self.ledger.set_feed_code(feed, mock_aggregator_code())?;
        self.ledger
            .set_storage_slot(feed, MOCK_DECIMALS_SLOT, U256::from(decimals))?;
        self.ledger
            .set_storage_slot(feed, MOCK_ANSWER_SLOT, initial_price)?;
        let block = self.ledger.mine()?;

        log::info!(
            "Installed mock feed at {} answering {} ({} decimals, block {})",
            feed,
            risk_model::scale::format_units(initial_price, decimals),
            decimals,
            block
        );
        Ok(())
    }

    /// Commit a new raw answer; a single slot write followed by one mined block
    pub fn set_price(&self, feed: Address, price: U256) -> Result<u64> {
        let decimals = self.installed_decimals(feed)?;
        self.ledger.set_storage_slot(feed, MOCK_ANSWER_SLOT, price)?;
        let block = self.ledger.mine()?;
        log::debug!(
            "Feed {} now answers {} (block {})",
            feed,
            risk_model::scale::format_units(price, decimals),
            block
        );
        Ok(block)
    }

    pub fn read(&self, feed: Address) -> Result<PriceQuote> {
        Ok(PriceFeed::new(self.ledger, feed).quote()?)
    }

    pub fn is_installed(&self, feed: Address) -> bool {
        self.overrides.contains_key(&feed)
    }

    pub fn installed(&self) -> Vec<Address> {
        self.overrides.keys().copied().collect()
    }

    fn installed_decimals(&self, feed: Address) -> Result<u8> {
        self.overrides
            .get(&feed)
            .map(|o| o.decimals)
            .ok_or_else(|| ScenarioError::config(format!("feed {feed} has no override installed")))
    }

    /// Put back the original code and storage of `feed`
    pub fn restore(&mut self, feed: Address) -> Result<()> {
        let saved = self
            .overrides
            .remove(&feed)
            .ok_or_else(|| ScenarioError::config(format!("feed {feed} has no override installed")))?;

        self.ledger.set_feed_code(feed, saved.original_code)?;
        for (slot, value) in saved.slots {
            self.ledger.set_storage_slot(feed, slot, value)?;
        }

        let restored = keccak256(self.ledger.get_code(feed)?);
        if restored != saved.code_hash {
            return Err(ScenarioError::config(format!(
                "feed {feed} code hash {restored} after restore, expected {}",
                saved.code_hash
            )));
        }

        log::info!("Restored live feed at {}", feed);
        Ok(())
    }

    /// Restore every override; keeps going past failures and returns the first
    pub fn restore_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for feed in self.installed() {
            if let Err(e) = self.restore(feed) {
                log::error!("Failed to restore feed {}: {}", feed, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<L: LedgerClient + ?Sized> Drop for OracleController<'_, L> {
    fn drop(&mut self) {
        if !self.overrides.is_empty() {
            log::warn!("Restoring {} feed override(s) on drop", self.overrides.len());
            let _ = self.restore_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use risk_ledger::MemoryLedger;
    use risk_model::scale::parse_units;

    fn ledger() -> (MemoryLedger, Address) {
        let config = Config::default_mainnet();
        let network = config.network("mainnet").unwrap();
        let feed = network.asset("WETH").unwrap().price_feed;
        (MemoryLedger::fork(&network.snapshot).unwrap(), feed)
    }

    #[test]
    fn test_read_is_idempotent() {
        let (ledger, feed) = ledger();
        let oracle = OracleController::new(&ledger);
        let first = oracle.read(feed).unwrap();
        let second = oracle.read(feed).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.answer, parse_units("2450", 8).unwrap());
    }

    #[test]
    fn test_install_and_set_price_mine_one_block_each() {
        let (ledger, feed) = ledger();
        let mut oracle = OracleController::new(&ledger);
        let start = ledger.block_number().unwrap();

        oracle.install(feed, parse_units("2450", 8).unwrap(), 8).unwrap();
        assert_eq!(ledger.block_number().unwrap(), start + 1);

        for (i, price) in ["2401", "2352.98", "2305.9204"].iter().enumerate() {
            let answer = parse_units(price, 8).unwrap();
            oracle.set_price(feed, answer).unwrap();
            assert_eq!(ledger.block_number().unwrap(), start + 2 + i as u64);
            assert_eq!(oracle.read(feed).unwrap().answer, answer);
        }
    }

    #[test]
    fn test_decimal_mismatch_is_rejected() {
        let (ledger, feed) = ledger();
        let mut oracle = OracleController::new(&ledger);
        let start = ledger.block_number().unwrap();

        let err = oracle.install(feed, parse_units("2450", 6).unwrap(), 6).unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(_)));
        assert!(!oracle.is_installed(feed));
        assert_eq!(ledger.block_number().unwrap(), start);
    }

    #[test]
    fn test_set_price_without_install_fails() {
        let (ledger, feed) = ledger();
        let oracle = OracleController::new(&ledger);
        assert!(matches!(
            oracle.set_price(feed, U256::from(1u64)),
            Err(ScenarioError::Configuration(_))
        ));
    }

    #[test]
    fn test_restore_puts_back_code_and_slots() {
        let (ledger, feed) = ledger();
        let code = ledger.get_code(feed).unwrap();
        let slot0 = ledger.get_storage_slot(feed, MOCK_ANSWER_SLOT).unwrap();
        let slot1 = ledger.get_storage_slot(feed, MOCK_DECIMALS_SLOT).unwrap();

        let mut oracle = OracleController::new(&ledger);
        oracle.install(feed, parse_units("500", 8).unwrap(), 8).unwrap();
        assert_eq!(oracle.read(feed).unwrap().answer, parse_units("500", 8).unwrap());

        oracle.restore(feed).unwrap();
        assert_eq!(ledger.get_code(feed).unwrap(), code);
        assert_eq!(ledger.get_storage_slot(feed, MOCK_ANSWER_SLOT).unwrap(), slot0);
        assert_eq!(ledger.get_storage_slot(feed, MOCK_DECIMALS_SLOT).unwrap(), slot1);
        assert_eq!(oracle.read(feed).unwrap().answer, parse_units("2450", 8).unwrap());
    }

    #[test]
    fn test_drop_restores_live_feed() {
        let (ledger, feed) = ledger();
        {
            let mut oracle = OracleController::new(&ledger);
            oracle.install(feed, parse_units("500", 8).unwrap(), 8).unwrap();
        }
        let quote = PriceFeed::new(&ledger, feed).quote().unwrap();
        assert_eq!(quote.answer, parse_units("2450", 8).unwrap());
    }
}
