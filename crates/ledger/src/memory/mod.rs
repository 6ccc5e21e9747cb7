//! In-process ledger seeded from a [`ForkSnapshot`]
//!
//! Stands in for a forked node: tokens, one or more lending markets and price
//! feeds live in a single state object behind a mutex. Every state-changing
//! transaction runs against a copy of the state and is committed only if it
//! succeeds, so a revert leaves no trace and mines no block.

pub mod feed;
mod market;
mod snapshot;
mod token;

pub use snapshot::{CollateralSeed, CurveSeed, FeedSeed, ForkSnapshot, HolderSeed, MarketSeed, TokenSeed};

use crate::client::{parse_hex_quantity, LedgerClient, LedgerError, Receipt, SignerHandle, Value};
use alloy_primitives::{keccak256, Address, Bytes, U256};
use market::MarketState;
use risk_model::scale::parse_units;
use risk_model::{AssetInfo, MarketInfo, MarketRates, PriceBook, PriceQuote, RateCurve};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use token::TokenState;

/// Seconds between consecutive blocks
pub const BLOCK_TIME: u64 = 12;

/// Ether every local signer starts with
const SIGNER_ETHER: &str = "10000";

const TOKEN_RUNTIME: &[u8] = &[
    0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15, 0x61, 0x00, 0x10, 0x57, 0x60, 0x00, 0x80,
    0xfd, 0x5b, 0x50, 0x60, 0x04, 0x36, 0x10, 0x61, 0x00, 0xa9, 0x57, 0x60, 0x00, 0x35, 0x60,
    0xe0, 0x1c, 0x80, 0x63, 0xa9, 0x05, 0x9c, 0xbb, 0x14, 0x61, 0x00, 0xae, 0x57,
];

const MARKET_RUNTIME: &[u8] = &[
    0x60, 0x80, 0x60, 0x40, 0x52, 0x36, 0x60, 0x04, 0x10, 0x61, 0x00, 0x1e, 0x57, 0x60, 0x00,
    0x35, 0x60, 0xe0, 0x1c, 0x80, 0x63, 0xf2, 0xb9, 0xfd, 0xb8, 0x14, 0x61, 0x00, 0x23, 0x57,
];

/// Initial round id of every seeded live feed
const SEED_ROUND_ID: u128 = 18_446_744_073_709_562_301;

pub(crate) fn revert(contract: Address, method: &str, reason: &str) -> LedgerError {
    LedgerError::Reverted {
        contract,
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

fn arg<'a>(method: &str, args: &'a [Value], index: usize) -> Result<&'a Value, LedgerError> {
    args.get(index).ok_or_else(|| LedgerError::BadArguments {
        method: method.to_string(),
        detail: format!("missing argument {index}"),
    })
}

pub(crate) fn arg_address(method: &str, args: &[Value], index: usize) -> Result<Address, LedgerError> {
    arg(method, args, index)?.as_address()
}

pub(crate) fn arg_uint(method: &str, args: &[Value], index: usize) -> Result<U256, LedgerError> {
    arg(method, args, index)?.as_uint()
}

pub(crate) fn arg_addresses<'a>(
    method: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a [Address], LedgerError> {
    arg(method, args, index)?.as_addresses()
}

fn invalid(detail: String) -> LedgerError {
    LedgerError::InvalidSnapshot(detail)
}

#[derive(Debug, Clone)]
pub(crate) struct Chain {
    block_number: u64,
    timestamp: u64,
    nonce: u64,
    signers: Vec<Address>,
    impersonated: BTreeMap<u64, Address>,
    next_handle: u64,
    ether: BTreeMap<Address, U256>,
    code: BTreeMap<Address, Bytes>,
    storage: BTreeMap<(Address, U256), U256>,
    tokens: BTreeMap<Address, TokenState>,
    markets: BTreeMap<Address, MarketState>,
}

impl Chain {
    fn code_at(&self, address: Address) -> Bytes {
        self.code.get(&address).cloned().unwrap_or_default()
    }

    fn storage_at(&self, address: Address, slot: U256) -> U256 {
        self.storage
            .get(&(address, slot))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn ether_of(&self, address: Address) -> U256 {
        self.ether.get(&address).copied().unwrap_or(U256::ZERO)
    }

    fn can_sign(&self, address: Address) -> bool {
        self.signers.contains(&address) || self.impersonated.values().any(|a| *a == address)
    }

    /// Mine one block `seconds` after the previous one
    fn advance(&mut self, seconds: u64) -> Result<u64, LedgerError> {
        self.block_number += 1;
        self.timestamp += seconds;
        for market in self.markets.values_mut() {
            market.accrue(self.timestamp)?;
        }
        Ok(self.block_number)
    }

    fn quote(&self, feed: Address) -> Result<PriceQuote, LedgerError> {
        let round = feed::call(self, feed, "latestRoundData")?.into_tuple()?;
        let answer = round
            .get(1)
            .ok_or_else(|| revert(feed, "latestRoundData", "short round data"))?
            .as_int()?;
        let decimals = feed::call(self, feed, "decimals")?.as_uint()?;
        Ok(PriceQuote {
            feed,
            answer: U256::from(answer.unsigned_abs()),
            decimals: u8::try_from(risk_model::scale::to_u128(decimals)?)
                .map_err(|_| revert(feed, "decimals", "decimals out of range"))?,
        })
    }

    fn price_book(&self, market: &MarketState) -> Result<PriceBook, LedgerError> {
        market
            .info
            .feeds()
            .into_iter()
            .map(|feed| Ok((feed, self.quote(feed)?)))
            .collect()
    }

    fn call(&self, contract: Address, method: &str, args: &[Value]) -> Result<Value, LedgerError> {
        if let Some(token) = self.tokens.get(&contract) {
            return token.call(contract, method, args);
        }
        if let Some(market) = self.markets.get(&contract) {
            let prices = self.price_book(market)?;
            return market.call(contract, method, args, &prices);
        }
        feed::call(self, contract, method)
    }

    fn apply(&mut self, from: Address, contract: Address, method: &str, args: &[Value]) -> Result<(), LedgerError> {
        if let Some(token) = self.tokens.get_mut(&contract) {
            return token.submit(contract, from, method, args);
        }
        if let Some(market) = self.markets.get(&contract) {
            let prices = self.price_book(market)?;
            let Chain { markets, tokens, .. } = self;
            let market = markets
                .get_mut(&contract)
                .ok_or(LedgerError::NoContract(contract))?;
            return market.submit(contract, from, method, args, tokens, &prices);
        }
        if self.code_at(contract).is_empty() {
            Err(LedgerError::NoContract(contract))
        } else {
            Err(LedgerError::UnknownMethod {
                contract,
                method: method.to_string(),
            })
        }
    }

    fn tx_hash(&self, from: Address, to: Address, method: &str) -> alloy_primitives::B256 {
        let mut preimage = Vec::with_capacity(8 + 40 + method.len());
        preimage.extend_from_slice(&self.nonce.to_be_bytes());
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(to.as_slice());
        preimage.extend_from_slice(method.as_bytes());
        keccak256(preimage)
    }
}

/// Ledger held entirely in memory
#[derive(Debug)]
pub struct MemoryLedger {
    chain: Mutex<Chain>,
}

impl MemoryLedger {
    /// Build a ledger whose state matches `snapshot`
    pub fn fork(snapshot: &ForkSnapshot) -> Result<Self, LedgerError> {
        let mut chain = Chain {
            block_number: snapshot.block_number,
            timestamp: snapshot.timestamp,
            nonce: 0,
            signers: snapshot.signers.clone(),
            impersonated: BTreeMap::new(),
            next_handle: 1,
            ether: BTreeMap::new(),
            code: BTreeMap::new(),
            storage: BTreeMap::new(),
            tokens: BTreeMap::new(),
            markets: BTreeMap::new(),
        };

        let signer_ether = parse_units(SIGNER_ETHER, 18)?;
        for signer in &snapshot.signers {
            chain.ether.insert(*signer, signer_ether);
        }

        for seed in &snapshot.tokens {
            let mut token = TokenState::new(seed.symbol.clone(), seed.decimals);
            for holder in &seed.holders {
                token.credit(holder.address, parse_units(&holder.amount, seed.decimals)?)?;
            }
            chain.tokens.insert(seed.address, token);
            chain.code.insert(seed.address, Bytes::from_static(TOKEN_RUNTIME));
        }

        for seed in &snapshot.feeds {
            let answer = parse_units(&seed.answer, seed.decimals)?;
            chain.code.insert(seed.address, feed::aggregator_code());
            for (slot, value) in [
                (feed::LIVE_ROUND_SLOT, U256::from(SEED_ROUND_ID)),
                (feed::LIVE_UPDATED_AT_SLOT, U256::from(snapshot.timestamp)),
                (feed::LIVE_ANSWER_SLOT, answer),
                (feed::LIVE_DECIMALS_SLOT, U256::from(seed.decimals)),
            ] {
                chain.storage.insert((seed.address, slot), value);
            }
        }

        for seed in &snapshot.markets {
            let (info, rates) = Self::seed_market(snapshot, seed)?;
            let base = snapshot
                .token(&seed.base_token)
                .ok_or_else(|| invalid(format!("market {} base token not seeded", seed.address)))?;
            let total_supply = parse_units(&seed.total_supply, base.decimals)?;
            let total_borrow = parse_units(&seed.total_borrow, base.decimals)?;
            let reserves = total_supply.checked_sub(total_borrow).ok_or_else(|| {
                invalid(format!("market {} borrows more than it holds", seed.address))
            })?;

            if let Some(token) = chain.tokens.get_mut(&seed.base_token) {
                token.credit(seed.address, reserves)?;
            }
            chain.code.insert(seed.address, Bytes::from_static(MARKET_RUNTIME));
            chain.markets.insert(
                seed.address,
                MarketState::new(info, rates, total_supply, total_borrow, snapshot.timestamp),
            );
        }

        log::debug!(
            "Forked memory ledger at block {} ({} tokens, {} feeds, {} markets)",
            snapshot.block_number,
            chain.tokens.len(),
            snapshot.feeds.len(),
            chain.markets.len()
        );

        Ok(Self {
            chain: Mutex::new(chain),
        })
    }

    fn seed_market(snapshot: &ForkSnapshot, seed: &MarketSeed) -> Result<(MarketInfo, MarketRates), LedgerError> {
        let token_decimals = |asset: &Address| {
            snapshot
                .token(asset)
                .map(|token| token.decimals)
                .ok_or_else(|| invalid(format!("token {asset} not seeded")))
        };
        let feed_decimals = |feed: &Address| {
            snapshot
                .feed(feed)
                .map(|feed| feed.decimals)
                .ok_or_else(|| invalid(format!("feed {feed} not seeded")))
        };

        let mut assets = Vec::with_capacity(seed.assets.len());
        for (offset, asset) in seed.assets.iter().enumerate() {
            let decimals = token_decimals(&asset.asset)?;
            assets.push(AssetInfo {
                offset: u8::try_from(offset).map_err(|_| invalid("too many assets".to_string()))?,
                asset: asset.asset,
                decimals,
                price_feed: asset.price_feed,
                feed_decimals: feed_decimals(&asset.price_feed)?,
                borrow_collateral_factor: asset.borrow_collateral_factor,
                liquidate_collateral_factor: asset.liquidate_collateral_factor,
                liquidation_factor: asset.liquidation_factor,
                supply_cap: parse_units(&asset.supply_cap, decimals)?,
            });
        }

        let info = MarketInfo {
            address: seed.address,
            base_token: seed.base_token,
            base_decimals: token_decimals(&seed.base_token)?,
            base_price_feed: seed.base_price_feed,
            base_feed_decimals: feed_decimals(&seed.base_price_feed)?,
            assets,
        };

        let curve = |c: &CurveSeed| RateCurve::from_annual(c.base_apr, c.slope1_apr, c.slope2_apr, c.kink);
        let rates = MarketRates {
            supply: curve(&seed.supply_curve)?,
            borrow: curve(&seed.borrow_curve)?,
        };
        Ok((info, rates))
    }

    fn state(&self) -> Result<MutexGuard<'_, Chain>, LedgerError> {
        self.chain
            .lock()
            .map_err(|_| LedgerError::Transport("memory ledger state poisoned".to_string()))
    }

    /// Addresses currently impersonated, one entry per outstanding handle
    pub fn impersonating(&self) -> Result<Vec<Address>, LedgerError> {
        Ok(self.state()?.impersonated.values().copied().collect())
    }

    pub fn ether_balance(&self, address: Address) -> Result<U256, LedgerError> {
        Ok(self.state()?.ether_of(address))
    }
}

impl LedgerClient for MemoryLedger {
    fn call(&self, contract: Address, method: &str, args: &[Value]) -> Result<Value, LedgerError> {
        self.state()?.call(contract, method, args)
    }

    fn submit(
        &self,
        from: Address,
        contract: Address,
        method: &str,
        args: &[Value],
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.state()?;
        if !state.can_sign(from) {
            return Err(LedgerError::UnknownSigner(from));
        }
        if state.ether_of(from).is_zero() {
            return Err(LedgerError::NoGas(from));
        }

        let mut next = state.clone();
        next.advance(BLOCK_TIME)?;
        if let Err(err) = next.apply(from, contract, method, args) {
            log::debug!("{} on {} from {} failed: {}", method, contract, from, err);
            return Err(err);
        }

        let receipt = Receipt {
            tx_hash: next.tx_hash(from, contract, method),
            block_number: next.block_number,
            from,
            to: contract,
            method: method.to_string(),
        };
        next.nonce += 1;
        *state = next;

        log::debug!("Mined {} in block {} ({})", method, receipt.block_number, receipt.tx_hash);
        Ok(receipt)
    }

    fn get_code(&self, address: Address) -> Result<Bytes, LedgerError> {
        Ok(self.state()?.code_at(address))
    }

    fn set_feed_code(&self, feed: Address, code: Bytes) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if code.is_empty() {
            state.code.remove(&feed);
        } else {
            state.code.insert(feed, code);
        }
        Ok(())
    }

    fn get_storage_slot(&self, address: Address, slot: U256) -> Result<U256, LedgerError> {
        Ok(self.state()?.storage_at(address, slot))
    }

    fn set_storage_slot(&self, address: Address, slot: U256, value: U256) -> Result<(), LedgerError> {
        self.state()?.storage.insert((address, slot), value);
        Ok(())
    }

    fn mine(&self) -> Result<u64, LedgerError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let block = next.advance(BLOCK_TIME)?;
        *state = next;
        Ok(block)
    }

    fn increase_time(&self, seconds: u64) -> Result<u64, LedgerError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let block = next.advance(seconds)?;
        *state = next;
        Ok(block)
    }

    fn impersonate(&self, address: Address) -> Result<SignerHandle, LedgerError> {
        let mut state = self.state()?;
        let id = state.next_handle;
        state.next_handle += 1;
        state.impersonated.insert(id, address);
        log::debug!("Impersonating {} (handle {})", address, id);
        Ok(SignerHandle::new(address, id))
    }

    fn release(&self, handle: SignerHandle) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if state.impersonated.get(&handle.id()) != Some(&handle.address()) {
            return Err(LedgerError::NotImpersonating(handle.address()));
        }
        state.impersonated.remove(&handle.id());
        log::debug!("Released {}", handle);
        Ok(())
    }

    fn set_balance(&self, address: Address, wei_hex: &str) -> Result<(), LedgerError> {
        let wei = parse_hex_quantity(wei_hex)?;
        self.state()?.ether.insert(address, wei);
        Ok(())
    }

    fn signers(&self) -> Result<Vec<Address>, LedgerError> {
        Ok(self.state()?.signers.clone())
    }

    fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.state()?.block_number)
    }

    fn timestamp(&self) -> Result<u64, LedgerError> {
        Ok(self.state()?.timestamp)
    }
}
