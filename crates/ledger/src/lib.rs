//! Ledger capability consumed by the scenario engine
//!
//! - [`LedgerClient`]: untyped call/submit surface plus node controls
//!   (code and storage overrides, mining, impersonation)
//! - [`contracts`]: typed handles for tokens, the lending market and feeds
//! - [`MemoryLedger`]: in-process implementation seeded from a [`ForkSnapshot`]

pub mod client;
pub mod contracts;
pub mod feed;
pub mod memory;

pub use client::{parse_hex_quantity, LedgerClient, LedgerError, Receipt, SignerHandle, Value};
pub use contracts::{CometMarket, Erc20Token, PriceFeed, RawAssetInfo};
pub use memory::{
    CollateralSeed, CurveSeed, FeedSeed, ForkSnapshot, HolderSeed, MarketSeed, MemoryLedger,
    TokenSeed,
};
