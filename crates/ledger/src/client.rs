//! Ledger client capability
//!
//! The scenario engine never talks to a chain directly. Everything it reads or
//! writes goes through [`LedgerClient`], which a forked node, a remote RPC
//! endpoint or the in-process [`crate::MemoryLedger`] can provide.

use alloy_primitives::{Address, Bytes, B256, U256};
use risk_model::ScaleError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{method} on {contract} reverted: {reason}")]
    Reverted {
        contract: Address,
        method: String,
        reason: String,
    },

    #[error("{contract} has no method {method}")]
    UnknownMethod { contract: Address, method: String },

    #[error("no contract deployed at {0}")]
    NoContract(Address),

    #[error("{0} is neither a local signer nor impersonated")]
    UnknownSigner(Address),

    #[error("{0} has no ether to pay for gas")]
    NoGas(Address),

    #[error("bad arguments to {method}: {detail}")]
    BadArguments { method: String, detail: String },

    #[error("unexpected return value: expected {expected}, got {got}")]
    Decode { expected: &'static str, got: String },

    #[error("invalid hex quantity {0:?}")]
    InvalidHex(String),

    #[error("{0} is not being impersonated by this handle")]
    NotImpersonating(Address),

    #[error(transparent)]
    Scale(#[from] ScaleError),

    #[error("invalid fork snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Argument or return value of a contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unit,
    Bool(bool),
    Uint(U256),
    Int(i128),
    Address(Address),
    Addresses(Vec<Address>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn uint(value: impl Into<u128>) -> Self {
        Value::Uint(U256::from(value.into()))
    }

    pub fn as_uint(&self) -> Result<U256, LedgerError> {
        match self {
            Value::Uint(v) => Ok(*v),
            other => Err(other.mismatch("uint")),
        }
    }

    pub fn as_int(&self) -> Result<i128, LedgerError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, LedgerError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_address(&self) -> Result<Address, LedgerError> {
        match self {
            Value::Address(v) => Ok(*v),
            other => Err(other.mismatch("address")),
        }
    }

    pub fn as_addresses(&self) -> Result<&[Address], LedgerError> {
        match self {
            Value::Addresses(v) => Ok(v),
            other => Err(other.mismatch("address[]")),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Value>, LedgerError> {
        match self {
            Value::Tuple(fields) => Ok(fields),
            other => Err(other.mismatch("tuple")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> LedgerError {
        LedgerError::Decode {
            expected,
            got: format!("{self:?}"),
        }
    }
}

/// Committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub method: String,
}

/// Proof that an address is being impersonated; hand it back to [`LedgerClient::release`]
#[derive(Debug, PartialEq, Eq)]
pub struct SignerHandle {
    address: Address,
    id: u64,
}

impl SignerHandle {
    pub fn new(address: Address, id: u64) -> Self {
        Self { address, id }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for SignerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

/// Reads and writes against one ledger instance
///
/// Every method blocks until its effect is committed. Implementations are not
/// expected to retry; a failure is returned to the caller as is.
pub trait LedgerClient {
    /// Read-only contract call
    fn call(&self, contract: Address, method: &str, args: &[Value]) -> Result<Value, LedgerError>;

    /// State-changing call signed by `from`; mines one block
    fn submit(
        &self,
        from: Address,
        contract: Address,
        method: &str,
        args: &[Value],
    ) -> Result<Receipt, LedgerError>;

    fn get_code(&self, address: Address) -> Result<Bytes, LedgerError>;

    /// Replace the code at a feed address (does not mine)
    fn set_feed_code(&self, feed: Address, code: Bytes) -> Result<(), LedgerError>;

    fn get_storage_slot(&self, address: Address, slot: U256) -> Result<U256, LedgerError>;

    /// Overwrite one storage word (does not mine)
    fn set_storage_slot(&self, address: Address, slot: U256, value: U256) -> Result<(), LedgerError>;

    /// Mine one empty block; returns the new block number
    fn mine(&self) -> Result<u64, LedgerError>;

    /// Move the clock forward and mine one block; returns the new block number
    fn increase_time(&self, seconds: u64) -> Result<u64, LedgerError>;

    fn impersonate(&self, address: Address) -> Result<SignerHandle, LedgerError>;

    fn release(&self, handle: SignerHandle) -> Result<(), LedgerError>;

    /// Set the native balance from a hex quantity such as "0x1000000000000000000"
    fn set_balance(&self, address: Address, wei_hex: &str) -> Result<(), LedgerError>;

    /// Locally controlled accounts, in a stable order
    fn signers(&self) -> Result<Vec<Address>, LedgerError>;

    fn block_number(&self) -> Result<u64, LedgerError>;

    fn timestamp(&self) -> Result<u64, LedgerError>;
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_quantity(text: &str) -> Result<U256, LedgerError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| LedgerError::InvalidHex(text.to_string()))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LedgerError::InvalidHex(text.to_string()));
    }
    U256::from_str_radix(digits, 16).map_err(|_| LedgerError::InvalidHex(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        // 0x1000000000000000000 wei = 4722.366... ether
        let wei = parse_hex_quantity("0x1000000000000000000").unwrap();
        assert_eq!(wei, U256::from(4_722_366_482_869_645_213_696u128));
        assert_eq!(parse_hex_quantity("0x0").unwrap(), U256::ZERO);

        assert!(parse_hex_quantity("1000").is_err());
        assert!(parse_hex_quantity("0x").is_err());
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::uint(5u64).as_uint().unwrap(), U256::from(5u64));
        assert!(Value::Bool(true).as_bool().unwrap());

        let err = Value::Bool(true).as_uint().unwrap_err();
        assert!(matches!(err, LedgerError::Decode { expected: "uint", .. }));
    }
}
