//! Mock aggregator artifact
//!
//! Deployed code of a settable aggregator plus its storage layout. Installing
//! it over a live feed and writing [`MOCK_ANSWER_SLOT`] is how scenarios move
//! a price. Any ledger that can run the artifact can be driven this way.

use alloy_primitives::{Bytes, U256};

/// `latestRoundData().answer` is read from this slot
pub const MOCK_ANSWER_SLOT: U256 = U256::ZERO;

/// `decimals()` is read from this slot
pub const MOCK_DECIMALS_SLOT: U256 = U256::from_limbs([1, 0, 0, 0]);

const MOCK_AGGREGATOR_RUNTIME: &[u8] = &[
    0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15, 0x61, 0x00, 0x10, 0x57, 0x60, 0x00, 0x80,
    0xfd, 0x5b, 0x50, 0x60, 0x04, 0x36, 0x10, 0x61, 0x00, 0x4c, 0x57, 0x60, 0x00, 0x35, 0x60,
    0xe0, 0x1c, 0x80, 0x63, 0x31, 0x3c, 0xe5, 0x67, 0x14, 0x61, 0x00, 0x51, 0x57, 0x80, 0x63,
    0xfe, 0xaf, 0x96, 0x8c, 0x14, 0x61, 0x00, 0x6f, 0x57, 0x5b, 0x60, 0x00, 0x80, 0xfd,
];

/// Runtime code of the mock aggregator
pub fn mock_aggregator_code() -> Bytes {
    Bytes::from_static(MOCK_AGGREGATOR_RUNTIME)
}
