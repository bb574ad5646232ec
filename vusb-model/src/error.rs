// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error kinds shared across the pipeline. None of these are fatal on their
//! own; see `vusb-parsers`/`vusb-bus` for how each is recovered.

/// Raised when appending malformed hex data to a [`crate::Transaction`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("odd number of hex digits in {0:?}")]
    OddLength(String),
    #[error("invalid hex digit in {0:?}")]
    InvalidHex(String),
}

/// A violation of the FIFO Down/Up pairing invariant (§8 property 1). The
/// reconstruction layer recovers from this by synthesizing a placeholder
/// Down rather than dropping the Up.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Up transaction for (dev={dev}, endpt=0x{endpt:02x}) has no matching Down")]
pub struct UnpairedUpError {
    pub dev: u32,
    pub endpt: u8,
}
