// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Canonical value objects exchanged between the log parsers, decoders, the
//! diff engine, and any consumer: [`Event`] and its variants, plus the
//! declarative [`codec`] used by struct-layout decoders.

pub mod codec;
pub mod error;
pub mod event;
pub mod transaction;

pub use error::{CodecError, UnpairedUpError};
pub use event::{DiffMarker, Event, EventMeta, SofMarker, Termination};
pub use transaction::{DiffSummary, Direction, Status, Transaction};
