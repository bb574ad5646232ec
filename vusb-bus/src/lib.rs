// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Wires a chosen [`vusb_parsers::LogParser`] to a file on its own
//! producer thread ([`follower::Follower`]), enforces the FIFO Down/Up
//! pairing invariant on the way out ([`pairing::FifoPairer`]), and fans
//! the resulting event stream out to consumers ([`bus::EventBus`]) (§4.6,
//! §4.7).

pub mod bus;
pub mod error;
pub mod follower;
pub mod pairing;

pub use bus::EventBus;
pub use error::FollowerError;
pub use follower::{Follower, FollowerHandle, StopFlag};
pub use pairing::FifoPairer;
