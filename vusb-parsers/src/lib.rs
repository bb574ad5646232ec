// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Log parsers that turn raw USB capture files into a stream of
//! [`vusb_model::Event`]s: VMX (`usbio.rs`/`vmx.rs`), Ellisys XML
//! (`ellisys.rs`), usbmon (`usbmon.rs`), and the timestamp log format
//! (`tslog.rs`). [`dispatch::choose_parser`] selects among them by
//! filename.

pub mod dispatch;
pub mod ellisys;
pub mod error;
pub mod tslog;
pub mod usbio;
pub mod usbmon;
pub mod vmx;

pub use dispatch::{choose_parser, is_line_oriented, LogParser};
pub use error::MalformedRecord;
