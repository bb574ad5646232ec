// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! The `DecoderRegistry` (§4.4) and the two protocol decoders it
//! dispatches to: USB Mass-Storage/SCSI (`storage`) and the Cypress FX2
//! vendor control interface (`fx2`). `context` rebuilds the descriptor
//! state the registry detects decoders against.

pub mod context;
pub mod fx2;
pub mod registry;
pub mod storage;

pub use context::{DescriptorTracker, DeviceContext, EndpointInfo, InterfaceInfo};
pub use registry::DecoderRegistry;
