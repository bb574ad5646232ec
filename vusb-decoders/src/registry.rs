// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wires [`crate::context::DescriptorTracker`] to the fixed set of
//! protocol decoders (§4.4). A fixed, tagged enum stands in for the
//! original's open-ended detector list — there are only two decoders in
//! this build, and the DESIGN NOTES (§9) call for a tagged variant over a
//! small set rather than trait-object dispatch.

use std::collections::HashMap;

use crate::context::{DescriptorTracker, DeviceContext};
use crate::fx2::{self, Fx2Decoder};
use crate::storage::{self, ActiveStorageDecoder};
use vusb_model::Transaction;

#[derive(Debug)]
enum ActiveDecoder {
    Storage(ActiveStorageDecoder),
    Fx2(Fx2Decoder),
}

impl ActiveDecoder {
    fn handle_event(&mut self, event: &mut Transaction) {
        match self {
            Self::Storage(d) => d.handle_event(event),
            Self::Fx2(d) => d.handle_event(event),
        }
    }
}

/// Tries the storage detector against a context snapshot for one specific
/// (device, endpoint) slot (§4.4.1).
fn detect_storage(ctx: &DeviceContext) -> Option<ActiveDecoder> {
    let (iface, ep) = (ctx.interface?, ctx.endpoint?);
    storage::detector(iface.class, iface.sub_class, ep.bm_attributes, ep.address).map(ActiveDecoder::Storage)
}

/// Tracks per-device descriptor state and dispatches each `Transaction` to
/// whichever decoder (if any) claimed its `(dev, endpt)` slot.
#[derive(Debug, Default)]
pub struct DecoderRegistry {
    trackers: HashMap<u32, DescriptorTracker>,
    slots: HashMap<(u32, u8), ActiveDecoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transaction: updates the device's descriptor tracker (if
    /// this is a `GET_DESCRIPTOR` response), offers any newly-discovered
    /// endpoints to the detectors, then runs whatever decoder owns this
    /// transaction's slot.
    pub fn handle_event(&mut self, event: &mut Transaction) {
        let dev = event.dev;
        let tracker = self.trackers.entry(dev).or_default();
        let snapshots = tracker.observe(event);

        for ctx in &snapshots {
            let Some(ep) = ctx.endpoint else { continue };
            let key = (dev, ep.address);
            if self.slots.contains_key(&key) {
                continue;
            }
            if let Some(decoder) = detect_storage(ctx) {
                self.slots.insert(key, decoder);
            }
        }

        // The FX2 vendor-command decoder rides the control pipe (every
        // firmware command is a SETUP on endpoint 0), so it's keyed there
        // regardless of which endpoint descriptor completed the default
        // set (§4.4.2).
        let ep0_key = (dev, 0);
        if !self.slots.contains_key(&ep0_key) {
            let endpoints = &tracker.device_snapshot().endpoints;
            if let Some(decoder) = fx2::detector(endpoints) {
                self.slots.insert(ep0_key, ActiveDecoder::Fx2(decoder));
            }
        }

        if let Some(decoder) = self.slots.get_mut(&(dev, event.endpt)) {
            decoder.handle_event(event);
        }
    }

    /// Drops all decoder state for a device — called on bus reset,
    /// end-of-log, or session close (§3 Lifecycles).
    pub fn reset_device(&mut self, dev: u32) {
        self.trackers.remove(&dev);
        self.slots.retain(|(d, _), _| *d != dev);
    }
}
