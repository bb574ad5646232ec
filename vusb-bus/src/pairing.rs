// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Enforces the FIFO Down/Up pairing invariant (§3, §8 property 1) on a
//! parser's raw output. Parsers that already pair their own Down/Up halves
//! in-line (VMX's `USBIO:` sub-parser, Ellisys, the timestamp log) pass
//! through unchanged; usbmon emits each line as an independent
//! `Transaction`, so this is where its submissions and completions are
//! actually reconciled into URBs, the same "downstream" step its own
//! module doc promises.

use std::collections::HashMap;
use vusb_model::{Direction, Event, Status, Transaction, UnpairedUpError};

/// Tracks, per `(dev, endpt)` pipe, how many submitted Downs are still
/// awaiting their Up.
#[derive(Debug, Default)]
pub struct FifoPairer {
    outstanding: HashMap<(u32, u8), u32>,
}

impl FifoPairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes one transaction in parser-emission order. Pushes it (and,
    /// if it's an Up with no matching Down, a synthesized zero-length
    /// Down first) onto `out` (§7 `StateViolation`).
    pub fn observe(&mut self, event: Transaction, out: &mut std::collections::VecDeque<Event>) {
        let key = (event.dev, event.endpt);
        match event.dir {
            Some(Direction::Down) => {
                *self.outstanding.entry(key).or_insert(0) += 1;
                out.push_back(Event::Transaction(event));
            }
            Some(Direction::Up) => {
                let count = self.outstanding.entry(key).or_insert(0);
                if *count > 0 {
                    *count -= 1;
                } else {
                    let err = UnpairedUpError {
                        dev: event.dev,
                        endpt: event.endpt,
                    };
                    tracing::warn!(%err, "synthesizing placeholder Down for unpaired Up");
                    let mut placeholder = Transaction::new(Direction::Down, event.meta.timestamp);
                    placeholder.dev = event.dev;
                    placeholder.endpt = event.endpt;
                    placeholder.datalen = 0;
                    placeholder.status = Status::Named("Synthesized".to_string());
                    out.push_back(Event::Transaction(placeholder));
                }
                out.push_back(Event::Transaction(event));
            }
            None => out.push_back(Event::Transaction(event)),
        }
    }

    /// Resets all outstanding counts — called on bus reset or end-of-log
    /// (§3 Lifecycles: decoder/pairing state is torn down at those
    /// boundaries).
    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
