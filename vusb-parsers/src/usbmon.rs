// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parses Linux `usbmon` text captures (§4.3.3). Each line stands on its
//! own and produces exactly one `Transaction`; FIFO pairing of the Down/Up
//! halves happens downstream, the same way it does for the other formats.

use std::collections::VecDeque;
use vusb_model::{Direction, Event, Status, Transaction};

/// Parses `usbmon` text lines, originally contributed (in the Python tool
/// this is ported from) by Christoph Zimmermann.
#[derive(Debug, Default)]
pub struct UsbmonParser {
    epoch: Option<i64>,
    /// SETUP bytes captured from a submission's `s` tag, consumed by the
    /// next data-bearing packet of the same URB (§4.3.3).
    pending_setup: Option<String>,
    line_number: u64,
}

impl UsbmonParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str, out: &mut VecDeque<Event>) {
        self.line_number += 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            return;
        }
        // Quick sanity check that this looks like a usbmon line at all.
        if u64::from_str_radix(tokens[0], 16).is_err() {
            return;
        }
        let Ok(microtime) = tokens[1].parse::<i64>() else {
            return;
        };
        if !matches!(tokens[2], "S" | "C" | "E") {
            return;
        }

        let epoch = *self.epoch.get_or_insert(microtime);
        let timestamp = (microtime - epoch) as f64 / 1_000_000.0;

        let dir = if tokens[2] == "S" {
            Direction::Down
        } else {
            Direction::Up
        };

        let mut txn = Transaction::new(dir, timestamp);
        // usbmon never updates its frame counter past its initial value;
        // frame numbers are effectively unavailable for .mon inputs (§9).
        txn.meta.frame = Some(0);
        txn.meta.line_number = Some(self.line_number);

        let pipe: Vec<&str> = tokens[3].split(':').collect();
        if pipe.len() < 2 {
            tracing::warn!(line = self.line_number, "usbmon address word too short");
            return;
        }
        let Ok(dev_low) = pipe[pipe.len() - 2].parse::<u32>() else {
            return;
        };
        let Ok(mut endpt) = pipe[pipe.len() - 1].parse::<u32>() else {
            return;
        };
        let mut dev = dev_low;
        if pipe[0].as_bytes().get(1) == Some(&b'i') && endpt != 0 {
            endpt |= 0x80;
        }
        if pipe.len() >= 4 {
            if let Ok(bus) = pipe[pipe.len() - 3].parse::<u32>() {
                dev += bus * 1000;
            }
        }
        txn.dev = dev;
        txn.endpt = endpt as u8;

        if tokens.len() < 5 {
            return;
        }

        if tokens[4] == "s" {
            txn.status = Status::Ok;
            if tokens.len() < 10 {
                tracing::warn!(line = self.line_number, "usbmon setup tag missing 5 words");
            } else {
                let setup: String = tokens[5..10].concat();
                if let Err(e) = txn.append_hex_data(&setup) {
                    tracing::warn!("usbmon setup decode error: {e}");
                } else {
                    self.pending_setup = Some(setup);
                }
            }
        } else {
            let status_word: Vec<&str> = tokens[4].split(':').collect();
            if let Ok(status) = status_word[0].parse::<i32>() {
                txn.status = if status == 0 {
                    Status::Ok
                } else {
                    Status::Errno(status)
                };
            }

            if tokens.len() >= 7 {
                if let Ok(datalen) = tokens[5].parse::<u32>() {
                    txn.datalen = datalen;
                }
                if tokens[6] == "=" {
                    if let Some(setup) = self.pending_setup.take() {
                        if let Err(e) = txn.append_hex_data(&setup) {
                            tracing::warn!("usbmon setup re-append error: {e}");
                        }
                    }
                    let payload: String = tokens[7..].concat();
                    if let Err(e) = txn.append_hex_data(&payload) {
                        tracing::warn!("usbmon data decode error: {e}");
                    }
                }
            }
        }

        out.push_back(Event::Transaction(txn));
    }

    /// usbmon has no incomplete-record state to drain.
    pub fn flush(&mut self, _out: &mut VecDeque<Event>) {}
}
