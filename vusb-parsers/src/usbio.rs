// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! The `USBIO:` sub-parser embedded in VMX logs (§4.3.1). Reusable on its
//! own line stream: a new `Up`/`Down` line opens a transaction (flushing
//! whatever was pending), hex-dump lines append data, and anything else
//! becomes a decoded annotation on the current transaction.

use std::collections::VecDeque;
use vusb_model::{Direction, Event, Transaction};

/// Builds [`Transaction`]s out of a stream of `USBIO:` lines.
#[derive(Debug, Default)]
pub struct UsbIoSubParser {
    current: Option<Transaction>,
}

impl UsbIoSubParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one already-stripped `USBIO:` payload line.
    pub fn parse_line(
        &mut self,
        line: &str,
        timestamp: f64,
        frame: Option<u32>,
        line_number: u64,
        out: &mut VecDeque<Event>,
    ) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return;
        }

        if tokens[0] == "Up" || tokens[0] == "Down" {
            self.flush(out);
            let dir = if tokens[0] == "Up" {
                Direction::Up
            } else {
                Direction::Down
            };
            let mut txn = Transaction::new(dir, timestamp);
            txn.meta.frame = frame;
            txn.meta.line_number = Some(line_number);
            Self::apply_key_value_pairs(&mut txn, &tokens[1..]);
            self.current = Some(txn);
            return;
        }

        // New Log_HexDump() format: "000: 80 06 ...." (3 hex digits, colon).
        if tokens.len() >= 2 && tokens[0].len() == 4 && tokens[0].ends_with(':') && tokens[1].len() == 2 {
            if let Some((_, rest)) = line.split_once(':') {
                self.append_hex(rest.trim_start(), out);
            }
            return;
        }

        // Old Log_HexDump() format: "80 06 ...." (bare hex bytes).
        if tokens[0].len() == 2 && tokens[0].chars().all(|c| c.is_ascii_hexdigit()) {
            self.append_hex(line, out);
            return;
        }

        if let Some(txn) = self.current.as_mut() {
            txn.append_decoded(line.trim());
        }
    }

    fn append_hex(&mut self, data: &str, _out: &mut VecDeque<Event>) {
        let truncated: String = data.chars().take(48).collect();
        if let Some(txn) = self.current.as_mut() {
            if let Err(e) = txn.append_hex_data(&truncated) {
                tracing::warn!("USBIO hex dump decode error: {e}");
            }
        }
    }

    fn apply_key_value_pairs(txn: &mut Transaction, tokens: &[&str]) {
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let parsed = if key == "endpt" {
                u32::from_str_radix(value.trim_start_matches("0x"), 16)
            } else {
                value.parse::<u32>()
            };
            let Ok(parsed) = parsed else {
                tracing::warn!("USBIO key=value pair {token:?} did not parse, ignoring");
                continue;
            };
            match key {
                "dev" => txn.dev = parsed,
                "endpt" => txn.endpt = parsed as u8,
                "datalen" => txn.datalen = parsed,
                "status" => {
                    txn.status = if parsed == 0 {
                        vusb_model::Status::Ok
                    } else {
                        vusb_model::Status::Errno(parsed as i32)
                    }
                }
                _ => tracing::debug!("USBIO ignoring unrecognized key {key}"),
            }
        }
    }

    /// Forces any in-progress transaction to complete. Called whenever the
    /// analyzer is known to be finished producing data for the current
    /// transaction, such as when a non-USBIO line appears in the log.
    pub fn flush(&mut self, out: &mut VecDeque<Event>) {
        if let Some(txn) = self.current.take() {
            if txn.dir.is_some() {
                out.push_back(Event::Transaction(txn));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_then_up_produces_two_transactions() {
        let mut p = UsbIoSubParser::new();
        let mut out = VecDeque::new();
        p.parse_line("Down dev=2 endpt=0x81 datalen=64", 0.0, None, 1, &mut out);
        p.parse_line("Up dev=2 endpt=0x81 datalen=64", 0.0, None, 2, &mut out);
        p.flush(&mut out);

        assert_eq!(out.len(), 2);
        for event in &out {
            let Event::Transaction(t) = event else {
                panic!("expected transaction")
            };
            assert_eq!(t.dev, 2);
            assert_eq!(t.endpt, 0x81);
        }
    }

    #[test]
    fn hex_dump_new_format_appends_data() {
        let mut p = UsbIoSubParser::new();
        let mut out = VecDeque::new();
        p.parse_line("Down dev=1 endpt=0x02", 0.0, None, 1, &mut out);
        p.parse_line("000: 80 06 00 01", 0.0, None, 2, &mut out);
        p.flush(&mut out);
        let Event::Transaction(t) = out.pop_back().unwrap() else {
            panic!()
        };
        assert_eq!(t.data, vec![0x80, 0x06, 0x00, 0x01]);
    }

    #[test]
    fn old_format_hex_dump() {
        let mut p = UsbIoSubParser::new();
        let mut out = VecDeque::new();
        p.parse_line("Down dev=1 endpt=0x02", 0.0, None, 1, &mut out);
        p.parse_line("80 06 00 01", 0.0, None, 2, &mut out);
        p.flush(&mut out);
        let Event::Transaction(t) = out.pop_back().unwrap() else {
            panic!()
        };
        assert_eq!(t.data, vec![0x80, 0x06, 0x00, 0x01]);
    }
}
