// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parses a simple nanosecond-resolution timestamp log (§4.3.4). Each line
//! is `<timestamp> <name> args...`; `begin-foo`/`end-foo` names mark one
//! side of a span, a bare `foo` name emits both halves at once. Event names
//! are assigned virtual endpoint numbers on first sight.

use std::collections::{HashMap, VecDeque};
use vusb_model::{Direction, Event, Status, Transaction};

/// `datalen` sentinel used for every transaction this parser produces —
/// there's no real payload length to report, just a marker that something
/// happened (§4.3.4).
const VIRTUAL_DATALEN: u32 = 0x1000;

#[derive(Debug, Default)]
pub struct TimestampLogParser {
    epoch: Option<i64>,
    name_endpoints: HashMap<String, u8>,
    next_endpoint: u8,
    line_number: u64,
}

impl TimestampLogParser {
    pub fn new() -> Self {
        Self {
            next_endpoint: 1,
            ..Default::default()
        }
    }

    pub fn parse_line(&mut self, line: &str, out: &mut VecDeque<Event>) {
        self.line_number += 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            tracing::warn!(line = self.line_number, "timestamp log line too short");
            return;
        }

        let Ok(nanotime) = tokens[0].parse::<i64>() else {
            tracing::warn!(line = self.line_number, "timestamp log line has no timestamp");
            return;
        };
        let epoch = *self.epoch.get_or_insert(nanotime);
        let timestamp = (nanotime - epoch) as f64 / 1_000_000_000.0;

        let (name, dirs): (&str, &[Direction]) = if let Some(rest) = tokens[1].strip_prefix("begin-") {
            (rest, &[Direction::Down])
        } else if let Some(rest) = tokens[1].strip_prefix("end-") {
            (rest, &[Direction::Up])
        } else {
            (tokens[1], &[Direction::Down, Direction::Up])
        };

        let endpoint = *self
            .name_endpoints
            .entry(name.to_string())
            .or_insert_with(|| {
                let ep = self.next_endpoint;
                self.next_endpoint += 1;
                ep
            });

        let decoded = tokens[1..].join(" ");
        for &dir in dirs {
            let mut txn = Transaction::new(dir, timestamp);
            txn.meta.line_number = Some(self.line_number);
            txn.dev = 0;
            txn.endpt = endpoint;
            txn.status = Status::Ok;
            txn.datalen = VIRTUAL_DATALEN;
            txn.append_decoded(&decoded);
            out.push_back(Event::Transaction(txn));
        }
    }

    /// No cross-line state to drain.
    pub fn flush(&mut self, _out: &mut VecDeque<Event>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_event_name_emits_both_halves() {
        let mut p = TimestampLogParser::new();
        let mut out = VecDeque::new();
        p.parse_line("1000000000 vsync frame=3", &mut out);

        assert_eq!(out.len(), 2);
        let Event::Transaction(down) = &out[0] else {
            panic!()
        };
        let Event::Transaction(up) = &out[1] else {
            panic!()
        };
        assert_eq!(down.dir, Some(Direction::Down));
        assert_eq!(up.dir, Some(Direction::Up));
        assert_eq!(down.endpt, up.endpt);
        assert_eq!(down.datalen, VIRTUAL_DATALEN);
    }

    #[test]
    fn begin_and_end_pair_across_separate_lines() {
        let mut p = TimestampLogParser::new();
        let mut out = VecDeque::new();
        p.parse_line("1000000000 begin-isr", &mut out);
        p.parse_line("1005000000 end-isr", &mut out);

        assert_eq!(out.len(), 2);
        let Event::Transaction(begin) = &out[0] else {
            panic!()
        };
        let Event::Transaction(end) = &out[1] else {
            panic!()
        };
        assert_eq!(begin.dir, Some(Direction::Down));
        assert_eq!(end.dir, Some(Direction::Up));
        assert_eq!(begin.endpt, end.endpt);
        assert!((end.meta.timestamp - 0.005).abs() < 1e-9);
    }

    #[test]
    fn distinct_event_names_get_distinct_virtual_endpoints() {
        let mut p = TimestampLogParser::new();
        let mut out = VecDeque::new();
        p.parse_line("1000000000 begin-a", &mut out);
        p.parse_line("1000000000 begin-b", &mut out);

        let Event::Transaction(a) = &out[0] else { panic!() };
        let Event::Transaction(b) = &out[1] else { panic!() };
        assert_ne!(a.endpt, b.endpt);
    }

    #[test]
    fn repeated_name_reuses_its_endpoint() {
        let mut p = TimestampLogParser::new();
        let mut out = VecDeque::new();
        p.parse_line("1000000000 begin-a", &mut out);
        p.parse_line("2000000000 begin-a", &mut out);

        let Event::Transaction(first) = &out[0] else { panic!() };
        let Event::Transaction(second) = &out[1] else { panic!() };
        assert_eq!(first.endpt, second.endpt);
    }
}
