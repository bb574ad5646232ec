// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parses a VMware VMX log, extracting SOF markers from the UHCI/EHCI host
//! controller cores and delegating `USBIO:` lines to [`crate::usbio`] (§4.3.1).
//! This is the fallback parser for any file extension `choose_parser` doesn't
//! otherwise recognize (§6).

use crate::usbio::UsbIoSubParser;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;
use vusb_model::Event;

fn uhci_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"frame \((\d+)\)").expect("static pattern"))
}

fn ehci_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Execute frame (\d+)").expect("static pattern"))
}

/// Cumulative day count at the start of each month, non-leap year. Good
/// enough to order records within a single run of the current year; logs
/// that straddle a year boundary produce a timestamp discontinuity, a
/// documented limitation carried over unchanged (§4.3.1, §9).
const MONTH_START_DAY: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses a VMX log timestamp prefix, caching the most recently parsed
/// `"MMM DD HH:MM:SS"` stamp since it only changes once per second (§4.3.1).
#[derive(Debug, Default)]
struct TimeCache {
    last_stamp: Option<String>,
    last_seconds: f64,
}

impl TimeCache {
    /// `line` must be at least 19 bytes: `"MMM DD HH:MM:SS.mmm"`.
    fn parse(&mut self, line: &str) -> Option<f64> {
        if line.len() < 19 {
            return None;
        }
        let stamp = &line[..15];
        let base_seconds = if self.last_stamp.as_deref() == Some(stamp) {
            self.last_seconds
        } else {
            let seconds = Self::parse_stamp(stamp)?;
            self.last_stamp = Some(stamp.to_string());
            self.last_seconds = seconds;
            seconds
        };
        let millis: f64 = line[16..19].parse().unwrap_or(0.0);
        Some(base_seconds + millis / 1000.0)
    }

    fn parse_stamp(stamp: &str) -> Option<f64> {
        // "Nov 02 10:12:43"
        let month_name = stamp.get(0..3)?;
        let month_idx = MONTH_NAMES.iter().position(|m| *m == month_name)?;
        let day: u32 = stamp.get(4..6)?.trim().parse().ok()?;
        let hour: u32 = stamp.get(7..9)?.parse().ok()?;
        let minute: u32 = stamp.get(10..12)?.parse().ok()?;
        let second: u32 = stamp.get(13..15)?.parse().ok()?;
        let day_of_year = MONTH_START_DAY[month_idx] + day;
        Some((day_of_year as f64) * 86400.0 + (hour * 3600 + minute * 60 + second) as f64)
    }
}

/// Parses VMware VMX analyzer logs: UHCI/EHCI frame markers and `USBIO:`
/// transaction dumps.
#[derive(Debug, Default)]
pub struct VmxParser {
    usbio: UsbIoSubParser,
    time: TimeCache,
    epoch: Option<f64>,
    frame: Option<u32>,
    line_number: u64,
}

impl VmxParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str, out: &mut VecDeque<Event>) {
        self.line_number += 1;

        if let Some(idx) = line.find("UHCI:") {
            if let Some(caps) = uhci_frame_re().captures(&line[idx..]) {
                if let Ok(frame) = caps[1].parse() {
                    self.frame = Some(frame);
                    self.emit_sof(line, frame, out);
                }
                return;
            }
        }

        if let Some(idx) = line.find("EHCI:") {
            if let Some(caps) = ehci_frame_re().captures(&line[idx..]) {
                if let Ok(frame) = caps[1].parse() {
                    self.frame = Some(frame);
                    self.emit_sof(line, frame, out);
                }
                return;
            }
        }

        if let Some(idx) = line.find("USBIO:") {
            let payload = &line[idx + "USBIO:".len()..];
            let payload = payload.strip_suffix('\n').unwrap_or(payload);
            let timestamp = self.relative_time(line);
            self.usbio
                .parse_line(payload, timestamp, self.frame, self.line_number, out);
        } else {
            self.usbio.flush(out);
        }
    }

    fn emit_sof(&mut self, line: &str, frame: u32, out: &mut VecDeque<Event>) {
        // Don't let SOF markers start the clock (§4.3.1).
        if self.epoch.is_some() {
            let timestamp = self.relative_time(line);
            out.push_back(Event::Sof(vusb_model::SofMarker::new(
                timestamp,
                frame,
                Some(self.line_number),
            )));
        }
    }

    /// Starts the clock on the first USB log line seen, then returns the
    /// delta from that epoch.
    fn relative_time(&mut self, line: &str) -> f64 {
        let t = self.time.parse(line).unwrap_or(0.0);
        let epoch = *self.epoch.get_or_insert(t);
        t - epoch
    }

    pub fn flush(&mut self, out: &mut VecDeque<Event>) {
        self.usbio.flush(out);
    }
}
