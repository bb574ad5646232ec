// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::CodecError;
use crate::event::EventMeta;
use std::fmt;

/// Submission vs. completion half of a USB transfer (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Down,
    Up,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Down => write!(f, "Down"),
            Direction::Up => write!(f, "Up"),
        }
    }
}

/// Completion status of a transaction. `Ok` is the success case (status 0 /
/// `ACK` / `NYET` in the source logs); everything else is a failure tag
/// carried through verbatim so decoders and the UI can render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// A negative `-errno` value, as usbmon reports it.
    Errno(i32),
    /// A named condition: `STALL`, `NAK`, `Bus Reset`, `No Handshake`,
    /// `End of Log`, ...
    Named(String),
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Errno(e) => write!(f, "{e}"),
            Status::Named(s) => write!(f, "{s}"),
        }
    }
}

/// The fingerprint used to align transactions across two logs (§4.1
/// `getDiffSummary`, §8 property 4). Equality is what the diff engine keys
/// on, so this must depend only on directly-comparable fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffSummary {
    pub dir: Direction,
    pub endpt: u8,
    pub datalen: Option<u32>,
    pub data_prefix: Vec<u8>,
}

/// A USB transfer, half or whole (§3). Created by a parser, optionally
/// mutated by decoders before being pushed onto the bus, then immutable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transaction {
    pub meta: EventMeta,
    pub dir: Option<Direction>,
    pub dev: u32,
    pub endpt: u8,
    pub status: Status,
    pub datalen: u32,
    pub data: Vec<u8>,
    pub decoded: String,
    pub decoded_summary: String,
}

const DIFF_PREFIX_LEN: usize = 32;

impl Transaction {
    pub fn new(dir: Direction, timestamp: f64) -> Self {
        Self {
            meta: EventMeta::new(timestamp),
            dir: Some(dir),
            ..Default::default()
        }
    }

    /// Decodes a whitespace-tolerant string of hex bytes and appends it to
    /// `data`, lifting `datalen` if the buffer grew past it. `datalen` never
    /// decreases (§3 invariant, §8 property 2).
    pub fn append_hex_data(&mut self, ascii_hex: &str) -> Result<(), CodecError> {
        let cleaned: String = ascii_hex.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() % 2 != 0 {
            return Err(CodecError::OddLength(ascii_hex.to_string()));
        }
        let mut bytes = Vec::with_capacity(cleaned.len() / 2);
        let chars: Vec<char> = cleaned.chars().collect();
        for pair in chars.chunks(2) {
            let hi = pair[0]
                .to_digit(16)
                .ok_or_else(|| CodecError::InvalidHex(ascii_hex.to_string()))?;
            let lo = pair[1]
                .to_digit(16)
                .ok_or_else(|| CodecError::InvalidHex(ascii_hex.to_string()))?;
            bytes.push(((hi << 4) | lo) as u8);
        }
        self.data.extend_from_slice(&bytes);

        let mut effective_len = self.data.len();
        if self.has_setup_data() {
            effective_len = effective_len.saturating_sub(8);
        }
        self.datalen = self.datalen.max(effective_len as u32);
        Ok(())
    }

    /// Appends one line of decoder output. The first line pushed also
    /// becomes `decoded_summary`.
    pub fn append_decoded(&mut self, line: &str) {
        if self.decoded.is_empty() {
            self.decoded_summary = line.to_string();
            self.decoded = line.to_string();
        } else {
            self.decoded.push('\n');
            self.decoded.push_str(line);
        }
    }

    /// Prepends a line to `decoded` and replaces `decoded_summary`, so the
    /// topmost layered decoder always wins the one-line summary.
    pub fn push_decoded(&mut self, line: &str) {
        if self.decoded.is_empty() {
            self.decoded = line.to_string();
        } else {
            self.decoded = format!("{line}\n{}", self.decoded);
        }
        self.decoded_summary = line.to_string();
    }

    /// Endpoint 0 carries the data-phase direction in the SETUP packet
    /// rather than in `endpt` (§3).
    pub fn has_setup_data(&self) -> bool {
        self.endpt == 0
    }

    /// A hex dump (no addresses) of the first 8 bytes of `data`, valid only
    /// on the control pipe. Supplemented from `Types.py::Transaction.
    /// getHexSetup` (see SPEC_FULL.md §F).
    pub fn get_hex_setup(&self) -> Option<String> {
        if !self.has_setup_data() {
            return None;
        }
        let setup = &self.data[..self.data.len().min(8)];
        Some(hex_dump(setup, 16, false, false, None))
    }

    /// A hex dump of the data payload, excluding the SETUP prefix on EP0.
    /// `summarize` limits the dump to a single line with no address column.
    pub fn get_hex_dump(&self, summarize: bool) -> String {
        let data: &[u8] = if self.has_setup_data() && self.data.len() >= 8 {
            &self.data[8..]
        } else {
            &self.data
        };
        if summarize {
            hex_dump(data, 16, true, false, Some(1))
        } else {
            hex_dump(data, 16, true, true, None)
        }
    }

    /// True iff this half of the transfer carries the user payload: Down on
    /// OUT endpoints, Up on IN endpoints. On EP0 the direction is read from
    /// the SETUP byte's high bit instead of `endpt`.
    pub fn is_data_transaction(&self) -> bool {
        let dir_bit = if self.endpt == 0 && !self.data.is_empty() {
            self.data[0]
        } else {
            self.endpt
        };
        let is_in = dir_bit & 0x80 != 0;
        match self.dir {
            Some(Direction::Up) => is_in,
            Some(Direction::Down) => !is_in,
            None => false,
        }
    }

    /// The comparable tuple consumed by the diff engine (§4.1, §4.5).
    pub fn get_diff_summary(&self) -> DiffSummary {
        let datalen = if self.is_data_transaction() {
            Some(self.datalen)
        } else {
            None
        };
        let prefix_len = self.data.len().min(DIFF_PREFIX_LEN);
        DiffSummary {
            dir: self.dir.unwrap_or(Direction::Down),
            endpt: self.endpt,
            datalen,
            data_prefix: self.data[..prefix_len].to_vec(),
        }
    }

    /// `"EP0"` for endpoint 0, else `"EPn IN"` / `"EPn OUT"`.
    pub fn get_transfer_string(&self) -> String {
        if self.endpt == 0 {
            "EP0".to_string()
        } else if self.endpt & 0x80 != 0 {
            format!("EP{} IN", self.endpt & 0x7F)
        } else {
            format!("EP{} OUT", self.endpt)
        }
    }
}

/// Renders `data` as a hex dump, optionally with a leading address column
/// and a trailing ASCII column, matching `Types.py::hexDump`.
fn hex_dump(data: &[u8], width: usize, ascii: bool, addrs: bool, line_limit: Option<usize>) -> String {
    let mut out = String::new();
    let mut addr = 0usize;
    let mut lines_emitted = 0usize;
    for chunk in data.chunks(width) {
        if let Some(limit) = line_limit {
            if lines_emitted >= limit {
                break;
            }
        }
        if lines_emitted > 0 {
            out.push('\n');
        }
        if addrs {
            out.push_str(&format!("{addr:04X}: "));
        }
        let hex_part: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        out.push_str(&hex_part.join(" "));
        if ascii {
            for _ in chunk.len()..width {
                out.push_str("   ");
            }
            out.push(' ');
            for &b in chunk {
                let printable = (0x20..0x7f).contains(&b);
                out.push(if printable { b as char } else { '.' });
            }
        }
        addr += chunk.len();
        lines_emitted += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_hex_data_is_whitespace_tolerant() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.endpt = 0x81;
        t.append_hex_data("de ad be  ef").unwrap();
        assert_eq!(t.data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(t.datalen, 4);
    }

    #[test]
    fn datalen_never_decreases() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.endpt = 0x81;
        t.datalen = 100;
        t.append_hex_data("0102").unwrap();
        assert_eq!(t.datalen, 100);
    }

    #[test]
    fn datalen_accounts_for_setup_prefix_on_ep0() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.endpt = 0;
        t.append_hex_data("80 06 00 01 00 00 12 00").unwrap();
        assert_eq!(t.datalen, 0);
        t.append_hex_data("deadbeef").unwrap();
        assert_eq!(t.datalen, 4);
    }

    #[test]
    fn append_hex_data_rejects_odd_length() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        assert!(t.append_hex_data("abc").is_err());
    }

    #[test]
    fn push_decoded_replaces_summary() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.append_decoded("inner layer");
        t.push_decoded("outer layer");
        assert_eq!(t.decoded_summary, "outer layer");
        assert_eq!(t.decoded, "outer layer\ninner layer");
    }

    #[test]
    fn transfer_string_naming() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.endpt = 0;
        assert_eq!(t.get_transfer_string(), "EP0");
        t.endpt = 0x82;
        assert_eq!(t.get_transfer_string(), "EP2 IN");
        t.endpt = 0x02;
        assert_eq!(t.get_transfer_string(), "EP2 OUT");
    }

    #[test]
    fn is_data_transaction_for_bulk_endpoints() {
        let mut down_out = Transaction::new(Direction::Down, 0.0);
        down_out.endpt = 0x02; // OUT
        assert!(down_out.is_data_transaction());

        let mut up_out = Transaction::new(Direction::Up, 0.0);
        up_out.endpt = 0x02; // OUT, Up half is just the status ack
        assert!(!up_out.is_data_transaction());

        let mut up_in = Transaction::new(Direction::Up, 0.0);
        up_in.endpt = 0x82; // IN
        assert!(up_in.is_data_transaction());
    }

    #[test]
    fn is_data_transaction_for_control_reads_setup_byte() {
        let mut down = Transaction::new(Direction::Down, 0.0);
        down.endpt = 0;
        down.data = vec![0x80]; // device-to-host request
        assert!(!down.is_data_transaction());

        let mut up = Transaction::new(Direction::Up, 0.0);
        up.endpt = 0;
        up.data = vec![0x80];
        assert!(up.is_data_transaction());
    }

    #[test]
    fn diff_summary_ignores_status_and_full_data() {
        let mut a = Transaction::new(Direction::Down, 0.0);
        a.endpt = 0x02;
        a.status = Status::Ok;
        a.append_hex_data("0102030405060708091011121314151617181920212223242526272829303132").unwrap();

        let mut b = a.clone();
        b.status = Status::Named("STALL".into());
        b.meta.line_number = Some(42);

        assert_eq!(a.get_diff_summary(), b.get_diff_summary());
    }

    #[test]
    fn get_hex_setup_only_on_control_pipe() {
        let mut t = Transaction::new(Direction::Down, 0.0);
        t.endpt = 0x02;
        assert!(t.get_hex_setup().is_none());

        t.endpt = 0;
        t.append_hex_data("80 06 00 01 00 00 12 00").unwrap();
        assert_eq!(t.get_hex_setup(), Some("80 06 00 01 00 00 12 00".to_string()));
    }
}
