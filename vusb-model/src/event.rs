// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::transaction::Transaction;

/// Base fields shared by every USB log event: a monotonic-from-epoch
/// timestamp, an optional 11-bit frame counter, and the source line or
/// record index the event was parsed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventMeta {
    pub timestamp: f64,
    pub frame: Option<u32>,
    pub line_number: Option<u64>,
}

impl EventMeta {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            frame: None,
            line_number: None,
        }
    }
}

/// Emitted once per "start of frame" observation. Always carries a valid
/// `frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct SofMarker {
    pub meta: EventMeta,
}

impl SofMarker {
    pub fn new(timestamp: f64, frame: u32, line_number: Option<u64>) -> Self {
        Self {
            meta: EventMeta {
                timestamp,
                frame: Some(frame),
                line_number,
            },
        }
    }
}

/// Carries two non-empty, parallel, chronologically-ordered lists of
/// transactions representing one matching run across two logs (§4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct DiffMarker {
    pub meta: EventMeta,
    pub matches: Vec<Transaction>,
    pub matched_with: Vec<Transaction>,
}

impl DiffMarker {
    /// Panics if either list is empty; callers only ever build these from a
    /// matching block with `n > 0` (§4.5).
    pub fn new(matches: Vec<Transaction>, matched_with: Vec<Transaction>) -> Self {
        assert!(!matches.is_empty() && !matched_with.is_empty());
        let timestamp = matches[0].meta.timestamp;
        Self {
            meta: EventMeta::new(timestamp),
            matches,
            matched_with,
        }
    }
}

/// Why a log source stopped producing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Clean end of input.
    EndOfLog,
    /// The parser input stream closed unexpectedly (§7 `IOFailure`).
    Io(String),
    /// Cooperative cancellation (§7 `Cancelled`).
    Cancelled,
}

/// The union of everything that can travel across an [`crate::EventBus`]-like
/// channel: transactions, frame markers, diff correlations, and the terminal
/// marker that ends a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Transaction(Transaction),
    Sof(SofMarker),
    Diff(DiffMarker),
    Terminal(Termination),
}

impl Event {
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            Event::Transaction(t) => Some(t.meta.timestamp),
            Event::Sof(s) => Some(s.meta.timestamp),
            Event::Diff(d) => Some(d.meta.timestamp),
            Event::Terminal(_) => None,
        }
    }
}

impl From<Transaction> for Event {
    fn from(t: Transaction) -> Self {
        Event::Transaction(t)
    }
}

impl From<SofMarker> for Event {
    fn from(s: SofMarker) -> Self {
        Event::Sof(s)
    }
}

impl From<DiffMarker> for Event {
    fn from(d: DiffMarker) -> Self {
        Event::Diff(d)
    }
}
