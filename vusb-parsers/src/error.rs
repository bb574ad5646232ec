// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

/// A single parseable unit (line/element) was structurally invalid (§7
/// `MalformedRecord`). The caller logs this at the source line number and
/// skips the record; parsing continues.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed record at line {line}: {detail}")]
pub struct MalformedRecord {
    pub line: u64,
    pub detail: String,
}

impl MalformedRecord {
    pub fn new(line: u64, detail: impl Into<String>) -> Self {
        Self {
            line,
            detail: detail.into(),
        }
    }
}
