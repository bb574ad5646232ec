// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Picks a parser by filename extension, stripping `.gz` as many times as
//! it appears (§6, mirroring `Log.py::chooseParser`).

use std::ffi::OsStr;
use std::path::Path;

use crate::ellisys::EllisysXmlParser;
use crate::tslog::TimestampLogParser;
use crate::usbmon::UsbmonParser;
use crate::vmx::VmxParser;

/// Whether a source feeds a parser one line at a time or as a whole
/// document. usbmon, VMX, and timestamp logs are line-oriented; Ellisys
/// XML is not, since XML elements can span arbitrarily many lines.
pub fn is_line_oriented(parser: &LogParser) -> bool {
    !matches!(parser, LogParser::Ellisys(_))
}

/// A parser chosen for one input file, tagged by variant rather than
/// boxed as a trait object — the parser set is small and fixed (§9 DESIGN
/// NOTES).
#[derive(Debug)]
pub enum LogParser {
    Vmx(VmxParser),
    Ellisys(EllisysXmlParser),
    Usbmon(UsbmonParser),
    TimestampLog(TimestampLogParser),
}

/// Strips every trailing `.gz` from `path` and chooses a parser for what's
/// left, by extension. Falls back to the VMX parser when nothing else
/// matches, exactly as the original did.
pub fn choose_parser(path: &Path) -> LogParser {
    let mut stem = path.to_path_buf();
    while stem.extension() == Some(OsStr::new("gz")) {
        stem = stem.with_extension("");
    }
    match stem.extension().and_then(OsStr::to_str) {
        Some("xml") => LogParser::Ellisys(EllisysXmlParser::new()),
        Some("tslog") => LogParser::TimestampLog(TimestampLogParser::new()),
        Some("mon") => LogParser::Usbmon(UsbmonParser::new()),
        _ => LogParser::Vmx(VmxParser::new()),
    }
}
