// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! A declarative, composable decoder for fixed-layout binary records (§4.2):
//! unsigned integers in either endianness, UTF-16 strings, and `Group` nodes
//! that aggregate children into named fields. Decoding consumes a prefix of
//! a byte buffer and returns the remainder.

use std::collections::HashMap;
use std::fmt;

/// One decoded scalar value. `None` marks a field that ran past the end of
/// the buffer, mirroring the original's "short buffer" tolerance.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    Str(String),
    None,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::None => write!(f, "None"),
        }
    }
}

impl Value {
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U8(v) => Some(v as u32),
            Value::U16(v) => Some(v as u32),
            Value::U32(v) => Some(v),
            _ => None,
        }
    }
}

/// How a scalar field should be read and, for display, formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U8Hex,
    U16Le,
    U16Be,
    U16Hex,
    U32Le,
    U32Be,
    U32Hex,
    Utf16,
}

/// A named field in a [`Group`] template.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

fn decode_scalar(kind: FieldKind, buf: &[u8]) -> (Value, &[u8]) {
    let size = match kind {
        FieldKind::U8 | FieldKind::U8Hex => 1,
        FieldKind::U16Le | FieldKind::U16Be | FieldKind::U16Hex => 2,
        FieldKind::U32Le | FieldKind::U32Be | FieldKind::U32Hex => 4,
        FieldKind::Utf16 => buf.len() & !1,
    };
    if buf.len() < size {
        return (Value::None, &[]);
    }
    let (item, rest) = buf.split_at(size);
    let value = match kind {
        FieldKind::U8 | FieldKind::U8Hex => Value::U8(item[0]),
        FieldKind::U16Le => Value::U16(u16::from_le_bytes([item[0], item[1]])),
        FieldKind::U16Be | FieldKind::U16Hex => Value::U16(u16::from_be_bytes([item[0], item[1]])),
        FieldKind::U32Le => Value::U32(u32::from_le_bytes([item[0], item[1], item[2], item[3]])),
        FieldKind::U32Be | FieldKind::U32Hex => {
            Value::U32(u32::from_be_bytes([item[0], item[1], item[2], item[3]]))
        }
        FieldKind::Utf16 => {
            let units: Vec<u16> = item
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            Value::Str(String::from_utf16_lossy(&units))
        }
    };
    (value, rest)
}

fn format_scalar(kind: FieldKind, value: &Value) -> String {
    match (kind, value) {
        (_, Value::None) => "None".to_string(),
        (FieldKind::U8Hex, Value::U8(v)) => format!("0x{v:02X}"),
        (FieldKind::U16Hex, Value::U16(v)) => format!("0x{v:04X}"),
        (FieldKind::U32Hex, Value::U32(v)) => format!("0x{v:08X}"),
        (FieldKind::Utf16, Value::Str(s)) => format!("{s:?}"),
        _ => value.to_string(),
    }
}

/// A decoded record: an ordered, named set of child values, decoded from a
/// buffer against a [`Field`] template.
#[derive(Debug, Clone, Default)]
pub struct Group {
    order: Vec<&'static str>,
    values: HashMap<&'static str, (FieldKind, Value)>,
}

impl Group {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).map(|(_, v)| v)
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(Value::as_u32)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path_max = self.order.iter().map(|n| n.len()).max().unwrap_or(0);
        let lines: Vec<String> = self
            .order
            .iter()
            .map(|name| {
                let (kind, value) = &self.values[name];
                format!("  {name:path_max$} = {}", format_scalar(*kind, value))
            })
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// Decodes `buf` against `fields` in order, returning the populated
/// [`Group`] and whatever of `buf` was left over.
pub fn decode_group<'a>(buf: &'a [u8], fields: &[Field]) -> (Group, &'a [u8]) {
    let mut group = Group::default();
    let mut rest = buf;
    for field in fields {
        let (value, new_rest) = decode_scalar(field.kind, rest);
        rest = new_rest;
        group.order.push(field.name);
        group.values.insert(field.name, (field.kind, value));
    }
    (group, rest)
}

/// Maps assigned numbers to names, with unknown keys falling through to a
/// hex rendering rather than failing (§4.2, §8 property 5).
#[derive(Debug, Clone)]
pub struct EnumDict {
    names: HashMap<u32, &'static str>,
    hex_digits: usize,
}

impl EnumDict {
    pub fn new(entries: &[(u32, &'static str)], hex_digits: usize) -> Self {
        Self {
            names: entries.iter().copied().collect(),
            hex_digits,
        }
    }

    /// Looks up `key`; unknown keys render as `0x%0Nx` where `N` is
    /// `hex_digits`, never panicking and never returning an error.
    pub fn lookup(&self, key: u32) -> String {
        match self.names.get(&key) {
            Some(name) => name.to_string(),
            None => format!("0x{key:0width$x}", width = self.hex_digits),
        }
    }
}
