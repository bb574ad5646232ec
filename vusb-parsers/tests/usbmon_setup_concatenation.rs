// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! A usbmon submission's `s` tag is carried forward and concatenated onto
//! the completion's data, reassembling the full EP0 transfer.

use std::collections::VecDeque;
use vusb_model::Event;
use vusb_parsers::usbmon::UsbmonParser;

#[test]
fn setup_bytes_precede_the_completion_payload() {
    let mut parser = UsbmonParser::new();
    let mut out = VecDeque::new();

    parser.parse_line(
        "ffff880001 1000 S Ci:1:002:0 s 80 06 00 01 00 00 12 00\n",
        &mut out,
    );
    parser.parse_line(
        "ffff880001 1200 C Ci:1:002:0 0 18 = 12 01 00 02 00 00 00 40 00 00 00 00 00 00 01 02 00 01\n",
        &mut out,
    );

    assert_eq!(out.len(), 2);
    let Event::Transaction(up) = &out[1] else {
        panic!("expected a transaction, got {:?}", out[1])
    };

    let setup = &[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
    let descriptor = &[
        0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x01,
    ];
    assert_eq!(&up.data[..8], setup);
    assert_eq!(&up.data[8..], descriptor);
}
