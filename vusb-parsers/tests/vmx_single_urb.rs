// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! A VMX log's `USBIO:` lines produce one Down transaction followed by its
//! matching Up, both against the same pipe.

use std::collections::VecDeque;
use vusb_model::Event;
use vusb_parsers::vmx::VmxParser;

#[test]
fn single_urb_produces_one_down_then_one_up() {
    let mut parser = VmxParser::new();
    let mut out = VecDeque::new();

    parser.parse_line(
        "Nov 02 10:12:43.500 vmx| USBIO: Down dev=2 endpt=0x81 datalen=64\n",
        &mut out,
    );
    parser.parse_line(
        "Nov 02 10:12:43.501 vmx| USBIO: Up dev=2 endpt=0x81 datalen=64\n",
        &mut out,
    );
    parser.flush(&mut out);

    assert_eq!(out.len(), 2);

    let Event::Transaction(down) = &out[0] else {
        panic!("expected a transaction, got {:?}", out[0])
    };
    let Event::Transaction(up) = &out[1] else {
        panic!("expected a transaction, got {:?}", out[1])
    };

    assert_eq!(down.dir, Some(vusb_model::Direction::Down));
    assert_eq!(down.dev, 2);
    assert_eq!(down.endpt, 0x81);

    assert_eq!(up.dir, Some(vusb_model::Direction::Up));
    assert_eq!(up.dev, 2);
    assert_eq!(up.endpt, 0x81);
}
