// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! A `GET_DESCRIPTOR` configuration response naming a mass-storage
//! interface attaches `CommandDecoder` to the bulk OUT endpoint, and a
//! READ(10) CBW on that endpoint decodes to its block range.

use vusb_decoders::DecoderRegistry;
use vusb_model::{Direction, Transaction};

fn get_descriptor_response(dev: u32, desc_type: u8, payload: &[u8]) -> Transaction {
    let mut t = Transaction::new(Direction::Up, 0.0);
    t.dev = dev;
    t.endpt = 0;
    let mut data = vec![0x80, 0x06, 0x00, desc_type, 0x00, 0x00, 0xff, 0x00];
    data.extend_from_slice(payload);
    t.data = data;
    t.datalen = t.data.len() as u32;
    t
}

#[test]
fn read10_command_decodes_to_its_block_range() {
    let mut registry = DecoderRegistry::new();

    let mut config = Vec::new();
    // interface descriptor: class=0x08 (storage) sub=0x06 (SCSI) proto=0x50
    config.extend_from_slice(&[9, 4, 0, 0, 1, 0x08, 0x06, 0x50, 0]);
    // endpoint descriptor: bulk OUT ep 2
    config.extend_from_slice(&[7, 5, 0x02, 0x02, 0x40, 0x00, 0x00]);
    let mut descriptor = get_descriptor_response(7, 0x02, &config);
    registry.handle_event(&mut descriptor);

    let mut cbw = Transaction::new(Direction::Down, 1.0);
    cbw.dev = 7;
    cbw.endpt = 0x02;
    cbw.data = vec![
        0x55, 0x53, 0x42, 0x43, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x80, 0x00, 0x0a, 0x28, 0x00, 0x00,
        0x00, 0x12, 0x34, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    cbw.datalen = cbw.data.len() as u32;

    registry.handle_event(&mut cbw);

    assert_eq!(cbw.decoded_summary, "Storage Command: READ(10) 0x0040 blocks at 0x00001234");
}
