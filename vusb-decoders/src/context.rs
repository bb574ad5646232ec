// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Builds the `DeviceContext` snapshots that drive decoder detection
//! (§4.4). The original tool's descriptor tree walker wasn't retained
//! alongside the rest of `VUsbTools.Decode`; this rebuilds it from the
//! standard USB descriptor layout (device/configuration/interface/
//! endpoint), the same TLV-walk technique as every USB descriptor parser,
//! using the same `Group`/`Field` decoder the storage and FX2 decoders use.

use vusb_model::codec::{decode_group, Field, FieldKind};
use vusb_model::Transaction;

const GET_DESCRIPTOR: u8 = 0x06;
const DESC_TYPE_DEVICE: u8 = 0x01;
const DESC_TYPE_CONFIGURATION: u8 = 0x02;
const DESC_TYPE_INTERFACE: u8 = 0x04;
const DESC_TYPE_ENDPOINT: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub bm_attributes: u8,
}

/// A snapshot offered to every detector, mirroring the original's
/// `context.device` / `context.descriptors` / `context.interface` /
/// `context.endpoint`.
#[derive(Debug, Clone, Default)]
pub struct DeviceContext {
    /// Whether a device descriptor has been observed for this device.
    pub device: bool,
    /// Every endpoint address seen across the device's configuration
    /// descriptor, in descriptor order — used by the FX2 heuristic.
    pub endpoints: Vec<u8>,
    /// The interface the current endpoint belongs to, if any.
    pub interface: Option<InterfaceInfo>,
    /// The endpoint this snapshot is being offered for.
    pub endpoint: Option<EndpointInfo>,
}

/// Watches a device's EP0 traffic for `GET_DESCRIPTOR` responses and
/// incrementally rebuilds its [`DeviceContext`].
#[derive(Debug, Default)]
pub struct DescriptorTracker {
    device_seen: bool,
    endpoints: Vec<u8>,
}

impl DescriptorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one completed control transfer. Only `GET_DESCRIPTOR`
    /// responses update state; everything else is ignored. Returns one
    /// context snapshot per newly-discovered endpoint, in descriptor
    /// order, ready to offer to the registry's detectors.
    pub fn observe(&mut self, event: &Transaction) -> Vec<DeviceContext> {
        if event.endpt != 0 || !event.is_data_transaction() {
            return Vec::new();
        }
        if event.data.len() < 8 {
            return Vec::new();
        }
        let setup = &event.data[..8];
        if setup[1] != GET_DESCRIPTOR {
            return Vec::new();
        }
        let descriptor_type = setup[3];
        let payload = &event.data[8..];

        match descriptor_type {
            DESC_TYPE_DEVICE => {
                self.device_seen = true;
                Vec::new()
            }
            DESC_TYPE_CONFIGURATION => self.walk_configuration(payload),
            _ => Vec::new(),
        }
    }

    fn walk_configuration(&mut self, payload: &[u8]) -> Vec<DeviceContext> {
        let mut snapshots = Vec::new();
        let mut current_interface: Option<InterfaceInfo> = None;
        let mut cursor = payload;

        while cursor.len() >= 2 {
            let length = cursor[0] as usize;
            let descriptor_type = cursor[1];
            if length == 0 || length > cursor.len() {
                break;
            }
            let body = &cursor[..length];

            match descriptor_type {
                DESC_TYPE_INTERFACE if length >= 9 => {
                    let fields = [
                        Field::new("length", FieldKind::U8),
                        Field::new("desc_type", FieldKind::U8),
                        Field::new("number", FieldKind::U8),
                        Field::new("alt", FieldKind::U8),
                        Field::new("num_endpoints", FieldKind::U8),
                        Field::new("class", FieldKind::U8),
                        Field::new("sub_class", FieldKind::U8),
                        Field::new("protocol", FieldKind::U8),
                    ];
                    let (group, _) = decode_group(body, &fields);
                    current_interface = Some(InterfaceInfo {
                        class: group.get_u32("class").unwrap_or(0) as u8,
                        sub_class: group.get_u32("sub_class").unwrap_or(0) as u8,
                        protocol: group.get_u32("protocol").unwrap_or(0) as u8,
                    });
                }
                DESC_TYPE_ENDPOINT if length >= 7 => {
                    let fields = [
                        Field::new("length", FieldKind::U8),
                        Field::new("desc_type", FieldKind::U8),
                        Field::new("address", FieldKind::U8),
                        Field::new("attributes", FieldKind::U8),
                    ];
                    let (group, _) = decode_group(body, &fields);
                    let address = group.get_u32("address").unwrap_or(0) as u8;
                    let attributes = group.get_u32("attributes").unwrap_or(0) as u8;
                    self.endpoints.push(address);
                    snapshots.push(DeviceContext {
                        device: self.device_seen,
                        endpoints: self.endpoints.clone(),
                        interface: current_interface,
                        endpoint: Some(EndpointInfo {
                            address,
                            bm_attributes: attributes,
                        }),
                    });
                }
                _ => {}
            }

            cursor = &cursor[length..];
        }

        snapshots
    }

    /// A context snapshot with no specific endpoint, for detectors (like
    /// the FX2 heuristic) that key off the full endpoint set instead.
    pub fn device_snapshot(&self) -> DeviceContext {
        DeviceContext {
            device: self.device_seen,
            endpoints: self.endpoints.clone(),
            interface: None,
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vusb_model::Direction;

    fn get_descriptor_response(desc_type: u8, payload: &[u8]) -> Transaction {
        let mut t = Transaction::new(Direction::Up, 0.0);
        t.endpt = 0;
        let mut data = vec![0x80, 0x06, 0x00, desc_type, 0x00, 0x00, 0xff, 0x00];
        data.extend_from_slice(payload);
        t.data = data;
        t.datalen = t.data.len() as u32;
        t
    }

    #[test]
    fn mass_storage_interface_and_bulk_endpoint_are_extracted() {
        let mut config = Vec::new();
        // interface descriptor: class=0x08 (storage) sub=0x06 (SCSI) proto=0x50
        config.extend_from_slice(&[9, 4, 0, 0, 2, 0x08, 0x06, 0x50, 0]);
        // endpoint descriptor: bulk OUT ep 2
        config.extend_from_slice(&[7, 5, 0x02, 0x02, 0x40, 0x00, 0x00]);

        let mut tracker = DescriptorTracker::new();
        let snapshots = tracker.observe(&get_descriptor_response(DESC_TYPE_CONFIGURATION, &config));

        assert_eq!(snapshots.len(), 1);
        let ctx = &snapshots[0];
        assert_eq!(ctx.interface.unwrap().class, 0x08);
        assert_eq!(ctx.endpoint.unwrap().address, 0x02);
    }

    #[test]
    fn device_descriptor_sets_the_device_flag() {
        let mut tracker = DescriptorTracker::new();
        tracker.observe(&get_descriptor_response(DESC_TYPE_DEVICE, &[0; 18]));
        assert!(tracker.device_snapshot().device);
    }

    #[test]
    fn non_get_descriptor_control_transfers_are_ignored() {
        let mut t = Transaction::new(Direction::Up, 0.0);
        t.endpt = 0;
        t.data = vec![0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]; // SET_CONFIGURATION
        t.datalen = 8;
        let mut tracker = DescriptorTracker::new();
        assert!(tracker.observe(&t).is_empty());
    }
}
