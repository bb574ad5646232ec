// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Decodes the USB bulk-only storage protocol (BBB) and the SCSI command
//! blocks carried inside it (§4.4.1), grounded on `Decoders/Storage.py`.

use vusb_model::codec::{decode_group, EnumDict, Field, FieldKind, Group};
use vusb_model::Transaction;

const USBC_SIG: u32 = 0x4342_5355; // "USBC", little-endian on the wire
const USBS_SIG: u32 = 0x5342_5355; // "USBS", little-endian on the wire

fn opcode_table() -> &'static EnumDict {
    use std::sync::OnceLock;
    static TABLE: OnceLock<EnumDict> = OnceLock::new();
    TABLE.get_or_init(|| {
        EnumDict::new(
            &[
                (0x00, "TEST_UNIT_READY"),
                (0x01, "REZERO_UNIT"),
                (0x03, "REQUEST_SENSE"),
                (0x04, "FORMAT_UNIT"),
                (0x05, "READ_BLOCKLIMITS"),
                (0x07, "INIT_ELEMENT_STATUS"),
                (0x08, "READ(6)"),
                (0x0a, "PRINT"),
                (0x0b, "SLEW_AND_PRINT"),
                (0x0f, "READ_REVERSE"),
                (0x10, "SYNC_BUFFER"),
                (0x11, "SPACE"),
                (0x12, "INQUIRY"),
                (0x14, "RECOVER_BUFFERED"),
                (0x15, "MODE_SELECT"),
                (0x16, "RESERVE_UNIT"),
                (0x17, "RELEASE_UNIT"),
                (0x18, "COPY"),
                (0x19, "ERASE"),
                (0x1a, "MODE_SENSE"),
                (0x1b, "STOP_PRINT"),
                (0x1c, "RECV_DIAGNOSTIC"),
                (0x1d, "SEND_DIAGNOSTIC"),
                (0x1e, "MEDIUM_REMOVAL"),
                (0x24, "SET_WINDOW"),
                (0x25, "READ_CAPACITY"),
                (0x28, "READ(10)"),
                (0x29, "READ_GENERATION"),
                (0x2a, "WRITE(10)"),
                (0x2b, "POSITION_TO_ELEMENT"),
                (0x2d, "READ_UPDATED_BLOCK"),
                (0x2e, "WRITE_VERIFY"),
                (0x2f, "VERIFY"),
                (0x30, "SEARCH_DATA_HIGH"),
                (0x31, "SEARCH_DATA_EQUAL"),
                (0x32, "SEARCH_DATA_LOW"),
                (0x33, "SET_LIMITS"),
                (0x34, "READ_POSITION"),
                (0x35, "SYNC_CACHE"),
                (0x36, "LOCKUNLOCK_CACHE"),
                (0x37, "READ_DEFECT_DATA"),
                (0x38, "MEDIUM_SCAN"),
                (0x39, "COMPARE"),
                (0x3a, "COPY_VERIFY"),
                (0x3b, "WRITE_BUFFER"),
                (0x3c, "READ_BUFFER"),
                (0x3d, "UPDATE_BLOCK"),
                (0x3e, "READ_LONG"),
                (0x3f, "WRITE_LONG"),
                (0x40, "CHANGE_DEF"),
                (0x41, "WRITE_SAME"),
                (0x42, "READ_SUBCHANNEL"),
                (0x43, "READ_TOC"),
                (0x44, "READ_HEADER"),
                (0x45, "PLAY_AUDIO(10)"),
                (0x46, "GET_CONFIGURATION"),
                (0x47, "PLAY_AUDIO_MSF"),
                (0x48, "PLAY_AUDIO_TRACK"),
                (0x49, "PLAY_AUDIO_RELATIVE"),
                (0x4a, "GET_EVENT_STATUS_NOTIFICATION"),
                (0x4b, "PAUSE"),
                (0x4c, "LOG_SELECT"),
                (0x4d, "LOG_SENSE"),
                (0x4e, "STOP_PLAY"),
                (0x51, "READ_DISC_INFO"),
                (0x52, "READ_TRACK_INFO"),
                (0x53, "RESERVE_TRACK"),
                (0x54, "SEND_OPC_INFORMATION"),
                (0x55, "MODE_SELECT(10)"),
                (0x56, "RESERVE_UNIT(10)"),
                (0x57, "RELEASE_UNIT(10)"),
                (0x5a, "MODE_SENSE(10)"),
                (0x5b, "CLOSE_SESSION"),
                (0x5c, "READ_BUFFER_CAPACITY"),
                (0x5d, "SEND_CUE_SHEET"),
                (0x5e, "PERSISTENT_RESERVE_IN"),
                (0x5f, "PERSISTENT_RESERVE_OUT"),
                (0x88, "READ(16)"),
                (0x8a, "WRITE(16)"),
                (0x9e, "READ_CAPACITY(16)"),
                (0xa0, "REPORT_LUNS"),
                (0xa1, "BLANK"),
                (0xa3, "SEND_KEY"),
                (0xa4, "REPORT_KEY"),
                (0xa5, "PLAY_AUDIO(12)"),
                (0xa6, "LOADCD"),
                (0xa8, "READ(12)"),
                (0xa9, "PLAY_TRACK_RELATIVE"),
                (0xaa, "WRITE(12)"),
                (0xac, "GET_PERFORMANCE"),
                (0xad, "READ_DVD_STRUCTURE"),
                (0xae, "WRITE_VERIFY(12)"),
                (0xaf, "VERIFY(12)"),
                (0xb0, "SEARCH_DATA_HIGH(12)"),
                (0xb1, "SEARCH_DATA_EQUAL(12)"),
                (0xb2, "SEARCH_DATA_LOW(12)"),
                (0xb3, "SET_LIMITS(12)"),
                (0xb5, "REQUEST_VOLUME_ELEMENT_ADDR"),
                (0xb6, "SET_STREAMING"),
                (0xb7, "READ_DEFECT_DATA(12)"),
                (0xb8, "SELECT_CDROM_SPEED"),
                (0xb9, "READ_CD_MSF"),
                (0xba, "AUDIO_SCAN"),
                (0xbb, "SET_CDROM_SPEED"),
                (0xbc, "PLAY_CD"),
                (0xbd, "MECH_STATUS"),
                (0xbe, "READ_CD"),
                (0xbf, "SEND_DVD_STRUCTURE"),
            ],
            2,
        )
    })
}

/// A decoded SCSI command block, i.e. the payload of a BBB CBW.
struct ScsiCommand {
    name: String,
    summary: String,
    params: Option<Group>,
}

impl ScsiCommand {
    fn decode(cdb: &[u8]) -> Self {
        let opcode_field = [Field::new("opcode", FieldKind::U8)];
        let (header, params_buf) = decode_group(cdb, &opcode_field);
        let opcode = header.get_u32("opcode").unwrap_or(0);
        let name = opcode_table().lookup(opcode);

        match name.as_str() {
            "READ(6)" => {
                let fields = [
                    Field::new("lun", FieldKind::U8),
                    Field::new("lba", FieldKind::U16Be),
                    Field::new("length", FieldKind::U8),
                    Field::new("control", FieldKind::U8),
                ];
                let (params, _) = decode_group(params_buf, &fields);
                let summary = format!(
                    "0x{:02x} blocks at 0x{:04x}",
                    params.get_u32("length").unwrap_or(0),
                    params.get_u32("lba").unwrap_or(0)
                );
                Self {
                    name,
                    summary,
                    params: Some(params),
                }
            }
            "READ(10)" => {
                let fields = [
                    Field::new("lun", FieldKind::U8),
                    Field::new("lba", FieldKind::U32Be),
                    Field::new("reserved_1", FieldKind::U8),
                    Field::new("length", FieldKind::U16Be),
                    Field::new("control", FieldKind::U8),
                ];
                let (params, _) = decode_group(params_buf, &fields);
                let summary = format!(
                    "0x{:04x} blocks at 0x{:08x}",
                    params.get_u32("length").unwrap_or(0),
                    params.get_u32("lba").unwrap_or(0)
                );
                Self {
                    name,
                    summary,
                    params: Some(params),
                }
            }
            _ => Self {
                name,
                summary: String::new(),
                params: None,
            },
        }
    }
}

impl std::fmt::Display for ScsiCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.summary)
    }
}

/// Decodes Command Block Wrapper (`USBC`) transactions into SCSI commands.
#[derive(Debug, Default)]
pub struct CommandDecoder;

impl CommandDecoder {
    pub fn handle_event(&mut self, event: &mut Transaction) {
        if !event.is_data_transaction() {
            return;
        }
        if event.data.len() < 4 || &event.data[..4] != b"USBC" {
            return;
        }

        let fields = [
            Field::new("sig", FieldKind::U32Le),
            Field::new("tag", FieldKind::U32Le),
            Field::new("datalen", FieldKind::U32Le),
            Field::new("flag", FieldKind::U8),
            Field::new("lun", FieldKind::U8),
            Field::new("cdblen", FieldKind::U8),
        ];
        let (header, cdb) = decode_group(&event.data, &fields);
        debug_assert_eq!(header.get_u32("sig"), Some(USBC_SIG));

        let command = ScsiCommand::decode(cdb);
        event.push_decoded(&format!("Storage Command: {command}"));
        if let Some(params) = &command.params {
            event.append_decoded(&format!("\n{params}"));
        }
    }
}

/// Decodes Command Status Wrapper (`USBS`) transactions.
#[derive(Debug, Default)]
pub struct StatusDecoder;

impl StatusDecoder {
    pub fn handle_event(&mut self, event: &mut Transaction) {
        if !event.is_data_transaction() {
            return;
        }
        if event.data.len() < 4 || &event.data[..4] != b"USBS" {
            return;
        }

        let fields = [
            Field::new("sig", FieldKind::U32Le),
            Field::new("tag", FieldKind::U32Le),
            Field::new("residue", FieldKind::U32Le),
            Field::new("status", FieldKind::U8),
        ];
        let (header, _) = decode_group(&event.data, &fields);
        debug_assert_eq!(header.get_u32("sig"), Some(USBS_SIG));

        let status_code = header.get_u32("status").unwrap_or(0);
        let status_name = status_table().lookup(status_code);
        let residue = header.get_u32("residue").unwrap_or(0);
        let residue_suffix = if residue != 0 {
            format!(", residue={residue}")
        } else {
            String::new()
        };

        event.push_decoded(&format!("Storage Status ({status_name}{residue_suffix})"));
        event.append_decoded(&format!("\n{header}"));
    }
}

fn status_table() -> &'static EnumDict {
    use std::sync::OnceLock;
    static TABLE: OnceLock<EnumDict> = OnceLock::new();
    TABLE.get_or_init(|| {
        EnumDict::new(
            &[(0x00, "ok"), (0x01, "FAILED"), (0x02, "PHASE ERROR")],
            2,
        )
    })
}

/// Picks `StatusDecoder` for the IN half of a bulk-only storage pipe and
/// `CommandDecoder` for the OUT half (§4.4.1).
pub fn detector(interface_class: u8, interface_subclass: u8, bm_attributes: u8, endpoint_address: u8) -> Option<ActiveStorageDecoder> {
    let is_bulk = bm_attributes & 0x03 == 2;
    if interface_class != 0x08 || interface_subclass != 0x06 || !is_bulk {
        return None;
    }
    if endpoint_address & 0x80 != 0 {
        Some(ActiveStorageDecoder::Status(StatusDecoder))
    } else {
        Some(ActiveStorageDecoder::Command(CommandDecoder))
    }
}

#[derive(Debug)]
pub enum ActiveStorageDecoder {
    Command(CommandDecoder),
    Status(StatusDecoder),
}

impl ActiveStorageDecoder {
    pub fn handle_event(&mut self, event: &mut Transaction) {
        match self {
            Self::Command(d) => d.handle_event(event),
            Self::Status(d) => d.handle_event(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vusb_model::Direction;

    fn cbw(opcode: u8, params: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"USBC");
        data.extend_from_slice(&1u32.to_le_bytes()); // tag
        data.extend_from_slice(&512u32.to_le_bytes()); // datalen
        data.push(0x80); // flag: data-in
        data.push(0); // lun
        data.push(10); // cdblen
        data.push(opcode);
        data.extend_from_slice(params);
        data
    }

    #[test]
    fn read10_command_is_decoded_with_summary() {
        let mut txn = Transaction::new(Direction::Down, 0.0);
        txn.endpt = 0x02;
        // lun(1) lba(4 BE) reserved(1) length(2 BE) control(1)
        let params = [0x00, 0x00, 0x00, 0x01, 0x23, 0x45, 0x00, 0x00, 0x40, 0x00];
        txn.data = cbw(0x28, &params);
        txn.datalen = txn.data.len() as u32;

        let mut decoder = CommandDecoder;
        decoder.handle_event(&mut txn);

        assert!(txn.decoded_summary.contains("Storage Command: READ(10)"));
        assert!(txn.decoded.contains("0x0040 blocks at 0x00012345"));
    }

    #[test]
    fn unknown_opcode_renders_as_hex_without_failing() {
        let mut txn = Transaction::new(Direction::Down, 0.0);
        txn.endpt = 0x02;
        txn.data = cbw(0xEE, &[0; 9]);
        txn.datalen = txn.data.len() as u32;

        let mut decoder = CommandDecoder;
        decoder.handle_event(&mut txn);

        assert!(txn.decoded_summary.contains("0xee"));
    }

    #[test]
    fn status_with_nonzero_residue_shows_it() {
        let mut txn = Transaction::new(Direction::Up, 0.0);
        txn.endpt = 0x82;
        let mut data = Vec::new();
        data.extend_from_slice(b"USBS");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes()); // residue
        data.push(0x01); // FAILED
        txn.data = data;
        txn.datalen = txn.data.len() as u32;

        let mut decoder = StatusDecoder;
        decoder.handle_event(&mut txn);

        assert!(txn.decoded_summary.contains("FAILED"));
        assert!(txn.decoded_summary.contains("residue=4"));
    }

    #[test]
    fn non_storage_payload_is_ignored() {
        let mut txn = Transaction::new(Direction::Down, 0.0);
        txn.endpt = 0x02;
        txn.data = vec![1, 2, 3, 4];
        txn.datalen = 4;

        let mut decoder = CommandDecoder;
        decoder.handle_event(&mut txn);
        assert!(txn.decoded_summary.is_empty());
    }
}
