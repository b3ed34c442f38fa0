//! Change-feed wire protocol: record framing and batch decoding.
//!
//! Each feed message is one or more concatenated records. A record starts
//! with a fixed big-endian header:
//!
//! ```text
//! end_offset:   u32   byte offset one past the payload, from record start
//! start_offset: u16   byte offset of the payload, from record start
//! reserved:     u16
//! opcode:       u32
//! ```
//!
//! The payload is `[start_offset, end_offset)` of the record. Opcode 5
//! payloads are UTF-8 JSON update batches; opcodes 3 (presence) and 8
//! (heartbeat ack) carry nothing the engine needs; unknown opcodes are
//! logged and ignored, never fatal.
//!
//! The subscribe token and heartbeat frame the client sends are fixed byte
//! strings, reproduced verbatim from the deployed protocol.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::canvas::PixelUpdate;
use crate::palette::ColorCode;

/// Parsed record header size in bytes.
pub const HEADER_LEN: usize = 12;

/// Fixed authentication/subscribe token, sent once after connecting.
pub const SUBSCRIBE_TOKEN: [u8; 39] = [
    0x00, 0x00, 0x00, 0x27, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00,
    0x01, 0x7B, 0x22, 0x75, 0x69, 0x64, 0x22, 0x3A, 0x30, 0x2C, 0x22, 0x72, 0x6F, 0x6F, 0x6D,
    0x69, 0x64, 0x22, 0x3A, 0x35, 0x34, 0x34, 0x36, 0x7D,
];

/// Fixed heartbeat frame, sent every heartbeat interval while streaming.
pub const HEARTBEAT_FRAME: [u8; 16] = [
    0x00, 0x00, 0x00, 0x10, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
    0x01,
];

/// Framing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Fewer bytes than a record header.
    #[error("truncated record header: {len} bytes")]
    TruncatedHeader { len: usize },

    /// Offsets that do not describe a well-formed record.
    #[error("invalid record offsets: start {start_offset}, end {end_offset}, record {available} bytes")]
    BadOffsets {
        start_offset: u16,
        end_offset: u32,
        available: usize,
    },
}

/// A record header, parsed but not yet validated against the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub end_offset: u32,
    pub start_offset: u16,
    pub reserved: u16,
    pub opcode: u32,
}

impl RecordHeader {
    /// Parse the fixed header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::TruncatedHeader`] if `buf` is shorter than
    /// [`HEADER_LEN`].
    pub fn parse(buf: &[u8]) -> Result<Self, FeedError> {
        if buf.len() < HEADER_LEN {
            return Err(FeedError::TruncatedHeader { len: buf.len() });
        }
        Ok(Self {
            end_offset: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            start_offset: u16::from_be_bytes([buf[4], buf[5]]),
            reserved: u16::from_be_bytes([buf[6], buf[7]]),
            opcode: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Classify the opcode.
    #[must_use]
    pub const fn opcode_kind(&self) -> Opcode {
        match self.opcode {
            3 => Opcode::Presence,
            5 => Opcode::Update,
            8 => Opcode::HeartbeatAck,
            other => Opcode::Unknown(other),
        }
    }
}

/// Known feed opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Presence/online notification; no payload processing required.
    Presence,
    /// Batched update payload (UTF-8 JSON).
    Update,
    /// Heartbeat acknowledgment.
    HeartbeatAck,
    /// Anything else: logged and ignored.
    Unknown(u32),
}

/// Encode a record with the standard 16-byte wire preamble (12-byte header
/// plus a constant tail word) around `payload`.
///
/// Production traffic is server-generated; this is used to synthesize
/// frames for tests and diagnostics.
#[must_use]
pub fn encode_record(opcode: u32, payload: &[u8]) -> Vec<u8> {
    const WIRE_PREAMBLE: u16 = 16;
    let end = WIRE_PREAMBLE as u32 + payload.len() as u32;
    let mut record = Vec::with_capacity(end as usize);
    record.extend_from_slice(&end.to_be_bytes());
    record.extend_from_slice(&WIRE_PREAMBLE.to_be_bytes());
    record.extend_from_slice(&1u16.to_be_bytes());
    record.extend_from_slice(&opcode.to_be_bytes());
    record.extend_from_slice(&1u32.to_be_bytes());
    record.extend_from_slice(payload);
    record
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    cmd: String,
    #[serde(default)]
    data: Option<DrawUpdateData>,
}

// Field names follow the deployed feed schema.
#[derive(Debug, Deserialize)]
struct DrawUpdateData {
    x_max: u32,
    y_max: u32,
    color: String,
}

/// Decode an opcode-5 message into pixel updates.
///
/// Walks the concatenated records of one message. A structurally malformed
/// record (bad header, bad offsets, non-JSON payload) abandons the
/// remainder of this message — the caller continues with the next message,
/// so a corrupt frame never kills the stream. Records that are valid JSON
/// but not `DRAW_UPDATE` are skipped; `DRAW_UPDATE` records with a
/// non-palette color are logged and skipped (untrusted input is validated
/// here, at the boundary).
#[must_use]
pub fn decode_update_batch(message: &[u8]) -> Vec<PixelUpdate> {
    let mut updates = Vec::new();
    let mut offset = 0usize;

    while offset < message.len() {
        let record = &message[offset..];
        let header = match RecordHeader::parse(record) {
            Ok(header) => header,
            Err(error) => {
                warn!(%error, offset, "abandoning malformed feed message");
                break;
            }
        };

        let start = header.start_offset as usize;
        let end = header.end_offset as usize;
        // end > start also guarantees the cursor advances.
        if start < HEADER_LEN || end <= start || end > record.len() {
            warn!(
                start_offset = header.start_offset,
                end_offset = header.end_offset,
                available = record.len(),
                offset,
                "abandoning feed message with invalid record offsets"
            );
            break;
        }

        match serde_json::from_slice::<FeedEnvelope>(&record[start..end]) {
            Ok(envelope) if envelope.cmd == "DRAW_UPDATE" => match envelope.data {
                Some(data) => match parse_update(&data) {
                    Ok(update) => updates.push(update),
                    Err(reason) => {
                        warn!(x = data.x_max, y = data.y_max, color = %data.color, reason, "skipping invalid update record");
                    }
                },
                None => warn!("skipping DRAW_UPDATE record without data"),
            },
            Ok(envelope) => {
                debug!(cmd = %envelope.cmd, "ignoring non-update feed record");
            }
            Err(error) => {
                warn!(%error, offset, "abandoning feed message with undecodable record");
                break;
            }
        }

        offset += end;
    }

    updates
}

fn parse_update(data: &DrawUpdateData) -> Result<PixelUpdate, &'static str> {
    let mut chars = data.color.chars();
    let color = match (chars.next(), chars.next()) {
        (Some(c), None) => ColorCode::from_char(c).map_err(|_| "non-palette color code")?,
        _ => return Err("color is not a single code"),
    };
    Ok(PixelUpdate {
        x: data.x_max,
        y: data.y_max,
        color,
    })
}
