//! Geometry-stream record codec and embedded-id rewriting.
//!
//! A geometry stream is an opaque BLOB laid out as a sequence of records:
//! `[opcode: u32 LE][len: u32 LE][payload: len bytes]`. The transformer
//! never interprets the geometry itself; it only rewrites the two record
//! kinds that begin with an embedded 64-bit id: geometry-part references
//! (element id) and text strings (font id). Every other record is copied
//! verbatim.

use thiserror::Error;

/// Record opcodes. Only the two id-bearing ones are interpreted.
pub mod opcode {
    /// Stream header; payload is opaque.
    pub const HEADER: u32 = 1;
    /// Symbology state; payload is opaque.
    pub const SYMBOLOGY: u32 = 2;
    /// Reference to a geometry part: payload starts with the part's
    /// element id (u64 LE), followed by placement data.
    pub const PART_REFERENCE: u32 = 3;
    /// Text string: payload starts with the font id (u64 LE), followed by
    /// glyph data.
    pub const TEXT_STRING: u32 = 4;
    /// Inline geometric primitive; payload is opaque.
    pub const PRIMITIVE: u32 = 5;
}

const RECORD_HEADER_LEN: usize = 8;
const ID_LEN: usize = 8;

/// Error raised by a malformed geometry stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeomStreamError {
    /// A record header or payload extends past the end of the blob.
    #[error("truncated geometry record at byte {offset}")]
    Truncated {
        /// Byte offset of the offending record header.
        offset: usize,
    },
    /// An id-bearing record's payload is too short to hold the id.
    #[error("geometry record at byte {offset} too short for embedded id")]
    ShortIdPayload {
        /// Byte offset of the offending record header.
        offset: usize,
    },
}

/// One decoded record: its opcode and a borrowed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeomRecord<'a> {
    /// Record opcode.
    pub opcode: u32,
    /// Byte offset of the record header within the stream.
    pub offset: usize,
    /// Raw payload bytes.
    pub payload: &'a [u8],
}

/// Iterator over the records of a geometry stream.
#[derive(Debug, Clone)]
pub struct GeomRecordIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> GeomRecordIter<'a> {
    /// Iterate the records of `data`.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for GeomRecordIter<'a> {
    type Item = Result<GeomRecord<'a>, GeomStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        let rest = &self.data[offset..];
        if rest.len() < RECORD_HEADER_LEN {
            self.pos = self.data.len();
            return Some(Err(GeomStreamError::Truncated { offset }));
        }
        let op = u32::from_le_bytes(rest[0..4].try_into().expect("4-byte slice"));
        let len = u32::from_le_bytes(rest[4..8].try_into().expect("4-byte slice")) as usize;
        if rest.len() - RECORD_HEADER_LEN < len {
            self.pos = self.data.len();
            return Some(Err(GeomStreamError::Truncated { offset }));
        }
        self.pos = offset + RECORD_HEADER_LEN + len;
        Some(Ok(GeomRecord {
            opcode: op,
            offset,
            payload: &rest[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len],
        }))
    }
}

/// Append one record to `out`.
///
/// Used by writers that assemble streams (and by tests building fixtures).
pub fn write_record(out: &mut Vec<u8>, opcode: u32, payload: &[u8]) {
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(&u32::try_from(payload.len()).expect("payload fits u32").to_le_bytes());
    out.extend_from_slice(payload);
}

/// Rewrite the embedded ids of a geometry stream.
///
/// `map_element` is applied to the part id of every [`opcode::PART_REFERENCE`]
/// record; `map_font` to the font id of every [`opcode::TEXT_STRING`]
/// record. All other records are copied verbatim. The mapping functions
/// receive and return raw id values; policy (invalid for a missing element,
/// identity for a missing font) lives in the caller.
pub fn remap_stream(
    data: &[u8],
    mut map_element: impl FnMut(u64) -> u64,
    mut map_font: impl FnMut(u64) -> u64,
) -> Result<Vec<u8>, GeomStreamError> {
    let mut out = Vec::with_capacity(data.len());
    for record in GeomRecordIter::new(data) {
        let record = record?;
        match record.opcode {
            opcode::PART_REFERENCE | opcode::TEXT_STRING => {
                if record.payload.len() < ID_LEN {
                    return Err(GeomStreamError::ShortIdPayload {
                        offset: record.offset,
                    });
                }
                let id = u64::from_le_bytes(
                    record.payload[..ID_LEN].try_into().expect("8-byte slice"),
                );
                let mapped = if record.opcode == opcode::PART_REFERENCE {
                    map_element(id)
                } else {
                    map_font(id)
                };
                let mut payload = record.payload.to_vec();
                payload[..ID_LEN].copy_from_slice(&mapped.to_le_bytes());
                write_record(&mut out, record.opcode, &payload);
            }
            _ => write_record(&mut out, record.opcode, record.payload),
        }
    }
    Ok(out)
}
