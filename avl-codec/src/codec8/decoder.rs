//! Codec 8 frame decoder

use crate::codec8::types::*;
use crate::crc16::Crc16;
use crate::reader::ByteReader;
use avl_core::record::IO_VALUE_WIDTHS;
use avl_core::{AvlError, AvlPacket, AvlRecord, GpsElement, IoElementRegistry, MalformedFrame};
use chrono::DateTime;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of decoding the head of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    /// The buffer starts with a full frame; drop `total_bytes_consumed` leading bytes
    Complete(AvlPacket),
    /// The buffer is a valid prefix; retry once more bytes are appended
    Incomplete,
    /// The frame can never be decoded, whatever follows
    Malformed(MalformedFrame),
}

/// Codec 8 decoder
///
/// Stateless apart from its settings, so one instance can be shared between
/// connections.
///
/// # Framing
/// The full frame (`8 + data length + 4` bytes) must be buffered before any
/// record is parsed. A short buffer is therefore always `Incomplete`, and a
/// read that runs past the declared data section of a fully buffered frame
/// is `Malformed`.
#[derive(Debug, Clone)]
pub struct Codec8Decoder {
    registry: Arc<IoElementRegistry>,
    max_data_length: usize,
    verify_crc: bool,
}

impl Codec8Decoder {
    /// Decoder with the standard IO registry and CRC verification on
    pub fn new() -> Self {
        Self {
            registry: IoElementRegistry::standard(),
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
            verify_crc: true,
        }
    }

    pub fn with_registry(mut self, registry: Arc<IoElementRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_data_length(mut self, max_data_length: usize) -> Self {
        self.max_data_length = max_data_length;
        self
    }

    pub fn with_crc_verification(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }

    pub fn registry(&self) -> &IoElementRegistry {
        &self.registry
    }

    /// Decode the frame at the head of `buffer`
    pub fn decode(&self, buffer: &[u8]) -> DecodeResult {
        if buffer.len() < FRAME_HEADER_LENGTH {
            return DecodeResult::Incomplete;
        }

        let mut header = ByteReader::new(&buffer[..FRAME_HEADER_LENGTH]);
        let (preamble, data_length) = match (header.read_u32(), header.read_u32()) {
            (Ok(preamble), Ok(length)) => (preamble, length as usize),
            _ => return DecodeResult::Incomplete,
        };

        if preamble != 0 {
            return DecodeResult::Malformed(MalformedFrame::NonZeroPreamble(preamble));
        }
        if data_length > self.max_data_length {
            return DecodeResult::Malformed(MalformedFrame::FrameTooLarge {
                declared: data_length,
                max: self.max_data_length,
            });
        }

        let data_end = FRAME_HEADER_LENGTH + data_length;
        let frame_length = data_end + CRC_FIELD_LENGTH;
        if buffer.len() < frame_length {
            return DecodeResult::Incomplete;
        }

        let data = &buffer[FRAME_HEADER_LENGTH..data_end];
        let (codec_id, declared_record_count, records, trailing_record_count) =
            match self.decode_data(data) {
                Ok(decoded) => decoded,
                Err(err) => return DecodeResult::Malformed(into_malformed(err)),
            };

        let crc_bytes = &buffer[data_end..frame_length];
        let crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if self.verify_crc {
            let expected = (crc & 0xFFFF) as u16;
            let actual = Crc16::checksum(data);
            if expected != actual {
                return DecodeResult::Malformed(MalformedFrame::CrcMismatch { expected, actual });
            }
        }

        log::trace!(
            "Decoded Codec 8 frame: {} record(s), {} byte(s)",
            records.len(),
            frame_length
        );

        DecodeResult::Complete(AvlPacket {
            codec_id,
            declared_record_count,
            records,
            trailing_record_count,
            crc,
            total_bytes_consumed: frame_length,
        })
    }

    /// Decode the data section: codec id, record count, records, trailing count
    fn decode_data(&self, data: &[u8]) -> Result<(u8, u8, Vec<AvlRecord>, u8), AvlError> {
        let mut reader = ByteReader::new(data);

        let codec_id = reader.read_u8()?;
        if codec_id != CODEC_8_ID {
            return Err(MalformedFrame::UnsupportedCodec(codec_id).into());
        }

        let declared = reader.read_u8()?;
        let mut records = Vec::with_capacity(declared as usize);
        for _ in 0..declared {
            records.push(self.decode_record(&mut reader)?);
        }

        let trailing = reader.read_u8()?;
        if trailing != declared {
            return Err(MalformedFrame::RecordCountMismatch { declared, trailing }.into());
        }
        if !reader.is_empty() {
            return Err(MalformedFrame::LengthMismatch {
                declared: data.len(),
                consumed: reader.position(),
            }
            .into());
        }

        Ok((codec_id, declared, records, trailing))
    }

    fn decode_record(&self, reader: &mut ByteReader<'_>) -> Result<AvlRecord, AvlError> {
        let start = reader.position();

        let millis = reader.read_u64()?;
        let timestamp = i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(MalformedFrame::InvalidTimestamp(millis))?;
        let priority = reader.read_u8()?;

        let gps = GpsElement {
            longitude: GpsElement::coordinate_from_raw(reader.read_i32()?),
            latitude: GpsElement::coordinate_from_raw(reader.read_i32()?),
            altitude: reader.read_u16()?,
            angle: reader.read_u16()?,
            satellites: reader.read_u8()?,
            speed: reader.read_u16()?,
        };

        let event_io_id = reader.read_u8()?;
        let total_io_count = reader.read_u8()?;

        let mut io = BTreeMap::new();
        for width in IO_VALUE_WIDTHS {
            let count = reader.read_u8()?;
            for _ in 0..count {
                let id = reader.read_u8()?;
                let value = reader.read_uint(width)?;
                io.insert(self.registry.name_for(id).into_owned(), value);
            }
        }

        Ok(AvlRecord {
            timestamp,
            priority,
            gps,
            event_io_id,
            total_io_count,
            io,
            bytes_consumed: reader.position() - start,
        })
    }
}

impl Default for Codec8Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Inside a fully buffered frame, running out of bytes means the length field lied
fn into_malformed(err: AvlError) -> MalformedFrame {
    match err {
        AvlError::Malformed(reason) => reason,
        _ => MalformedFrame::RecordOverrun,
    }
}
