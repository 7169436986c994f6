//! Codec 8 frame encoder
//!
//! Produces byte-exact frames and IMEI handshakes, for tests and device
//! simulators.

use crate::codec8::types::*;
use crate::crc16::Crc16;
use avl_core::record::IO_VALUE_WIDTHS;
use avl_core::{AvlError, AvlResult, GpsElement};

/// Record in wire terms: raw ids and fixed-point coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub timestamp_ms: u64,
    pub priority: u8,
    pub longitude: i32,
    pub latitude: i32,
    pub altitude: u16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    pub event_io_id: u8,
    pub io: Vec<RawIoElement>,
}

/// IO entry with its value width in bytes (1, 2, 4 or 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawIoElement {
    pub width: usize,
    pub id: u8,
    pub value: u64,
}

impl RawRecord {
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the position in degrees
    pub fn with_position(mut self, longitude: f64, latitude: f64) -> Self {
        self.longitude = GpsElement::coordinate_to_raw(longitude);
        self.latitude = GpsElement::coordinate_to_raw(latitude);
        self
    }

    pub fn with_motion(mut self, altitude: u16, angle: u16, satellites: u8, speed: u16) -> Self {
        self.altitude = altitude;
        self.angle = angle;
        self.satellites = satellites;
        self.speed = speed;
        self
    }

    pub fn with_event_io(mut self, id: u8) -> Self {
        self.event_io_id = id;
        self
    }

    /// Add an IO entry to the group of the given byte width
    ///
    /// An unsupported width is reported by the encoder, not here.
    pub fn with_io(mut self, width: usize, id: u8, value: u64) -> Self {
        self.io.push(RawIoElement { width, id, value });
        self
    }

    /// Entry count of each IO group
    pub fn group_counts(&self) -> [usize; 4] {
        IO_VALUE_WIDTHS.map(|width| self.io.iter().filter(|e| e.width == width).count())
    }
}

/// Codec 8 encoder
pub struct Codec8Encoder {
    buffer: Vec<u8>,
}

impl Codec8Encoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a complete frame: header, data section and CRC
    pub fn encode_frame(records: &[RawRecord]) -> AvlResult<Vec<u8>> {
        let count = u8::try_from(records.len()).map_err(|_| {
            AvlError::InvalidData(format!(
                "A Codec 8 frame holds at most 255 records, got {}",
                records.len()
            ))
        })?;

        let mut data = Self::new();
        data.encode_u8(CODEC_8_ID);
        data.encode_u8(count);
        for record in records {
            data.encode_record(record)?;
        }
        data.encode_u8(count);
        let data = data.into_bytes();

        let data_length = u32::try_from(data.len()).map_err(|_| {
            AvlError::InvalidData(format!("Data section too long: {} bytes", data.len()))
        })?;

        let mut frame = Self::with_capacity(FRAME_HEADER_LENGTH + data.len() + CRC_FIELD_LENGTH);
        frame.encode_u32(0);
        frame.encode_u32(data_length);
        frame.buffer.extend_from_slice(&data);
        frame.encode_u32(Crc16::checksum(&data) as u32);
        Ok(frame.into_bytes())
    }

    /// Encode an IMEI handshake: 2-byte length then ASCII digits
    pub fn encode_imei(imei: &str) -> AvlResult<Vec<u8>> {
        if !imei.is_ascii() || imei.is_empty() || imei.len() > MAX_IMEI_LENGTH {
            return Err(AvlError::InvalidData(format!("Invalid IMEI: {:?}", imei)));
        }
        let mut encoder = Self::with_capacity(2 + imei.len());
        encoder.encode_u16(imei.len() as u16);
        encoder.buffer.extend_from_slice(imei.as_bytes());
        Ok(encoder.into_bytes())
    }

    /// Encode one record into the buffer
    pub fn encode_record(&mut self, record: &RawRecord) -> AvlResult<()> {
        self.encode_u64(record.timestamp_ms);
        self.encode_u8(record.priority);
        self.encode_i32(record.longitude);
        self.encode_i32(record.latitude);
        self.encode_u16(record.altitude);
        self.encode_u16(record.angle);
        self.encode_u8(record.satellites);
        self.encode_u16(record.speed);
        self.encode_u8(record.event_io_id);

        if let Some(entry) = record.io.iter().find(|e| !IO_VALUE_WIDTHS.contains(&e.width)) {
            return Err(AvlError::InvalidData(format!(
                "IO element {} has unsupported width {}",
                entry.id, entry.width
            )));
        }
        let total = u8::try_from(record.io.len()).map_err(|_| {
            AvlError::InvalidData(format!("Too many IO elements: {}", record.io.len()))
        })?;
        self.encode_u8(total);

        for (width, count) in IO_VALUE_WIDTHS.into_iter().zip(record.group_counts()) {
            self.encode_u8(count as u8);
            for entry in record.io.iter().filter(|e| e.width == width) {
                self.encode_u8(entry.id);
                self.encode_uint(entry.value, width)?;
            }
        }
        Ok(())
    }

    pub fn encode_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn encode_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn encode_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn encode_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn encode_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Encode the low `width` bytes of `value`, big-endian
    pub fn encode_uint(&mut self, value: u64, width: usize) -> AvlResult<()> {
        if width == 0 || width > 8 {
            return Err(AvlError::InvalidData(format!(
                "Unsupported integer width: {}",
                width
            )));
        }
        if width < 8 && value >> (width * 8) != 0 {
            return Err(AvlError::InvalidData(format!(
                "Value {} does not fit in {} byte(s)",
                value, width
            )));
        }
        self.buffer.extend_from_slice(&value.to_be_bytes()[8 - width..]);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Codec8Encoder {
    fn default() -> Self {
        Self::new()
    }
}
