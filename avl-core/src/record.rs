//! AVL record and packet model

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use std::collections::BTreeMap;

/// Bytes before the IO section: 8 timestamp + 1 priority + 15 GPS
pub const RECORD_HEADER_LENGTH: usize = 24;

/// Event IO id, total IO count and one count byte per IO group
pub const IO_SECTION_OVERHEAD: usize = 2 + IO_VALUE_WIDTHS.len();

/// Value widths of the four IO groups, in wire order
pub const IO_VALUE_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Seconds after the record timestamp during which forwarding counts as real time
pub const RTP_WINDOW: i64 = 60;

/// GPS element of a record
///
/// Coordinates are decoded from two's-complement fixed point with a scale of
/// 1e-7 degrees, so southern latitudes and western longitudes are negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsElement {
    pub longitude: f64,
    pub latitude: f64,
    /// Meters above sea level
    pub altitude: u16,
    /// Heading in degrees from north
    pub angle: u16,
    pub satellites: u8,
    /// km/h
    pub speed: u16,
}

impl GpsElement {
    /// Wire scale of the coordinate fields
    pub const COORDINATE_SCALE: f64 = 10_000_000.0;

    /// Convert a raw fixed-point coordinate to degrees
    pub fn coordinate_from_raw(raw: i32) -> f64 {
        raw as f64 / Self::COORDINATE_SCALE
    }

    /// Convert degrees to the raw fixed-point coordinate
    pub fn coordinate_to_raw(degrees: f64) -> i32 {
        (degrees * Self::COORDINATE_SCALE).round() as i32
    }
}

/// One decoded telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct AvlRecord {
    pub timestamp: DateTime<Utc>,
    /// 0 = low, 1 = high, 2 = panic
    pub priority: u8,
    pub gps: GpsElement,
    /// IO id whose change triggered the record (0 for periodic records)
    pub event_io_id: u8,
    /// Total IO count as announced by the device
    pub total_io_count: u8,
    /// IO values keyed by property name; later groups overwrite earlier ones
    pub io: BTreeMap<String, u64>,
    /// Bytes this record occupied in the frame
    pub bytes_consumed: usize,
}

impl AvlRecord {
    /// Wire length of a record given the entry count of each IO group
    pub fn encoded_length(group_counts: [usize; 4]) -> usize {
        let io_entries: usize = group_counts
            .iter()
            .zip(IO_VALUE_WIDTHS.iter())
            .map(|(count, width)| count * (1 + width))
            .sum();
        RECORD_HEADER_LENGTH + IO_SECTION_OVERHEAD + io_entries
    }

    /// Timestamp with the sub-second part dropped
    pub fn timestamp_seconds(&self) -> DateTime<Utc> {
        truncate_to_seconds(self.timestamp)
    }

    /// `1` when `now` is at most [`RTP_WINDOW`] seconds after the record, else `0`
    pub fn real_time_pass(&self, now: DateTime<Utc>) -> u8 {
        real_time_pass(self.timestamp, now)
    }
}

/// Real-time pass flag for a record timestamp
///
/// The timestamp is compared at whole-second precision and the window is
/// inclusive: a record exactly 60 s old still counts.
pub fn real_time_pass(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let elapsed = now.signed_duration_since(truncate_to_seconds(timestamp));
    if elapsed <= TimeDelta::seconds(RTP_WINDOW) { 1 } else { 0 }
}

fn truncate_to_seconds(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

/// One decoded Codec 8 frame
#[derive(Debug, Clone, PartialEq)]
pub struct AvlPacket {
    pub codec_id: u8,
    pub declared_record_count: u8,
    pub records: Vec<AvlRecord>,
    pub trailing_record_count: u8,
    /// CRC field as carried on the wire
    pub crc: u32,
    /// Bytes of the input buffer this frame occupied, CRC included
    pub total_bytes_consumed: usize,
}

impl AvlPacket {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
