//! Codec 8 wire constants

/// Codec identifier of Codec 8
pub const CODEC_8_ID: u8 = 0x08;

/// Length of the all-zero preamble
pub const PREAMBLE_LENGTH: usize = 4;

/// Preamble plus the 4-byte data length field
pub const FRAME_HEADER_LENGTH: usize = PREAMBLE_LENGTH + 4;

/// CRC field following the data section
pub const CRC_FIELD_LENGTH: usize = 4;

/// Default cap on the declared data length
pub const DEFAULT_MAX_DATA_LENGTH: usize = 64 * 1024;

/// Largest IMEI accepted in a handshake
pub const MAX_IMEI_LENGTH: usize = 32;

/// Handshake acknowledgement bytes
pub const IMEI_ACCEPTED: u8 = 0x01;
pub const IMEI_REJECTED: u8 = 0x00;
