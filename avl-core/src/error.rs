use thiserror::Error;

/// Main error type for AVL gateway operations
#[derive(Error, Debug)]
pub enum AvlError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    /// More bytes are needed before the current field can be read.
    #[error("Incomplete frame: {needed} more byte(s) needed")]
    Incomplete { needed: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reason a Codec 8 frame cannot be decoded, no matter how many more bytes arrive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedFrame {
    #[error("unsupported codec 0x{0:02X}")]
    UnsupportedCodec(u8),

    #[error("non-zero preamble 0x{0:08X}")]
    NonZeroPreamble(u32),

    #[error("declared data length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("record count mismatch: header says {declared}, trailer says {trailing}")]
    RecordCountMismatch { declared: u8, trailing: u8 },

    #[error("declared data length {declared} but records occupy {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("records run past the declared data length")]
    RecordOverrun,

    #[error("timestamp {0} ms is out of range")]
    InvalidTimestamp(u64),

    #[error("CRC mismatch: frame carries 0x{expected:04X}, computed 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// Result type alias for AVL gateway operations
pub type AvlResult<T> = Result<T, AvlError>;
