//! Codec 8 framing
//!
//! ```text
//! [4 preamble = 0][4 data length][data ...][4 CRC]
//! data = [codec id = 0x08][N][N records][N]
//! ```

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::{Codec8Decoder, DecodeResult};
pub use encoder::{Codec8Encoder, RawIoElement, RawRecord};
pub use types::*;
