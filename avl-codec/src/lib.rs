//! Wire codec for the Teltonika AVL protocol
//!
//! The decoder is a pure function over a byte buffer: it never touches the
//! network and reports whether the buffer holds a complete frame, a valid
//! prefix of one, or data that can never become a frame.

pub mod codec8;
pub mod crc16;
pub mod reader;

pub use avl_core::{AvlError, AvlResult, MalformedFrame};
pub use codec8::{Codec8Decoder, Codec8Encoder, DecodeResult, RawIoElement, RawRecord};
pub use crc16::Crc16;
pub use reader::ByteReader;
