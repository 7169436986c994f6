//! IMEI handshake
//!
//! The first bytes of every connection are `[2-byte BE length][ASCII IMEI]`.
//! The server answers `0x01` to accept or `0x00` to reject.

use avl_codec::codec8::MAX_IMEI_LENGTH;

/// Outcome of parsing the head of a connection's first bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// A full handshake; `consumed` leading bytes belong to it
    Accepted { imei: String, consumed: usize },
    /// Not enough bytes yet
    Incomplete,
    /// The handshake can never be accepted
    Rejected(String),
}

/// Parse an IMEI handshake
///
/// Besides truncated framing and non-ASCII bytes, a length of 0, a length
/// above [`MAX_IMEI_LENGTH`], and ASCII space or control characters are
/// rejected too. A truncated handshake is `Incomplete`, not `Rejected`: the
/// caller keeps buffering until its handshake timeout expires.
pub fn parse_imei(buffer: &[u8]) -> Handshake {
    if buffer.len() < 2 {
        return Handshake::Incomplete;
    }

    let length = u16::from_be_bytes([buffer[0], buffer[1]]) as usize;
    if length == 0 {
        return Handshake::Rejected("Empty IMEI".to_string());
    }
    if length > MAX_IMEI_LENGTH {
        return Handshake::Rejected(format!(
            "IMEI length {} exceeds maximum {}",
            length, MAX_IMEI_LENGTH
        ));
    }

    let consumed = 2 + length;
    if buffer.len() < consumed {
        return Handshake::Incomplete;
    }

    let raw = &buffer[2..consumed];
    if !raw.iter().all(u8::is_ascii_graphic) {
        return Handshake::Rejected(format!("IMEI is not printable ASCII: {:02X?}", raw));
    }

    // All bytes are ASCII, so this is lossless
    let imei = String::from_utf8_lossy(raw).into_owned();
    Handshake::Accepted { imei, consumed }
}
