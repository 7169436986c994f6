//! CRC-16/IBM checksum carried at the end of every Codec 8 frame

use once_cell::sync::Lazy;

const INITIAL_CRC: u16 = 0x0000;
const KEY: u16 = 0xA001; // Bit-reversed 0x8005

static CRC_TABLE: Lazy<[u16; 256]> = Lazy::new(|| {
    let mut table = [0u16; 256];
    for b in 0..=0xFFu16 {
        let mut v = b;
        for _ in 0..8 {
            if (v & 1) == 1 {
                v = (v >> 1) ^ KEY;
            } else {
                v >>= 1;
            }
        }
        table[b as usize] = v;
    }
    table
});

/// CRC-16/IBM calculator (reflected, init 0, no final xor)
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { value: INITIAL_CRC }
    }

    pub fn update(&mut self, data: u8) {
        self.value = (self.value >> 8) ^ CRC_TABLE[((self.value ^ data as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// One-shot checksum of a slice
    pub fn checksum(data: &[u8]) -> u16 {
        let mut crc = Self::new();
        crc.update_bytes(data);
        crc.value()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(Crc16::checksum(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut crc = Crc16::new();
        crc.update_bytes(b"1234");
        crc.update_bytes(b"56789");
        assert_eq!(crc.value(), Crc16::checksum(b"123456789"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(Crc16::checksum(&[]), INITIAL_CRC);
    }
}
