//! Big-endian cursor over a borrowed buffer

use avl_core::{AvlError, AvlResult};

/// Cursor that reads fixed-width big-endian fields
///
/// Every read checks the remaining length first; running out of bytes is an
/// [`AvlError::Incomplete`], never a panic.
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Bytes read so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> AvlResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(AvlError::Incomplete {
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> AvlResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> AvlResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> AvlResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> AvlResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> AvlResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> AvlResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read an unsigned big-endian value of 1 to 8 bytes
    pub fn read_uint(&mut self, width: usize) -> AvlResult<u64> {
        if width == 0 || width > 8 {
            return Err(AvlError::InvalidData(format!(
                "Unsupported integer width: {}",
                width
            )));
        }
        let bytes = self.read_bytes(width)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }
}
