//! Stream accessor trait for transport layer

use avl_core::{AvlError, AvlResult};
use async_trait::async_trait;
use std::time::Duration;

/// Stream accessor interface to the physical link of one device
#[async_trait]
pub trait StreamAccessor: Send {
    /// Set the read timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> AvlResult<()>;

    /// Read data from the stream
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if the peer closed the connection
    async fn read(&mut self, buf: &mut [u8]) -> AvlResult<usize>;

    /// Write data to the stream
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> AvlResult<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> AvlResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(AvlError::Connection(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> AvlResult<()>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream
    async fn close(&mut self) -> AvlResult<()>;
}
