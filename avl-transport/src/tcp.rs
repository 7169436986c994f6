//! TCP transport implementation

use crate::stream::StreamAccessor;
use async_trait::async_trait;
use avl_core::{AvlError, AvlResult};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// Idle timeout for a single read; `None` waits forever
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl TcpSettings {
    pub fn new(read_timeout: Option<Duration>, write_timeout: Option<Duration>) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(300)),
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Transport over an accepted device connection
///
/// Generic over the stream so the session logic can run against in-memory
/// streams in tests; production code uses the `TcpStream` default.
pub struct TcpTransport<S = TcpStream> {
    stream: Option<S>,
    settings: TcpSettings,
    closed: bool,
}

impl<S> fmt::Debug for TcpTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("settings", &self.settings)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S> TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a transport from an already-connected stream
    pub fn from_connected_stream(stream: S, settings: TcpSettings) -> Self {
        Self {
            stream: Some(stream),
            settings,
            closed: false,
        }
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn stream_mut(&mut self) -> AvlResult<&mut S> {
        self.stream.as_mut().ok_or_else(|| {
            AvlError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "TCP stream not connected",
            ))
        })
    }
}

#[async_trait]
impl<S> StreamAccessor for TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> AvlResult<()> {
        self.settings.read_timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> AvlResult<usize> {
        let timeout = self.settings.read_timeout;
        let stream = self.stream_mut()?;

        let result = if let Some(timeout) = timeout {
            match tokio::time::timeout(timeout, stream.read(buf)).await {
                Ok(result) => result.map_err(AvlError::Connection),
                Err(_) => Err(AvlError::Timeout),
            }
        } else {
            stream.read(buf).await.map_err(AvlError::Connection)
        };

        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(AvlError::Timeout) => Err(AvlError::Timeout),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> AvlResult<usize> {
        let timeout = self.settings.write_timeout;
        let stream = self.stream_mut()?;

        if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| AvlError::Timeout)?
                .map_err(AvlError::Connection)
        } else {
            stream.write(buf).await.map_err(AvlError::Connection)
        }
    }

    async fn flush(&mut self) -> AvlResult<()> {
        let stream = self.stream_mut()?;
        stream.flush().await.map_err(AvlError::Connection)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> AvlResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}
