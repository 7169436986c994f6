//! Server configuration

use avl_codec::codec8::DEFAULT_MAX_DATA_LENGTH;
use avl_core::{AvlError, AvlResult};
use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default listen port for device connections
pub const DEFAULT_PORT: u16 = 9025;

/// Gateway server configuration
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes. Durations are given in seconds under `*_secs` keys; an idle
/// timeout of 0 disables it.
///
/// ```toml
/// listen_address = "0.0.0.0:9025"
/// sink_url = "http://collector.local:8000/receive-data"
/// idle_timeout_secs = 600
/// history_limit = 500
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to accept device connections on
    pub listen_address: SocketAddr,
    /// Downstream collector; records are only logged when unset
    pub sink_url: Option<String>,
    /// Upper bound on a single forward to the sink
    #[serde(rename = "sink_timeout_secs", deserialize_with = "seconds")]
    pub sink_timeout: Duration,
    /// Records waiting to be forwarded, per connection
    pub sink_queue_capacity: usize,
    /// Connections idle longer than this are closed
    #[serde(rename = "idle_timeout_secs", deserialize_with = "optional_seconds")]
    pub idle_timeout: Option<Duration>,
    /// Time allowed for the IMEI handshake to arrive
    #[serde(rename = "handshake_timeout_secs", deserialize_with = "seconds")]
    pub handshake_timeout: Duration,
    #[serde(rename = "write_timeout_secs", deserialize_with = "seconds")]
    pub write_timeout: Duration,
    /// Size of a single socket read
    pub read_buffer_size: usize,
    /// Largest accepted Codec 8 data length
    pub max_frame_length: usize,
    /// Check the frame CRC; a mismatch is malformed and closes the
    /// connection. Devices that leave the CRC field zeroed need this off.
    pub verify_crc: bool,
    /// Records kept per IMEI in the registry; `None` keeps everything
    pub history_limit: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            sink_url: None,
            sink_timeout: Duration::from_secs(10),
            sink_queue_capacity: 256,
            idle_timeout: Some(Duration::from_secs(300)),
            handshake_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            read_buffer_size: 4096,
            max_frame_length: DEFAULT_MAX_DATA_LENGTH,
            verify_crc: true,
            history_limit: Some(1024),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> AvlResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AvlError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> AvlResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AvlError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    pub fn with_sink_url(mut self, url: impl Into<String>) -> Self {
        self.sink_url = Some(url.into());
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_crc_verification(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }

    /// Check values that would make the server unusable
    pub fn validate(&self) -> AvlResult<()> {
        if self.read_buffer_size == 0 {
            return Err(AvlError::Config("read_buffer_size must be positive".into()));
        }
        if self.sink_queue_capacity == 0 {
            return Err(AvlError::Config("sink_queue_capacity must be positive".into()));
        }
        if self.sink_timeout.is_zero() {
            return Err(AvlError::Config("sink_timeout_secs must be positive".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(AvlError::Config("handshake_timeout_secs must be positive".into()));
        }
        if let Some(url) = &self.sink_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AvlError::Config(format!("sink_url must be http(s): {}", url)));
            }
        }
        Ok(())
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Duration::from_secs(u64::deserialize(deserializer)?))
}

fn optional_seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address.port(), DEFAULT_PORT);
        assert!(config.sink_url.is_none());
        assert!(config.verify_crc);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            listen_address = "127.0.0.1:5000"
            sink_url = "http://localhost:8000/receive-data"
            idle_timeout_secs = 0
            sink_timeout_secs = 3
            history_limit = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(
            config.sink_url.as_deref(),
            Some("http://localhost:8000/receive-data")
        );
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.sink_timeout, Duration::from_secs(3));
        assert_eq!(config.history_limit, Some(10));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_invalid_values() {
        assert!(ServerConfig::from_toml_str("read_buffer_size = 0").is_err());
        assert!(ServerConfig::from_toml_str("sink_url = \"ftp://x\"").is_err());
        assert!(ServerConfig::from_toml_str("unknown_key = 1").is_err());
    }
}
