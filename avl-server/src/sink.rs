//! Downstream record sink
//!
//! Every decoded record is forwarded as one flat JSON object; a connection
//! that sends data which cannot be decoded is reported as
//! `{"DeviceID": .., "error": ..}`. Forwarding is best effort: failures are
//! reported to the caller, which logs them and moves on.

use async_trait::async_trait;
use avl_core::{AvlError, AvlRecord, AvlResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Timestamp format of the `T` field
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `error` text of the report sent when a device's data cannot be decoded
pub const NO_VALID_DATA: &str = "No valid data received";

/// JSON object sent downstream for one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkPayload {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    #[serde(rename = "T")]
    pub timestamp: String,
    #[serde(rename = "long")]
    pub longitude: f64,
    #[serde(rename = "lat")]
    pub latitude: f64,
    pub altitude: u16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    pub priority: u8,
    /// 1 when forwarded within 60 s of the record timestamp
    pub rtp: u8,
    #[serde(flatten)]
    pub io: BTreeMap<String, u64>,
}

impl SinkPayload {
    /// Build the payload for `record`, forwarded at `now`
    pub fn from_record(imei: &str, record: &AvlRecord, now: DateTime<Utc>) -> Self {
        Self {
            device_id: imei.to_string(),
            timestamp: record.timestamp_seconds().format(TIMESTAMP_FORMAT).to_string(),
            longitude: record.gps.longitude,
            latitude: record.gps.latitude,
            altitude: record.gps.altitude,
            angle: record.gps.angle,
            satellites: record.gps.satellites,
            speed: record.gps.speed,
            priority: record.priority,
            rtp: record.real_time_pass(now),
            io: record.io.clone(),
        }
    }
}

/// Report that a device sent data the gateway could not decode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub error: String,
}

impl ErrorReport {
    pub fn no_valid_data(imei: &str) -> Self {
        Self {
            device_id: imei.to_string(),
            error: NO_VALID_DATA.to_string(),
        }
    }
}

/// One JSON object sent downstream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SinkMessage {
    Record(SinkPayload),
    Error(ErrorReport),
}

impl SinkMessage {
    pub fn device_id(&self) -> &str {
        match self {
            SinkMessage::Record(payload) => &payload.device_id,
            SinkMessage::Error(report) => &report.device_id,
        }
    }
}

/// Destination for decoded records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver one message
    async fn forward(&self, message: &SinkMessage) -> AvlResult<()>;

    /// Short name for log lines
    fn name(&self) -> &'static str;
}

/// POSTs each payload as JSON to the downstream collector
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AvlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AvlError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RecordSink for HttpSink {
    async fn forward(&self, message: &SinkMessage) -> AvlResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| AvlError::SinkUnavailable(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AvlError::SinkUnavailable(format!(
                "POST {} returned {}: {}",
                self.url, status, body
            )));
        }

        log::debug!("[{}] Message accepted by {}", message.device_id(), self.url);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Logs each payload; used when no collector is configured
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn forward(&self, message: &SinkMessage) -> AvlResult<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| AvlError::InvalidData(format!("Failed to serialize payload: {}", e)))?;
        log::info!("[{}] {}", message.device_id(), json);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Hands messages to an in-process consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn forward(&self, message: &SinkMessage) -> AvlResult<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| AvlError::SinkUnavailable("Receiver dropped".to_string()))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
