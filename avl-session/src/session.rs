//! Per-connection device session

use crate::registry::SharedDevice;
use crate::statistics::SessionStatistics;
use avl_codec::{Codec8Decoder, DecodeResult};
use avl_core::{AvlPacket, AvlRecord, MalformedFrame};
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// A malformed frame, along with the packets decoded before it in the same call
#[derive(Error, Debug)]
#[error("{reason} (after {} decoded packet(s))", .decoded.len())]
pub struct FeedError {
    pub decoded: Vec<AvlPacket>,
    pub reason: MalformedFrame,
}

/// State of one accepted connection
///
/// Created when the IMEI handshake succeeds and dropped when the socket
/// closes. Bytes that do not yet form a full frame wait in the pending
/// buffer; decoded records go to the device's registry entry.
#[derive(Debug)]
pub struct DeviceSession {
    imei: String,
    pending: BytesMut,
    device: SharedDevice,
    generation: u64,
    decoder: Codec8Decoder,
    statistics: SessionStatistics,
}

impl DeviceSession {
    pub(crate) fn new(
        imei: String,
        device: SharedDevice,
        generation: u64,
        decoder: Codec8Decoder,
    ) -> Self {
        Self {
            imei,
            pending: BytesMut::new(),
            device,
            generation,
            decoder,
            statistics: SessionStatistics::new(),
        }
    }

    pub fn imei(&self) -> &str {
        &self.imei
    }

    /// Bytes received but not yet part of a decoded frame
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.statistics
    }

    pub fn statistics_mut(&mut self) -> &mut SessionStatistics {
        &mut self.statistics
    }

    /// Append `bytes` to the pending buffer and decode every full frame
    ///
    /// Stops at the first incomplete frame, which stays buffered for the next
    /// call. A malformed frame discards the buffer and is returned together
    /// with the packets decoded before it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<AvlPacket>, FeedError> {
        self.pending.extend_from_slice(bytes);
        self.statistics.add_bytes_received(bytes.len());

        let mut packets = Vec::new();
        while !self.pending.is_empty() {
            match self.decoder.decode(&self.pending) {
                DecodeResult::Complete(packet) => {
                    self.pending.advance(packet.total_bytes_consumed);
                    self.statistics
                        .increment_packets_decoded(packet.record_count());
                    log::debug!(
                        "[{}] Decoded packet with {} record(s), {} byte(s) pending",
                        self.imei,
                        packet.record_count(),
                        self.pending.len()
                    );
                    packets.push(packet);
                }
                DecodeResult::Incomplete => break,
                DecodeResult::Malformed(reason) => {
                    self.statistics.increment_malformed_frames();
                    self.pending.clear();
                    return Err(FeedError {
                        decoded: packets,
                        reason,
                    });
                }
            }
        }
        Ok(packets)
    }

    /// Append a record to the device's history
    pub async fn append(&self, record: AvlRecord) {
        self.device.lock().await.append(record);
    }

    /// Release this connection's claim on the device entry
    pub async fn detach(&self) {
        let current = self.device.lock().await.detach(self.generation);
        log::debug!(
            "[{}] Session detached (generation {}, current: {})",
            self.imei,
            self.generation,
            current
        );
    }
}
