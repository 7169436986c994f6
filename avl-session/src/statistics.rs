//! Per-connection statistics

/// Counters collected over the lifetime of one device connection
///
/// Logged when the connection closes; useful to spot devices that keep
/// sending corrupt frames or a downstream collector that drops records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Bytes read from the socket after the handshake
    pub bytes_received: u64,
    /// Frames decoded successfully
    pub packets_decoded: u64,
    /// Records decoded successfully
    pub records_decoded: u64,
    /// Frames rejected as malformed
    pub malformed_frames: u64,
    /// Acknowledgements written back to the device
    pub acks_sent: u64,
    /// Records the downstream sink failed to accept
    pub sink_failures: u64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_received(&mut self, count: usize) {
        self.bytes_received += count as u64;
    }

    pub fn increment_packets_decoded(&mut self, records: usize) {
        self.packets_decoded += 1;
        self.records_decoded += records as u64;
    }

    pub fn increment_malformed_frames(&mut self) {
        self.malformed_frames += 1;
    }

    pub fn increment_acks_sent(&mut self) {
        self.acks_sent += 1;
    }

    pub fn add_sink_failures(&mut self, count: u64) {
        self.sink_failures += count;
    }

    /// Percentage of decoded records the sink failed to accept
    pub fn sink_failure_rate(&self) -> f64 {
        if self.records_decoded == 0 {
            0.0
        } else {
            (self.sink_failures as f64 / self.records_decoded as f64) * 100.0
        }
    }
}
