//! Per-connection protocol handler
//!
//! Drives one device connection through `AwaitingImei -> Active -> Closed`:
//! accepts or rejects the IMEI handshake, then reads, decodes, forwards and
//! acknowledges AVL frames until the device disconnects, goes idle or sends
//! a frame that can never be decoded.

use crate::config::ServerConfig;
use crate::forward::Forwarder;
use crate::sink::RecordSink;
use avl_codec::Codec8Decoder;
use avl_codec::codec8::{IMEI_ACCEPTED, IMEI_REJECTED};
use avl_core::{AvlError, AvlPacket, AvlResult};
use avl_session::{
    ConnectionState, DeviceSession, FeedError, Handshake, SessionRegistry, parse_imei,
};
use avl_transport::StreamAccessor;
use std::sync::Arc;
use tokio::time::Instant;

/// Handles a single device connection
pub struct ConnectionHandler<T> {
    transport: T,
    peer: String,
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn RecordSink>,
    decoder: Codec8Decoder,
    state: ConnectionState,
}

impl<T: StreamAccessor> ConnectionHandler<T> {
    pub fn new(
        transport: T,
        peer: impl Into<String>,
        config: Arc<ServerConfig>,
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn RecordSink>,
        decoder: Codec8Decoder,
    ) -> Self {
        Self {
            transport,
            peer: peer.into(),
            config,
            registry,
            sink,
            decoder,
            state: ConnectionState::AwaitingImei,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion
    ///
    /// Returns `Ok` when the device disconnects or idles out, and an error
    /// when the handshake is rejected, a frame is malformed or the socket
    /// fails. The transport is closed in every case, before any records
    /// still queued for the sink are drained.
    pub async fn run(mut self) -> AvlResult<()> {
        match self.handshake().await {
            Ok(Some((imei, leftover))) => self.serve(&imei, &leftover).await,
            Ok(None) => {
                self.close().await;
                Ok(())
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Wait for `[len][IMEI]`, accumulating reads until the handshake timeout
    ///
    /// Returns the IMEI and any bytes that followed the handshake, or `None`
    /// when the peer closed without sending anything.
    async fn handshake(&mut self) -> AvlResult<Option<(String, Vec<u8>)>> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; self.config.read_buffer_size];

        loop {
            match parse_imei(&buffer) {
                Handshake::Accepted { imei, consumed } => {
                    self.transport.write_all(&[IMEI_ACCEPTED]).await?;
                    self.transport.flush().await?;
                    self.state.transition(ConnectionState::Active)?;
                    log::info!("[{}] IMEI accepted from {}", imei, self.peer);
                    return Ok(Some((imei, buffer.split_off(consumed))));
                }
                Handshake::Rejected(reason) => return Err(self.reject(reason).await),
                Handshake::Incomplete => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.reject("Handshake timed out".to_string()).await);
            }
            self.transport.set_timeout(Some(remaining)).await?;

            let n = match self.transport.read(&mut chunk).await {
                Ok(n) => n,
                Err(AvlError::Timeout) => {
                    return Err(self.reject("Handshake timed out".to_string()).await);
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                if buffer.is_empty() {
                    log::debug!("{} closed before sending a handshake", self.peer);
                    return Ok(None);
                }
                return Err(self
                    .reject(format!("Connection closed after {} handshake byte(s)", buffer.len()))
                    .await);
            }
            log::trace!("{} handshake bytes: {:02X?}", self.peer, &chunk[..n]);
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send the reject byte and build the error to return
    async fn reject(&mut self, reason: String) -> AvlError {
        log::warn!("Rejecting handshake from {}: {}", self.peer, reason);
        if let Err(e) = self.transport.write_all(&[IMEI_REJECTED]).await {
            log::debug!("Failed to send reject byte to {}: {}", self.peer, e);
        } else if let Err(e) = self.transport.flush().await {
            log::debug!("Failed to flush reject byte to {}: {}", self.peer, e);
        }
        AvlError::HandshakeRejected(reason)
    }

    /// Active phase: decode, forward and acknowledge until the connection ends
    async fn serve(&mut self, imei: &str, leftover: &[u8]) -> AvlResult<()> {
        let mut session = self
            .registry
            .open_session(imei, self.decoder.clone())
            .await;
        let forwarder = Forwarder::spawn(
            imei,
            Arc::clone(&self.sink),
            self.config.sink_queue_capacity,
            self.config.sink_timeout,
        );

        let result = self.receive_loop(&mut session, &forwarder, leftover).await;

        // The device is released first; the sink may still take a while
        self.close().await;
        session.detach().await;

        let failures = forwarder.finish().await;
        session.statistics_mut().add_sink_failures(failures);
        let statistics = session.statistics();
        log::info!(
            "[{}] Connection from {} closed: {} byte(s), {} packet(s), {} record(s), {} ack(s), {} malformed, {} sink failure(s) ({:.1}%)",
            imei,
            self.peer,
            statistics.bytes_received,
            statistics.packets_decoded,
            statistics.records_decoded,
            statistics.acks_sent,
            statistics.malformed_frames,
            statistics.sink_failures,
            statistics.sink_failure_rate()
        );
        result
    }

    async fn receive_loop(
        &mut self,
        session: &mut DeviceSession,
        forwarder: &Forwarder,
        leftover: &[u8],
    ) -> AvlResult<()> {
        if !leftover.is_empty() {
            self.process(session, forwarder, leftover).await?;
        }

        self.transport.set_timeout(self.config.idle_timeout).await?;
        let mut chunk = vec![0u8; self.config.read_buffer_size];
        loop {
            let n = match self.transport.read(&mut chunk).await {
                Ok(0) => {
                    log::debug!(
                        "[{}] Device closed the connection, {} byte(s) left undecoded",
                        session.imei(),
                        session.pending().len()
                    );
                    return Ok(());
                }
                Ok(n) => n,
                Err(AvlError::Timeout) => {
                    log::info!("[{}] Idle timeout, closing connection", session.imei());
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            log::trace!("[{}] Received {} byte(s): {:02X?}", session.imei(), n, &chunk[..n]);
            self.process(session, forwarder, &chunk[..n]).await?;
        }
    }

    /// Feed one read into the session and answer it
    async fn process(
        &mut self,
        session: &mut DeviceSession,
        forwarder: &Forwarder,
        bytes: &[u8],
    ) -> AvlResult<()> {
        match session.feed(bytes) {
            Ok(packets) => self.dispatch(session, forwarder, packets).await,
            Err(FeedError { decoded, reason }) => {
                self.dispatch(session, forwarder, decoded).await?;
                log::warn!(
                    "[{}] Malformed frame from {}: {}",
                    session.imei(),
                    self.peer,
                    reason
                );
                if let Err(e) = forwarder.report_invalid_data().await {
                    log::error!("[{}] Error report dropped: {}", session.imei(), e);
                }
                Err(AvlError::Malformed(reason))
            }
        }
    }

    /// Store and forward every record, then acknowledge the record count
    ///
    /// Nothing is written when no packet completed.
    async fn dispatch(
        &mut self,
        session: &mut DeviceSession,
        forwarder: &Forwarder,
        packets: Vec<AvlPacket>,
    ) -> AvlResult<()> {
        if packets.is_empty() {
            return Ok(());
        }

        let mut count: u32 = 0;
        for packet in packets {
            for record in packet.records {
                session.append(record.clone()).await;
                if let Err(e) = forwarder.submit(record).await {
                    log::error!("[{}] Record dropped: {}", session.imei(), e);
                }
                count += 1;
            }
        }

        self.transport.write_all(&count.to_be_bytes()).await?;
        self.transport.flush().await?;
        session.statistics_mut().increment_acks_sent();
        log::debug!("[{}] Acknowledged {} record(s)", session.imei(), count);
        Ok(())
    }

    async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        log::debug!("{}: {} -> Closed", self.peer, self.state.as_str());
        if let Err(e) = self.state.transition(ConnectionState::Closed) {
            log::error!("{}: {}", self.peer, e);
        }
        if let Err(e) = self.transport.close().await {
            log::debug!("Failed to close connection to {}: {}", self.peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, ErrorReport, SinkMessage, SinkPayload};
    use async_trait::async_trait;
    use avl_codec::{Codec8Encoder, RawRecord};
    use avl_core::MalformedFrame;
    use avl_transport::{TcpSettings, TcpTransport};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::task::JoinHandle;

    const IMEI: &str = "356307042441013";

    struct Harness {
        client: DuplexStream,
        registry: Arc<SessionRegistry>,
        payloads: UnboundedReceiver<SinkMessage>,
        task: JoinHandle<AvlResult<()>>,
    }

    /// Never completes a delivery
    struct StalledSink;

    #[async_trait]
    impl RecordSink for StalledSink {
        async fn forward(&self, _message: &SinkMessage) -> AvlResult<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn start(config: ServerConfig) -> Harness {
        let (sink, payloads) = ChannelSink::new();
        start_with_sink(config, Arc::new(sink), payloads)
    }

    fn start_with_sink(
        config: ServerConfig,
        sink: Arc<dyn RecordSink>,
        payloads: UnboundedReceiver<SinkMessage>,
    ) -> Harness {
        let (client, server) = duplex(64 * 1024);
        let transport = TcpTransport::from_connected_stream(
            server,
            TcpSettings::new(None, Some(Duration::from_secs(5))),
        );
        let registry = Arc::new(SessionRegistry::new());
        let handler = ConnectionHandler::new(
            transport,
            "test-peer",
            Arc::new(config),
            Arc::clone(&registry),
            sink,
            Codec8Decoder::new(),
        );
        Harness {
            client,
            registry,
            payloads,
            task: tokio::spawn(handler.run()),
        }
    }

    fn frame(records: usize) -> Vec<u8> {
        let records: Vec<RawRecord> = (0..records as u64)
            .map(|i| {
                RawRecord::new(1_700_000_000_000 + i * 1000)
                    .with_position(10.1234567, -20.0)
                    .with_io(1, 239, 1)
            })
            .collect();
        Codec8Encoder::encode_frame(&records).unwrap()
    }

    async fn next_record(payloads: &mut UnboundedReceiver<SinkMessage>) -> SinkPayload {
        match payloads.recv().await {
            Some(SinkMessage::Record(payload)) => payload,
            other => panic!("expected a record, got {:?}", other),
        }
    }

    async fn read_exact<const N: usize>(client: &mut DuplexStream) -> [u8; N] {
        let mut buf = [0u8; N];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_handshake_and_ack() {
        let mut h = start(ServerConfig::default());
        h.client
            .write_all(&Codec8Encoder::encode_imei(IMEI).unwrap())
            .await
            .unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);

        h.client.write_all(&frame(2)).await.unwrap();
        assert_eq!(read_exact::<4>(&mut h.client).await, [0, 0, 0, 2]);

        let first = next_record(&mut h.payloads).await;
        assert_eq!(first.device_id, IMEI);
        assert_eq!(first.longitude, 10.1234567);
        assert_eq!(first.latitude, -20.0);
        assert_eq!(first.io.get("Ignition"), Some(&1));

        drop(h.client);
        h.task.await.unwrap().unwrap();

        let device = h.registry.get(IMEI).await.unwrap();
        let device = device.lock().await;
        assert_eq!(device.history().len(), 2);
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_with_frame_in_same_write() {
        let mut h = start(ServerConfig::default());
        let mut bytes = Codec8Encoder::encode_imei(IMEI).unwrap();
        bytes.extend_from_slice(&frame(3));
        h.client.write_all(&bytes).await.unwrap();

        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);
        assert_eq!(read_exact::<4>(&mut h.client).await, [0, 0, 0, 3]);
    }

    #[tokio::test]
    async fn test_split_handshake() {
        let mut h = start(ServerConfig::default());
        h.client.write_all(&[0x00]).await.unwrap();
        tokio::task::yield_now().await;
        h.client.write_all(&[0x03, b'A']).await.unwrap();
        tokio::task::yield_now().await;
        h.client.write_all(b"BC").await.unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);

        drop(h.client);
        h.task.await.unwrap().unwrap();
        assert!(h.registry.get("ABC").await.is_some());
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let mut h = start(ServerConfig::default());
        h.client.write_all(&[0x00, 0x02, 0xFF, 0x01]).await.unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_REJECTED]);

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(AvlError::HandshakeRejected(_))));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_before_handshake() {
        let h = start(ServerConfig::default());
        drop(h.client);
        h.task.await.unwrap().unwrap();
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let config = ServerConfig::default().with_handshake_timeout(Duration::from_secs(5));
        let mut h = start(config);
        h.client.write_all(&[0x00, 0x0F, b'3']).await.unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_REJECTED]);
        assert!(matches!(
            h.task.await.unwrap(),
            Err(AvlError::HandshakeRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_frame_is_not_acknowledged() {
        let mut h = start(ServerConfig::default());
        h.client
            .write_all(&Codec8Encoder::encode_imei(IMEI).unwrap())
            .await
            .unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);

        let bytes = frame(1);
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        h.client.write_all(head).await.unwrap();
        tokio::task::yield_now().await;
        h.client.write_all(tail).await.unwrap();

        // Only one ack follows, covering the whole record
        assert_eq!(read_exact::<4>(&mut h.client).await, [0, 0, 0, 1]);
        drop(h.client);
        h.task.await.unwrap().unwrap();
        assert_eq!(next_record(&mut h.payloads).await.device_id, IMEI);
        assert!(h.payloads.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_codec_closes_without_ack() {
        let mut h = start(ServerConfig::default());
        h.client
            .write_all(&Codec8Encoder::encode_imei(IMEI).unwrap())
            .await
            .unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);

        let mut bytes = frame(1);
        bytes[8] = 0x0C;
        h.client.write_all(&bytes).await.unwrap();

        let mut rest = Vec::new();
        h.client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(matches!(
            h.task.await.unwrap(),
            Err(AvlError::Malformed(MalformedFrame::UnsupportedCodec(0x0C)))
        ));
        assert_eq!(
            h.payloads.recv().await.unwrap(),
            SinkMessage::Error(ErrorReport::no_valid_data(IMEI))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_does_not_hold_socket() {
        let (_unused, payloads) = ChannelSink::new();
        let config = ServerConfig::default().with_sink_timeout(Duration::from_secs(4));
        let mut h = start_with_sink(config, Arc::new(StalledSink), payloads);

        let mut bytes = Codec8Encoder::encode_imei(IMEI).unwrap();
        bytes.extend_from_slice(&frame(2));
        let mut bad = frame(1);
        bad[8] = 0x0C;
        bytes.extend_from_slice(&bad);

        let started = Instant::now();
        h.client.write_all(&bytes).await.unwrap();
        let mut rest = Vec::new();
        h.client.read_to_end(&mut rest).await.unwrap();

        assert_eq!(rest, vec![IMEI_ACCEPTED, 0, 0, 0, 2]);
        assert!(started.elapsed() < Duration::from_secs(4));
        // Both records and the error report time out in the background
        assert!(h.task.await.unwrap().is_err());
        assert!(started.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_good_frame_before_malformed_is_acknowledged() {
        let mut h = start(ServerConfig::default());
        let mut bytes = Codec8Encoder::encode_imei(IMEI).unwrap();
        bytes.extend_from_slice(&frame(2));
        let mut bad = frame(1);
        bad[8] = 0x0C;
        bytes.extend_from_slice(&bad);
        h.client.write_all(&bytes).await.unwrap();

        let mut rest = Vec::new();
        h.client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![IMEI_ACCEPTED, 0, 0, 0, 2]);
        assert!(h.task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_session() {
        let config = ServerConfig::default().with_idle_timeout(Some(Duration::from_secs(30)));
        let mut h = start(config);
        h.client
            .write_all(&Codec8Encoder::encode_imei(IMEI).unwrap())
            .await
            .unwrap();
        assert_eq!(read_exact::<1>(&mut h.client).await, [IMEI_ACCEPTED]);

        let mut rest = Vec::new();
        h.client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        h.task.await.unwrap().unwrap();
    }
}
