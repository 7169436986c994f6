//! Gateway listener
//!
//! Accepts device connections and hands each one to its own
//! [`ConnectionHandler`] task.

use crate::config::ServerConfig;
use crate::handler::ConnectionHandler;
use crate::sink::{HttpSink, LogSink, RecordSink};
use avl_codec::Codec8Decoder;
use avl_core::{AvlError, AvlResult};
use avl_session::SessionRegistry;
use avl_transport::{TcpSettings, TcpTransport};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Server listener for accepting device connections
///
/// Every accepted socket runs in a separate task, so a slow or stalled
/// device never holds up the others. All tasks share the device registry
/// and the downstream sink.
///
/// # Usage Example
/// ```rust,no_run
/// use avl_server::{ServerConfig, ServerListener};
///
/// # async fn run() -> avl_core::AvlResult<()> {
/// let config = ServerConfig::default().with_sink_url("http://127.0.0.1:8000/receive-data");
/// let listener = ServerListener::new(config)?;
/// listener.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServerListener {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn RecordSink>,
    decoder: Codec8Decoder,
}

impl ServerListener {
    /// Create a listener from a validated configuration
    ///
    /// Records go to an [`HttpSink`] when `sink_url` is set and to a
    /// [`LogSink`] otherwise.
    pub fn new(config: ServerConfig) -> AvlResult<Self> {
        config.validate()?;

        let sink: Arc<dyn RecordSink> = match &config.sink_url {
            Some(url) => Arc::new(HttpSink::new(url.clone(), config.sink_timeout)?),
            None => Arc::new(LogSink),
        };
        let decoder = Codec8Decoder::new()
            .with_max_data_length(config.max_frame_length)
            .with_crc_verification(config.verify_crc);
        let registry = Arc::new(SessionRegistry::with_history_limit(config.history_limit));

        Ok(Self {
            config: Arc::new(config),
            registry,
            sink,
            decoder,
        })
    }

    /// Replace the downstream sink
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Device registry shared by all connections
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> AvlResult<TcpListener> {
        let address = self.config.listen_address;
        TcpListener::bind(address).await.map_err(|e| {
            AvlError::Connection(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("Failed to bind to {}: {}", address, e),
            ))
        })
    }

    /// Bind and accept connections indefinitely
    pub async fn start(&self) -> AvlResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound socket indefinitely
    pub async fn serve(&self, listener: TcpListener) -> AvlResult<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Connections already accepted keep running in their own tasks.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> AvlResult<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr().map_err(AvlError::Connection)?;
        log::info!(
            "AVL gateway listening on {} (sink: {})",
            local,
            self.sink.name()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Listener on {} shutting down", local);
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.spawn_connection(stream, peer);
                    }
                    Err(e) => {
                        log::error!("Error accepting connection: {}", e);
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> JoinHandle<()> {
        log::info!("Accepted connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let settings = TcpSettings::new(
            Some(self.config.handshake_timeout),
            Some(self.config.write_timeout),
        );
        let handler = ConnectionHandler::new(
            TcpTransport::from_connected_stream(stream, settings),
            peer.to_string(),
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.decoder.clone(),
        );

        tokio::spawn(async move {
            match handler.run().await {
                Ok(()) => log::debug!("Connection from {} finished", peer),
                // Protocol failures are logged by the handler
                Err(AvlError::HandshakeRejected(_)) | Err(AvlError::Malformed(_)) => {}
                Err(e) => log::error!("Error handling connection from {}: {}", peer, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, ErrorReport, SinkMessage, SinkPayload};
    use avl_codec::{Codec8Encoder, RawRecord};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::oneshot;

    const SAMPLE_FRAME: &str = "000000000000003608010000016B40D8EA30010000000000000000000000000000000105021503010101425E0F01F10000601A014E0000000000000000010000C7CF";

    struct Running {
        address: SocketAddr,
        registry: Arc<SessionRegistry>,
        payloads: UnboundedReceiver<SinkMessage>,
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    async fn next_record(payloads: &mut UnboundedReceiver<SinkMessage>) -> SinkPayload {
        match payloads.recv().await {
            Some(SinkMessage::Record(payload)) => payload,
            other => panic!("expected a record, got {:?}", other),
        }
    }

    async fn spawn_server(config: ServerConfig) -> Running {
        let (sink, payloads) = ChannelSink::new();
        let server = ServerListener::new(config.with_listen_address("127.0.0.1:0".parse().unwrap()))
            .unwrap()
            .with_sink(Arc::new(sink));
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap();
        let registry = Arc::clone(server.registry());
        tokio::spawn(async move { server.serve(listener).await });
        Running {
            address,
            registry,
            payloads,
        }
    }

    async fn connect(address: SocketAddr, imei: &str) -> TcpStream {
        let mut client = TcpStream::connect(address).await.unwrap();
        client
            .write_all(&Codec8Encoder::encode_imei(imei).unwrap())
            .await
            .unwrap();
        assert_eq!(client.read_u8().await.unwrap(), 0x01);
        client
    }

    fn one_record_frame() -> Vec<u8> {
        Codec8Encoder::encode_frame(&[RawRecord::new(1_717_243_200_000)
            .with_priority(1)
            .with_position(10.1234567, -20.0)
            .with_motion(150, 90, 11, 42)
            .with_io(1, 239, 1)
            .with_io(2, 66, 12_650)])
        .unwrap()
    }

    #[tokio::test]
    async fn test_abc_handshake() {
        let running = spawn_server(ServerConfig::default()).await;
        let mut client = TcpStream::connect(running.address).await.unwrap();
        client.write_all(&[0x00, 0x03, b'A', b'B', b'C']).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), 0x01);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(running.registry.get("ABC").await.is_some());
    }

    #[tokio::test]
    async fn test_one_record_forwarded_and_acknowledged() {
        let mut running = spawn_server(ServerConfig::default()).await;
        let mut client = connect(running.address, "356307042441013").await;

        client.write_all(&one_record_frame()).await.unwrap();
        assert_eq!(client.read_u32().await.unwrap(), 1);

        let payload = next_record(&mut running.payloads).await;
        assert_eq!(payload.device_id, "356307042441013");
        assert_eq!(payload.timestamp, "2024-06-01 12:00:00");
        assert_eq!(payload.longitude, 10.1234567);
        assert_eq!(payload.latitude, -20.0);
        assert_eq!(payload.altitude, 150);
        assert_eq!(payload.angle, 90);
        assert_eq!(payload.satellites, 11);
        assert_eq!(payload.speed, 42);
        assert_eq!(payload.priority, 1);
        // Record is years old
        assert_eq!(payload.rtp, 0);
        assert_eq!(payload.io.get("Ignition"), Some(&1));
        assert_eq!(payload.io.get("External Voltage"), Some(&12_650));
    }

    #[tokio::test]
    async fn test_vendor_sample_frame() {
        let mut running = spawn_server(ServerConfig::default()).await;
        let mut client = connect(running.address, "356307042441013").await;

        client.write_all(&hex(SAMPLE_FRAME)).await.unwrap();
        assert_eq!(client.read_u32().await.unwrap(), 1);

        let payload = next_record(&mut running.payloads).await;
        assert_eq!(payload.timestamp, "2019-06-10 10:04:46");
        assert_eq!(payload.longitude, 0.0);
        assert_eq!(payload.latitude, 0.0);
        assert_eq!(payload.io.get("GSM Signal"), Some(&3));
        assert_eq!(payload.io.get("Digital Input 1"), Some(&1));
        assert_eq!(payload.io.get("External Voltage"), Some(&24_079));
        assert_eq!(payload.io.get("Active GSM Operator"), Some(&24_602));
        assert_eq!(payload.io.get("iButton"), Some(&0));
    }

    #[tokio::test]
    async fn test_unsupported_codec_closes_connection() {
        let mut running = spawn_server(ServerConfig::default()).await;
        let mut client = connect(running.address, "356307042441013").await;

        let mut frame = one_record_frame();
        frame[8] = 0x0C;
        client.write_all(&frame).await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            running.payloads.recv().await.unwrap(),
            SinkMessage::Error(ErrorReport::no_valid_data("356307042441013"))
        );
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let mut running = spawn_server(ServerConfig::default()).await;
        let mut client = connect(running.address, "356307042441013").await;

        let frame = one_record_frame();
        for chunk in frame.chunks(7) {
            client.write_all(chunk).await.unwrap();
            client.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.read_u32().await.unwrap(), 1);
        assert_eq!(next_record(&mut running.payloads).await.speed, 42);
    }

    #[tokio::test]
    async fn test_bad_handshake_rejected() {
        let running = spawn_server(ServerConfig::default()).await;
        let mut client = TcpStream::connect(running.address).await.unwrap();
        client.write_all(&[0x00, 0x03, b'A', 0x00, b'C']).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), 0x00);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(running.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_others() {
        let mut running = spawn_server(ServerConfig::default()).await;

        // First device stops half way through a frame
        let mut stalled = connect(running.address, "111111111111111").await;
        let frame = one_record_frame();
        stalled.write_all(&frame[..frame.len() / 2]).await.unwrap();

        let mut active = connect(running.address, "222222222222222").await;
        active.write_all(&frame).await.unwrap();
        assert_eq!(active.read_u32().await.unwrap(), 1);
        assert_eq!(
            next_record(&mut running.payloads).await.device_id,
            "222222222222222"
        );

        stalled.write_all(&frame[frame.len() / 2..]).await.unwrap();
        assert_eq!(stalled.read_u32().await.unwrap(), 1);
        assert_eq!(
            next_record(&mut running.payloads).await.device_id,
            "111111111111111"
        );
    }

    #[tokio::test]
    async fn test_history_survives_reconnect() {
        let running = spawn_server(ServerConfig::default()).await;
        let imei = "356307042441013";

        for _ in 0..2 {
            let mut client = connect(running.address, imei).await;
            client.write_all(&one_record_frame()).await.unwrap();
            assert_eq!(client.read_u32().await.unwrap(), 1);
        }

        let device = running.registry.get(imei).await.unwrap();
        let device = device.lock().await;
        assert_eq!(device.history().len(), 2);
        assert_eq!(device.connections(), 2);
        assert_eq!(running.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = ServerListener::new(
            ServerConfig::default().with_listen_address("127.0.0.1:0".parse().unwrap()),
        )
        .unwrap();
        let listener = server.bind().await.unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve_with_shutdown(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_http_sink_selected_from_config() {
        let server = ServerListener::new(
            ServerConfig::default().with_sink_url("http://127.0.0.1:8000/receive-data"),
        )
        .unwrap();
        assert_eq!(server.sink.name(), "http");

        let server = ServerListener::new(ServerConfig::default()).unwrap();
        assert_eq!(server.sink.name(), "log");
    }
}
