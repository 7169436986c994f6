//! Ordered, best-effort delivery of one connection's records to the sink

use crate::sink::{ErrorReport, RecordSink, SinkMessage, SinkPayload};
use avl_core::{AvlError, AvlRecord, AvlResult};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Work queued for the sink
#[derive(Debug)]
enum Outbound {
    Record(AvlRecord),
    NoValidData,
}

/// Background task that drains one connection's records into the sink
///
/// Items are delivered one at a time in the order they were queued. The JSON
/// payload, including `rtp`, is built right before delivery. A failed or
/// timed-out delivery is logged and counted, never retried.
pub struct Forwarder {
    tx: mpsc::Sender<Outbound>,
    failures: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Forwarder {
    pub fn spawn(
        imei: impl Into<String>,
        sink: Arc<dyn RecordSink>,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let imei = imei.into();
        let (tx, mut rx) = mpsc::channel::<Outbound>(capacity.max(1));
        let failures = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&failures);

        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let message = match item {
                    Outbound::Record(record) => {
                        SinkMessage::Record(SinkPayload::from_record(&imei, &record, Utc::now()))
                    }
                    Outbound::NoValidData => SinkMessage::Error(ErrorReport::no_valid_data(&imei)),
                };
                let result = match tokio::time::timeout(timeout, sink.forward(&message)).await {
                    Ok(result) => result,
                    Err(_) => Err(AvlError::Timeout),
                };
                if let Err(e) = result {
                    counter.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[{}] Failed to forward to {} sink: {}", imei, sink.name(), e);
                }
            }
        });

        Self {
            tx,
            failures,
            task,
        }
    }

    /// Queue a record, waiting while the queue is full
    pub async fn submit(&self, record: AvlRecord) -> AvlResult<()> {
        self.send(Outbound::Record(record)).await
    }

    /// Queue a report that the device sent undecodable data
    pub async fn report_invalid_data(&self) -> AvlResult<()> {
        self.send(Outbound::NoValidData).await
    }

    async fn send(&self, item: Outbound) -> AvlResult<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| AvlError::SinkUnavailable("Forwarder task stopped".to_string()))
    }

    /// Drain the queue and stop the task, returning the failure count
    pub async fn finish(self) -> u64 {
        let Self { tx, failures, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            log::error!("Forwarder task aborted: {}", e);
        }
        failures.load(Ordering::Relaxed)
    }
}
