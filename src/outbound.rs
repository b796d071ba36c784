//! Outbound multiplexer.
//!
//! The single writer to the broker. Replies produced by the inbound
//! dispatcher and requests produced by client calls are funneled through one
//! bounded queue into one task, which is the only code that ever calls
//! [`Transport::publish`](crate::Transport::publish). Publishes therefore
//! happen in one total order across both sources.
//!
//! Each publish is bounded by a timeout and raced against shutdown, so the
//! task only ever waits without limit for new work. A failed or slow publish
//! is logged and the item dropped. The affected call (if any) will time out
//! on its own; the loop keeps going.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::protocol::{RequestEnvelope, ResponseEnvelope};
use crate::rpc_config::DEFAULT_PUBLISH_TIMEOUT;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    CorrelationId,
    Result,
    RpcError,
    TransportPtr,
};

/// Work item for the outbound multiplexer.
#[derive(Debug, Clone)]
pub enum OutboundItem {
    /// Reply to a request this service served.
    Reply {
        to: Address,
        envelope: ResponseEnvelope,
    },
    /// Request issued by a local call.
    Request {
        to: Address,
        envelope: RequestEnvelope,
    },
}

impl OutboundItem {
    /// Queue the item is published to.
    pub fn destination(&self) -> &Address {
        match self {
            OutboundItem::Reply { to, .. } | OutboundItem::Request { to, .. } => to,
        }
    }

    /// Correlation ID carried by the envelope.
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            OutboundItem::Reply { envelope, .. } => &envelope.id,
            OutboundItem::Request { envelope, .. } => &envelope.id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            OutboundItem::Reply { .. } => "reply",
            OutboundItem::Request { .. } => "request",
        }
    }

    fn encode(&self) -> Result<Bytes> {
        match self {
            OutboundItem::Reply { envelope, .. } => envelope.encode(),
            OutboundItem::Request { envelope, .. } => envelope.encode(),
        }
    }
}

/// Producer handle for the outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundItem>,
}

impl OutboundSender {
    /// Enqueue, waiting for space when the queue is full.
    ///
    /// # Errors
    ///
    /// [`RpcError::Shutdown`] if the multiplexer has stopped.
    pub async fn send(&self, item: OutboundItem) -> Result<()> {
        self.tx.send(item).await.map_err(|_| RpcError::Shutdown)
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// [`RpcError::Backpressure`] when full, [`RpcError::Shutdown`] when stopped.
    pub fn try_send(&self, item: OutboundItem) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RpcError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => RpcError::Shutdown,
        })
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Totals reported when the multiplexer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundReport {
    pub published: u64,
    pub failed: u64,
}

/// The writer task's state.
pub struct OutboundMultiplexer {
    transport: TransportPtr,
    rx: mpsc::Receiver<OutboundItem>,
    shutdown: watch::Receiver<bool>,
    publish_timeout: Duration,
    report: OutboundReport,
}

impl OutboundMultiplexer {
    /// Create the bounded queue and the multiplexer draining it.
    pub fn new(
        transport: TransportPtr,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, OutboundSender) {
        // ---
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mux = Self {
            transport,
            rx,
            shutdown,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            report: OutboundReport::default(),
        };
        (mux, OutboundSender { tx })
    }

    /// Limit each broker publish to `timeout`; an item that takes longer is
    /// dropped.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> JoinHandle<OutboundReport> {
        tokio::spawn(self.run())
    }

    /// Publish items until every sender is dropped or shutdown is signalled.
    ///
    /// Dropping the shutdown sender counts as a signal. A publish in progress
    /// when the signal arrives is abandoned.
    pub async fn run(self) -> OutboundReport {
        // ---
        let Self {
            transport,
            mut rx,
            mut shutdown,
            publish_timeout,
            mut report,
        } = self;

        let transport_id = transport.transport_id().to_string();
        log_debug!("[{transport_id}] outbound multiplexer started");

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let sent = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    report.failed += 1;
                    log_warn!(
                        "[{transport_id}] shutdown while sending {} {}, dropped",
                        item.kind(),
                        item.correlation_id()
                    );
                    break;
                }
                sent = publish(&transport, &transport_id, &item, publish_timeout) => sent,
            };

            if sent {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        log_info!(
            "[{transport_id}] outbound multiplexer stopped: {} published, {} failed",
            report.published,
            report.failed
        );
        report
    }
}

/// Encode and publish one item within `limit`. Failures are logged.
async fn publish(
    transport: &TransportPtr,
    transport_id: &str,
    item: &OutboundItem,
    limit: Duration,
) -> bool {
    // ---
    let payload = match item.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            log_error!(
                "[{transport_id}] dropping {} {}: encode failed: {e}",
                item.kind(),
                item.correlation_id()
            );
            return false;
        }
    };

    match tokio::time::timeout(limit, transport.publish(item.destination(), payload)).await {
        Ok(Ok(())) => {
            log_debug!(
                "[{transport_id}] sent {} {} to {}",
                item.kind(),
                item.correlation_id(),
                item.destination()
            );
            true
        }
        Ok(Err(e)) => {
            log_error!(
                "[{transport_id}] dropping {} {} to {}: {e}",
                item.kind(),
                item.correlation_id(),
                item.destination()
            );
            false
        }
        Err(_) => {
            log_error!(
                "[{transport_id}] dropping {} {} to {}: publish took longer than {limit:?}",
                item.kind(),
                item.correlation_id(),
                item.destination()
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::protocol::MessageData;
    use crate::{create_memory_transport_with_hub, MemoryHub, SubscriptionHandle, Transport};
    use std::sync::{Arc, Mutex};

    fn request(to: &str) -> OutboundItem {
        OutboundItem::Request {
            to: Address::from(to),
            envelope: RequestEnvelope::new("ping", MessageData::new(), "me.reply"),
        }
    }

    fn reply(to: &str) -> OutboundItem {
        OutboundItem::Reply {
            to: Address::from(to),
            envelope: ResponseEnvelope::success(CorrelationId::generate(), "ping", MessageData::new()),
        }
    }

    #[tokio::test]
    async fn test_interleaved_sources_keep_enqueue_order() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("mux", hub).await.unwrap();
        let mut inbox = transport.subscribe(&Address::from("peer")).await.unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (mux, replies) = OutboundMultiplexer::new(transport, 16, stop_rx);
        let requests = replies.clone();

        let items = vec![request("peer"), reply("peer"), request("peer"), reply("peer")];
        let expected: Vec<CorrelationId> =
            items.iter().map(|i| i.correlation_id().clone()).collect();

        for (n, item) in items.into_iter().enumerate() {
            let sender = if n % 2 == 0 { &requests } else { &replies };
            sender.send(item).await.unwrap();
        }
        drop(requests);
        drop(replies);

        let report = mux.run().await;
        assert_eq!(report.published, 4);

        for id in expected {
            let delivery = inbox.inbox.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&delivery.data).unwrap();
            assert_eq!(value["id"], id.as_str());
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        // ---
        let hub = MemoryHub::new();
        hub.set_unreachable("down", true);
        let transport = create_memory_transport_with_hub("mux", hub.clone())
            .await
            .unwrap();
        let mut inbox = transport.subscribe(&Address::from("up")).await.unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (mux, sender) = OutboundMultiplexer::new(transport, 4, stop_rx);
        let handle = mux.spawn();

        sender.send(request("down")).await.unwrap();
        sender.send(request("up")).await.unwrap();

        assert!(tokio::time::timeout(Duration::from_secs(1), inbox.inbox.recv())
            .await
            .unwrap()
            .is_some());

        drop(sender);
        let report = handle.await.unwrap();
        assert_eq!(
            report,
            OutboundReport {
                published: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_try_send_fails_fast_when_full() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("mux", hub).await.unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);

        // Not running, so nothing drains the queue.
        let (mux, sender) = OutboundMultiplexer::new(transport, 1, stop_rx);

        sender.try_send(request("peer")).unwrap();
        assert!(matches!(
            sender.try_send(request("peer")),
            Err(RpcError::Backpressure)
        ));

        drop(mux);
        assert!(matches!(
            sender.try_send(request("peer")),
            Err(RpcError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("mux", hub).await.unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let (mux, _sender) = OutboundMultiplexer::new(transport, 4, stop_rx);
        let handle = mux.spawn();

        stop_tx.send(true).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("multiplexer did not stop")
            .unwrap();
        assert_eq!(report, OutboundReport::default());
    }

    /// Never completes a publish to `stalled`; records every other one.
    struct StallingTransport {
        stalled: Address,
        sent: Mutex<Vec<Address>>,
    }

    #[async_trait::async_trait]
    impl Transport for StallingTransport {
        fn transport_id(&self) -> &str {
            "stalling"
        }

        async fn publish(&self, to: &Address, _payload: Bytes) -> Result<()> {
            if *to == self.stalled {
                std::future::pending::<()>().await;
            }
            self.sent.lock().unwrap().push(to.clone());
            Ok(())
        }

        async fn subscribe(&self, _queue: &Address) -> Result<SubscriptionHandle> {
            Err(RpcError::Transport("not supported".into()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn stalling(on: &str) -> Arc<StallingTransport> {
        Arc::new(StallingTransport {
            stalled: Address::from(on),
            sent: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_is_dropped_after_timeout() {
        // ---
        let transport = stalling("stuck");
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (mux, sender) = OutboundMultiplexer::new(transport.clone(), 4, stop_rx);
        let handle = mux.with_publish_timeout(Duration::from_millis(200)).spawn();

        sender.send(request("stuck")).await.unwrap();
        sender.send(reply("healthy")).await.unwrap();
        drop(sender);

        let report = handle.await.unwrap();
        assert_eq!(
            report,
            OutboundReport {
                published: 1,
                failed: 1
            }
        );
        assert_eq!(*transport.sent.lock().unwrap(), vec![Address::from("healthy")]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_publish() {
        // ---
        let transport = stalling("stuck");
        let (stop_tx, stop_rx) = watch::channel(false);
        let (mux, sender) = OutboundMultiplexer::new(transport, 4, stop_rx);
        let handle = mux.with_publish_timeout(Duration::from_secs(3600)).spawn();

        sender.send(request("stuck")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        stop_tx.send(true).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("multiplexer did not stop")
            .unwrap();
        assert_eq!(report.published, 0);
        assert_eq!(report.failed, 1);
    }
}
