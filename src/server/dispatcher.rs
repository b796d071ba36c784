//! Inbound consumer and dispatcher.
//!
//! Consumes this service's request queue. For each delivery:
//!
//! 1. decode the request envelope; malformed input is logged and rejected
//!    (dropped at the broker, never requeued);
//! 2. acknowledge the delivery;
//! 3. run the handler for `message_type` on its own task, bounded by a
//!    semaphore so a burst cannot spawn unbounded work;
//! 4. hand the reply, addressed to `reply_to`, to the outbound multiplexer.
//!
//! The ack precedes the handler, so handlers must tolerate redelivery of a
//! request whose reply was never sent.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};

use super::handler::HandlerRegistry;
use crate::outbound::{OutboundItem, OutboundSender};
use crate::protocol::{RequestEnvelope, ResponseEnvelope};
use crate::{
    //
    log_debug,
    log_error,
    log_warn,
    Address,
    Delivery,
    RpcError,
    SubscriptionHandle,
};

/// Drives the request queue of one service.
pub struct InboundDispatcher {
    transport_id: String,
    registry: HandlerRegistry,
    replies: OutboundSender,
    permits: Arc<Semaphore>,
}

impl InboundDispatcher {
    pub fn new(
        transport_id: impl Into<String>,
        registry: HandlerRegistry,
        replies: OutboundSender,
        handler_concurrency: usize,
    ) -> Self {
        Self {
            transport_id: transport_id.into(),
            registry,
            replies,
            permits: Arc::new(Semaphore::new(handler_concurrency.max(1))),
        }
    }

    /// Consume deliveries until the subscription ends or shutdown is signalled.
    ///
    /// Returns the number of deliveries taken off the queue.
    pub async fn run(self, mut sub: SubscriptionHandle, mut shutdown: watch::Receiver<bool>) -> u64 {
        // ---
        let transport_id = self.transport_id.clone();
        log_debug!("[{transport_id}] inbound dispatcher started");

        let mut received = 0u64;
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                delivery = sub.inbox.recv() => match delivery {
                    Some(d) => d,
                    None => break,
                },
            };

            received += 1;

            // Waiting for a handler permit must not hold up shutdown.
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = self.on_delivery(delivery) => {}
            }
        }

        log_debug!("[{transport_id}] inbound dispatcher stopped after {received} deliveries");
        received
    }

    async fn on_delivery(&self, delivery: Delivery) {
        // ---
        let transport_id = &self.transport_id;

        let request = match RequestEnvelope::decode(&delivery.data) {
            Ok(req) => req,
            Err(e) => {
                log_warn!("[{transport_id}] dropping malformed request: {e}");
                if let Err(e) = delivery.reject().await {
                    log_error!("[{transport_id}] reject failed: {e}");
                }
                return;
            }
        };

        if let Err(e) = delivery.ack().await {
            // The broker may redeliver; handlers tolerate that.
            log_error!("[{transport_id}] ack failed for {}: {e}", request.id);
        }

        if request.reply_to.is_empty() {
            log_warn!(
                "[{transport_id}] request {} ({}) has no reply_to, dropped",
                request.id,
                request.message_type
            );
            return;
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let registry = self.registry.clone();
        let replies = self.replies.clone();
        let transport_id = transport_id.clone();

        tokio::spawn(async move {
            let to = Address::from(request.reply_to.as_str());
            let envelope = dispatch(&registry, &request).await;
            drop(permit);

            if let Err(e) = replies.send(OutboundItem::Reply { to, envelope }).await {
                log_error!("[{transport_id}] cannot queue reply for {}: {e}", request.id);
            }
        });
    }
}

/// Run the handler for `request` and build its reply.
///
/// Unknown message types and handler failures both become error replies.
pub async fn dispatch(registry: &HandlerRegistry, request: &RequestEnvelope) -> ResponseEnvelope {
    // ---
    let Some(handler) = registry.get(&request.message_type) else {
        log_warn!("no handler for message type: {}", request.message_type);
        let err = RpcError::UnknownMessageType(request.message_type.clone());
        return request.reply_error(err.to_string());
    };

    match handler.call(request.message_data.clone()).await {
        Ok(data) => request.reply_with(data),
        Err(e) => {
            log_debug!("handler {} failed for {}: {e}", request.message_type, request.id);
            request.reply_error(e.message())
        }
    }
}
