// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! The transport moves opaque byte payloads between named queues. It knows
//! nothing about envelopes, correlation, or timeouts; those live one layer up.
//!
//! Inbound messages arrive as [`Delivery`] values that must be explicitly
//! acknowledged or rejected. Brokers with manual acknowledgement redeliver
//! anything left unacknowledged when the consumer dies, so a crash between
//! receipt and dispatch does not lose the request.
//!
//! Concrete implementations live under `src/transport/`.
use crate::Result;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// A queue name.
///
/// Cheap to clone and safe to share across tasks. The domain layer makes no
/// assumptions about its syntax.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the queue name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-side acknowledgement for one delivery.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm the message was taken; the broker forgets it.
    async fn ack(&self) -> Result<()>;

    /// Refuse the message without requeueing it.
    async fn reject(&self) -> Result<()>;
}

/// One message received from a subscribed queue.
pub struct Delivery {
    /// Raw payload bytes.
    pub data: Bytes,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Pair a payload with its acknowledger.
    pub fn new(data: Bytes, acker: Box<dyn Acknowledger>) -> Self {
        Self { data, acker }
    }

    /// Acknowledge receipt.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Drop the message at the broker without redelivery.
    pub async fn reject(&self) -> Result<()> {
        self.acker.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription stays active until the handle is dropped or the transport
/// is closed, at which point `inbox.recv()` yields `None`.
pub struct SubscriptionHandle {
    // ---
    /// Deliveries for the subscribed queue, in broker order.
    pub inbox: mpsc::Receiver<Delivery>,
}

/// Transport abstraction.
///
/// Best-effort, at-most-once delivery of byte payloads to named queues.
/// Implementations must ensure that once `subscribe()` returns, messages
/// published to that queue afterwards are deliverable to the handle.
///
/// Within this crate `publish()` is only ever called from the outbound
/// multiplexer task, and each queue is subscribed once.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this transport instance, used in log lines.
    fn transport_id(&self) -> &str;

    /// Publish `payload` to the queue named by `to`.
    async fn publish(&self, to: &Address, payload: Bytes) -> Result<()>;

    /// Declare `queue` if needed and start consuming from it.
    async fn subscribe(&self, queue: &Address) -> Result<SubscriptionHandle>;

    /// Close the transport and release broker resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn Transport>;
