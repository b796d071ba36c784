//! RPC client.
//!
//! Issues requests through the shared outbound queue and waits for the
//! matching reply on this service's reply queue. Each call owns exactly one
//! correlation-table entry for its lifetime; the entry is removed on every
//! exit path.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::pending::CorrelationTable;
use crate::outbound::{OutboundItem, OutboundSender};
use crate::protocol::{from_message_data, to_message_data, MessageData, RequestEnvelope};
use crate::{log_debug, Address, Result, RpcError};

/// Handle for issuing calls to other services.
///
/// Cheap to clone; all clones share one correlation table and one outbound
/// queue.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    table: CorrelationTable,
    requests: OutboundSender,
    reply_to: Address,
    default_timeout: Duration,
}

impl RpcClient {
    /// Create a client that publishes through `requests` and expects replies
    /// on `reply_to`, which must be routed into `table`.
    pub fn new(
        table: CorrelationTable,
        requests: OutboundSender,
        reply_to: impl Into<Address>,
        default_timeout: Duration,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                table,
                requests,
                reply_to: reply_to.into(),
                default_timeout,
            }),
        }
    }

    /// Send `message_type` with `payload` to `target_queue` and wait for the
    /// reply.
    ///
    /// `timeout` overrides the client default for this call only. The
    /// deadline covers both enqueueing the request and waiting for the reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrives in time.
    /// - [`RpcError::Remote`] if the remote handler answered with an error.
    /// - [`RpcError::Shutdown`] if the outbound queue is closed.
    pub async fn call(
        &self,
        target_queue: &str,
        message_type: &str,
        payload: MessageData,
        timeout: Option<Duration>,
    ) -> Result<MessageData> {
        // ---
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        let envelope = RequestEnvelope::new(message_type, payload, self.inner.reply_to.as_str());
        let mut pending = self.inner.table.register(envelope.id.clone())?;

        log_debug!("call {} -> {target_queue} ({message_type})", pending.id());

        let item = OutboundItem::Request {
            to: Address::from(target_queue),
            envelope,
        };

        let outcome = tokio::time::timeout(timeout, async {
            self.inner.requests.send(item).await?;
            pending.wait().await
        })
        .await;

        let response = match outcome {
            Ok(result) => result?,
            Err(_) => {
                log_debug!("call {} timed out after {timeout:?}", pending.id());
                return Err(RpcError::Timeout(timeout));
            }
        };

        response.into_result()
    }

    /// Typed variant of [`call`](Self::call): serializes `req` into the
    /// message data and deserializes the reply into `TResp`.
    pub async fn call_typed<TReq, TResp>(
        &self,
        target_queue: &str,
        message_type: &str,
        req: &TReq,
        timeout: Option<Duration>,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let payload = to_message_data(req)?;
        let reply = self.call(target_queue, message_type, payload, timeout).await?;
        from_message_data(reply)
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.table.len()
    }

    /// Queue replies are expected on.
    pub fn reply_to(&self) -> &Address {
        &self.inner.reply_to
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }
}
