use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::lock::lock_ignore_poison;
use crate::protocol::ResponseEnvelope;
use crate::{CorrelationId, Result, RpcError};

/// One-shot delivery slot. `None` once a reply has been handed over.
type Slot = Option<oneshot::Sender<ResponseEnvelope>>;

/// Process-wide map from correlation ID to the waiter for that call.
///
/// Entries are created by [`register`](Self::register) and removed only when
/// the returned [`PendingCall`] is dropped (or via [`forget`](Self::forget)).
/// [`deliver`](Self::deliver) takes the sender out of a slot but leaves the
/// entry in place, so the reply router never creates or deletes entries.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    // ---
    inner: Arc<Mutex<HashMap<CorrelationId, Slot>>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`.
    ///
    /// # Errors
    ///
    /// [`RpcError::DuplicateCorrelationId`] if `id` already has a waiter.
    pub fn register(&self, id: CorrelationId) -> Result<PendingCall> {
        // ---
        let (tx, rx) = oneshot::channel();

        {
            let mut map = lock_ignore_poison(&self.inner);
            if map.contains_key(&id) {
                return Err(RpcError::DuplicateCorrelationId(id.to_string()));
            }
            map.insert(id.clone(), Some(tx));
        }

        Ok(PendingCall {
            id,
            rx,
            table: self.clone(),
        })
    }

    /// Hand `response` to the waiter registered under `id`.
    ///
    /// Returns `false` when there is no live waiter: never registered, already
    /// forgotten after a timeout, or already answered. Never blocks.
    pub fn deliver(&self, id: &CorrelationId, response: ResponseEnvelope) -> bool {
        // ---
        let tx = {
            let mut map = lock_ignore_poison(&self.inner);
            map.get_mut(id).and_then(Option::take)
        };

        match tx {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Remove the entry for `id`. Idempotent.
    pub fn forget(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.inner).remove(id).is_some()
    }

    /// True if an entry exists for `id`.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.inner).contains_key(id)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.inner).len()
    }

    /// True if no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Waiter for one correlated reply.
///
/// Dropping it removes the table entry, whatever path the call took.
pub struct PendingCall {
    id: CorrelationId,
    rx: oneshot::Receiver<ResponseEnvelope>,
    table: CorrelationTable,
}

impl PendingCall {
    /// Correlation ID this waiter is registered under.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the reply. Not bounded in time; callers wrap it in a timeout.
    pub async fn wait(&mut self) -> Result<ResponseEnvelope> {
        (&mut self.rx)
            .await
            .map_err(|_| RpcError::Transport(format!("reply slot for {} closed", self.id)))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.table.forget(&self.id);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::protocol::MessageData;

    fn reply(id: &CorrelationId) -> ResponseEnvelope {
        ResponseEnvelope::success(id.clone(), "test", MessageData::new())
    }

    #[tokio::test]
    async fn test_register_and_deliver() {
        // ---
        let table = CorrelationTable::new();
        let id = CorrelationId::generate();

        let mut pending = table.register(id.clone()).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.deliver(&id, reply(&id)));
        let received = pending.wait().await.unwrap();
        assert_eq!(received.id, id);

        // Entry stays until the waiter goes away.
        assert!(table.contains(&id));
        drop(pending);
        assert!(table.is_empty());
    }

    #[test]
    fn test_second_delivery_is_refused() {
        // ---
        let table = CorrelationTable::new();
        let id = CorrelationId::generate();
        let _pending = table.register(id.clone()).unwrap();

        assert!(table.deliver(&id, reply(&id)));
        assert!(!table.deliver(&id, reply(&id)));
    }

    #[test]
    fn test_deliver_unknown_id() {
        // ---
        let table = CorrelationTable::new();
        let id = CorrelationId::generate();
        assert!(!table.deliver(&id, reply(&id)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_forget_is_idempotent() {
        // ---
        let table = CorrelationTable::new();
        let id = CorrelationId::generate();

        let pending = table.register(id.clone()).unwrap();
        assert!(table.forget(&id));
        assert!(!table.forget(&id));
        assert!(!table.deliver(&id, reply(&id)));

        drop(pending);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        // ---
        let table = CorrelationTable::new();
        let id = CorrelationId::from("fixed");

        let _first = table.register(id.clone()).unwrap();
        assert!(matches!(
            table.register(id),
            Err(RpcError::DuplicateCorrelationId(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_deliver() {
        // ---
        let table = CorrelationTable::new();
        let mut tasks = Vec::new();

        for _ in 0..32 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                let id = CorrelationId::generate();
                let mut pending = table.register(id.clone()).unwrap();

                let router = table.clone();
                let deliver_id = id.clone();
                tokio::spawn(async move {
                    router.deliver(&deliver_id, reply(&deliver_id));
                });

                let got = pending.wait().await.unwrap();
                assert_eq!(got.id, id);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(table.is_empty());
    }
}
