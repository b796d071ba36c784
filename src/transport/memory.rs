//! In-memory transport implementation.
//!
//! A pure in-process stand-in for a broker. All [`MemoryTransport`] instances
//! sharing one [`MemoryHub`] see each other's queues, exactly as services
//! connected to the same broker would.
//!
//! ## Reference Semantics
//!
//! - Every queue is a work queue. Each message goes to exactly one of the
//!   queue's subscribers, picked round-robin over the ones still alive, just
//!   as competing consumers share a broker queue.
//! - Once `subscribe()` returns, later publishes to that queue are deliverable.
//! - Publishing to a queue nobody has subscribed to drops the message.
//! - `publish()` never waits for a consumer. Each queue buffers its messages
//!   and a per-queue task feeds them to subscribers in publish order, so a
//!   slow consumer holds up only its own queue.
//! - Acknowledgements are counted so tests can observe the manual-ack contract.
//!
//! ## Non-Goals
//!
//! Persistence, redelivery, and broker failure modes. The only failure that
//! can be simulated is an unreachable queue via [`MemoryHub::set_unreachable`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::lock::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    Acknowledger,
    Address,
    Delivery,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

#[derive(Default)]
struct Counters {
    published: AtomicUsize,
    acked: AtomicUsize,
    rejected: AtomicUsize,
}

/// Snapshot of hub activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Messages handed to a subscriber.
    pub published: usize,
    /// Deliveries acknowledged.
    pub acked: usize,
    /// Deliveries rejected.
    pub rejected: usize,
}

struct Consumer {
    id: u64,
    inbox: mpsc::Sender<Delivery>,
}

type Consumers = Arc<Mutex<Vec<Consumer>>>;

/// One queue: its backlog and the consumers competing for it.
struct Queue {
    backlog: mpsc::UnboundedSender<Bytes>,
    consumers: Consumers,
}

/// Shared message bus for the in-memory transport.
///
/// Construct one per test to keep parallel tests isolated; production-style
/// code can use the process-global hub through [`create_memory_transport`].
pub struct MemoryHub {
    // ---
    queues: Mutex<HashMap<Address, Queue>>,
    unreachable: Mutex<HashSet<Address>>,
    counters: Arc<Counters>,
    next_consumer: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make publishes to `queue` fail (or succeed again).
    pub fn set_unreachable(&self, queue: impl Into<Address>, unreachable: bool) {
        // ---
        let queue = queue.into();
        let mut set = lock_ignore_poison(&self.unreachable);
        if unreachable {
            set.insert(queue);
        } else {
            set.remove(&queue);
        }
    }

    /// Current activity counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            published: self.counters.published.load(Ordering::SeqCst),
            acked: self.counters.acked.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
        }
    }

    fn is_unreachable(&self, queue: &Address) -> bool {
        lock_ignore_poison(&self.unreachable).contains(queue)
    }

    fn publish(&self, transport_id: &str, to: &Address, payload: Bytes) -> Result<()> {
        // ---
        if self.is_unreachable(to) {
            return Err(RpcError::Transport(format!("memory: queue {to} unreachable")));
        }

        let queues = lock_ignore_poison(&self.queues);
        let queued = queues
            .get(to)
            .is_some_and(|queue| queue.backlog.send(payload).is_ok());

        if queued {
            log_debug!("{transport_id}: published to {to}");
        } else {
            log_debug!("{transport_id}: no consumer on {to}, message dropped");
        }
        Ok(())
    }

    fn subscribe(&self, transport_id: &str, queue: &Address) -> (u64, SubscriptionHandle) {
        // ---
        log_debug!("{transport_id}: subscribe to {queue}");

        let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut queues = lock_ignore_poison(&self.queues);
        let entry = queues.entry(queue.clone()).or_insert_with(|| {
            let (backlog, pending) = mpsc::unbounded_channel();
            let consumers = Consumers::default();
            tokio::spawn(pump(
                queue.clone(),
                pending,
                Arc::clone(&consumers),
                Arc::clone(&self.counters),
            ));
            Queue { backlog, consumers }
        });
        lock_ignore_poison(&entry.consumers).push(Consumer { id, inbox: tx });

        (id, SubscriptionHandle { inbox: rx })
    }

    /// Drop the given consumers. A queue left without consumers is removed,
    /// which discards its backlog and stops its task.
    fn close(&self, transport_id: &str, owned: &[(Address, u64)]) {
        // ---
        log_debug!("{transport_id}: closing memory transport");

        let mut queues = lock_ignore_poison(&self.queues);
        for (queue, id) in owned {
            let Some(entry) = queues.get(queue) else {
                continue;
            };
            let empty = {
                let mut consumers = lock_ignore_poison(&entry.consumers);
                consumers.retain(|c| c.id != *id);
                consumers.is_empty()
            };
            if empty {
                queues.remove(queue);
            }
        }
    }
}

/// Outcome of offering a delivery to a queue's consumers.
enum Offer {
    Taken,
    /// Every consumer is full; wait on this one, whose turn it is.
    Full(Delivery, mpsc::Sender<Delivery>),
    NoConsumer,
}

/// Offer `delivery` to each consumer once, starting at `cursor`.
/// Consumers whose handle was dropped are removed on the way.
fn offer(consumers: &mut Vec<Consumer>, cursor: &mut usize, mut delivery: Delivery) -> Offer {
    // ---
    let mut full = 0;
    while full < consumers.len() {
        let at = *cursor % consumers.len();
        match consumers[at].inbox.try_send(delivery) {
            Ok(()) => {
                *cursor = at + 1;
                return Offer::Taken;
            }
            Err(TrySendError::Full(d)) => {
                delivery = d;
                *cursor = at + 1;
                full += 1;
            }
            Err(TrySendError::Closed(d)) => {
                delivery = d;
                consumers.remove(at);
                *cursor = at;
            }
        }
    }

    if consumers.is_empty() {
        return Offer::NoConsumer;
    }
    let at = *cursor % consumers.len();
    *cursor = at + 1;
    Offer::Full(delivery, consumers[at].inbox.clone())
}

/// Feed one queue's backlog to its consumers until the queue is removed.
async fn pump(
    queue: Address,
    mut backlog: mpsc::UnboundedReceiver<Bytes>,
    consumers: Consumers,
    counters: Arc<Counters>,
) {
    // ---
    let mut cursor = 0usize;

    while let Some(payload) = backlog.recv().await {
        let mut delivery = Delivery::new(
            payload,
            Box::new(MemoryAck {
                counters: Arc::clone(&counters),
            }),
        );

        loop {
            let next = offer(&mut lock_ignore_poison(&consumers), &mut cursor, delivery);
            match next {
                Offer::Taken => {
                    counters.published.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Offer::NoConsumer => {
                    log_debug!("memory: no live consumer on {queue}, message dropped");
                    break;
                }
                Offer::Full(d, inbox) => match inbox.send(d).await {
                    Ok(()) => {
                        counters.published.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                    // Closed while waiting; offer it to the others.
                    Err(mpsc::error::SendError(d)) => delivery = d,
                },
            }
        }
    }

    log_debug!("memory: queue {queue} removed");
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            counters: Arc::new(Counters::default()),
            next_consumer: AtomicU64::new(0),
        }
    }
}

struct MemoryAck {
    counters: Arc<Counters>,
}

#[async_trait::async_trait]
impl Acknowledger for MemoryAck {
    async fn ack(&self) -> Result<()> {
        self.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport bound to a hub.
struct MemoryTransport {
    // ---
    transport_id: String,
    hub: Arc<MemoryHub>,
    owned: Mutex<Vec<(Address, u64)>>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, to: &Address, payload: Bytes) -> Result<()> {
        self.hub.publish(&self.transport_id, to, payload)
    }

    async fn subscribe(&self, queue: &Address) -> Result<SubscriptionHandle> {
        // ---
        let (id, handle) = self.hub.subscribe(&self.transport_id, queue);
        lock_ignore_poison(&self.owned).push((queue.clone(), id));
        Ok(handle)
    }

    /// Drops this transport's subscriptions from the hub. Other transports on
    /// the same hub are unaffected.
    async fn close(&self) -> Result<()> {
        // ---
        let owned = std::mem::take(&mut *lock_ignore_poison(&self.owned));
        self.hub.close(&self.transport_id, &owned);
        Ok(())
    }
}

/// Create an in-memory transport on the process-global hub.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport(transport_id: &str) -> Result<TransportPtr> {
    create_memory_transport_with_hub(transport_id, global_hub()).await
}

/// Create an in-memory transport on an explicit hub.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport_with_hub(
    transport_id: &str,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{transport_id}: create memory transport");

    Ok(Arc::new(MemoryTransport {
        transport_id: transport_id.to_string(),
        hub,
        owned: Mutex::new(Vec::new()),
    }))
}
