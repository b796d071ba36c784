//! RPC node.
//!
//! One per service process. Owns the transport and wires the long-lived
//! tasks together:
//!
//! - outbound multiplexer (always), the single publisher;
//! - inbound dispatcher on the request queue (server and full-duplex modes);
//! - reply router on the reply queue (client and full-duplex modes).
//!
//! Subscriptions are taken before any task starts, so a broker that cannot
//! be reached fails [`RpcNode::start`] instead of a background task.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{CorrelationTable, ReplyRouter, RouterReport, RpcClient};
use crate::lock::lock_ignore_poison;
use crate::outbound::{OutboundMultiplexer, OutboundReport};
use crate::protocol::MessageData;
use crate::server::{HandlerRegistry, HandlerResult, InboundDispatcher};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    Address,
    NodeMode,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

/// A running RPC endpoint for one service.
///
/// Cheap to clone. The background tasks stop when [`shutdown`](Self::shutdown)
/// is called or when the last clone is dropped.
#[derive(Clone)]
pub struct RpcNode {
    inner: Arc<Inner>,
}

struct Inner {
    service_name: String,
    mode: NodeMode,
    transport: TransportPtr,
    request_queue: Address,
    reply_queue: Address,
    registry: HandlerRegistry,
    client: Option<RpcClient>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
}

#[derive(Default)]
struct Tasks {
    outbound: Option<JoinHandle<OutboundReport>>,
    inbound: Option<JoinHandle<u64>>,
    replies: Option<JoinHandle<RouterReport>>,
}

impl RpcNode {
    /// Start a node with no handlers registered yet.
    ///
    /// Handlers registered later with [`register`](Self::register) take
    /// effect for the next request that arrives; requests for a type not yet
    /// registered are answered with an error reply.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a transport that cannot subscribe to the
    /// queues this mode consumes.
    pub async fn start(config: RpcConfig, transport: TransportPtr, mode: NodeMode) -> Result<Self> {
        Self::start_with(config, transport, mode, HandlerRegistry::new()).await
    }

    pub(crate) async fn start_with(
        config: RpcConfig,
        transport: TransportPtr,
        mode: NodeMode,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        // ---
        config.validate()?;

        let service_name = config.service_name.clone();
        let request_queue = Address::from(config.request_queue());
        let reply_queue = Address::from(config.reply_queue());

        let request_sub = if mode.serves_requests() {
            Some(subscribe(&transport, &service_name, &request_queue).await?)
        } else {
            None
        };

        let reply_sub = if mode.makes_calls() {
            Some(subscribe(&transport, &service_name, &reply_queue).await?)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mux, outbound) =
            OutboundMultiplexer::new(transport.clone(), config.outbound_capacity, shutdown_rx.clone());
        let mux = mux.with_publish_timeout(config.publish_timeout);

        let mut tasks = Tasks {
            outbound: Some(mux.spawn()),
            ..Tasks::default()
        };

        if let Some(sub) = request_sub {
            let dispatcher = InboundDispatcher::new(
                service_name.clone(),
                registry.clone(),
                outbound.clone(),
                config.handler_concurrency,
            );
            tasks.inbound = Some(tokio::spawn(dispatcher.run(sub, shutdown_rx.clone())));
        }

        let client = match reply_sub {
            Some(sub) => {
                let table = CorrelationTable::new();
                let router = ReplyRouter::new(service_name.clone(), table.clone());
                tasks.replies = Some(tokio::spawn(router.run(sub, shutdown_rx)));
                Some(RpcClient::new(
                    table,
                    outbound,
                    reply_queue.clone(),
                    config.request_timeout,
                ))
            }
            None => None,
        };

        log_info!(
            "[{service_name}] node started ({mode:?}) on {}, requests={request_queue} replies={reply_queue}",
            transport.transport_id()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                service_name,
                mode,
                transport,
                request_queue,
                reply_queue,
                registry,
                client,
                shutdown_tx,
                tasks: Mutex::new(tasks),
            }),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn mode(&self) -> NodeMode {
        self.inner.mode
    }

    /// Queue this node serves requests on.
    pub fn request_queue(&self) -> &Address {
        &self.inner.request_queue
    }

    /// Queue this node receives replies on.
    pub fn reply_queue(&self) -> &Address {
        &self.inner.reply_queue
    }

    /// Register a typed handler (Server or FullDuplex mode only).
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidMode`] in Client mode.
    pub fn register<TReq, TResp, F, Fut>(&self, message_type: &str, handler: F) -> Result<()>
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<TResp>> + Send + 'static,
    {
        // ---
        self.require_server("register()")?;
        self.inner.registry.register(message_type, handler);
        Ok(())
    }

    /// Register a handler over raw message data (Server or FullDuplex mode
    /// only).
    pub fn register_raw<F, Fut>(&self, message_type: &str, handler: F) -> Result<()>
    where
        F: Fn(MessageData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<MessageData>> + Send + 'static,
    {
        // ---
        self.require_server("register_raw()")?;
        self.inner.registry.register_raw(message_type, handler);
        Ok(())
    }

    /// Message types this node currently answers.
    pub fn message_types(&self) -> Vec<String> {
        self.inner.registry.message_types()
    }

    /// Calling handle (Client or FullDuplex mode only).
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidMode`] in Server mode.
    pub fn client(&self) -> Result<RpcClient> {
        self.inner.client.clone().ok_or_else(|| {
            RpcError::InvalidMode(format!(
                "client() not allowed in {:?} mode",
                self.inner.mode
            ))
        })
    }

    /// Call `message_type` on `target_queue`. See [`RpcClient::call`].
    pub async fn call(
        &self,
        target_queue: &str,
        message_type: &str,
        payload: MessageData,
        timeout: Option<Duration>,
    ) -> Result<MessageData> {
        // ---
        self.client()?
            .call(target_queue, message_type, payload, timeout)
            .await
    }

    /// Typed call. See [`RpcClient::call_typed`].
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
        self.client()?
            .call_typed(target_queue, message_type, req, timeout)
            .await
    }

    /// Calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.client.as_ref().map_or(0, RpcClient::pending_calls)
    }

    /// Serve until [`shutdown`](Self::shutdown) is called (Server or
    /// FullDuplex mode only).
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidMode`] in Client mode.
    pub async fn run(&self) -> Result<()> {
        // ---
        self.require_server("run()")?;

        let mut rx = self.inner.shutdown_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|stop| *stop).await;
        Ok(())
    }

    /// Stop the background tasks and close the transport.
    ///
    /// Calls still waiting will time out. Safe to call more than once.
    pub async fn shutdown(&self) {
        // ---
        let service_name = &self.inner.service_name;
        self.inner.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *lock_ignore_poison(&self.inner.tasks));

        if let Some(task) = tasks.inbound {
            match task.await {
                Ok(n) => log_debug!("[{service_name}] inbound dispatcher handled {n} deliveries"),
                Err(e) => log_error!("[{service_name}] inbound dispatcher failed: {e}"),
            }
        }
        if let Some(task) = tasks.replies {
            match task.await {
                Ok(report) => log_debug!("[{service_name}] reply router: {report:?}"),
                Err(e) => log_error!("[{service_name}] reply router failed: {e}"),
            }
        }
        if let Some(task) = tasks.outbound {
            match task.await {
                Ok(report) => log_debug!("[{service_name}] outbound: {report:?}"),
                Err(e) => log_error!("[{service_name}] outbound multiplexer failed: {e}"),
            }
        }

        if let Err(e) = self.inner.transport.close().await {
            log_error!("[{service_name}] transport close failed: {e}");
        }
        log_info!("[{service_name}] node stopped");
    }

    fn require_server(&self, op: &str) -> Result<()> {
        if self.inner.mode.serves_requests() {
            Ok(())
        } else {
            Err(RpcError::InvalidMode(format!(
                "{op} not allowed in {:?} mode",
                self.inner.mode
            )))
        }
    }
}

async fn subscribe(
    transport: &TransportPtr,
    service_name: &str,
    queue: &Address,
) -> Result<crate::SubscriptionHandle> {
    // ---
    transport.subscribe(queue).await.map_err(|e| {
        log_error!("[{service_name}] failed to subscribe to {queue}: {e}");
        e
    })
}
