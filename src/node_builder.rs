//! RPC node builder.
//!
//! Fluent assembly of an [`RpcNode`]: configuration, an optional transport
//! override, the node mode, and handlers registered before the first
//! request can arrive.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use crate::protocol::MessageData;
use crate::server::{HandlerRegistry, HandlerResult};
use crate::{create_transport, NodeMode, Result, RpcConfig, RpcError, RpcNode, TransportPtr};

/// Builder for [`RpcNode`].
///
/// # Examples
///
/// ```no_run
/// use serde::{Deserialize, Serialize};
/// use sso_rpc::{RpcConfig, RpcNodeBuilder};
///
/// #[derive(Deserialize)]
/// struct CheckJob { job_id: String }
///
/// #[derive(Serialize)]
/// struct JobStatus { job_id: String, exists: bool }
///
/// # async fn example() -> sso_rpc::Result<()> {
/// let node = RpcNodeBuilder::new(RpcConfig::with_broker("amqp://localhost:5672", "jobs-service"))
///     .server_mode()
///     .handler("check_job_exists", |req: CheckJob| async move {
///         Ok(JobStatus { job_id: req.job_id, exists: true })
///     })
///     .build()
///     .await?;
///
/// node.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcNodeBuilder {
    // ---
    config: RpcConfig,
    transport: Option<TransportPtr>,
    mode: NodeMode,
    registry: HandlerRegistry,
}

impl RpcNodeBuilder {
    /// Start from `config`. Mode defaults to [`NodeMode::FullDuplex`]; the
    /// transport defaults to the one selected by `config.broker_uri`.
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            transport: None,
            mode: NodeMode::default(),
            registry: HandlerRegistry::new(),
        }
    }

    /// Use an existing transport instead of connecting from the config.
    pub fn transport(mut self, transport: TransportPtr) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn client_mode(self) -> Self {
        self.mode(NodeMode::Client)
    }

    pub fn server_mode(self) -> Self {
        self.mode(NodeMode::Server)
    }

    pub fn full_duplex(self) -> Self {
        self.mode(NodeMode::FullDuplex)
    }

    /// Default deadline for calls made through the node.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Register a typed handler.
    pub fn handler<TReq, TResp, F, Fut>(self, message_type: &str, handler: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<TResp>> + Send + 'static,
    {
        self.registry.register(message_type, handler);
        self
    }

    /// Register a handler over raw message data.
    pub fn handler_raw<F, Fut>(self, message_type: &str, handler: F) -> Self
    where
        F: Fn(MessageData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<MessageData>> + Send + 'static,
    {
        self.registry.register_raw(message_type, handler);
        self
    }

    /// Connect (if needed), subscribe, and start the node.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidMode`] if handlers were registered in client mode.
    /// - Configuration and transport errors from [`RpcNode::start`].
    pub async fn build(self) -> Result<RpcNode> {
        // ---
        if !self.mode.serves_requests() && !self.registry.message_types().is_empty() {
            return Err(RpcError::InvalidMode(
                "handlers registered on a Client mode node".into(),
            ));
        }

        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => create_transport(&self.config).await?,
        };

        RpcNode::start_with(self.config, transport, self.mode, self.registry).await
    }
}
