//! AMQP transport implementation using `lapin`.
//!
//! ## Concurrency model
//!
//! - One broker connection per transport instance.
//! - Publishing goes through a single dedicated channel. Within this crate
//!   only the outbound multiplexer task publishes, so the channel is never
//!   used concurrently for writes.
//! - Every subscribed queue gets its own channel and a consumer task that
//!   forwards deliveries into the subscription inbox.
//!
//! ## Queue semantics
//!
//! Queues are declared on subscribe:
//! - `durable: true` - the service's queue survives broker restarts
//! - `exclusive: false` - several instances of a service may consume it
//! - `auto_delete: false` - the queue outlives any single consumer
//!
//! Consumption uses manual acknowledgement. Deliveries are acked (or
//! rejected without requeue) by the layer above through [`Delivery`].
//! Each consumer channel sets a prefetch count equal to the node's handler
//! concurrency, so the broker keeps the rest of a backlog on the queue where
//! other instances can take it.
//!
//! Publishing uses the default exchange with the queue name as routing key.

use lapin::{
    //
    acker::Acker,
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        BasicRejectOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Acknowledger,
    Address,
    Delivery,
    Result,
    RpcConfig,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

/// AMQP transport backed by a lapin connection.
struct AmqpTransport {
    // ---
    transport_id: String,
    connection: Connection,
    publish_channel: Channel,
    prefetch: u16,
    consumers: Mutex<Vec<(Channel, JoinHandle<()>)>>,
}

struct AmqpAck {
    acker: Acker,
}

#[async_trait::async_trait]
impl Acknowledger for AmqpAck {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: ack failed: {e}")))
    }

    async fn reject(&self) -> Result<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: reject failed: {e}")))
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, to: &Address, payload: Bytes) -> Result<()> {
        // ---
        let properties = BasicProperties::default().with_content_type("application/json".into());

        self.publish_channel
            .basic_publish(
                "".into(),         // default exchange
                to.as_str().into(), // routing key = queue name
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish to {to} failed: {e}")))?;

        log_debug!("[{}] published to queue: {to}", self.transport_id);
        Ok(())
    }

    async fn subscribe(&self, queue: &Address) -> Result<SubscriptionHandle> {
        // ---
        let channel = self.connection.create_channel().await.map_err(|e| {
            RpcError::Transport(format!("amqp: channel creation failed: {e}"))
        })?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: qos failed: {e}")))?;

        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };

        channel
            .queue_declare(queue.as_str().into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        log_info!("[{}] declared queue: {queue}", self.transport_id);

        let consumer = channel
            .basic_consume(
                queue.as_str().into(),
                format!("{}-{}", self.transport_id, queue).into(),
                BasicConsumeOptions::default(), // no_ack: false => manual ack
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] consuming queue: {queue}", self.transport_id);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let transport_id = self.transport_id.clone();
        let queue_name = queue.clone();

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        let forwarded = Delivery::new(
                            Bytes::from(delivery.data),
                            Box::new(AmqpAck {
                                acker: delivery.acker,
                            }),
                        );
                        if tx.send(forwarded).await.is_err() {
                            // Unacked deliveries are requeued by the broker
                            // once the channel closes.
                            log_warn!("[{transport_id}] inbox for {queue_name} dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        log_error!("[{transport_id}] consumer error on {queue_name}: {e}");
                        break;
                    }
                }
            }

            log_info!("[{transport_id}] consumer task ended for queue: {queue_name}");
        });

        self.consumers.lock().await.push((channel, handle));

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        for (channel, handle) in consumers {
            if let Err(e) = channel.close(200, "Normal shutdown".into()).await {
                log_warn!("[{}] closing consumer channel failed: {e}", self.transport_id);
            }
            handle.abort();
        }

        if let Err(e) = self
            .publish_channel
            .close(200, "Normal shutdown".into())
            .await
        {
            log_warn!("[{}] closing publish channel failed: {e}", self.transport_id);
        }
        self.connection
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: close failed: {e}")))?;

        log_info!("[{}] AMQP transport closed", self.transport_id);
        Ok(())
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// # Errors
///
/// [`RpcError::MissingConfig`] without a broker URI, [`RpcError::Transport`]
/// if the connection cannot be established.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let uri = config
        .broker_uri
        .as_deref()
        .ok_or_else(|| RpcError::MissingConfig("broker_uri".into()))?;

    log_info!("connecting to AMQP broker: {uri}");

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    let publish_channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    log_info!("connected to AMQP broker as {}", config.service_name);

    Ok(Arc::new(AmqpTransport {
        transport_id: config.service_name.clone(),
        connection,
        publish_channel,
        prefetch: prefetch_for(config.handler_concurrency),
        consumers: Mutex::new(Vec::new()),
    }))
}

/// Prefetch count for a consumer channel, clamped to what AMQP can carry.
/// Zero would mean unlimited, so it is never returned.
fn prefetch_for(handler_concurrency: usize) -> u16 {
    u16::try_from(handler_concurrency).unwrap_or(u16::MAX).max(1)
}
