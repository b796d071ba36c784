//! Transport implementations.
//!
//! Concrete implementations of the domain-level [`Transport`](crate::Transport)
//! trait, exposed only through constructor functions. Domain code must not
//! depend on transport-specific types.

mod amqp;
mod memory;

pub use amqp::create_lapin_transport;
pub use memory::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
    MemoryStats,
};

use crate::{Result, RpcConfig, RpcError, TransportPtr};

/// Create the transport selected by the configured broker URI.
///
/// - no URI or `memory://...` - in-memory transport on the global hub
/// - `amqp://...` / `amqps://...` - lapin AMQP transport
///
/// # Errors
///
/// [`RpcError::InvalidConfig`] for an unrecognized scheme, or the transport's
/// own connection error.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let uri = config.broker_uri.as_deref().unwrap_or("memory://");

    match uri.split_once("://").map(|(scheme, _)| scheme) {
        Some("memory") => create_memory_transport(&config.service_name).await,
        Some("amqp") | Some("amqps") => create_lapin_transport(config).await,
        _ => Err(RpcError::InvalidConfig(format!(
            "unrecognized broker uri: {uri}, expected memory:// or amqp://"
        ))),
    }
}
