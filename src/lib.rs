//! Request/reply RPC over a message broker with automatic correlation.
//!
//! A service process runs one [`RpcNode`]. The node consumes the service's
//! request queue and answers with registered handlers, and issues calls to
//! sibling services, waiting on its own reply queue for the response whose
//! `id` matches. One writer task publishes everything, replies and requests
//! alike, so the broker connection is never used concurrently.
//!
//! Wire envelopes are JSON:
//!
//! ```text
//! request  { "id", "message_type", "message_data": {...}, "reply_to" }
//! response { "id", "message_type", "message_data": {...} }
//! ```
//!
//! A response whose `message_data` carries a non-empty `error` string is a
//! remote failure and surfaces as [`RpcError::Remote`].
//!

// Import all sub modules once...
mod client;
mod domain;
mod outbound;
mod protocol;
mod server;
mod transport;

mod node;
mod node_builder;
mod node_mode;
mod rpc_config;

mod correlation;
mod error;
mod lock;
mod macros;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use node::RpcNode;
pub use node_builder::RpcNodeBuilder;
pub use node_mode::NodeMode;

pub use client::{CorrelationTable, PendingCall, ReplyRouter, RouterReport, RpcClient};
pub use outbound::{OutboundItem, OutboundMultiplexer, OutboundReport, OutboundSender};
pub use server::{dispatch, HandlerError, HandlerRegistry, HandlerResult, InboundDispatcher};

pub use protocol::{
    //
    from_message_data,
    to_message_data,
    MessageData,
    RequestEnvelope,
    ResponseEnvelope,
    ERROR_KEY,
};

pub use rpc_config::RpcConfig;

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use transport::{
    //
    create_lapin_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    create_transport,
    MemoryHub,
    MemoryStats,
};

// --- public re-exports
pub use domain::{
    //
    Acknowledger,
    Address,
    Delivery,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
