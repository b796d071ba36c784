//! Node mode enumeration.
//!
//! Defines which queues an [`RpcNode`](crate::RpcNode) consumes and therefore
//! which operations it allows.

/// Operational mode of an RPC node.
///
/// - [`Client`](NodeMode::Client): makes calls, serves nothing
/// - [`Server`](NodeMode::Server): serves requests, cannot call
/// - [`FullDuplex`](NodeMode::FullDuplex): both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    /// Consumes the reply queue only.
    ///
    /// Allows: `call()`, `call_typed()`, `client()`
    /// Forbids: `register()`, `run()`
    Client,

    /// Consumes the request queue only.
    ///
    /// Allows: `register()`, `run()`
    /// Forbids: `call()`, `call_typed()`, `client()`
    Server,

    /// Consumes both queues. A service that answers requests while calling
    /// its peers runs in this mode.
    #[default]
    FullDuplex,
}

impl NodeMode {
    /// Whether the node consumes its request queue.
    pub fn serves_requests(self) -> bool {
        matches!(self, NodeMode::Server | NodeMode::FullDuplex)
    }

    /// Whether the node consumes its reply queue and can issue calls.
    pub fn makes_calls(self) -> bool {
        matches!(self, NodeMode::Client | NodeMode::FullDuplex)
    }
}
