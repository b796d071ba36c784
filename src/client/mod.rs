//! Client side: correlation table, reply routing, and outgoing calls.

mod pending;
mod reply_router;
mod rpc_client;

pub use pending::{CorrelationTable, PendingCall};
pub use reply_router::{ReplyRouter, RouterReport};
pub use rpc_client::RpcClient;
