//! Serving side: handler registry and the inbound consumer/dispatcher.
mod dispatcher;
mod handler;

pub use dispatcher::{dispatch, InboundDispatcher};
pub use handler::{HandlerError, HandlerRegistry, HandlerResult};
