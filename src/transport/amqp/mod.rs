//! AMQP protocol transports.
//!
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)
//!
//! Without the `transport_lapin` feature, [`create_lapin_transport`] is a stub
//! that always fails, so callers can select transports at runtime without
//! sprinkling `cfg` attributes.

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use self::lapin::create_transport as create_lapin_transport;

#[cfg(not(feature = "transport_lapin"))]
pub async fn create_lapin_transport(
    _config: &crate::RpcConfig,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::RpcError::Transport(
        "AMQP transport not compiled in (enable feature `transport_lapin`)".into(),
    ))
}
