//! Domain layer public interface.
//!
//! Broker-independent abstractions shared by the outbound multiplexer, the
//! inbound dispatcher, and the reply router. Consumers import symbols via this
//! module, not by referencing individual files directly.

mod transport;

pub use transport::{
    //
    Acknowledger,
    Address,
    Delivery,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
