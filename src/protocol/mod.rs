//! Wire envelopes exchanged over the broker.
//!
//! Envelopes are JSON objects. The `message_data` payload is kept as an opaque
//! JSON object at this layer; handlers and call sites convert it to their own
//! typed structs at the boundary with [`to_message_data`] and
//! [`from_message_data`].
mod envelope;

pub use envelope::{
    //
    from_message_data,
    to_message_data,
    MessageData,
    RequestEnvelope,
    ResponseEnvelope,
    ERROR_KEY,
};
