// tests/envelope_roundtrip.rs

use proptest::prelude::*;
use serde_json::Value;

use sso_rpc::{CorrelationId, MessageData, RequestEnvelope, ResponseEnvelope};

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _./-]{0,24}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,10}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn message_data() -> impl Strategy<Value = MessageData> {
    prop::collection::btree_map("[a-z_]{1,12}", json_value(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn request_encode_decode_encode_is_stable(
        message_type in "[a-z_]{1,24}",
        reply_to in "[a-z.-]{0,24}",
        data in message_data(),
    ) {
        let request = RequestEnvelope::new(message_type, data, reply_to);

        let first = request.encode().unwrap();
        let decoded = RequestEnvelope::decode(&first).unwrap();
        let second = decoded.encode().unwrap();

        prop_assert_eq!(&decoded, &request);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn response_error_field_round_trips(message in ".{1,40}") {
        let response = ResponseEnvelope::failure(CorrelationId::generate(), "t", message.clone());
        let decoded = ResponseEnvelope::decode(&response.encode().unwrap()).unwrap();

        prop_assert_eq!(decoded.error_message(), Some(message.as_str()));
    }

    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = RequestEnvelope::decode(&bytes);
        let _ = ResponseEnvelope::decode(&bytes);
    }
}
