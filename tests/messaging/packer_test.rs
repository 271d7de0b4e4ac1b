use outbox_core::messaging::{
    ContentSerializer, DefaultMessagePacker, JsonContentSerializer, MessagePacker, MessagingError,
};
use outbox_core::{Envelope, EnvelopeState};

#[test]
fn test_abc_envelope_round_trips() {
    let packer = DefaultMessagePacker::default();
    let envelope = Envelope::with_id("abc", "order.created", "{}");
    assert_eq!(envelope.retries, 0);
    assert_eq!(envelope.status, EnvelopeState::Scheduled);

    let packed = packer.pack(&envelope).unwrap();
    assert_eq!(packer.unpack(&packed).unwrap(), envelope);
}

#[test]
fn test_packer_is_usable_as_trait_object() {
    let packer: Box<dyn MessagePacker> = Box::new(DefaultMessagePacker::new(JsonContentSerializer));
    let mut envelope = Envelope::new("order.paid", r#"{"order_id":42}"#);
    envelope.status = EnvelopeState::Failed;
    envelope.last_error = Some("NOT_FOUND - no exchange".to_string());

    let unpacked = packer.unpack(&packer.pack(&envelope).unwrap()).unwrap();
    assert_eq!(unpacked, envelope);
}

#[test]
fn test_serializer_round_trips_arbitrary_values() {
    let serializer = JsonContentSerializer;
    let value = serde_json::json!({"order_id": 42, "lines": ["a", "b"]});

    let text = serializer.serialize(&value).unwrap();
    let back: serde_json::Value = serializer.deserialize(&text).unwrap();
    assert_eq!(back, value);
}

#[test]
fn test_truncated_record_is_a_deserialization_error() {
    let packer = DefaultMessagePacker::default();
    let packed = packer
        .pack(&Envelope::with_id("abc", "order.created", "{}"))
        .unwrap();
    let truncated = &packed[..packed.len() / 2];

    assert!(matches!(
        packer.unpack(truncated),
        Err(MessagingError::Deserialization { .. })
    ));
}
