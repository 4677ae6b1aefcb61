//! Property tests for the real-time frame codec.
//!
//! Uses proptest to verify:
//! 1. Any chat frame survives encode → decode, whatever its content.
//! 2. Arbitrary text never causes a panic in `decode_frame`.
//! 3. A `message` object missing any required field is rejected, not accepted.

use duochat_proto::frame::{ChatFrame, Frame, FrameError, decode_frame, encode_frame};
use duochat_proto::identity::{CorrelationId, Identity};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating identities, including ones with spaces and unicode.
fn arb_identity() -> impl Strategy<Value = Identity> {
    "\\PC{1,32}".prop_map(Identity::new)
}

/// Strategy for generating chat frames with and without correlation IDs.
fn arb_chat_frame() -> impl Strategy<Value = ChatFrame> {
    (
        arb_identity(),
        arb_identity(),
        any::<String>(),
        proptest::option::of(any::<u128>()),
    )
        .prop_map(|(sender_id, receiver_id, content, corr)| ChatFrame {
            sender_id,
            receiver_id,
            content,
            correlation_id: corr.map(|n| CorrelationId::from_uuid(Uuid::from_u128(n))),
        })
}

proptest! {
    #[test]
    fn chat_frame_survives_encoding(frame in arb_chat_frame()) {
        let frame = Frame::Message(frame);
        let text = encode_frame(&frame).unwrap();
        prop_assert_eq!(decode_frame(&text).unwrap(), frame);
    }

    #[test]
    fn arbitrary_text_never_panics(text in any::<String>()) {
        let _ = decode_frame(&text);
    }

    #[test]
    fn message_missing_a_field_is_rejected(
        sender in "[a-z]{1,8}",
        content in ".{0,16}",
        drop_index in 0usize..3,
    ) {
        let mut object = serde_json::json!({
            "type": "message",
            "senderID": sender,
            "receiverID": "peer",
            "content": content,
        });
        let key = ["senderID", "receiverID", "content"][drop_index];
        object.as_object_mut().unwrap().remove(key);

        let result = decode_frame(&object.to_string());
        let is_malformed = matches!(result, Err(FrameError::Malformed { .. }));
        prop_assert!(is_malformed);
    }
}
