//! Property-based tests for inbound frame decoding.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never causes a panic in `decode_inbound`.
//! 2. Enveloped and flat shapes of the same record decode identically.
//! 3. Identity bodies survive arbitrary quoting and whitespace.

use proptest::prelude::*;
use unichat_proto::auth::parse_identity_body;
use unichat_proto::frame::decode_inbound;

/// Strategy for non-empty message text without control characters.
fn arb_text() -> impl Strategy<Value = String> {
    "[^\\x00-\\x1f\"\\\\]{1,64}"
}

/// Strategy for user ids as servers issue them.
fn arb_user_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,36}"
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(text in ".{0,256}") {
        let _ = decode_inbound(&text);
    }

    #[test]
    fn arbitrary_json_objects_never_panic(
        keys in prop::collection::vec("[a-zA-Z]{1,12}", 0..6),
        values in prop::collection::vec(any::<i64>(), 0..6),
    ) {
        let object: serde_json::Map<String, serde_json::Value> = keys
            .into_iter()
            .zip(values)
            .map(|(k, v)| (k, serde_json::Value::from(v)))
            .collect();
        let _ = decode_inbound(&serde_json::Value::Object(object).to_string());
    }

    #[test]
    fn enveloped_and_flat_shapes_agree(
        sender in arb_user_id(),
        content in arb_text(),
        id in proptest::option::of("[a-z0-9]{1,16}"),
    ) {
        let mut record = serde_json::json!({ "sender": sender, "content": content });
        if let Some(ref id) = id {
            record["id"] = serde_json::Value::from(id.clone());
        }
        let envelope = serde_json::json!({ "action": "receive", "messageDTO": record.clone() });

        let flat = decode_inbound(&record.to_string()).unwrap();
        let enveloped = decode_inbound(&envelope.to_string()).unwrap();

        prop_assert_eq!(&flat, &enveloped);
        prop_assert_eq!(flat.sender_id, sender);
        prop_assert_eq!(flat.text, content);
        prop_assert_eq!(flat.id, id);
    }

    #[test]
    fn identity_body_survives_quoting(
        user_id in arb_user_id(),
        name in proptest::option::of("[a-zA-Z]{1,16}"),
        quoted in any::<bool>(),
        pad in "[ \\n]{0,3}",
    ) {
        let mut body = match &name {
            Some(n) => format!("{user_id};{n}"),
            None => user_id.clone(),
        };
        if quoted {
            body = format!("\"{body}\"");
        }
        body.push_str(&pad);

        let token = parse_identity_body(&body).unwrap();
        prop_assert_eq!(token.user_id, user_id);
        prop_assert_eq!(token.display_name, name);
    }
}
