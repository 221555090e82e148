use cipherstash_protect::{EncryptedPayload, Plaintext};
use serde_json::json;

mod common;

#[tokio::test]
async fn test_payload_composite_literal_round_trip() {
    let client = common::test_client().await;

    let payload = client
        .encrypt("alice@x.com", "users", "email")
        .await
        .unwrap()
        .unwrap();

    let literal = payload.to_composite_literal().unwrap();
    let decoded = EncryptedPayload::from_composite_literal(&literal).unwrap();

    assert_eq!(decoded, payload);

    // The decoded payload is still decryptable
    let plaintext = client.decrypt(Some(decoded)).await.unwrap();
    assert_eq!(
        plaintext,
        Some(Plaintext::Utf8Str(Some("alice@x.com".into())))
    );
}

#[tokio::test]
async fn test_escape_unescape_identity() {
    let client = common::test_client().await;

    let payload = client
        .encrypt(json!({"role": "admin"}), "docs", "metadata")
        .await
        .unwrap()
        .unwrap();

    let literal = payload.to_composite_literal().unwrap();
    let escaped = payload.to_escaped_composite_literal().unwrap();

    // The escaped form is exactly the literal as a JSON string
    let unescaped: String = serde_json::from_str(&escaped).unwrap();
    assert_eq!(unescaped, literal);

    assert_eq!(
        EncryptedPayload::from_escaped_composite_literal(&escaped).unwrap(),
        payload
    );
}

#[tokio::test]
async fn test_quote_doubling_is_reversible_for_quote_heavy_payloads() {
    let client = common::test_client().await;

    // A plaintext full of quotes exercises the doubling rules, and the
    // ste-vec path stores nested JSON strings inside the payload JSON
    let payload = client
        .encrypt(
            json!({"note": "she said \"hi\"", "empty": ""}),
            "docs",
            "metadata",
        )
        .await
        .unwrap()
        .unwrap();

    let literal = payload.to_composite_literal().unwrap();
    let decoded = EncryptedPayload::from_composite_literal(&literal).unwrap();

    assert_eq!(decoded, payload);
}

#[test]
fn test_malformed_inputs_are_rejected() {
    for input in ["", "()", "(\"{}\"", "{\"v\":2}", "[\"nope\"]"] {
        assert!(
            EncryptedPayload::from_composite_literal(input).is_err(),
            "{input:?} should not decode"
        );
    }
}
