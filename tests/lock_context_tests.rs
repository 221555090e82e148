use async_trait::async_trait;

use cipherstash_protect::encryption::b64_encode;
use cipherstash_protect::identity::{IdentityService, SessionToken};
use cipherstash_protect::{Error, LockContext, LockContextError, Plaintext};

mod common;

fn jwt_with_sub(sub: &str) -> SessionToken {
    let header = b64_encode(br#"{"alg":"none"}"#);
    let payload = b64_encode(format!(r#"{{"sub":"{sub}"}}"#));
    SessionToken::new(format!("{header}.{payload}."))
}

/// Identity exchange that trusts the token's own subject claim.
struct LocalExchange;

#[async_trait]
impl IdentityService for LocalExchange {
    async fn exchange(&self, token: &SessionToken) -> Result<String, LockContextError> {
        token.subject()
    }
}

async fn identified(sub: &str) -> LockContext {
    LockContext::new()
        .identify(jwt_with_sub(sub), &LocalExchange)
        .await
        .expect("identify succeeds")
}

#[tokio::test]
async fn test_lock_bound_round_trip() {
    let client = common::test_client().await;
    let alice = identified("alice").await;

    let payload = client
        .encrypt("secret", "users", "email")
        .with_lock_context(alice.clone())
        .await
        .expect("encrypt succeeds")
        .expect("payload present");

    let decrypted = client
        .decrypt(Some(payload))
        .with_lock_context(alice)
        .await
        .expect("decrypt succeeds");

    assert_eq!(decrypted, Some(Plaintext::Utf8Str(Some("secret".into()))));
}

#[tokio::test]
async fn test_wrong_identity_cannot_decrypt() {
    let client = common::test_client().await;
    let alice = identified("alice").await;
    let mallory = identified("mallory").await;

    let payload = client
        .encrypt("secret", "users", "email")
        .with_lock_context(alice)
        .await
        .unwrap()
        .unwrap();

    // A different claim derives a different key; decryption fails closed
    let result = client
        .decrypt(Some(payload.clone()))
        .with_lock_context(mallory)
        .await;
    assert!(matches!(result, Err(Error::Decrypt(_))));

    // So does presenting no identity at all
    let result = client.decrypt(Some(payload)).await;
    assert!(matches!(result, Err(Error::Decrypt(_))));
}

#[tokio::test]
async fn test_unbound_context_is_rejected_at_execute() {
    let client = common::test_client().await;

    let result = client
        .encrypt("secret", "users", "email")
        .with_lock_context(LockContext::new())
        .await;

    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_lock_bound_model_round_trip() {
    let client = common::test_client().await;
    let alice = identified("alice").await;

    let record = serde_json::json!({"id": "1", "email": "alice@x.com"});

    let encrypted = client
        .encrypt_model(record.clone(), "users")
        .with_lock_context(alice.clone())
        .await
        .expect("encrypt_model succeeds");

    let decrypted = client
        .decrypt_model(encrypted.clone())
        .with_lock_context(alice)
        .await
        .expect("decrypt_model succeeds");
    assert_eq!(decrypted, record);

    // Model decryption is all-or-nothing: a missing claim fails the call
    let result = client.decrypt_model(encrypted).await;
    assert!(matches!(result, Err(Error::Decrypt(_))));
}

#[tokio::test]
async fn test_bulk_decrypt_reports_identity_mismatch_per_item() {
    let client = common::test_client().await;
    let alice = identified("alice").await;

    let bound = client
        .encrypt("bound", "users", "email")
        .with_lock_context(alice)
        .await
        .unwrap()
        .unwrap();
    let unbound = client
        .encrypt("unbound", "users", "email")
        .await
        .unwrap()
        .unwrap();

    // Decrypting without the claim: the bound item fails, the other is fine
    let results = client
        .bulk_decrypt(vec![
            cipherstash_protect::BulkDecryptItem {
                id: Some("bound".into()),
                payload: Some(bound),
            },
            cipherstash_protect::BulkDecryptItem {
                id: Some("unbound".into()),
                payload: Some(unbound),
            },
        ])
        .await
        .expect("the batch itself succeeds");

    assert!(matches!(results[0].result, Err(Error::Decrypt(_))));
    assert_eq!(
        results[1].result.as_ref().unwrap(),
        &Some(Plaintext::Utf8Str(Some("unbound".into())))
    );
}

#[tokio::test]
async fn test_malformed_token_fails_identify() {
    let result = LockContext::new()
        .identify(SessionToken::new("not-a-jwt"), &LocalExchange)
        .await;

    assert!(matches!(result, Err(LockContextError::MalformedToken(_))));
}
