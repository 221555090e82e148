//! Lock contexts: binding ciphertext to a caller identity.
//!
//! A [`LockContext`] starts unbound. [`LockContext::identify`] exchanges a
//! session token through an [`IdentityService`] for an identity claim and
//! returns a bound context; on failure the original context stays unbound.
//! A bound context attached to an operation adds its claim to every key
//! request of that operation, so a payload encrypted under it cannot be
//! decrypted without presenting the same claim.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::encryption::b64_decode;
use crate::errors::LockContextError;
use crate::zerokms::Context;

/// A raw session token (a JWT) presented by the application's caller.
#[derive(Debug, Clone)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token's subject claim, decoded locally without verification.
    /// Verification is the identity service's job; this only checks shape.
    pub fn subject(&self) -> Result<String, LockContextError> {
        #[derive(Deserialize)]
        struct Claims {
            sub: String,
        }

        let payload = self
            .0
            .split('.')
            .nth(1)
            .ok_or_else(|| LockContextError::MalformedToken("not a JWT".to_string()))?;

        let bytes = b64_decode(payload)
            .map_err(|e| LockContextError::MalformedToken(e.to_string()))?;

        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| LockContextError::MalformedToken(e.to_string()))?;

        Ok(claims.sub)
    }
}

/// The identity exchange seam. The production implementation is
/// [`CtsClient`]; tests can stub this with a local subject decode.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchanges a session token for a verified identity claim.
    async fn exchange(&self, token: &SessionToken) -> Result<String, LockContextError>;
}

/// HTTP transport to the token service.
pub struct CtsClient {
    base_url: Url,
    http: reqwest::Client,
}

impl CtsClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityService for CtsClient {
    async fn exchange(&self, token: &SessionToken) -> Result<String, LockContextError> {
        #[derive(Deserialize)]
        struct ExchangeResponse {
            sub: String,
        }

        // Reject obviously malformed tokens before going to the network
        token.subject()?;

        let endpoint = self
            .base_url
            .join("api/identify")
            .map_err(|e| LockContextError::ExchangeFailed(e.to_string()))?;

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| LockContextError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LockContextError::ExchangeFailed(format!(
                "identity service returned {status}"
            )));
        }

        let exchanged: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| LockContextError::ExchangeFailed(e.to_string()))?;

        Ok(exchanged.sub)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Unbound,
    Bound { claim: String },
}

/// An identity binding for encrypt/decrypt operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockContext {
    state: State,
}

impl LockContext {
    /// A fresh, unbound context.
    pub fn new() -> Self {
        Self {
            state: State::Unbound,
        }
    }

    /// Exchanges the session token for an identity claim and returns the
    /// bound context. `self` is unchanged on failure.
    pub async fn identify(
        &self,
        token: SessionToken,
        service: &impl IdentityService,
    ) -> Result<LockContext, LockContextError> {
        let claim = service.exchange(&token).await?;

        Ok(LockContext {
            state: State::Bound { claim },
        })
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound { .. })
    }

    pub fn identity_claim(&self) -> Option<&str> {
        match &self.state {
            State::Bound { claim } => Some(claim),
            State::Unbound => None,
        }
    }

    /// The derivation context entries this lock context contributes to key
    /// requests. Empty while unbound.
    pub(crate) fn to_context(&self) -> Vec<Context> {
        match &self.state {
            State::Bound { claim } => vec![Context::new_identity_claim(claim)],
            State::Unbound => Vec::new(),
        }
    }
}

impl Default for LockContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::b64_encode;

    fn jwt_with_sub(sub: &str) -> String {
        let header = b64_encode(br#"{"alg":"none"}"#);
        let payload = b64_encode(format!(r#"{{"sub":"{sub}"}}"#));
        format!("{header}.{payload}.")
    }

    struct LocalExchange;

    #[async_trait]
    impl IdentityService for LocalExchange {
        async fn exchange(&self, token: &SessionToken) -> Result<String, LockContextError> {
            token.subject()
        }
    }

    #[test]
    fn subject_is_decoded_from_the_payload_segment() {
        let token = SessionToken::new(jwt_with_sub("user-42"));
        assert_eq!(token.subject().unwrap(), "user-42");
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(SessionToken::new("not-a-jwt").subject().is_err());
    }

    #[tokio::test]
    async fn identify_binds_the_context() {
        let unbound = LockContext::new();
        assert!(!unbound.is_bound());

        let bound = unbound
            .identify(SessionToken::new(jwt_with_sub("user-42")), &LocalExchange)
            .await
            .unwrap();

        assert!(bound.is_bound());
        assert_eq!(bound.identity_claim(), Some("user-42"));
        // The original context is unaffected
        assert!(!unbound.is_bound());
    }

    #[tokio::test]
    async fn identify_failure_leaves_the_context_unbound() {
        let unbound = LockContext::new();
        let result = unbound
            .identify(SessionToken::new("garbage"), &LocalExchange)
            .await;

        assert!(result.is_err());
        assert!(!unbound.is_bound());
    }
}
