use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use url::Url;

use super::{
    canonical_context, ClientKey, Context, DataKey, GenerateKeyPayload, Keyset, KeyService,
    RetrieveKeyPayload,
};
use crate::encryption::{IndexRootKey, IV_LEN};
use crate::errors::ZeroKmsError;

type HmacSha256 = Hmac<Sha256>;

/// HTTP transport to the key service.
///
/// The service never sees or returns usable keys: every response carries
/// raw key material that is mixed with the workspace client key (and the
/// request's derivation context) locally before use.
pub struct ZeroKmsClient {
    base_url: Url,
    http: reqwest::Client,
    client_key: ClientKey,
    access_key: String,
}

pub struct ZeroKmsClientBuilder {
    base_url: Option<Url>,
    client_key: Option<ClientKey>,
    access_key: Option<String>,
}

impl ZeroKmsClientBuilder {
    pub fn base_url(mut self, value: Url) -> Self {
        self.base_url = Some(value);
        self
    }

    pub fn client_key(mut self, value: ClientKey) -> Self {
        self.client_key = Some(value);
        self
    }

    pub fn access_key(mut self, value: impl Into<String>) -> Self {
        self.access_key = Some(value.into());
        self
    }

    pub fn build(self) -> Result<ZeroKmsClient, ZeroKmsError> {
        Ok(ZeroKmsClient {
            base_url: self
                .base_url
                .ok_or_else(|| ZeroKmsError::Rejected("base_url is required".to_string()))?,
            http: reqwest::Client::new(),
            client_key: self
                .client_key
                .ok_or_else(|| ZeroKmsError::Rejected("client_key is required".to_string()))?,
            access_key: self
                .access_key
                .ok_or_else(|| ZeroKmsError::Rejected("access_key is required".to_string()))?,
        })
    }
}

#[derive(Serialize)]
struct WireContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    identity_claim: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tag: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    value: Vec<WireContextValue>,
}

#[derive(Serialize)]
struct WireContextValue {
    key: String,
    value: String,
}

impl WireContext {
    fn from_entries(entries: &[Context]) -> Self {
        let mut wire = WireContext {
            identity_claim: Vec::new(),
            tag: Vec::new(),
            value: Vec::new(),
        };

        for entry in entries {
            match entry {
                Context::IdentityClaim(claim) => wire.identity_claim.push(claim.clone()),
                Context::Tag(tag) => wire.tag.push(tag.clone()),
                Context::Value { key, value } => wire.value.push(WireContextValue {
                    key: key.clone(),
                    value: value.clone(),
                }),
            }
        }

        wire
    }
}

#[derive(Serialize)]
struct GenerateKeysRequest {
    client_id: String,
    keys: Vec<GenerateKeyItem>,
}

#[derive(Serialize)]
struct GenerateKeyItem {
    descriptor: String,
    context: WireContext,
}

#[derive(Deserialize)]
struct GenerateKeysResponse {
    keys: Vec<GeneratedKeyItem>,
}

#[derive(Deserialize)]
struct GeneratedKeyItem {
    iv: String,
    key_material: String,
}

#[derive(Serialize)]
struct RetrieveKeysRequest {
    client_id: String,
    keys: Vec<RetrieveKeyItem>,
}

#[derive(Serialize)]
struct RetrieveKeyItem {
    iv: String,
    descriptor: String,
    context: WireContext,
}

#[derive(Deserialize)]
struct RetrieveKeysResponse {
    keys: Vec<RetrievedKeyItem>,
}

#[derive(Deserialize)]
struct RetrievedKeyItem {
    key_material: String,
}

#[derive(Serialize)]
struct RootKeyRequest {
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyset: Option<String>,
}

#[derive(Deserialize)]
struct RootKeyResponse {
    key_material: String,
}

impl ZeroKmsClient {
    pub fn builder() -> ZeroKmsClientBuilder {
        ZeroKmsClientBuilder {
            base_url: None,
            client_key: None,
            access_key: None,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ZeroKmsError> {
        self.base_url
            .join(path)
            .map_err(|e| ZeroKmsError::Rejected(e.to_string()))
    }

    async fn post<Req: Serialize, Res: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Res, ZeroKmsError> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(&self.access_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ZeroKmsError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ZeroKmsError::Rejected(format!(
                "{path} returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ZeroKmsError::InvalidResponse(e.to_string()))
    }

    /// Mixes served key material with the client key, the descriptor and the
    /// derivation context. This is the step that makes identity binding fail
    /// closed: a different context yields a different key.
    fn mix(&self, key_material: &[u8], descriptor: &str, context: &[Context]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(self.client_key.material())
            .expect("HMAC accepts any key length");
        mac.update(key_material);
        mac.update(descriptor.as_bytes());
        mac.update(&canonical_context(context));

        mac.finalize().into_bytes().into()
    }

    fn parse_iv(hex_iv: &str) -> Result<[u8; IV_LEN], ZeroKmsError> {
        let bytes =
            hex::decode(hex_iv).map_err(|e| ZeroKmsError::InvalidResponse(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| ZeroKmsError::InvalidResponse("unexpected IV length".to_string()))
    }
}

#[async_trait]
impl KeyService for ZeroKmsClient {
    async fn generate_keys(
        &self,
        payloads: Vec<GenerateKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let request = GenerateKeysRequest {
            client_id: self.client_key.client_id().to_string(),
            keys: payloads
                .iter()
                .map(|p| GenerateKeyItem {
                    descriptor: p.descriptor.clone(),
                    context: WireContext::from_entries(&p.context),
                })
                .collect(),
        };

        let response: GenerateKeysResponse = self.post("api/keys/generate", &request).await?;

        if response.keys.len() != payloads.len() {
            return Err(ZeroKmsError::InvalidResponse(format!(
                "expected {} keys, got {}",
                payloads.len(),
                response.keys.len()
            )));
        }

        response
            .keys
            .into_iter()
            .zip(payloads)
            .map(|(item, payload)| {
                let iv = Self::parse_iv(&item.iv)?;
                let material = hex::decode(&item.key_material)
                    .map_err(|e| ZeroKmsError::InvalidResponse(e.to_string()))?;

                Ok(DataKey::new(
                    iv,
                    self.mix(&material, &payload.descriptor, &payload.context),
                ))
            })
            .collect()
    }

    async fn retrieve_keys(
        &self,
        payloads: Vec<RetrieveKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let request = RetrieveKeysRequest {
            client_id: self.client_key.client_id().to_string(),
            keys: payloads
                .iter()
                .map(|p| RetrieveKeyItem {
                    iv: hex::encode(p.iv),
                    descriptor: p.descriptor.clone(),
                    context: WireContext::from_entries(&p.context),
                })
                .collect(),
        };

        let response: RetrieveKeysResponse = self.post("api/keys/retrieve", &request).await?;

        if response.keys.len() != payloads.len() {
            return Err(ZeroKmsError::InvalidResponse(format!(
                "expected {} keys, got {}",
                payloads.len(),
                response.keys.len()
            )));
        }

        response
            .keys
            .into_iter()
            .zip(payloads)
            .map(|(item, payload)| {
                let material = hex::decode(&item.key_material)
                    .map_err(|e| ZeroKmsError::InvalidResponse(e.to_string()))?;

                Ok(DataKey::new(
                    payload.iv,
                    self.mix(&material, &payload.descriptor, &payload.context),
                ))
            })
            .collect()
    }

    async fn index_root_key(
        &self,
        keyset: Option<&Keyset>,
    ) -> Result<IndexRootKey, ZeroKmsError> {
        let request = RootKeyRequest {
            client_id: self.client_key.client_id().to_string(),
            keyset: keyset.map(Keyset::descriptor),
        };

        let response: RootKeyResponse = self.post("api/keysets/root", &request).await?;

        let material = hex::decode(&response.key_material)
            .map_err(|e| ZeroKmsError::InvalidResponse(e.to_string()))?;

        let descriptor = keyset.map(Keyset::descriptor).unwrap_or_default();
        Ok(IndexRootKey::from_bytes(self.mix(&material, &descriptor, &[])))
    }
}
