//! Client configuration: credentials for the key and identity services,
//! sourced from explicit builder values or the environment.

use url::Url;
use uuid::Uuid;

use crate::errors::{ConfigBuildError, InitError};
use crate::identity::CtsClient;
use crate::zerokms::{ClientKey, Keyset, ZeroKmsClient};

pub const CS_WORKSPACE_ID: &str = "CS_WORKSPACE_ID";
pub const CS_CLIENT_ID: &str = "CS_CLIENT_ID";
pub const CS_CLIENT_KEY: &str = "CS_CLIENT_KEY";
pub const CS_CLIENT_ACCESS_KEY: &str = "CS_CLIENT_ACCESS_KEY";
pub const CS_ZEROKMS_HOST: &str = "CS_ZEROKMS_HOST";
pub const CS_CTS_HOST: &str = "CS_CTS_HOST";
pub const CS_KEYSET_NAME: &str = "CS_KEYSET_NAME";
pub const CS_KEYSET_ID: &str = "CS_KEYSET_ID";

const DEFAULT_ZEROKMS_HOST: &str = "https://zerokms.cipherstash.com";
const DEFAULT_CTS_HOST: &str = "https://cts.cipherstash.com";

#[derive(Debug, Clone)]
pub struct ProtectConfigBuilder {
    workspace_id: Option<String>,
    client_id: Option<String>,
    client_key: Option<String>,
    access_key: Option<String>,
    zerokms_host: String,
    cts_host: String,
    keyset: Option<Keyset>,
}

impl Default for ProtectConfigBuilder {
    fn default() -> Self {
        Self {
            workspace_id: None,
            client_id: None,
            client_key: None,
            access_key: None,
            zerokms_host: DEFAULT_ZEROKMS_HOST.to_string(),
            cts_host: DEFAULT_CTS_HOST.to_string(),
            keyset: None,
        }
    }
}

impl ProtectConfigBuilder {
    pub fn workspace_id(mut self, value: &str) -> Self {
        self.workspace_id = Some(value.to_string());
        self
    }

    pub fn client_id(mut self, value: &str) -> Self {
        self.client_id = Some(value.to_string());
        self
    }

    /// Hex-encoded workspace client key material.
    pub fn client_key(mut self, value: &str) -> Self {
        self.client_key = Some(value.to_string());
        self
    }

    pub fn access_key(mut self, value: &str) -> Self {
        self.access_key = Some(value.to_string());
        self
    }

    pub fn zerokms_host(mut self, value: &str) -> Self {
        self.zerokms_host = value.to_string();
        self
    }

    pub fn cts_host(mut self, value: &str) -> Self {
        self.cts_host = value.to_string();
        self
    }

    /// Namespaces all derived keys under a tenant-specific keyset.
    pub fn keyset(mut self, value: Keyset) -> Self {
        self.keyset = Some(value);
        self
    }

    /// Fills unset values from the environment. Explicit setters win.
    pub fn with_env(mut self) -> Self {
        if self.workspace_id.is_none() {
            self.workspace_id = std::env::var(CS_WORKSPACE_ID).ok();
        }

        if self.client_id.is_none() {
            self.client_id = std::env::var(CS_CLIENT_ID).ok();
        }

        if self.client_key.is_none() {
            self.client_key = std::env::var(CS_CLIENT_KEY).ok();
        }

        if self.access_key.is_none() {
            self.access_key = std::env::var(CS_CLIENT_ACCESS_KEY).ok();
        }

        if let Ok(value) = std::env::var(CS_ZEROKMS_HOST) {
            self.zerokms_host = value;
        }

        if let Ok(value) = std::env::var(CS_CTS_HOST) {
            self.cts_host = value;
        }

        if self.keyset.is_none() {
            if let Ok(value) = std::env::var(CS_KEYSET_NAME) {
                self.keyset = Some(Keyset::Name(value));
            } else if let Ok(value) = std::env::var(CS_KEYSET_ID) {
                self.keyset = Uuid::parse_str(&value).ok().map(Keyset::Id);
            }
        }

        self
    }

    pub fn build(self) -> Result<ProtectConfig, ConfigBuildError> {
        Ok(ProtectConfig {
            workspace_id: self
                .workspace_id
                .ok_or(ConfigBuildError::ValueNotSet("workspace_id"))?,
            client_id: self
                .client_id
                .ok_or(ConfigBuildError::ValueNotSet("client_id"))?,
            client_key: self
                .client_key
                .ok_or(ConfigBuildError::ValueNotSet("client_key"))?,
            access_key: self
                .access_key
                .ok_or(ConfigBuildError::ValueNotSet("access_key"))?,
            zerokms_host: self.zerokms_host.parse()?,
            cts_host: self.cts_host.parse()?,
            keyset: self.keyset,
        })
    }
}

/// Validated client configuration.
#[derive(Clone)]
pub struct ProtectConfig {
    workspace_id: String,
    client_id: String,
    client_key: String,
    access_key: String,
    zerokms_host: Url,
    cts_host: Url,
    keyset: Option<Keyset>,
}

impl ProtectConfig {
    pub fn builder() -> ProtectConfigBuilder {
        ProtectConfigBuilder::default()
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn keyset(&self) -> Option<&Keyset> {
        self.keyset.as_ref()
    }

    pub(crate) fn create_zerokms_client(&self) -> Result<ZeroKmsClient, InitError> {
        let material = hex::decode(&self.client_key).map_err(|e| {
            InitError::Config(ConfigBuildError::InvalidClientKey(e.to_string()))
        })?;

        let client_key = ClientKey::from_bytes(self.client_id.clone(), &material)?;

        Ok(ZeroKmsClient::builder()
            .base_url(self.zerokms_host.clone())
            .client_key(client_key)
            .access_key(self.access_key.as_str())
            .build()?)
    }

    pub fn create_identity_service(&self) -> CtsClient {
        CtsClient::new(self.cts_host.clone())
    }
}
