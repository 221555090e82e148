#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use cipherstash_protect::encryption::{IndexRootKey, IV_LEN};
use cipherstash_protect::schema::CastType;
use cipherstash_protect::zerokms::{
    canonical_context, Context, DataKey, GenerateKeyPayload, KeyService, Keyset,
    RetrieveKeyPayload,
};
use cipherstash_protect::{ColumnConfig, ProtectClient, Table, ZeroKmsError};

type HmacSha256 = Hmac<Sha256>;

/// Deterministic in-process key service.
///
/// Key derivation mirrors the production client-key mixing: the final key
/// depends on the IV, the descriptor and the full derivation context, so
/// identity-bound payloads fail closed under a different claim exactly as
/// they do against the remote service.
pub struct TestKeyService {
    seed: [u8; 32],
    counter: AtomicU64,
}

impl TestKeyService {
    pub fn new() -> Self {
        Self {
            seed: [7; 32],
            counter: AtomicU64::new(1),
        }
    }

    fn next_iv(&self) -> [u8; IV_LEN] {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut iv = [0u8; IV_LEN];
        iv[..8].copy_from_slice(&n.to_be_bytes());
        iv
    }

    fn derive(&self, iv: &[u8; IV_LEN], descriptor: &str, context: &[Context]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.seed).expect("any key length works");
        mac.update(iv);
        mac.update(descriptor.as_bytes());
        mac.update(&canonical_context(context));
        mac.finalize().into_bytes().into()
    }
}

#[async_trait]
impl KeyService for TestKeyService {
    async fn generate_keys(
        &self,
        payloads: Vec<GenerateKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        Ok(payloads
            .into_iter()
            .map(|payload| {
                let iv = self.next_iv();
                DataKey::new(iv, self.derive(&iv, &payload.descriptor, &payload.context))
            })
            .collect())
    }

    async fn retrieve_keys(
        &self,
        payloads: Vec<RetrieveKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        Ok(payloads
            .into_iter()
            .map(|payload| {
                DataKey::new(
                    payload.iv,
                    self.derive(&payload.iv, &payload.descriptor, &payload.context),
                )
            })
            .collect())
    }

    async fn index_root_key(
        &self,
        keyset: Option<&Keyset>,
    ) -> Result<IndexRootKey, ZeroKmsError> {
        let mut mac = HmacSha256::new_from_slice(&self.seed).expect("any key length works");
        mac.update(b"index-root");
        if let Some(keyset) = keyset {
            mac.update(keyset.descriptor().as_bytes());
        }
        Ok(IndexRootKey::from_bytes(mac.finalize().into_bytes().into()))
    }
}

/// A key service whose key endpoints are unreachable. Initialization still
/// succeeds so clients can be built before the outage is simulated.
pub struct UnreachableKeyService;

#[async_trait]
impl KeyService for UnreachableKeyService {
    async fn generate_keys(
        &self,
        _payloads: Vec<GenerateKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        Err(ZeroKmsError::Transport("connection refused".to_string()))
    }

    async fn retrieve_keys(
        &self,
        _payloads: Vec<RetrieveKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        Err(ZeroKmsError::Transport("connection refused".to_string()))
    }

    async fn index_root_key(
        &self,
        _keyset: Option<&Keyset>,
    ) -> Result<IndexRootKey, ZeroKmsError> {
        Ok(IndexRootKey::from_bytes([0; 32]))
    }
}

/// A key service that never answers key requests. Used to exercise
/// cancellation of in-flight operations.
pub struct PendingKeyService;

#[async_trait]
impl KeyService for PendingKeyService {
    async fn generate_keys(
        &self,
        _payloads: Vec<GenerateKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        std::future::pending().await
    }

    async fn retrieve_keys(
        &self,
        _payloads: Vec<RetrieveKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError> {
        std::future::pending().await
    }

    async fn index_root_key(
        &self,
        _keyset: Option<&Keyset>,
    ) -> Result<IndexRootKey, ZeroKmsError> {
        Ok(IndexRootKey::from_bytes([0; 32]))
    }
}

pub fn users_table() -> Table {
    Table::build("users")
        .column(
            "email",
            ColumnConfig::build("email")
                .equality()
                .free_text_search()
                .order_and_range(),
        )
        .column("name", ColumnConfig::build("name").equality())
        .column(
            "age",
            ColumnConfig::build("age")
                .casts_as(CastType::BigInt)
                .equality()
                .order_and_range(),
        )
        .nested("profile", |profile| {
            profile
                .column("field", ColumnConfig::build("field").equality())
                .nested("nested", |nested| {
                    nested.column("deeper", ColumnConfig::build("deeper").equality())
                })
        })
        .finish()
        .expect("users schema builds")
}

pub fn docs_table() -> Table {
    Table::build("docs")
        .column("metadata", ColumnConfig::build("metadata").searchable_json())
        .column("notes", ColumnConfig::build("notes").equality())
        .finish()
        .expect("docs schema builds")
}

pub async fn test_client() -> ProtectClient<TestKeyService> {
    let _ = env_logger::builder().is_test(true).try_init();

    ProtectClient::init_with_key_service(
        TestKeyService::new(),
        vec![users_table(), docs_table()],
        None,
    )
    .await
    .expect("client initializes")
}
