use std::collections::HashMap;

use log::info;
use serde_json::Value;

use crate::config::ProtectConfig;
use crate::encryption::{Plaintext, ScopedCipher};
use crate::eql::{EncryptedPayload, Identifier};
use crate::errors::{InitError, SchemaError};
use crate::operation::{
    BulkDecryptOp, BulkDecryptModelsOp, BulkEncryptModelsOp, BulkEncryptOp, CreateSearchTermsOp,
    DecryptModelOp, DecryptOp, EncryptModelOp, EncryptOp, EncryptQueryOp, OpParts,
};
use crate::pipeline::{BulkDecryptItem, BulkEncryptItem};
use crate::query::SearchTerm;
use crate::schema::{Column, Table};
use crate::zerokms::{KeyService, Keyset, ZeroKmsClient};

/// The immutable set of tables the client was initialized with.
pub(crate) struct Schema {
    tables: HashMap<String, Table>,
}

impl Schema {
    fn new(tables: Vec<Table>) -> Result<Self, InitError> {
        if tables.is_empty() {
            return Err(InitError::NoSchemas);
        }

        Ok(Self {
            tables: tables
                .into_iter()
                .map(|table| (table.name().to_string(), table))
                .collect(),
        })
    }

    pub(crate) fn table(&self, name: &str) -> Result<&Table, SchemaError> {
        self.tables
            .get(name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    /// Locates a column by table name and dotted path, falling back to the
    /// declared column name so payload identifiers resolve too.
    pub(crate) fn resolve(
        &self,
        table_name: &str,
        column: &str,
    ) -> Result<(&Table, &Column), SchemaError> {
        let table = self.table(table_name)?;

        table
            .resolve_column(column)
            .or_else(|| table.columns().find(|c| c.name() == column))
            .map(|c| (table, c))
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: table_name.to_string(),
                column: column.to_string(),
            })
    }
}

/// The encryption client: the single entry point for every pipeline.
///
/// The schema map and index cipher are built once at initialization and are
/// immutable afterwards, so a client can be shared freely across tasks.
pub struct ProtectClient<K: KeyService = ZeroKmsClient> {
    schema: Schema,
    cipher: ScopedCipher,
    key_service: K,
    keyset: Option<Keyset>,
}

impl ProtectClient<ZeroKmsClient> {
    /// Initializes a client against the remote key service.
    pub async fn init(
        config: ProtectConfig,
        schemas: Vec<Table>,
    ) -> Result<Self, InitError> {
        let keyset = config.keyset().cloned();
        let zerokms = config.create_zerokms_client()?;

        Self::init_with_key_service(zerokms, schemas, keyset).await
    }
}

impl<K: KeyService> ProtectClient<K> {
    /// Initializes a client over any key service implementation. Fetches
    /// the keyset-scoped index root key in the process.
    pub async fn init_with_key_service(
        key_service: K,
        schemas: Vec<Table>,
        keyset: Option<Keyset>,
    ) -> Result<Self, InitError> {
        info!("Initializing...");

        let schema = Schema::new(schemas)?;
        let root_key = key_service.index_root_key(keyset.as_ref()).await?;

        info!("Ready!");

        Ok(Self {
            schema,
            cipher: ScopedCipher::new(root_key),
            key_service,
            keyset,
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn cipher(&self) -> &ScopedCipher {
        &self.cipher
    }

    pub(crate) fn key_service(&self) -> &K {
        &self.key_service
    }

    /// The data-key descriptor for a column, namespaced by the keyset when
    /// one is configured.
    pub(crate) fn scoped_descriptor(&self, identifier: &Identifier) -> String {
        match &self.keyset {
            Some(keyset) => format!("{}/{}", keyset.descriptor(), identifier.descriptor()),
            None => identifier.descriptor(),
        }
    }

    /// Encrypts a single value for `table.column`. A null plaintext
    /// resolves to a null payload.
    pub fn encrypt(
        &self,
        plaintext: impl Into<Plaintext>,
        table: &str,
        column: &str,
    ) -> EncryptOp<'_, K> {
        EncryptOp {
            client: self,
            plaintext: plaintext.into(),
            table: table.to_string(),
            column: column.to_string(),
            parts: OpParts::default(),
        }
    }

    /// Decrypts a payload back to its plaintext. A null payload resolves to
    /// a null plaintext.
    pub fn decrypt(&self, payload: Option<EncryptedPayload>) -> DecryptOp<'_, K> {
        DecryptOp {
            client: self,
            payload,
            parts: OpParts::default(),
        }
    }

    /// Encrypts a batch of values for one column in a single key request.
    /// Output order matches input order; ids are restored per item.
    pub fn bulk_encrypt(
        &self,
        items: Vec<BulkEncryptItem>,
        table: &str,
        column: &str,
    ) -> BulkEncryptOp<'_, K> {
        BulkEncryptOp {
            client: self,
            items,
            table: table.to_string(),
            column: column.to_string(),
            parts: OpParts::default(),
        }
    }

    /// Decrypts a batch of payloads, reporting per-item failures inline.
    pub fn bulk_decrypt(&self, items: Vec<BulkDecryptItem>) -> BulkDecryptOp<'_, K> {
        BulkDecryptOp {
            client: self,
            items,
            parts: OpParts::default(),
        }
    }

    /// Encrypts every schema-declared field of a record; all other fields
    /// pass through unchanged.
    pub fn encrypt_model(&self, record: Value, table: &str) -> EncryptModelOp<'_, K> {
        EncryptModelOp {
            client: self,
            record,
            table: table.to_string(),
            parts: OpParts::default(),
        }
    }

    /// Decrypts every encrypted-payload field of a record.
    pub fn decrypt_model(&self, record: Value) -> DecryptModelOp<'_, K> {
        DecryptModelOp {
            client: self,
            record,
            parts: OpParts::default(),
        }
    }

    /// Encrypts a batch of records with one key request for the whole call.
    pub fn bulk_encrypt_models(
        &self,
        records: Vec<Value>,
        table: &str,
    ) -> BulkEncryptModelsOp<'_, K> {
        BulkEncryptModelsOp {
            client: self,
            records,
            table: table.to_string(),
            parts: OpParts::default(),
        }
    }

    /// Decrypts a batch of records with one key request for the whole call.
    pub fn bulk_decrypt_models(&self, records: Vec<Value>) -> BulkDecryptModelsOp<'_, K> {
        BulkDecryptModelsOp {
            client: self,
            records,
            parts: OpParts::default(),
        }
    }

    /// Builds the encrypted query term for one plaintext search term.
    pub fn encrypt_query(&self, term: SearchTerm) -> EncryptQueryOp<'_, K> {
        EncryptQueryOp {
            client: self,
            term,
            parts: OpParts::default(),
        }
    }

    /// Builds encrypted query terms for many search terms in one key
    /// request.
    pub fn create_search_terms(&self, terms: Vec<SearchTerm>) -> CreateSearchTermsOp<'_, K> {
        CreateSearchTermsOp {
            client: self,
            terms,
            parts: OpParts::default(),
        }
    }
}
