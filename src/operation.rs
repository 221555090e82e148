//! Deferred operation objects.
//!
//! Every public call on the client returns an operation that holds its
//! inputs and builder-style configuration. A lock context and audit
//! metadata can be attached between construction and execution; the
//! operation runs when `execute` is called or when it is awaited directly.

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use futures::future::Either;
use log::info;
use serde_json::Value;

use crate::client::ProtectClient;
use crate::encryption::Plaintext;
use crate::eql::EncryptedPayload;
use crate::errors::{ConfigError, Error};
use crate::identity::LockContext;
use crate::pipeline::{self, BulkDecryptItem, BulkDecryptedItem, BulkEncryptItem};
use crate::query::{self, QueryTerm, SearchTerm};
use crate::zerokms::{Context, KeyService};

/// One bulk-encrypt output: the input's correlation id and its payload
/// (null inputs yield a null payload in the same position).
pub struct BulkEncryptedItem {
    pub id: Option<String>,
    pub data: Option<EncryptedPayload>,
}

/// Builder state shared by every operation.
#[derive(Default)]
pub(crate) struct OpParts {
    lock_context: Option<LockContext>,
    audit: Option<Value>,
}

impl OpParts {
    /// The derivation context for this operation's key requests. Attaching
    /// an unbound lock context is a configuration error.
    fn context(&self) -> Result<Vec<Context>, Error> {
        match &self.lock_context {
            None => Ok(Vec::new()),
            Some(lc) if lc.is_bound() => Ok(lc.to_context()),
            Some(_) => Err(Error::Config(ConfigError::UnboundLockContext)),
        }
    }

    fn emit_audit(&self, op: &str) {
        if let Some(metadata) = &self.audit {
            info!(target: "cipherstash_protect::audit", "{op} {metadata}");
        }
    }
}

macro_rules! impl_operation {
    ($op:ident => $out:ty, $label:literal) => {
        impl<'c, K: KeyService> $op<'c, K> {
            /// Binds this operation to an identified lock context. Every key
            /// request it makes will carry the context's identity claim.
            pub fn with_lock_context(mut self, lock_context: LockContext) -> Self {
                self.parts.lock_context = Some(lock_context);
                self
            }

            /// Attaches audit metadata, emitted when the operation executes.
            pub fn audit(mut self, metadata: Value) -> Self {
                self.parts.audit = Some(metadata);
                self
            }

            /// Runs the operation.
            pub async fn execute(self) -> Result<$out, Error> {
                self.parts.emit_audit($label);
                let context = self.parts.context()?;
                self.run(context).await
            }

            /// Runs the operation, resolving to `Error::Canceled` if the
            /// cancellation future completes first. The in-flight key
            /// request is dropped, not awaited.
            pub async fn execute_with_cancel<F>(self, cancel: F) -> Result<$out, Error>
            where
                F: Future<Output = ()> + Send,
            {
                let exec = self.execute();
                futures::pin_mut!(exec);
                futures::pin_mut!(cancel);

                match futures::future::select(exec, cancel).await {
                    Either::Left((result, _)) => result,
                    Either::Right(((), _)) => Err(Error::Canceled),
                }
            }
        }

        impl<'c, K: KeyService + 'c> IntoFuture for $op<'c, K> {
            type Output = Result<$out, Error>;
            type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'c>>;

            fn into_future(self) -> Self::IntoFuture {
                Box::pin(self.execute())
            }
        }
    };
}

/// Encrypts a single value for a column.
pub struct EncryptOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) plaintext: Plaintext,
    pub(crate) table: String,
    pub(crate) column: String,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> EncryptOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Option<EncryptedPayload>, Error> {
        let (table, column) = self.client.schema().resolve(&self.table, &self.column)?;

        let mut results = pipeline::encrypt_values(
            self.client,
            vec![BulkEncryptItem {
                id: None,
                plaintext: self.plaintext,
            }],
            table,
            column,
            context,
        )
        .await?;

        Ok(results.remove(0).1)
    }
}

impl_operation!(EncryptOp => Option<EncryptedPayload>, "encrypt");

/// Decrypts a single payload back to its plaintext.
pub struct DecryptOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) payload: Option<EncryptedPayload>,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> DecryptOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Option<Plaintext>, Error> {
        let mut results = pipeline::decrypt_values(
            self.client,
            vec![BulkDecryptItem {
                id: None,
                payload: self.payload,
            }],
            context,
        )
        .await?;

        // Single decrypt surfaces the item failure as the call's failure
        results.remove(0).result
    }
}

impl_operation!(DecryptOp => Option<Plaintext>, "decrypt");

/// Encrypts a batch of values for one column in a single key request.
pub struct BulkEncryptOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) items: Vec<BulkEncryptItem>,
    pub(crate) table: String,
    pub(crate) column: String,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> BulkEncryptOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Vec<BulkEncryptedItem>, Error> {
        let (table, column) = self.client.schema().resolve(&self.table, &self.column)?;

        let results =
            pipeline::encrypt_values(self.client, self.items, table, column, context).await?;

        Ok(results
            .into_iter()
            .map(|(id, data)| BulkEncryptedItem { id, data })
            .collect())
    }
}

impl_operation!(BulkEncryptOp => Vec<BulkEncryptedItem>, "bulk_encrypt");

/// Decrypts a batch of payloads. Per-item failures are reported inline; the
/// call itself fails only if the key batch as a whole fails.
pub struct BulkDecryptOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) items: Vec<BulkDecryptItem>,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> BulkDecryptOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Vec<BulkDecryptedItem>, Error> {
        pipeline::decrypt_values(self.client, self.items, context).await
    }
}

impl_operation!(BulkDecryptOp => Vec<BulkDecryptedItem>, "bulk_decrypt");

/// Encrypts every schema-declared field of a record.
pub struct EncryptModelOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) record: Value,
    pub(crate) table: String,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> EncryptModelOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Value, Error> {
        let table = self.client.schema().table(&self.table)?;

        let mut results =
            pipeline::model::encrypt_models(self.client, vec![self.record], table, context)
                .await?;

        Ok(results.remove(0))
    }
}

impl_operation!(EncryptModelOp => Value, "encrypt_model");

/// Decrypts every encrypted-payload field of a record.
pub struct DecryptModelOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) record: Value,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> DecryptModelOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Value, Error> {
        let mut results =
            pipeline::model::decrypt_models(self.client, vec![self.record], context).await?;

        Ok(results.remove(0))
    }
}

impl_operation!(DecryptModelOp => Value, "decrypt_model");

/// Encrypts a batch of records in a single key request.
pub struct BulkEncryptModelsOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) records: Vec<Value>,
    pub(crate) table: String,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> BulkEncryptModelsOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Vec<Value>, Error> {
        let table = self.client.schema().table(&self.table)?;
        pipeline::model::encrypt_models(self.client, self.records, table, context).await
    }
}

impl_operation!(BulkEncryptModelsOp => Vec<Value>, "bulk_encrypt_models");

/// Decrypts a batch of records in a single key request. The whole batch
/// fails on the first record that cannot be decrypted.
pub struct BulkDecryptModelsOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) records: Vec<Value>,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> BulkDecryptModelsOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Vec<Value>, Error> {
        pipeline::model::decrypt_models(self.client, self.records, context).await
    }
}

impl_operation!(BulkDecryptModelsOp => Vec<Value>, "bulk_decrypt_models");

/// Builds an encrypted query term for a single plaintext search term.
pub struct EncryptQueryOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) term: SearchTerm,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> EncryptQueryOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<QueryTerm, Error> {
        let mut results =
            query::create_search_terms(self.client, vec![self.term], context).await?;

        Ok(results.remove(0))
    }
}

impl_operation!(EncryptQueryOp => QueryTerm, "encrypt_query");

/// Builds encrypted query terms for many search terms in one key request.
pub struct CreateSearchTermsOp<'c, K: KeyService> {
    pub(crate) client: &'c ProtectClient<K>,
    pub(crate) terms: Vec<SearchTerm>,
    pub(crate) parts: OpParts,
}

impl<'c, K: KeyService> CreateSearchTermsOp<'c, K> {
    async fn run(self, context: Vec<Context>) -> Result<Vec<QueryTerm>, Error> {
        query::create_search_terms(self.client, self.terms, context).await
    }
}

impl_operation!(CreateSearchTermsOp => Vec<QueryTerm>, "create_search_terms");
