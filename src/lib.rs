//! CipherStash SDK for searchable, field-level encryption of SQL-stored
//! application data.
//!
//! Applications declare which columns are sensitive; every value is
//! encrypted under a fresh data key from the key service, and the emitted
//! payload carries the search index tokens its column config asks for, so
//! the database can evaluate equality, range, substring and encrypted-JSON
//! queries without ever seeing plaintext.
//!
//! The main entry point is [`ProtectClient`]. Every public call returns a
//! deferred operation that can carry a [`LockContext`] and audit metadata
//! before it executes:
//!
//! ```no_run
//! use cipherstash_protect::{ColumnConfig, ProtectClient, ProtectConfig, Table};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let users = Table::build("users")
//!     .column(
//!         "email",
//!         ColumnConfig::build("email")
//!             .equality()
//!             .free_text_search()
//!             .order_and_range(),
//!     )
//!     .finish()?;
//!
//! let config = ProtectConfig::builder().with_env().build()?;
//! let client = ProtectClient::init(config, vec![users]).await?;
//!
//! let payload = client.encrypt("alice@x.com", "users", "email").await?;
//! let _plaintext = client.decrypt(payload).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod encryption;
pub mod eql;
mod errors;
pub mod identity;
pub mod operation;
mod pipeline;
pub mod query;
pub mod schema;
pub mod zerokms;

pub use client::ProtectClient;
pub use config::{ProtectConfig, ProtectConfigBuilder};
pub use encryption::Plaintext;
pub use eql::{EncryptedPayload, Identifier, PayloadKind, SteVecEntry};
pub use errors::{
    ConfigBuildError, ConfigError, DecryptError, EncodingError, EncryptError, Error, InitError,
    LockContextError, SchemaBuildError, SchemaError, TypeParseError, ZeroKmsError,
};
pub use identity::{LockContext, SessionToken};
pub use operation::BulkEncryptedItem;
pub use pipeline::{BulkDecryptItem, BulkDecryptedItem, BulkEncryptItem};
pub use query::{QueryTerm, QueryType, ReturnType, SearchTerm};
pub use schema::{ColumnConfig, Table};
pub use zerokms::{Keyset, ZeroKmsClient};
