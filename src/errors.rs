use miette::Diagnostic;
use thiserror::Error;

pub use crate::schema::SchemaBuildError;

/// Error returned by `ProtectClient::init` when loading config or building schemas
#[derive(Error, Debug, Diagnostic)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigBuildError),

    #[error("SchemaBuildError: {0}")]
    SchemaBuild(#[from] SchemaBuildError),

    #[error("No schemas were provided to the client")]
    NoSchemas,

    #[error(transparent)]
    ZeroKms(#[from] ZeroKmsError),
}

/// Errors that occur while building or loading client configuration
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigBuildError {
    #[error("ConfigError - Value [{0}] was not set")]
    ValueNotSet(&'static str),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid client key material: {0}")]
    InvalidClientKey(String),

    #[error("Invalid keyset id: {0}")]
    InvalidKeysetId(String),
}

/// A query was requested that the target column's index config does not support
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Column \"{column}\" does not support {query_type} queries: add {builder_method} to the column config")]
    IndexNotConfigured {
        column: String,
        query_type: String,
        builder_method: String,
    },

    #[error("Invalid query term: {0}")]
    InvalidQueryTerm(String),

    #[error("Lock context must be identified before it can be attached to an operation")]
    UnboundLockContext,
}

/// A payload or operation referenced a table or column absent from the loaded schema
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    #[error("Unknown table \"{0}\"")]
    UnknownTable(String),

    #[error("Unknown column \"{table}.{column}\"")]
    UnknownColumn { table: String, column: String },
}

/// Error returned when encrypting a value or record
#[derive(Error, Debug, Diagnostic)]
pub enum EncryptError {
    #[error("TypeParseError: {0}")]
    TypeParse(#[from] TypeParseError),

    // Note that we don't expose the underlying cipher error here
    // so as to avoid leaking any information
    #[error("Failed to encrypt value")]
    CipherError,

    #[error("Indexing failed: {0}")]
    IndexingError(String),

    #[error(transparent)]
    ZeroKms(#[from] ZeroKmsError),
}

/// Error returned when decrypting a payload
#[derive(Error, Debug, Diagnostic)]
pub enum DecryptError {
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("Failed to decrypt value")]
    CipherError,

    #[error("TypeParseError: {0}")]
    TypeParse(#[from] TypeParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    ZeroKms(#[from] ZeroKmsError),
}

/// Error returned when a plaintext cannot be represented as the column's cast type
#[derive(Error, Debug, Diagnostic)]
#[error("Could not parse value as {expected}: {message}")]
pub struct TypeParseError {
    pub expected: &'static str,
    pub message: String,
}

impl TypeParseError {
    pub fn new(expected: &'static str, message: impl Into<String>) -> Self {
        Self {
            expected,
            message: message.into(),
        }
    }
}

/// Error returned when identifying a lock context against the identity service
#[derive(Error, Debug, Diagnostic)]
pub enum LockContextError {
    #[error("Malformed session token: {0}")]
    MalformedToken(String),

    #[error("Identity exchange failed: {0}")]
    ExchangeFailed(String),
}

/// Transport-level failure talking to the key service
#[derive(Error, Debug, Diagnostic)]
pub enum ZeroKmsError {
    #[error("Key service request failed: {0}")]
    Transport(String),

    #[error("Key service returned an unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Key service rejected the request: {0}")]
    Rejected(String),
}

/// Error returned when encoding or decoding the storage composite literal
#[derive(Error, Debug, Diagnostic)]
pub enum EncodingError {
    #[error("Malformed composite literal: {0}")]
    Malformed(String),

    #[error("PayloadParseError: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The [`enum@Error`] type abstracts all errors returned by `cipherstash-protect`
/// for easy use with the `?` operator.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("InitError: {0}")]
    Init(#[from] InitError),
    #[error("ConfigError: {0}")]
    Config(#[from] ConfigError),
    #[error("SchemaError: {0}")]
    Schema(#[from] SchemaError),
    #[error("EncryptError: {0}")]
    Encrypt(#[from] EncryptError),
    #[error("DecryptError: {0}")]
    Decrypt(#[from] DecryptError),
    #[error("LockContextError: {0}")]
    LockContext(#[from] LockContextError),
    #[error("ZeroKmsError: {0}")]
    ZeroKms(#[from] ZeroKmsError),
    #[error("EncodingError: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Operation was canceled")]
    Canceled,
}
