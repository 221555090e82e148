use serde::{Deserialize, Serialize};

use crate::query::QueryType;

/// Default hash function count for match index bloom filters.
pub(crate) const DEFAULT_MATCH_K: usize = 6;

/// Default match index bloom filter size in bits.
pub(crate) const DEFAULT_MATCH_M: usize = 2048;

/// The data type a column's plaintext values are cast to before encryption
/// and indexing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CastType {
    #[default]
    Utf8Str,
    Float,
    Boolean,
    Date,
    BigInt,
    Json,
    JsonB,
}

impl CastType {
    pub fn is_json(&self) -> bool {
        matches!(self, CastType::Json | CastType::JsonB)
    }
}

impl std::fmt::Display for CastType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CastType::Utf8Str => "Utf8Str",
            CastType::Float => "Float",
            CastType::Boolean => "Boolean",
            CastType::Date => "Date",
            CastType::BigInt => "BigInt",
            CastType::Json => "Json",
            CastType::JsonB => "JsonB",
        };

        write!(f, "{text}")
    }
}

/// Splits text into the tokens fed to the match index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Tokenizer {
    /// Split on any non-alphanumeric boundary.
    Standard,
    /// Emit every substring of `token_length` characters.
    Ngram { token_length: usize },
}

/// Normalizes tokens before hashing or HMACing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TokenFilter {
    Downcase,
}

/// Options for the match (full-text) index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchOpts {
    pub tokenizer: Tokenizer,
    pub token_filters: Vec<TokenFilter>,
    /// Number of hash functions per token.
    pub k: usize,
    /// Bloom filter size in bits.
    pub m: usize,
    /// Also index the whole (filtered) value as a single token.
    pub include_original: bool,
}

impl Default for MatchOpts {
    fn default() -> Self {
        Self {
            tokenizer: Tokenizer::Ngram { token_length: 3 },
            token_filters: vec![TokenFilter::Downcase],
            k: DEFAULT_MATCH_K,
            m: DEFAULT_MATCH_M,
            include_original: false,
        }
    }
}

/// The kinds of search index that can be enabled on a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IndexType {
    Unique {
        token_filters: Vec<TokenFilter>,
    },
    Match(MatchOpts),
    Ore,
    SteVec {
        /// Selector prefix. Resolved to `{table}/{column}` at table build
        /// time when not given explicitly.
        prefix: Option<String>,
    },
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Unique { .. } => "unique",
            IndexType::Match(_) => "match",
            IndexType::Ore => "ore",
            IndexType::SteVec { .. } => "ste_vec",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Index {
    pub index_type: IndexType,
}

impl Index {
    pub fn new(index_type: IndexType) -> Self {
        Self { index_type }
    }
}

/// Declarative configuration for a single encrypted column.
///
/// Built with chained methods, the same way the schema config crate builds
/// column definitions:
///
/// ```
/// use cipherstash_protect::schema::ColumnConfig;
///
/// let config = ColumnConfig::build("email")
///     .equality()
///     .free_text_search()
///     .order_and_range();
/// # assert_eq!(config.name, "email");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnConfig {
    /// The declared column name. May differ from the final dotted path
    /// segment; used for ste-vec selector prefixes.
    pub name: String,
    pub cast_type: CastType,
    pub indexes: Vec<Index>,
}

impl ColumnConfig {
    /// Builds a column with no indexes, cast as `Utf8Str`.
    pub fn build(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cast_type: CastType::default(),
            indexes: Default::default(),
        }
    }

    /// Consumes self and sets the cast type.
    pub fn casts_as(mut self, cast_type: CastType) -> Self {
        self.cast_type = cast_type;
        self
    }

    /// Enables the equality (HMAC) index.
    pub fn equality(self) -> Self {
        self.equality_with(vec![])
    }

    /// Enables the equality index with token filters applied before hashing.
    pub fn equality_with(mut self, token_filters: Vec<TokenFilter>) -> Self {
        self.indexes
            .push(Index::new(IndexType::Unique { token_filters }));
        self
    }

    /// Enables the match (full-text) index with default options.
    pub fn free_text_search(self) -> Self {
        self.free_text_search_with(MatchOpts::default())
    }

    /// Enables the match index with explicit options.
    pub fn free_text_search_with(mut self, opts: MatchOpts) -> Self {
        self.indexes.push(Index::new(IndexType::Match(opts)));
        self
    }

    /// Enables the order-revealing index used for range queries and sorting.
    pub fn order_and_range(mut self) -> Self {
        self.indexes.push(Index::new(IndexType::Ore));
        self
    }

    /// Enables the ste-vec index for encrypted-JSON queries. The selector
    /// prefix defaults to `{table}/{column}`.
    pub fn searchable_json(mut self) -> Self {
        self.indexes
            .push(Index::new(IndexType::SteVec { prefix: None }));
        if !self.cast_type.is_json() {
            self.cast_type = CastType::JsonB;
        }
        self
    }

    /// Enables the ste-vec index with an explicit selector prefix.
    pub fn searchable_json_with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.indexes.push(Index::new(IndexType::SteVec {
            prefix: Some(prefix.into()),
        }));
        if !self.cast_type.is_json() {
            self.cast_type = CastType::JsonB;
        }
        self
    }

    pub fn index_for_query(&self, query_type: &QueryType) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|index| query_type.supported_by(&index.index_type))
    }

    pub fn supports_query(&self, query_type: &QueryType) -> bool {
        self.index_for_query(query_type).is_some()
    }

    pub fn ste_vec_index(&self) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|index| matches!(index.index_type, IndexType::SteVec { .. }))
    }

    /// The resolved ste-vec selector prefix, if this column is
    /// JSON-searchable. Only meaningful after the table builder has resolved
    /// default prefixes.
    pub fn ste_vec_prefix(&self) -> Option<&str> {
        self.indexes.iter().find_map(|index| match &index.index_type {
            IndexType::SteVec { prefix } => prefix.as_deref(),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_indexes() {
        let config = ColumnConfig::build("email")
            .equality()
            .free_text_search()
            .order_and_range();

        assert_eq!(config.indexes.len(), 3);
        assert!(matches!(
            config.indexes[0].index_type,
            IndexType::Unique { .. }
        ));
        assert!(matches!(config.indexes[1].index_type, IndexType::Match(_)));
        assert!(matches!(config.indexes[2].index_type, IndexType::Ore));
    }

    #[test]
    fn searchable_json_forces_json_cast() {
        let config = ColumnConfig::build("metadata").searchable_json();
        assert_eq!(config.cast_type, CastType::JsonB);
        assert!(config.ste_vec_index().is_some());
        assert!(config.ste_vec_prefix().is_none());
    }

    #[test]
    fn explicit_prefix_is_kept() {
        let config =
            ColumnConfig::build("metadata").searchable_json_with_prefix("docs/meta");
        assert_eq!(config.ste_vec_prefix(), Some("docs/meta"));
    }
}
