//! The query-term encryptor: turns a plaintext search term into the index
//! token(s) a database can match against stored ciphertext.

use serde_json::Value;

use crate::client::ProtectClient;
use crate::encryption::{
    flatten_json_to_leaves, parse_path_expression, seal_with_aad, selector, IndexTerm, Plaintext,
};
use crate::eql::{EncryptedPayload, Identifier, SteVecEntry};
use crate::errors::{ConfigError, EncryptError, Error};
use crate::schema::{Column, IndexType};
use crate::zerokms::{Context, DataKey, GenerateKeyPayload, KeyService};

/// The query shape a term is built for. Each variant is permitted only on
/// columns whose config enables the corresponding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Equality,
    FreeTextSearch,
    OrderAndRange,
    SteVecSelector,
    SteVecTerm,
    /// Valid only on searchable-json columns: infers selector vs containment
    /// from the term's plaintext type.
    SearchableJson,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Equality => "equality",
            QueryType::FreeTextSearch => "freeTextSearch",
            QueryType::OrderAndRange => "orderAndRange",
            QueryType::SteVecSelector => "steVecSelector",
            QueryType::SteVecTerm => "steVecTerm",
            QueryType::SearchableJson => "searchableJson",
        }
    }

    /// The column-config builder method that would enable this query type;
    /// named in the `ConfigError` when the gate fails.
    pub fn builder_method(&self) -> &'static str {
        match self {
            QueryType::Equality => "equality()",
            QueryType::FreeTextSearch => "free_text_search()",
            QueryType::OrderAndRange => "order_and_range()",
            QueryType::SteVecSelector | QueryType::SteVecTerm | QueryType::SearchableJson => {
                "searchable_json()"
            }
        }
    }

    pub fn supported_by(&self, index: &IndexType) -> bool {
        matches!(
            (self, index),
            (QueryType::Equality, IndexType::Unique { .. })
                | (QueryType::FreeTextSearch, IndexType::Match(_))
                | (QueryType::OrderAndRange, IndexType::Ore)
                | (QueryType::SteVecSelector, IndexType::SteVec { .. })
                | (QueryType::SteVecTerm, IndexType::SteVec { .. })
                | (QueryType::SearchableJson, IndexType::SteVec { .. })
        )
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the returned term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// The canonical payload object.
    #[default]
    Eql,
    /// The storage composite literal string.
    CompositeLiteral,
    /// The composite literal as a JSON string.
    EscapedCompositeLiteral,
}

/// An encrypted query term in the requested return shape.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTerm {
    Payload(EncryptedPayload),
    CompositeLiteral(String),
    EscapedCompositeLiteral(String),
}

impl QueryTerm {
    pub fn payload(&self) -> Option<&EncryptedPayload> {
        match self {
            QueryTerm::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            QueryTerm::CompositeLiteral(s) | QueryTerm::EscapedCompositeLiteral(s) => Some(s),
            QueryTerm::Payload(_) => None,
        }
    }
}

/// One plaintext search term addressed at a column.
#[derive(Debug, Clone)]
pub struct SearchTerm {
    pub value: Value,
    pub table: String,
    pub column: String,
    pub query_type: Option<QueryType>,
    pub return_type: Option<ReturnType>,
}

impl SearchTerm {
    pub fn new(value: Value, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            value,
            table: table.into(),
            column: column.into(),
            query_type: None,
            return_type: None,
        }
    }

    pub fn query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = Some(query_type);
        self
    }

    pub fn return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = Some(return_type);
        self
    }
}

/// What a term needs from the key service before it can be finalized.
enum TermPlan<'c> {
    /// Index tokens only; no data key.
    Scalar {
        column: &'c Column,
        identifier: Identifier,
        plaintext: Plaintext,
        query_type: Option<QueryType>,
    },
    /// A path-only selector.
    Selector {
        identifier: Identifier,
        selector: String,
    },
    /// A selector with a value; consumes one data key for the `c` field.
    SelectorValue {
        identifier: Identifier,
        selector: String,
        leaf: Plaintext,
    },
    /// A containment term; consumes one data key shared by all entries.
    Containment {
        identifier: Identifier,
        prefix: String,
        value: Value,
    },
}

impl<'c> TermPlan<'c> {
    fn key_demand(&self) -> usize {
        match self {
            TermPlan::Scalar { .. } | TermPlan::Selector { .. } => 0,
            TermPlan::SelectorValue { .. } | TermPlan::Containment { .. } => 1,
        }
    }

    fn identifier(&self) -> &Identifier {
        match self {
            TermPlan::Scalar { identifier, .. }
            | TermPlan::Selector { identifier, .. }
            | TermPlan::SelectorValue { identifier, .. }
            | TermPlan::Containment { identifier, .. } => identifier,
        }
    }
}

/// Builds encrypted terms for a batch of plaintext search terms with at most
/// one key service round trip.
pub(crate) async fn create_search_terms<K: KeyService>(
    client: &ProtectClient<K>,
    terms: Vec<SearchTerm>,
    context: Vec<Context>,
) -> Result<Vec<QueryTerm>, Error> {
    let mut plans = Vec::with_capacity(terms.len());
    let mut return_types = Vec::with_capacity(terms.len());

    for term in &terms {
        return_types.push(term.return_type.unwrap_or_default());
        plans.push(plan_term(client, term)?);
    }

    let key_payloads: Vec<GenerateKeyPayload> = plans
        .iter()
        .flat_map(|plan| {
            std::iter::repeat_with(|| GenerateKeyPayload {
                descriptor: client.scoped_descriptor(plan.identifier()),
                context: context.clone(),
            })
            .take(plan.key_demand())
        })
        .collect();

    let mut keys = client
        .key_service()
        .generate_keys(key_payloads)
        .await
        .map_err(EncryptError::from)?
        .into_iter();

    plans
        .into_iter()
        .zip(return_types)
        .map(|(plan, return_type)| {
            let key = match plan.key_demand() {
                0 => None,
                _ => Some(keys.next().expect("one key was requested per demand")),
            };

            let payload = finalize_term(client, plan, key)?;
            shape_term(payload, return_type)
        })
        .collect()
}

fn plan_term<'c, K: KeyService>(
    client: &'c ProtectClient<K>,
    term: &SearchTerm,
) -> Result<TermPlan<'c>, Error> {
    let (table, column) = client.schema().resolve(&term.table, &term.column)?;
    let identifier = Identifier::new(table.name(), column.name());

    // The config gate: a query of type Q is permitted iff the column's
    // config enables the corresponding index
    if let Some(query_type) = term.query_type {
        if !column.config().supports_query(&query_type) {
            return Err(Error::Config(ConfigError::IndexNotConfigured {
                column: column.name().to_string(),
                query_type: query_type.to_string(),
                builder_method: query_type.builder_method().to_string(),
            }));
        }
    }

    let ste_vec_prefix = column.config().ste_vec_prefix().map(str::to_string);

    let effective = match (term.query_type, &ste_vec_prefix) {
        (Some(QueryType::SearchableJson), Some(_)) | (None, Some(_)) => {
            Some(infer_json_query(&term.value))
        }
        (None, None) => None,
        (other, _) => other,
    };

    match effective {
        Some(QueryType::SteVecSelector) => {
            let prefix = ste_vec_prefix.expect("gate checked the ste-vec index");
            plan_selector(term, identifier, prefix)
        }
        Some(QueryType::SteVecTerm) => {
            let prefix = ste_vec_prefix.expect("gate checked the ste-vec index");
            if !(term.value.is_object() || term.value.is_array()) {
                return Err(Error::Config(ConfigError::InvalidQueryTerm(format!(
                    "containment terms require a JSON object or array, got {}",
                    term.value
                ))));
            }
            Ok(TermPlan::Containment {
                identifier,
                prefix,
                value: term.value.clone(),
            })
        }
        query_type => {
            let plaintext = Plaintext::from_json_value(&term.value, column.config().cast_type)
                .map_err(EncryptError::from)?;

            Ok(TermPlan::Scalar {
                column,
                identifier,
                plaintext,
                query_type,
            })
        }
    }
}

/// Type-based inference for searchable-json columns: strings are path
/// selectors, objects and arrays are containment terms.
fn infer_json_query(value: &Value) -> QueryType {
    match value {
        Value::String(_) => QueryType::SteVecSelector,
        _ => QueryType::SteVecTerm,
    }
}

fn plan_selector(
    term: &SearchTerm,
    identifier: Identifier,
    prefix: String,
) -> Result<TermPlan<'static>, Error> {
    match &term.value {
        Value::String(expression) => Ok(TermPlan::Selector {
            identifier,
            selector: selector(&prefix, &parse_path_expression(expression)),
        }),
        Value::Array(segments) => {
            let segments: Vec<&str> = segments
                .iter()
                .map(|segment| {
                    segment.as_str().ok_or_else(|| {
                        Error::Config(ConfigError::InvalidQueryTerm(
                            "selector path segments must be strings".to_string(),
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;

            Ok(TermPlan::Selector {
                identifier,
                selector: selector(&prefix, &segments),
            })
        }
        // A path together with a value queries equality at that path and
        // emits both the selector and an encrypted value
        Value::Object(map) if map.contains_key("path") && map.contains_key("value") => {
            let expression = map["path"].as_str().ok_or_else(|| {
                Error::Config(ConfigError::InvalidQueryTerm(
                    "selector path must be a string".to_string(),
                ))
            })?;

            let leaves = flatten_json_to_leaves(&map["value"]);
            let leaf = match leaves.as_slice() {
                [only] if only.path.is_empty() => only.leaf.clone(),
                _ => {
                    return Err(Error::Config(ConfigError::InvalidQueryTerm(
                        "selector values must be scalar".to_string(),
                    )))
                }
            };

            Ok(TermPlan::SelectorValue {
                identifier,
                selector: selector(&prefix, &parse_path_expression(expression)),
                leaf,
            })
        }
        other => Err(Error::Config(ConfigError::InvalidQueryTerm(format!(
            "cannot build a selector from {other}"
        )))),
    }
}

fn finalize_term<K: KeyService>(
    client: &ProtectClient<K>,
    plan: TermPlan<'_>,
    key: Option<DataKey>,
) -> Result<EncryptedPayload, Error> {
    let cipher = client.cipher();

    match plan {
        TermPlan::Scalar {
            column,
            identifier,
            plaintext,
            query_type,
        } => {
            let mut payload = EncryptedPayload::scalar(identifier.clone());

            for index in &column.config().indexes {
                let wanted = match query_type {
                    Some(query_type) => query_type.supported_by(&index.index_type),
                    // No query type requested: emit every configured token
                    None => !matches!(index.index_type, IndexType::SteVec { .. }),
                };

                if !wanted {
                    continue;
                }

                let descriptor =
                    format!("{}#{}", identifier.descriptor(), index.index_type.as_str());

                match &index.index_type {
                    IndexType::Unique { token_filters } => {
                        if let IndexTerm::Binary(bytes) = cipher.unique_index(
                            &plaintext,
                            &descriptor,
                            token_filters.clone(),
                        )? {
                            payload.unique_index = Some(hex::encode(bytes));
                        }
                    }
                    IndexType::Match(opts) => {
                        if let IndexTerm::BitMap(positions) =
                            cipher.match_index(&plaintext, &descriptor, opts.clone())?
                        {
                            payload.match_index = Some(positions);
                        }
                    }
                    IndexType::Ore => {
                        if let IndexTerm::OreFull(bytes) =
                            cipher.ore_index(&plaintext, &descriptor)?
                        {
                            payload.ore_index = Some(hex::encode(bytes));
                        }
                    }
                    IndexType::SteVec { .. } => {}
                }
            }

            Ok(payload)
        }

        TermPlan::Selector {
            identifier,
            selector,
        } => {
            let mut payload = EncryptedPayload::ste_vec(identifier);
            payload.selector = Some(selector);
            Ok(payload)
        }

        TermPlan::SelectorValue {
            identifier,
            selector: leaf_selector,
            leaf,
        } => {
            let key = key.expect("planning demanded a key");

            let mut payload = EncryptedPayload::ste_vec(identifier);
            payload.ciphertext = Some(
                seal_with_aad(&leaf, &key, leaf_selector.as_bytes()).map_err(Error::Encrypt)?,
            );
            if let IndexTerm::Binary(bytes) = cipher.selector_term(&leaf, &leaf_selector)? {
                payload.unique_index = Some(hex::encode(bytes));
            }
            payload.selector = Some(leaf_selector);
            Ok(payload)
        }

        TermPlan::Containment {
            identifier,
            prefix,
            value,
        } => {
            let key = key.expect("planning demanded a key");

            let mut entries = Vec::new();
            for leaf in flatten_json_to_leaves(&value) {
                let leaf_selector = selector(&prefix, &leaf.path);

                let term = match cipher.selector_term(&leaf.leaf, &leaf_selector)? {
                    IndexTerm::Binary(bytes) => Some(hex::encode(bytes)),
                    _ => None,
                };

                let ciphertext = seal_with_aad(&leaf.leaf, &key, leaf_selector.as_bytes())
                    .map_err(Error::Encrypt)?;

                entries.push(SteVecEntry {
                    selector: leaf_selector,
                    ciphertext: Some(ciphertext),
                    term,
                });
            }

            let mut payload = EncryptedPayload::ste_vec(identifier);
            payload.ste_vec_index = Some(entries);
            Ok(payload)
        }
    }
}

fn shape_term(payload: EncryptedPayload, return_type: ReturnType) -> Result<QueryTerm, Error> {
    match return_type {
        ReturnType::Eql => Ok(QueryTerm::Payload(payload)),
        ReturnType::CompositeLiteral => Ok(QueryTerm::CompositeLiteral(
            payload.to_composite_literal().map_err(Error::Encoding)?,
        )),
        ReturnType::EscapedCompositeLiteral => Ok(QueryTerm::EscapedCompositeLiteral(
            payload
                .to_escaped_composite_literal()
                .map_err(Error::Encoding)?,
        )),
    }
}
