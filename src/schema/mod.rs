//! The schema model: encrypted tables, columns and their index configs.
//!
//! A [`Table`] is built once at client construction and never mutated after.
//! Nested layouts are flattened into dotted paths so the model pipeline can
//! address a column anywhere inside a record:
//!
//! ```
//! use cipherstash_protect::schema::{ColumnConfig, Table};
//!
//! let table = Table::build("users")
//!     .column("email", ColumnConfig::build("email").equality())
//!     .nested("profile", |profile| {
//!         profile.column("address", ColumnConfig::build("address").equality())
//!     })
//!     .finish()
//!     .unwrap();
//!
//! assert!(table.resolve_column("profile.address").is_some());
//! ```

mod column;

pub use column::{
    CastType, ColumnConfig, Index, IndexType, MatchOpts, TokenFilter, Tokenizer,
};

use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;

/// Error returned while flattening and validating a table layout
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaBuildError {
    #[error("Duplicate column path \"{path}\" in table \"{table}\"")]
    DuplicatePath { table: String, path: String },

    #[error("Invalid config for column \"{path}\" in table \"{table}\": {reason}")]
    InvalidConfig {
        table: String,
        path: String,
        reason: String,
    },
}

/// An encrypted column, addressed by its dotted path within the table.
///
/// The `config.name` is the declared leaf name, which may differ from the
/// final path segment and is what selector prefixes are built from.
#[derive(Debug, Clone)]
pub struct Column {
    path: String,
    config: ColumnConfig,
}

impl Column {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ColumnConfig {
        &self.config
    }
}

/// An encrypted table: a name plus columns keyed by dotted path.
///
/// Columns keep their declaration order; lookup by path is O(1) through a
/// pre-built map of path to column index.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    lookup: HashMap<String, usize>,
}

impl Table {
    pub fn build(name: impl Into<String>) -> TableBuilder {
        TableBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve_column(&self, path: &str) -> Option<&Column> {
        self.lookup.get(path).map(|&i| &self.columns[i])
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }
}

/// Builder for a [`Table`]. Nested layouts are declared with closures and
/// flattened depth-first into dotted paths when `finish` runs.
pub struct TableBuilder {
    name: String,
    fields: Vec<(String, Field)>,
}

enum Field {
    Column(ColumnConfig),
    Nested(Vec<(String, Field)>),
}

/// Builder scope for a nested mapping inside a table layout.
pub struct NestedBuilder {
    fields: Vec<(String, Field)>,
}

impl NestedBuilder {
    pub fn column(mut self, field_name: impl Into<String>, config: ColumnConfig) -> Self {
        self.fields.push((field_name.into(), Field::Column(config)));
        self
    }

    pub fn nested(
        mut self,
        field_name: impl Into<String>,
        build: impl FnOnce(NestedBuilder) -> NestedBuilder,
    ) -> Self {
        let nested = build(NestedBuilder { fields: Vec::new() });
        self.fields
            .push((field_name.into(), Field::Nested(nested.fields)));
        self
    }
}

impl TableBuilder {
    pub fn column(mut self, field_name: impl Into<String>, config: ColumnConfig) -> Self {
        self.fields.push((field_name.into(), Field::Column(config)));
        self
    }

    pub fn nested(
        mut self,
        field_name: impl Into<String>,
        build: impl FnOnce(NestedBuilder) -> NestedBuilder,
    ) -> Self {
        let nested = build(NestedBuilder { fields: Vec::new() });
        self.fields
            .push((field_name.into(), Field::Nested(nested.fields)));
        self
    }

    /// Flattens the declared layout, resolves default selector prefixes and
    /// validates the result.
    pub fn finish(self) -> Result<Table, SchemaBuildError> {
        let mut columns = Vec::new();
        let mut lookup = HashMap::new();

        flatten(&self.name, None, self.fields, &mut columns, &mut lookup)?;

        for column in &mut columns {
            validate(&self.name, column)?;
            resolve_ste_vec_prefix(&self.name, column);
        }

        Ok(Table {
            name: self.name,
            columns,
            lookup,
        })
    }
}

fn flatten(
    table: &str,
    parent: Option<&str>,
    fields: Vec<(String, Field)>,
    columns: &mut Vec<Column>,
    lookup: &mut HashMap<String, usize>,
) -> Result<(), SchemaBuildError> {
    for (field_name, field) in fields {
        let path = match parent {
            Some(parent) => format!("{parent}.{field_name}"),
            None => field_name,
        };

        match field {
            Field::Column(config) => {
                if lookup.contains_key(&path) {
                    return Err(SchemaBuildError::DuplicatePath {
                        table: table.to_string(),
                        path,
                    });
                }

                lookup.insert(path.clone(), columns.len());
                columns.push(Column { path, config });
            }
            Field::Nested(nested) => {
                flatten(table, Some(&path), nested, columns, lookup)?;
            }
        }
    }

    Ok(())
}

fn validate(table: &str, column: &Column) -> Result<(), SchemaBuildError> {
    let has_ste_vec = column.config.ste_vec_index().is_some();
    let has_ore = column
        .config
        .indexes
        .iter()
        .any(|index| matches!(index.index_type, IndexType::Ore));

    // An order token over an entire JSON document has no meaningful
    // comparison semantics, so the two indexes are mutually exclusive.
    if has_ste_vec && has_ore {
        return Err(SchemaBuildError::InvalidConfig {
            table: table.to_string(),
            path: column.path.clone(),
            reason: "searchable_json() cannot be combined with order_and_range()".to_string(),
        });
    }

    Ok(())
}

fn resolve_ste_vec_prefix(table: &str, column: &mut Column) {
    let default_prefix = format!("{}/{}", table, column.config.name);

    for index in &mut column.config.indexes {
        if let IndexType::SteVec { prefix } = &mut index.index_type {
            prefix.get_or_insert_with(|| default_prefix.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_layouts() {
        let table = Table::build("users")
            .column("email", ColumnConfig::build("email"))
            .nested("profile", |profile| {
                profile
                    .column("field", ColumnConfig::build("field"))
                    .nested("nested", |nested| {
                        nested.column("deeper", ColumnConfig::build("deeper"))
                    })
            })
            .finish()
            .unwrap();

        let paths: Vec<_> = table.columns().map(|c| c.path().to_string()).collect();
        assert_eq!(paths, ["email", "profile.field", "profile.nested.deeper"]);
    }

    #[test]
    fn leaf_name_is_preserved() {
        let table = Table::build("users")
            .nested("profile", |profile| {
                profile.column("home", ColumnConfig::build("address"))
            })
            .finish()
            .unwrap();

        let column = table.resolve_column("profile.home").unwrap();
        assert_eq!(column.name(), "address");
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let result = Table::build("users")
            .column("email", ColumnConfig::build("email"))
            .column("email", ColumnConfig::build("email"))
            .finish();

        assert!(matches!(
            result,
            Err(SchemaBuildError::DuplicatePath { path, .. }) if path == "email"
        ));
    }

    #[test]
    fn ste_vec_and_ore_are_mutually_exclusive() {
        let result = Table::build("docs")
            .column(
                "metadata",
                ColumnConfig::build("metadata")
                    .searchable_json()
                    .order_and_range(),
            )
            .finish();

        assert!(matches!(
            result,
            Err(SchemaBuildError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn default_ste_vec_prefix_uses_declared_name() {
        let table = Table::build("docs")
            .nested("attrs", |attrs| {
                attrs.column("meta", ColumnConfig::build("metadata").searchable_json())
            })
            .finish()
            .unwrap();

        let column = table.resolve_column("attrs.meta").unwrap();
        assert_eq!(column.config().ste_vec_prefix(), Some("docs/metadata"));
    }
}
