use serde_json::Value;

use super::Plaintext;

/// One leaf of a JSON document: the path segments leading to it and its
/// scalar plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonLeaf {
    pub path: Vec<String>,
    pub leaf: Plaintext,
}

/// Flattens a JSON value into its scalar leaves, depth-first. A pure walk;
/// no crypto happens here.
///
/// Array elements keep their parent's path (no index segment) so that
/// containment of `{"tags": ["a"]}` matches a stored `{"tags": ["a", "b"]}`.
pub fn flatten_json_to_leaves(value: &Value) -> Vec<JsonLeaf> {
    let mut leaves = Vec::new();
    walk(value, &mut Vec::new(), &mut leaves);
    leaves
}

fn walk(value: &Value, path: &mut Vec<String>, leaves: &mut Vec<JsonLeaf>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, leaves);
                path.pop();
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, path, leaves);
            }
        }
        scalar => leaves.push(JsonLeaf {
            path: path.clone(),
            leaf: scalar_plaintext(scalar),
        }),
    }
}

fn scalar_plaintext(value: &Value) -> Plaintext {
    match value {
        Value::String(s) => Plaintext::Utf8Str(Some(s.clone())),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Plaintext::BigInt(Some(i)),
            None => Plaintext::Float(n.as_f64()),
        },
        Value::Bool(b) => Plaintext::Boolean(Some(*b)),
        // A JSON null leaf is still a queryable path
        Value::Null => Plaintext::JsonB(Some(Value::Null)),
        _ => unreachable!("objects and arrays are handled by the walk"),
    }
}

/// Builds the slash-separated selector for a path under a column's prefix.
/// Non-ASCII segments pass through unchanged.
pub fn selector<S: AsRef<str>>(prefix: &str, segments: &[S]) -> String {
    let mut out = String::from(prefix);
    for segment in segments {
        out.push('/');
        out.push_str(segment.as_ref());
    }
    out
}

/// Parses a query-side path expression into segments. Accepts the JSONPath
/// style `$.user.email` as well as plain `user.email`.
pub fn parse_path_expression(expression: &str) -> Vec<String> {
    let trimmed = expression.strip_prefix("$.").unwrap_or(expression);
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);

    trimmed
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects_depth_first() {
        let leaves = flatten_json_to_leaves(&json!({
            "user": {"email": "alice@x.com", "age": 30},
            "active": true
        }));

        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].path, ["user", "email"]);
        assert_eq!(leaves[0].leaf, Plaintext::Utf8Str(Some("alice@x.com".into())));
        assert_eq!(leaves[1].path, ["user", "age"]);
        assert_eq!(leaves[1].leaf, Plaintext::BigInt(Some(30)));
        assert_eq!(leaves[2].path, ["active"]);
    }

    #[test]
    fn array_elements_share_the_parent_path() {
        let leaves = flatten_json_to_leaves(&json!({"tags": ["a", "b"]}));

        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].path, ["tags"]);
        assert_eq!(leaves[1].path, ["tags"]);
    }

    #[test]
    fn selector_joins_with_slashes() {
        assert_eq!(
            selector("docs/metadata", &["user", "email"]),
            "docs/metadata/user/email"
        );
        assert_eq!(selector("docs/metadata", &[] as &[&str]), "docs/metadata");
    }

    #[test]
    fn selector_passes_unicode_through() {
        assert_eq!(
            selector("docs/metadata", &["用户", "电子邮件"]),
            "docs/metadata/用户/电子邮件"
        );
    }

    #[test]
    fn parses_jsonpath_expressions() {
        assert_eq!(parse_path_expression("$.user.email"), ["user", "email"]);
        assert_eq!(parse_path_expression("user.email"), ["user", "email"]);
        assert_eq!(parse_path_expression("$.role"), ["role"]);
    }
}
