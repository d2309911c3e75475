//! The schema tree: what to extract and in which shape.
//!
//! A [`Schema`] is an immutable recursive value. Leaves are selector
//! literals, regular expressions, explicit nulls, foreign functions or
//! registered custom payloads; interior nodes are ordered mappings,
//! "all matches" sequences and scoped sub-schemas.

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use regex::Regex;
use serde_json::Value;

use crate::custom::CustomTypes;
use crate::document::Context;
use crate::error::{Error, Result};
use crate::walker::Walker;

/// Future returned by a function leaf. `None` omits the key.
pub type FunctionFuture = LocalBoxFuture<'static, Result<Option<Value>>>;

/// A foreign resolver: receives the (scope-narrowed) context and a walker
/// that can resolve further schemas.
pub type FunctionLeaf = Rc<dyn Fn(Context, Walker) -> FunctionFuture>;

/// A declarative extraction schema.
#[derive(Clone)]
pub enum Schema {
    /// Explicit null. Always yields `null`, key retained.
    Optional,
    /// Selector string with optional attribute and filter chain.
    Literal(Literal),
    /// Custom resolver, also used for nested crawls.
    Function(FunctionLeaf),
    /// Regular expression applied to the text of the context.
    Pattern(Regex),
    /// Named sub-schemas in declared order.
    Mapping(Vec<(String, Schema)>),
    /// "All matches" of the element schema.
    Sequence(Box<Schema>),
    /// A sub-schema resolved within `scope`.
    Scoped { scope: String, schema: Box<Schema> },
    /// Opaque payload handled by a registered custom type.
    Custom(Value),
    /// A value of a type the walker cannot interpret.
    Unsupported(&'static str),
}

impl Schema {
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Schema)>,
    {
        Schema::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn seq(element: impl Into<Schema>) -> Self {
        Schema::Sequence(Box::new(element.into()))
    }

    pub fn scoped(scope: impl Into<String>, schema: impl Into<Schema>) -> Self {
        Schema::Scoped {
            scope: scope.into(),
            schema: Box::new(schema.into()),
        }
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Schema::Pattern)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Context, Walker) -> FunctionFuture + 'static,
    {
        Schema::Function(Rc::new(f))
    }

    /// Whether the walked value of this schema is a list.
    pub fn is_collection(&self) -> bool {
        match self {
            Schema::Sequence(_) => true,
            Schema::Scoped { schema, .. } => schema.is_collection(),
            _ => false,
        }
    }

    /// Name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Schema::Optional => "null",
            Schema::Literal(_) => "selector",
            Schema::Function(_) => "function",
            Schema::Pattern(_) => "pattern",
            Schema::Mapping(_) => "mapping",
            Schema::Sequence(_) => "sequence",
            Schema::Scoped { .. } => "scoped",
            Schema::Custom(_) => "custom",
            Schema::Unsupported(found) => *found,
        }
    }

    /// Load a schema from JSON.
    ///
    /// Registered custom discriminators see every node first, so tagged
    /// payloads are never mistaken for plain arrays or objects.
    pub fn from_json(value: &Value, custom: &CustomTypes) -> Result<Self> {
        if custom.find(value).is_some() {
            return Ok(Schema::Custom(value.clone()));
        }

        match value {
            Value::Null => Ok(Schema::Optional),
            Value::String(s) => Ok(Schema::from(s.as_str())),
            Value::Array(items) if items.len() == 1 => {
                Ok(Schema::seq(Schema::from_json(&items[0], custom)?))
            }
            Value::Array(_) => Ok(Schema::Unsupported("array")),
            Value::Bool(_) => Ok(Schema::Unsupported("boolean")),
            Value::Number(_) => Ok(Schema::Unsupported("number")),
            Value::Object(map) => {
                if let (1, Some(Value::String(p))) = (map.len(), map.get("$pattern")) {
                    return Schema::pattern(p);
                }
                if let (2, Some(Value::String(scope)), Some(inner)) =
                    (map.len(), map.get("$scope"), map.get("$schema"))
                {
                    return Ok(Schema::scoped(
                        scope.clone(),
                        Schema::from_json(inner, custom)?,
                    ));
                }
                let mut entries = Vec::with_capacity(map.len());
                for (key, child) in map {
                    entries.push((key.clone(), Schema::from_json(child, custom)?));
                }
                Ok(Schema::Mapping(entries))
            }
        }
    }
}

impl From<&str> for Schema {
    fn from(s: &str) -> Self {
        Schema::Literal(Literal::parse(s))
    }
}

impl From<String> for Schema {
    fn from(s: String) -> Self {
        Schema::Literal(Literal::parse(&s))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Optional => write!(f, "Optional"),
            Schema::Literal(l) => f.debug_tuple("Literal").field(&l.raw).finish(),
            Schema::Function(_) => write!(f, "Function(..)"),
            Schema::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Schema::Mapping(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Schema::Sequence(el) => f.debug_list().entry(el).finish(),
            Schema::Scoped { scope, schema } => f
                .debug_struct("Scoped")
                .field("scope", scope)
                .field("schema", schema)
                .finish(),
            Schema::Custom(v) => f.debug_tuple("Custom").field(v).finish(),
            Schema::Unsupported(found) => f.debug_tuple("Unsupported").field(found).finish(),
        }
    }
}

// ── Selector literals ───────────────────────────────────────────────────────

/// One `| name:arg,arg` stage of a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<String>,
}

/// A parsed `<selector>[@attribute][ | filter[:args]]*` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// CSS selector. Empty means the current scope itself.
    pub selector: String,
    pub attribute: Option<String>,
    pub filters: Vec<FilterCall>,
    raw: String,
}

impl Literal {
    pub fn parse(raw: &str) -> Self {
        let mut stages = split_top_level(raw, '|').into_iter();
        let head = stages.next().unwrap_or_default();

        let (selector, attribute) = match split_top_level(&head, '@').as_slice() {
            [sel] => (sel.trim().to_string(), None),
            [sel, rest @ ..] => {
                let attr = rest.join("@").trim().to_string();
                (sel.trim().to_string(), (!attr.is_empty()).then_some(attr))
            }
            [] => (String::new(), None),
        };

        let filters = stages
            .map(|stage| {
                let stage = stage.trim();
                match stage.split_once(':') {
                    Some((name, args)) => FilterCall {
                        name: name.trim().to_string(),
                        args: args.split(',').map(|a| a.trim().to_string()).collect(),
                    },
                    None => FilterCall {
                        name: stage.to_string(),
                        args: Vec::new(),
                    },
                }
            })
            .filter(|call| !call.name.is_empty())
            .collect();

        Self {
            selector,
            attribute,
            filters,
            raw: raw.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Split on `sep` outside of `[...]`, `(...)` and quotes. A `|` directly
/// followed by `=` is the `|=` attribute operator and never splits.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 && !(c == '|' && chars.peek() == Some(&'=')) => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_selector() {
        let lit = Literal::parse("h1");
        assert_eq!(lit.selector, "h1");
        assert_eq!(lit.attribute, None);
        assert!(lit.filters.is_empty());
    }

    #[test]
    fn test_parse_attribute_and_filters() {
        let lit = Literal::parse("a.next @ href | trim | slice:2,5");
        assert_eq!(lit.selector, "a.next");
        assert_eq!(lit.attribute.as_deref(), Some("href"));
        assert_eq!(lit.filters.len(), 2);
        assert_eq!(lit.filters[0].name, "trim");
        assert_eq!(lit.filters[1].name, "slice");
        assert_eq!(lit.filters[1].args, vec!["2", "5"]);
    }

    #[test]
    fn test_parse_attribute_only_targets_scope() {
        let lit = Literal::parse("@href");
        assert_eq!(lit.selector, "");
        assert_eq!(lit.attribute.as_deref(), Some("href"));
    }

    #[test]
    fn test_dash_match_operator_is_not_a_filter() {
        let lit = Literal::parse(r#"p[lang|="en"] | trim"#);
        assert_eq!(lit.selector, r#"p[lang|="en"]"#);
        assert_eq!(lit.filters.len(), 1);
    }

    #[test]
    fn test_at_sign_inside_attribute_selector() {
        let lit = Literal::parse(r#"a[href^="mailto:x@y"]@href"#);
        assert_eq!(lit.selector, r#"a[href^="mailto:x@y"]"#);
        assert_eq!(lit.attribute.as_deref(), Some("href"));
    }

    #[test]
    fn test_from_json_shapes() {
        let custom = CustomTypes::new();
        let schema = Schema::from_json(
            &json!({
                "title": "h1",
                "missing": null,
                "count": 3,
                "price": {"$pattern": "\\$(\\d+)"},
                "items": {"$scope": "li", "$schema": [{"name": "b"}]},
                "tags": ["span.tag"]
            }),
            &custom,
        )
        .unwrap();

        let Schema::Mapping(entries) = schema else {
            panic!("expected mapping");
        };
        let kinds: Vec<_> = entries.iter().map(|(k, v)| (k.as_str(), v.kind_name())).collect();
        assert_eq!(
            kinds,
            vec![
                ("title", "selector"),
                ("missing", "null"),
                ("count", "number"),
                ("price", "pattern"),
                ("items", "scoped"),
                ("tags", "sequence"),
            ]
        );
        assert!(entries[4].1.is_collection());
    }

    #[test]
    fn test_from_json_rejects_bad_pattern() {
        let err = Schema::from_json(&json!({"$pattern": "("}), &CustomTypes::new()).unwrap_err();
        assert!(err.is_configuration());
    }
}
