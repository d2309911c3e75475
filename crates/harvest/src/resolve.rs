//! Leaf resolution: selector literals and patterns against a context.

use regex::Regex;
use serde_json::Value;

use crate::document::Context;
use crate::error::{Error, Result};
use crate::filters::Filters;
use crate::schema::Literal;

/// Resolve the first match of `literal`. `None` when nothing matched or
/// the requested attribute is absent.
pub fn resolve_one(
    literal: &Literal,
    context: &Context,
    scope: Option<&str>,
    filters: &Filters,
) -> Result<Option<Value>> {
    ensure_filters(literal, filters)?;

    let base = match scope {
        Some(scope) => context.narrow(scope)?,
        None => context.clone(),
    };
    let target = if literal.selector.is_empty() {
        (!base.is_empty()).then_some(base)
    } else {
        base.query_all(&literal.selector)?.into_iter().next()
    };

    match target.and_then(|t| extract(literal, &t)) {
        Some(raw) => Ok(Some(Value::String(
            filters.apply(raw.trim().to_string(), &literal.filters)?,
        ))),
        None => Ok(None),
    }
}

/// Resolve every match of `literal`, in document order. Within a scope,
/// matches are gathered per scope element. Empty strings are dropped, the
/// same way a mapping omits them.
pub fn resolve_all(
    literal: &Literal,
    context: &Context,
    scope: Option<&str>,
    filters: &Filters,
) -> Result<Vec<Value>> {
    ensure_filters(literal, filters)?;

    let matches = match (scope, literal.selector.is_empty()) {
        (Some(scope), true) => context.query_all(scope)?,
        (Some(scope), false) => {
            let mut out = Vec::new();
            for el in context.query_all(scope)? {
                out.extend(el.query_all(&literal.selector)?);
            }
            out
        }
        (None, true) => context.elements(),
        (None, false) => context.query_all(&literal.selector)?,
    };

    let mut out = Vec::with_capacity(matches.len());
    for raw in matches.iter().filter_map(|m| extract(literal, m)) {
        let value = filters.apply(raw.trim().to_string(), &literal.filters)?;
        if !value.is_empty() {
            out.push(Value::String(value));
        }
    }
    Ok(out)
}

/// First capture group if present, else the whole match, else `null`.
pub fn match_pattern(pattern: &Regex, text: &str) -> Value {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| Value::String(m.as_str().to_string()))
        .unwrap_or(Value::Null)
}

fn extract(literal: &Literal, target: &Context) -> Option<String> {
    match literal.attribute.as_deref() {
        None | Some("text") => Some(target.text()),
        Some("html") => Some(target.inner_html()),
        Some(name) => target.attribute(name),
    }
}

/// Unknown filters fail even when the selector matches nothing.
fn ensure_filters(literal: &Literal, filters: &Filters) -> Result<()> {
    match filters.first_unknown(&literal.filters) {
        Some(call) => Err(Error::UnknownFilter(call.name.clone())),
        None => Ok(()),
    }
}
