//! Strict-mode pre-flight validation of a schema tree.
//!
//! Runs before any fetch or parse. Reports the first offending node with
//! its key path (`$.items[].price`) and the type found there.

use scraper::Selector;

use crate::custom::CustomTypes;
use crate::error::{Error, Result};
use crate::filters::Filters;
use crate::schema::Schema;

pub fn validate(schema: &Schema, filters: &Filters, custom: &CustomTypes) -> Result<()> {
    check(schema, "$", filters, custom)
}

fn check(schema: &Schema, path: &str, filters: &Filters, custom: &CustomTypes) -> Result<()> {
    match schema {
        Schema::Optional | Schema::Function(_) | Schema::Pattern(_) => Ok(()),
        Schema::Literal(literal) => {
            if let Some(call) = filters.first_unknown(&literal.filters) {
                return Err(Error::UnknownFilter(call.name.clone()).at(path));
            }
            check_selector(&literal.selector).map_err(|e| e.at(path))
        }
        Schema::Mapping(entries) => entries
            .iter()
            .try_for_each(|(key, child)| check(child, &format!("{path}.{key}"), filters, custom)),
        Schema::Sequence(element) => {
            let path = format!("{path}[]");
            match element.as_ref() {
                Schema::Optional | Schema::Unsupported(_) => Err(Error::InvalidSchema {
                    path,
                    found: element.kind_name().to_string(),
                }),
                other => check(other, &path, filters, custom),
            }
        }
        Schema::Scoped { scope, schema } => {
            check_selector(scope).map_err(|e| e.at(path))?;
            check(schema, path, filters, custom)
        }
        Schema::Custom(value) => match custom.find(value) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidSchema {
                path: path.to_string(),
                found: "unregistered custom".to_string(),
            }),
        },
        Schema::Unsupported(found) => Err(Error::InvalidSchema {
            path: path.to_string(),
            found: found.to_string(),
        }),
    }
}

fn check_selector(selector: &str) -> Result<()> {
    if selector.is_empty() {
        return Ok(());
    }
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| Error::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })
}
