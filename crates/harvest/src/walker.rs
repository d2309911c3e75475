//! Recursive schema walker.
//!
//! One exhaustive match over [`Schema`]. Mapping children and sequence
//! elements are walked concurrently on the current task and reassembled by
//! declared key order or document order, never by completion order. The
//! first failing child fails the whole node; pending siblings are dropped.

use std::rc::Rc;

use futures::future::{try_join_all, LocalBoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::Context;
use crate::engine::Harvest;
use crate::error::Result;
use crate::filters::Filters;
use crate::resolve;
use crate::schema::Schema;

/// Walks schemas against document contexts. Cheap to clone.
#[derive(Clone)]
pub struct Walker {
    engine: Harvest,
    scope: Option<Rc<str>>,
}

impl Walker {
    pub fn new(engine: Harvest) -> Self {
        Self {
            engine,
            scope: None,
        }
    }

    /// The enclosing scope selector, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn with_scope(&self, scope: Option<&str>) -> Walker {
        Walker {
            engine: self.engine.clone(),
            scope: scope.map(Rc::from),
        }
    }

    pub fn filters(&self) -> &Filters {
        self.engine.filters()
    }

    pub fn engine(&self) -> &Harvest {
        &self.engine
    }

    /// Walk `schema` and collapse "no value" to `null`.
    pub async fn resolve(&self, schema: &Schema, context: Context) -> Result<Value> {
        Ok(self.walk(schema, context).await?.unwrap_or(Value::Null))
    }

    /// Walk `schema` against `context`. `None` means no value: the key is
    /// omitted from an enclosing mapping.
    pub fn walk<'a>(
        &'a self,
        schema: &'a Schema,
        context: Context,
    ) -> LocalBoxFuture<'a, Result<Option<Value>>> {
        async move {
            match schema {
                Schema::Optional => Ok(Some(Value::Null)),
                Schema::Literal(literal) => {
                    resolve::resolve_one(literal, &context, self.scope(), self.filters())
                }
                Schema::Pattern(pattern) => {
                    let text = self.narrowed(&context)?.text();
                    Ok(Some(resolve::match_pattern(pattern, &text)))
                }
                Schema::Function(f) => {
                    let narrowed = self.narrowed(&context)?;
                    f(narrowed, self.with_scope(None)).await
                }
                Schema::Custom(value) => self.walk_custom(value, context).await,
                Schema::Scoped { scope, schema } => {
                    let narrowed = self.narrowed(&context)?;
                    let inner = self.with_scope(Some(scope.as_str()));
                    inner.walk(schema, narrowed).await
                }
                Schema::Sequence(element) => self.walk_sequence(element, context).await,
                Schema::Mapping(entries) => self.walk_mapping(entries, context).await,
                Schema::Unsupported(found) => {
                    debug!("dropping unsupported {found} schema value");
                    Ok(None)
                }
            }
        }
        .boxed_local()
    }

    fn narrowed(&self, context: &Context) -> Result<Context> {
        match self.scope() {
            Some(scope) => context.narrow(scope),
            None => Ok(context.clone()),
        }
    }

    async fn walk_custom(&self, value: &Value, context: Context) -> Result<Option<Value>> {
        let Some(entry) = self.engine.custom_types().find(value).cloned() else {
            debug!("no custom type accepts {value}, dropping");
            return Ok(None);
        };
        debug!(custom_type = %entry.name, "resolving custom value");
        entry
            .handler
            .resolve(value, context, self.scope(), self)
            .await
    }

    async fn walk_sequence(&self, element: &Schema, context: Context) -> Result<Option<Value>> {
        if let Schema::Literal(literal) = element {
            let values = resolve::resolve_all(literal, &context, self.scope(), self.filters())?;
            return Ok(Some(Value::Array(values)));
        }

        let items = match self.scope() {
            Some(scope) => context.query_all(scope)?,
            None => context.elements(),
        };
        debug!(count = items.len(), scope = ?self.scope(), "walking sequence");

        // Each item is its own scope.
        let inner = self.with_scope(None);
        let walked = try_join_all(items.into_iter().map(|item| inner.walk(element, item))).await?;
        Ok(Some(Value::Array(walked.into_iter().flatten().collect())))
    }

    async fn walk_mapping(
        &self,
        entries: &[(String, Schema)],
        context: Context,
    ) -> Result<Option<Value>> {
        let walked = try_join_all(
            entries
                .iter()
                .map(|(_, child)| self.walk(child, context.clone())),
        )
        .await?;

        let mut out = Map::with_capacity(entries.len());
        for ((key, _), value) in entries.iter().zip(walked) {
            match value {
                None => {}
                Some(Value::String(s)) if s.is_empty() => {}
                Some(v) => {
                    out.insert(key.clone(), v);
                }
            }
        }
        Ok(Some(Value::Object(out)))
    }
}
