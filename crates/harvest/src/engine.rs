//! The `Harvest` entry point: construction options and crawl factories.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::crawl::{Crawl, Source};
use crate::custom::{CustomType, CustomTypes};
use crate::document::HtmlDocument;
use crate::error::Result;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::filters::Filters;
use crate::schema::{Literal, Schema};
use crate::validate;
use crate::walker::Walker;

struct Inner {
    strict: bool,
    filters: Filters,
    custom: CustomTypes,
    fetcher: Rc<dyn Fetcher>,
}

/// A configured extraction engine. Cheap to clone.
#[derive(Clone)]
pub struct Harvest {
    inner: Rc<Inner>,
}

impl Harvest {
    /// Permissive engine with the standard filters and an HTTP fetcher.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarvestBuilder {
        HarvestBuilder::default()
    }

    pub fn is_strict(&self) -> bool {
        self.inner.strict
    }

    pub fn filters(&self) -> &Filters {
        &self.inner.filters
    }

    pub fn custom_types(&self) -> &CustomTypes {
        &self.inner.custom
    }

    pub fn fetcher(&self) -> Rc<dyn Fetcher> {
        Rc::clone(&self.inner.fetcher)
    }

    pub fn walker(&self) -> Walker {
        Walker::new(self.clone())
    }

    /// Pre-flight check of `schema` against this engine's filters and
    /// custom types.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        validate::validate(schema, &self.inner.filters, &self.inner.custom)
    }

    /// Load a JSON schema using this engine's custom type registry.
    pub fn schema_from_json(&self, value: &Value) -> Result<Schema> {
        Schema::from_json(value, &self.inner.custom)
    }

    /// Walk `schema` over an in-memory document, without pagination.
    pub async fn extract(&self, html: &str, schema: &Schema) -> Result<Value> {
        if self.is_strict() {
            self.validate(schema)?;
        }
        let doc = HtmlDocument::parse(html, None);
        self.walker().resolve(schema, doc).await
    }

    /// One crawl of `schema` starting at `source` (a URL or literal HTML).
    pub fn crawl(&self, source: impl Into<Source>, schema: impl Into<Schema>) -> Crawl {
        Crawl::new(self.clone(), source.into(), schema.into())
    }

    /// A crawl whose start URL is read from the context it is walked in,
    /// e.g. `follow("a@href", ...)`. Convert it into a [`Schema`] to nest it.
    pub fn follow(&self, link: &str, schema: impl Into<Schema>) -> Crawl {
        Crawl::new(
            self.clone(),
            Source::Link(Literal::parse(link)),
            schema.into(),
        )
    }
}

impl Default for Harvest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Harvest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harvest")
            .field("strict", &self.inner.strict)
            .field("filters", &self.inner.filters)
            .field("custom_types", &self.inner.custom)
            .finish_non_exhaustive()
    }
}

/// Construction options for [`Harvest`].
pub struct HarvestBuilder {
    strict: bool,
    filters: Filters,
    custom: CustomTypes,
    fetcher: Option<Rc<dyn Fetcher>>,
}

impl Default for HarvestBuilder {
    fn default() -> Self {
        Self {
            strict: false,
            filters: Filters::standard(),
            custom: CustomTypes::new(),
            fetcher: None,
        }
    }
}

impl HarvestBuilder {
    /// Validate every schema before any document activity.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Replace the whole filter table.
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn filter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &[String]) -> String + 'static,
    {
        self.filters.insert(name, f);
        self
    }

    pub fn custom_type<H, D>(mut self, name: impl Into<String>, handler: H, discriminator: D) -> Self
    where
        H: CustomType + 'static,
        D: Fn(&Value) -> bool + 'static,
    {
        self.custom.register(name, handler, discriminator);
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Rc::new(fetcher));
        self
    }

    pub fn build(self) -> Harvest {
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Rc::new(HttpFetcher::default()));
        Harvest {
            inner: Rc::new(Inner {
                strict: self.strict,
                filters: self.filters,
                custom: self.custom,
                fetcher,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_extract_in_memory() {
        let h = Harvest::new();
        let out = h
            .extract(
                r#"<h1>Title</h1><a href="/x">l</a>"#,
                &Schema::mapping([("title", Schema::from("h1")), ("link", Schema::from("a@href"))]),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"title": "Title", "link": "/x"}));
    }

    #[test]
    fn test_extract_without_runtime() {
        let h = Harvest::new();
        let schema = Schema::seq("li | uppercase");
        let out = tokio_test::block_on(h.extract("<li>a</li><li>b</li>", &schema)).unwrap();
        assert_eq!(out, json!(["A", "B"]));
    }

    #[tokio::test]
    async fn test_builder_filters_are_construction_time() {
        let h = Harvest::builder()
            .filters(Filters::new())
            .filter("shout", |v, _| format!("{}!", v.to_uppercase()))
            .build();
        assert!(h.filters().contains("shout"));
        assert!(!h.filters().contains("trim"));
        let out = h.extract("<p>hi</p>", &Schema::from("p | shout")).await.unwrap();
        assert_eq!(out, json!("HI!"));
    }

    #[tokio::test]
    async fn test_strict_and_permissive_extract() {
        let schema = Schema::mapping([
            ("title", Schema::from("h1")),
            ("bogus", Schema::Unsupported("boolean")),
        ]);
        let html = "<h1>T</h1>";

        let permissive = Harvest::new().extract(html, &schema).await.unwrap();
        assert_eq!(permissive, json!({"title": "T"}));

        let strict = Harvest::builder().strict(true).build();
        let err = strict.extract(html, &schema).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("$.bogus"));
    }
}
