//! Pagination controller.
//!
//! A crawl walks one schema over a first document, then keeps fetching the
//! page named by the pagination selector and re-walking until pagination is
//! disabled, the page limit runs out, no usable next URL resolves, or the
//! abort predicate fires. Cycles are strictly serialized: the next fetch is
//! only issued once the current walk has finished.
//!
//! The controller emits a [`CrawlEvent`] stream: zero or more
//! [`CrawlEvent::Page`] events followed by exactly one terminal event.

use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;

use async_stream::stream;
use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::document::{Context, HtmlDocument};
use crate::engine::Harvest;
use crate::error::{Error, Result};
use crate::resolve;
use crate::schema::{Literal, Schema};
use crate::sink::{self, Completion};

/// Decides, given the accumulated result and the candidate next URL,
/// whether to stop paginating.
pub type AbortPredicate = Rc<dyn Fn(&Value, &str) -> bool>;

/// Where the first document comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Url(String),
    Html {
        html: String,
        base_url: Option<String>,
    },
    /// A link literal resolved against the context a nested crawl runs in.
    Link(Literal),
}

impl Source {
    pub fn html(html: impl Into<String>, base_url: Option<&str>) -> Self {
        Source::Html {
            html: html.into(),
            base_url: base_url.map(str::to_string),
        }
    }
}

impl From<&str> for Source {
    /// `http(s)://` strings are URLs, anything else is literal HTML.
    fn from(s: &str) -> Self {
        if is_url(s) {
            Source::Url(s.trim().to_string())
        } else {
            Source::html(s, None)
        }
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Source::from(s.as_str())
    }
}

fn is_url(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("http://") || s.starts_with("https://")
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Pagination was not configured.
    Complete,
    LimitReached,
    /// The pagination selector did not yield a usable absolute URL.
    NoNextPage,
    AbortPredicate,
}

/// One step of the controller's output.
#[derive(Debug)]
pub enum CrawlEvent {
    /// A page was walked and another one will be fetched.
    Page(Value),
    /// Terminal success.
    Finished {
        /// The final page's own value.
        last_page: Value,
        /// The reported result: concatenated items for collection roots,
        /// otherwise the final page's value.
        result: Value,
        reason: StopReason,
    },
    /// Terminal failure.
    Failed(Error),
}

impl CrawlEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CrawlEvent::Page(_))
    }
}

/// Controller phases. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Init,
    Walked,
    Fetching(String),
    Done,
    Aborted(StopReason),
}

/// What the controller does after a page has been walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stop(StopReason),
    Fetch(String),
}

/// Accumulated output across pages.
#[derive(Debug, Clone)]
enum Accumulation {
    Empty,
    /// Collection root: page items concatenated in page order.
    Collection(Vec<Value>),
    /// Anything else: the latest page is reported, every page is kept.
    Document { latest: Value, pages: Vec<Value> },
}

/// Owned pagination state, mutated only by [`PaginationState::advance`].
#[derive(Clone)]
pub struct PaginationState {
    /// Pages still allowed, `None` is unbounded.
    pub remaining_limit: Option<usize>,
    pub paginate: Option<Literal>,
    pub abort: Option<AbortPredicate>,
    /// URL of the page most recently walked.
    pub current_url: Option<String>,
    pub phase: Phase,
    pages_walked: usize,
    accumulated: Accumulation,
}

impl fmt::Debug for PaginationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationState")
            .field("remaining_limit", &self.remaining_limit)
            .field("paginate", &self.paginate.as_ref().map(Literal::as_str))
            .field("abort", &self.abort.is_some())
            .field("current_url", &self.current_url)
            .field("phase", &self.phase)
            .field("pages_walked", &self.pages_walked)
            .finish()
    }
}

impl PaginationState {
    pub fn new(
        paginate: Option<Literal>,
        limit: Option<usize>,
        abort: Option<AbortPredicate>,
    ) -> Self {
        Self {
            remaining_limit: limit,
            paginate,
            abort,
            current_url: None,
            phase: Phase::Init,
            pages_walked: 0,
            accumulated: Accumulation::Empty,
        }
    }

    pub fn pages_walked(&self) -> usize {
        self.pages_walked
    }

    /// Every walked page for non-collection roots. Collection roots keep
    /// their items in the result instead.
    pub fn pages(&self) -> &[Value] {
        match &self.accumulated {
            Accumulation::Document { pages, .. } => pages,
            _ => &[],
        }
    }

    /// The result as it would be reported now.
    pub fn result(&self) -> Value {
        match &self.accumulated {
            Accumulation::Empty => Value::Null,
            Accumulation::Collection(items) => Value::Array(items.clone()),
            Accumulation::Document { latest, .. } => latest.clone(),
        }
    }

    fn record(&mut self, page: Value) {
        self.pages_walked += 1;
        let accumulated = std::mem::replace(&mut self.accumulated, Accumulation::Empty);
        self.accumulated = match (accumulated, page) {
            (Accumulation::Empty, Value::Array(items)) => Accumulation::Collection(items),
            (Accumulation::Collection(mut items), Value::Array(more)) => {
                items.extend(more);
                Accumulation::Collection(items)
            }
            // A page without a value adds no items; any other value is one item.
            (Accumulation::Collection(items), Value::Null) => Accumulation::Collection(items),
            (Accumulation::Collection(mut items), other) => {
                items.push(other);
                Accumulation::Collection(items)
            }
            (Accumulation::Empty, page) => Accumulation::Document {
                latest: page.clone(),
                pages: vec![page],
            },
            (Accumulation::Document { mut pages, .. }, page) => {
                pages.push(page.clone());
                Accumulation::Document {
                    latest: page,
                    pages,
                }
            }
        };
    }

    /// Transition out of `Walked` after a page has been walked.
    ///
    /// `next_url` resolves the pagination target on the walked page; it is
    /// only consulted when pagination is configured and the limit allows
    /// another page.
    pub fn advance<F>(&mut self, page: Value, next_url: F) -> Result<Transition>
    where
        F: FnOnce(&Literal) -> Result<Option<String>>,
    {
        self.phase = Phase::Walked;
        self.record(page);

        let transition = self.decide(next_url)?;
        self.phase = match &transition {
            Transition::Stop(StopReason::Complete) => Phase::Done,
            Transition::Stop(reason) => Phase::Aborted(*reason),
            Transition::Fetch(url) => Phase::Fetching(url.clone()),
        };
        debug!(phase = ?self.phase, pages = self.pages_walked, "pagination transition");
        Ok(transition)
    }

    /// Whether `url` names the page just walked. Fragments are ignored.
    fn is_current(&self, url: &str) -> bool {
        self.current_url
            .as_deref()
            .is_some_and(|current| without_fragment(current) == without_fragment(url))
    }

    fn decide<F>(&mut self, next_url: F) -> Result<Transition>
    where
        F: FnOnce(&Literal) -> Result<Option<String>>,
    {
        let Some(paginate) = &self.paginate else {
            return Ok(Transition::Stop(StopReason::Complete));
        };

        if let Some(remaining) = self.remaining_limit.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                return Ok(Transition::Stop(StopReason::LimitReached));
            }
        }

        let url = match next_url(paginate)? {
            Some(url) if !self.is_current(&url) => url,
            _ => return Ok(Transition::Stop(StopReason::NoNextPage)),
        };

        if let Some(abort) = &self.abort {
            if abort(&self.result(), &url) {
                return Ok(Transition::Stop(StopReason::AbortPredicate));
            }
        }

        Ok(Transition::Fetch(url))
    }
}

/// One crawl: a source, a schema and per-node pagination options.
#[derive(Clone)]
pub struct Crawl {
    engine: Harvest,
    source: Source,
    schema: Rc<Schema>,
    paginate: Option<Literal>,
    limit: Option<usize>,
    abort: Option<AbortPredicate>,
}

impl fmt::Debug for Crawl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawl")
            .field("source", &self.source)
            .field("schema", &self.schema)
            .field("paginate", &self.paginate.as_ref().map(Literal::as_str))
            .field("limit", &self.limit)
            .field("abort", &self.abort.is_some())
            .finish()
    }
}

impl Crawl {
    pub(crate) fn new(engine: Harvest, source: Source, schema: Schema) -> Self {
        Self {
            engine,
            source,
            schema: Rc::new(schema),
            paginate: None,
            limit: None,
            abort: None,
        }
    }

    /// Selector (usually `...@href`) naming the next page.
    pub fn paginate(mut self, selector: &str) -> Self {
        self.paginate = Some(Literal::parse(selector));
        self
    }

    /// Maximum number of pages, counting the first one.
    pub fn limit(mut self, pages: usize) -> Self {
        self.limit = Some(pages);
        self
    }

    pub fn abort<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &str) -> bool + 'static,
    {
        self.abort = Some(Rc::new(predicate));
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The controller's event sequence.
    pub fn events(&self) -> LocalBoxStream<'static, CrawlEvent> {
        let crawl = self.clone();
        stream! {
            let engine = crawl.engine.clone();
            let walker = engine.walker();
            debug!(
                source = ?crawl.source,
                collection = crawl.schema.is_collection(),
                paginate = ?crawl.paginate.as_ref().map(Literal::as_str),
                limit = ?crawl.limit,
                "starting crawl"
            );
            let mut state = PaginationState::new(crawl.paginate.clone(), crawl.limit, crawl.abort.clone());

            if engine.is_strict() {
                if let Err(e) = engine.validate(&crawl.schema) {
                    yield CrawlEvent::Failed(e);
                    return;
                }
            }

            let (mut context, mut url) = match crawl.load_source().await {
                Ok(loaded) => loaded,
                Err(e) => {
                    yield CrawlEvent::Failed(e);
                    return;
                }
            };

            loop {
                state.current_url = url.clone();
                let page = match walker.resolve(&crawl.schema, context.clone()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield CrawlEvent::Failed(e);
                        return;
                    }
                };

                let transition = state.advance(page.clone(), |target| {
                    resolve_absolute(target, &context, &engine)
                });

                match transition {
                    Err(e) => {
                        yield CrawlEvent::Failed(e);
                        return;
                    }
                    Ok(Transition::Stop(reason)) => {
                        info!(
                            pages = state.pages_walked(),
                            buffered = state.pages().len(),
                            ?reason,
                            "crawl finished"
                        );
                        yield CrawlEvent::Finished {
                            last_page: page,
                            result: state.result(),
                            reason,
                        };
                        return;
                    }
                    Ok(Transition::Fetch(next)) => {
                        yield CrawlEvent::Page(page);
                        match load_url(&engine, &next).await {
                            Ok((ctx, final_url)) => {
                                context = ctx;
                                url = Some(final_url);
                            }
                            Err(e) => {
                                yield CrawlEvent::Failed(e);
                                return;
                            }
                        }
                    }
                }
            }
        }
        .boxed_local()
    }

    async fn load_source(&self) -> Result<(Context, Option<String>)> {
        match &self.source {
            Source::Url(url) => {
                let (ctx, final_url) = load_url(&self.engine, url).await?;
                Ok((ctx, Some(final_url)))
            }
            Source::Html { html, base_url } => {
                Ok((HtmlDocument::parse(html, base_url.as_deref()), base_url.clone()))
            }
            Source::Link(link) => Err(Error::DetachedLink(link.as_str().to_string())),
        }
    }

    /// Run to completion and return the reported result.
    pub async fn run(self) -> Result<Value> {
        let mut outcome = None;
        self.run_with(|result| outcome = Some(result)).await;
        outcome.unwrap_or_else(|| Err(Error::extraction("crawl ended without a result")))
    }

    /// Run to completion, then invoke `callback` exactly once.
    pub async fn run_with<F>(self, callback: F)
    where
        F: FnOnce(Result<Value>),
    {
        let mut completion = Completion::new(callback);
        let mut events = self.events();
        while let Some(event) = events.next().await {
            match event {
                CrawlEvent::Page(_) => {}
                CrawlEvent::Finished { result, .. } => {
                    completion.complete(Ok(result));
                }
                CrawlEvent::Failed(e) => {
                    completion.complete(Err(e));
                }
            }
        }
        if !completion.is_complete() {
            completion.complete(Err(Error::extraction("crawl ended without a result")));
        }
    }

    /// Incremental JSON output, one fragment per completed page.
    pub fn stream(&self) -> LocalBoxStream<'static, Result<String>> {
        sink::json_fragments(self.events())
    }

    /// Pipe [`Crawl::stream`] into a file.
    pub async fn write(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        sink::write_file(self.stream(), path.as_ref()).await
    }

    /// Run this crawl nested inside a walk. Link sources resolve against
    /// `context`; an unresolvable link yields no value.
    pub async fn run_nested(&self, context: Context) -> Result<Option<Value>> {
        let crawl = match &self.source {
            Source::Link(link) => {
                let Some(url) = resolve_absolute(link, &context, &self.engine)? else {
                    debug!("nested crawl link {} did not resolve", link.as_str());
                    return Ok(None);
                };
                Crawl {
                    source: Source::Url(url),
                    ..self.clone()
                }
            }
            _ => self.clone(),
        };
        crawl.run().await.map(Some)
    }
}

impl IntoFuture for Crawl {
    type Output = Result<Value>;
    type IntoFuture = LocalBoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        self.run().boxed_local()
    }
}

impl From<Crawl> for Schema {
    /// Nest a crawl in a schema tree as a function leaf.
    fn from(crawl: Crawl) -> Self {
        let crawl = Rc::new(crawl);
        Schema::function(move |context, _walker| {
            let crawl = Rc::clone(&crawl);
            async move { crawl.run_nested(context).await }.boxed_local()
        })
    }
}

async fn load_url(engine: &Harvest, url: &str) -> Result<(Context, String)> {
    let page = engine
        .fetcher()
        .fetch(url)
        .await
        .map_err(|e| Error::fetch(url, e))?;
    debug!(url, final_url = %page.final_url, bytes = page.body.len(), "loaded page");
    Ok((
        HtmlDocument::parse(&page.body, Some(&page.final_url)),
        page.final_url,
    ))
}

/// Resolve `link` to an absolute http(s) URL, joining relative values with
/// the document's base URL.
fn resolve_absolute(link: &Literal, context: &Context, engine: &Harvest) -> Result<Option<String>> {
    let Some(Value::String(raw)) = resolve::resolve_one(link, context, None, engine.filters())? else {
        return Ok(None);
    };
    let parsed = match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            context.base_url().and_then(|base| base.join(&raw).ok())
        }
        Err(_) => None,
    };
    Ok(parsed
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        }))
}

fn without_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(page, _)| page)
}
