//! Harvest — declarative selector schemas for HTML extraction, with
//! pagination and streaming output.
//!
//! A [`Schema`] describes the shape of the data to extract. [`Harvest`]
//! walks it over a document, and a [`Crawl`] repeats the walk across
//! paginated pages.
//!
//! Everything runs on the current task: futures are not `Send`, and sibling
//! keys and sequence elements interleave cooperatively.

pub mod crawl;
pub mod custom;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod filters;
pub mod resolve;
pub mod schema;
pub mod sink;
pub mod validate;
pub mod walker;

pub use crawl::{AbortPredicate, Crawl, CrawlEvent, PaginationState, Phase, Source, StopReason, Transition};
pub use custom::{CustomType, CustomTypes};
pub use document::{Context, DocumentContext, HtmlDocument};
pub use engine::{Harvest, HarvestBuilder};
pub use error::{Error, ErrorKind, Result};
pub use fetch::{FetchConfig, FetchedPage, Fetcher, HttpFetcher, StaticFetcher};
pub use filters::Filters;
pub use schema::{Literal, Schema};
pub use walker::Walker;
