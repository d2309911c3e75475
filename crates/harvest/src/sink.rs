//! Result sinks over the crawl event sequence.
//!
//! Buffered and callback delivery live on [`Crawl`](crate::Crawl); this
//! module holds the single-use completion guard, the JSON fragment writer
//! behind `Crawl::stream` and the file sink.

use std::path::Path;

use async_stream::stream;
use futures::stream::LocalBoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::crawl::CrawlEvent;
use crate::error::Result;

/// Single-use completion token. The first `complete` call is delivered,
/// later ones are dropped.
pub struct Completion<'a, T> {
    callback: Option<Box<dyn FnOnce(T) + 'a>>,
}

impl<'a, T> Completion<'a, T> {
    pub fn new(callback: impl FnOnce(T) + 'a) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Deliver `value` if nothing was delivered yet. Returns whether it was.
    pub fn complete(&mut self, value: T) -> bool {
        match self.callback.take() {
            Some(callback) => {
                callback(value);
                true
            }
            None => {
                debug!("dropping duplicate terminal report");
                false
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.callback.is_none()
    }
}

/// Writes page fragments as one JSON document.
///
/// Collection roots open an array before the first non-empty page, write
/// each page's items separated by commas and close it at the terminal
/// event. Any other root is written once, at the terminal event.
#[derive(Debug, Default)]
struct FragmentWriter {
    /// Decided by the first page seen.
    collection: Option<bool>,
    opened: bool,
}

impl FragmentWriter {
    fn page(&mut self, value: &Value) -> Result<Option<String>> {
        if !*self.collection.get_or_insert(value.is_array()) {
            return Ok(None);
        }
        let items = items_of(value);
        if items.is_empty() {
            return Ok(None);
        }
        let mut chunk = self.separator().to_string();
        chunk.push_str(&pretty_items(&items)?);
        Ok(Some(chunk))
    }

    fn finish(&mut self, last_page: &Value, result: &Value) -> Result<String> {
        if !*self.collection.get_or_insert(last_page.is_array()) {
            return Ok(serde_json::to_string_pretty(result)?);
        }
        let items = items_of(last_page);
        if items.is_empty() {
            return Ok(if self.opened { "\n]" } else { "[]" }.to_string());
        }
        let mut chunk = self.separator().to_string();
        chunk.push_str(&pretty_items(&items)?);
        chunk.push_str("\n]");
        Ok(chunk)
    }

    fn separator(&mut self) -> &'static str {
        if std::mem::replace(&mut self.opened, true) {
            ",\n"
        } else {
            "[\n"
        }
    }
}

/// Items a collection page contributes; matches the buffered accumulation.
fn items_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Pretty-printed items without the enclosing brackets.
fn pretty_items(items: &[Value]) -> Result<String> {
    let pretty = serde_json::to_string_pretty(items)?;
    let inner = pretty
        .strip_prefix("[\n")
        .and_then(|s| s.strip_suffix("\n]"))
        .unwrap_or(&pretty);
    Ok(inner.to_string())
}

/// Turn crawl events into JSON text chunks. An error ends the stream.
pub fn json_fragments(
    mut events: LocalBoxStream<'static, CrawlEvent>,
) -> LocalBoxStream<'static, Result<String>> {
    stream! {
        let mut writer = FragmentWriter::default();
        while let Some(event) = events.next().await {
            match event {
                CrawlEvent::Page(value) => match writer.page(&value) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                },
                CrawlEvent::Finished { last_page, result, .. } => {
                    yield writer.finish(&last_page, &result);
                    return;
                }
                CrawlEvent::Failed(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed_local()
}

/// Pipe `chunks` into `path`, creating parent directories.
pub async fn write_file(mut chunks: LocalBoxStream<'static, Result<String>>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = chunks.next().await {
        file.write_all(chunk?.as_bytes()).await?;
    }
    file.flush().await?;
    debug!(path = %path.display(), "wrote crawl output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::StopReason;
    use crate::error::Error;
    use serde_json::json;

    async fn collect(events: Vec<CrawlEvent>) -> Vec<Result<String>> {
        json_fragments(futures::stream::iter(events).boxed_local())
            .collect()
            .await
    }

    fn finished(last_page: Value, result: Value) -> CrawlEvent {
        CrawlEvent::Finished {
            last_page,
            result,
            reason: StopReason::NoNextPage,
        }
    }

    #[test]
    fn test_completion_fires_once() {
        let mut seen = Vec::new();
        {
            let mut completion = Completion::new(|v: i32| seen.push(v));
            assert!(completion.complete(1));
            assert!(completion.is_complete());
            assert!(!completion.complete(2));
        }
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_collection_pages_form_one_array() {
        let chunks = collect(vec![
            CrawlEvent::Page(json!([{"n": 1}])),
            CrawlEvent::Page(json!([])),
            CrawlEvent::Page(json!([{"n": 2}, {"n": 3}])),
            finished(json!([{"n": 4}]), json!([{"n": 1}, {"n": 2}, {"n": 3}, {"n": 4}])),
        ])
        .await;
        let chunks: Vec<String> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("[\n"));
        assert!(chunks[1].starts_with(",\n"));
        assert!(chunks[2].ends_with("\n]"));

        let doc: Value = serde_json::from_str(&chunks.concat()).unwrap();
        assert_eq!(doc, json!([{"n": 1}, {"n": 2}, {"n": 3}, {"n": 4}]));
    }

    #[tokio::test]
    async fn test_stream_matches_buffered_result_for_irregular_pages() {
        let mut state = crate::crawl::PaginationState::new(None, None, None);
        let pages = [json!(["a"]), Value::Null, json!({"x": 1})];
        for page in &pages {
            state.advance(page.clone(), |_| Ok(None)).unwrap();
        }
        let buffered = state.result();

        let chunks = collect(vec![
            CrawlEvent::Page(pages[0].clone()),
            CrawlEvent::Page(pages[1].clone()),
            finished(pages[2].clone(), buffered.clone()),
        ])
        .await;
        let text: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), buffered);
        assert_eq!(buffered, json!(["a", {"x": 1}]));
    }

    #[tokio::test]
    async fn test_empty_collection_is_an_empty_array() {
        let chunks = collect(vec![CrawlEvent::Page(json!([])), finished(json!([]), json!([]))]).await;
        let text: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_document_root_written_only_at_the_end() {
        let chunks = collect(vec![
            CrawlEvent::Page(json!({"page": 1})),
            finished(json!({"page": 2}), json!({"page": 2})),
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        let doc: Value = serde_json::from_str(chunks[0].as_ref().unwrap()).unwrap();
        assert_eq!(doc, json!({"page": 2}));
    }

    #[tokio::test]
    async fn test_error_ends_stream_without_data() {
        let chunks = collect(vec![
            CrawlEvent::Page(json!({"page": 1})),
            CrawlEvent::Failed(Error::extraction("boom")),
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(Error::Extraction(_))));
    }

    #[tokio::test]
    async fn test_write_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/result.json");
        let chunks = json_fragments(
            futures::stream::iter(vec![finished(json!([1, 2]), json!([1, 2]))]).boxed_local(),
        );
        write_file(chunks, &path).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!([1, 2]));
    }
}
