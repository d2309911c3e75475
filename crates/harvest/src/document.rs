//! Document model seam.
//!
//! The walker only needs the [`DocumentContext`] capability set. The
//! [`HtmlDocument`] adapter implements it over the `scraper` crate; tests
//! and embedders can substitute their own.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{Error, Result};

/// Shared handle to a document or a narrowed selection within one.
pub type Context = Rc<dyn DocumentContext>;

/// What the walker may ask of a document.
///
/// A context is a selection of zero or more elements. `query_all` and
/// `narrow` keep elements of the selection that match the selector
/// themselves, and otherwise descend into them.
pub trait DocumentContext {
    /// Every matching element, in document order, one context each.
    fn query_all(&self, selector: &str) -> Result<Vec<Context>>;
    /// All matching elements as a single selection.
    fn narrow(&self, selector: &str) -> Result<Context>;
    /// The members of this selection, one context each.
    fn elements(&self) -> Vec<Context>;
    /// Concatenated text content of the selection.
    fn text(&self) -> String;
    /// Attribute of the first element.
    fn attribute(&self, name: &str) -> Option<String>;
    /// Serialized inner markup of the first element.
    fn inner_html(&self) -> String;
    fn is_empty(&self) -> bool;
    /// Base URL the document was loaded from, if any.
    fn base_url(&self) -> Option<Url>;
}

/// Attributes rewritten to absolute form against the document's base URL.
const URL_ATTRIBUTES: &[&str] = &["href", "src"];

struct Shared {
    html: Html,
    base: Option<Url>,
    selectors: RefCell<HashMap<String, Selector>>,
}

impl Shared {
    fn selector(&self, selector: &str) -> Result<Selector> {
        if let Some(sel) = self.selectors.borrow().get(selector) {
            return Ok(sel.clone());
        }
        let sel = Selector::parse(selector).map_err(|e| Error::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        self.selectors
            .borrow_mut()
            .insert(selector.to_string(), sel.clone());
        Ok(sel)
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    fn absolutize(&self, value: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(value)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| value.to_string()),
            None => value.to_string(),
        }
    }
}

/// A parsed HTML document, or a selection of elements inside one.
#[derive(Clone)]
pub struct HtmlDocument {
    shared: Rc<Shared>,
    /// `None` is the whole document.
    nodes: Option<Vec<NodeId>>,
}

impl HtmlDocument {
    /// Parse a document. Relative `href`/`src` values resolve against
    /// `base_url`, or against a `<base href>` element when present.
    pub fn parse(html: &str, base_url: Option<&str>) -> Context {
        let html = Html::parse_document(html);

        let mut base = base_url.and_then(|u| match Url::parse(u) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!("ignoring unparsable base url {u}: {e}");
                None
            }
        });

        if let Ok(sel) = Selector::parse("base[href]") {
            if let Some(href) = html
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
            {
                let declared = match &base {
                    Some(b) => b.join(href).ok(),
                    None => Url::parse(href).ok(),
                };
                if declared.is_some() {
                    base = declared;
                }
            }
        }

        Rc::new(HtmlDocument {
            shared: Rc::new(Shared {
                html,
                base,
                selectors: RefCell::new(HashMap::new()),
            }),
            nodes: None,
        })
    }

    fn with_nodes(&self, nodes: Vec<NodeId>) -> Self {
        HtmlDocument {
            shared: Rc::clone(&self.shared),
            nodes: Some(nodes),
        }
    }

    fn members(&self) -> Vec<ElementRef<'_>> {
        match &self.nodes {
            None => vec![self.shared.html.root_element()],
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.shared.element(*id))
                .collect(),
        }
    }

    fn select_ids(&self, selector: &str) -> Result<Vec<NodeId>> {
        let sel = self.shared.selector(selector)?;

        if self.nodes.is_none() {
            return Ok(self.shared.html.select(&sel).map(|el| el.id()).collect());
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for el in self.members() {
            if sel.matches(&el) {
                if seen.insert(el.id()) {
                    out.push(el.id());
                }
                continue;
            }
            for child in el.select(&sel) {
                if seen.insert(child.id()) {
                    out.push(child.id());
                }
            }
        }
        Ok(out)
    }
}

impl DocumentContext for HtmlDocument {
    fn query_all(&self, selector: &str) -> Result<Vec<Context>> {
        Ok(self
            .select_ids(selector)?
            .into_iter()
            .map(|id| Rc::new(self.with_nodes(vec![id])) as Context)
            .collect())
    }

    fn narrow(&self, selector: &str) -> Result<Context> {
        let ids = self.select_ids(selector)?;
        Ok(Rc::new(self.with_nodes(ids)))
    }

    fn elements(&self) -> Vec<Context> {
        self.members()
            .into_iter()
            .map(|el| Rc::new(self.with_nodes(vec![el.id()])) as Context)
            .collect()
    }

    fn text(&self) -> String {
        self.members()
            .iter()
            .flat_map(|el| el.text())
            .collect()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        let members = self.members();
        let value = members.first()?.value().attr(name)?;
        if URL_ATTRIBUTES.contains(&name) {
            Some(self.shared.absolutize(value))
        } else {
            Some(value.to_string())
        }
    }

    fn inner_html(&self) -> String {
        self.members()
            .first()
            .map(|el| el.inner_html())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        matches!(&self.nodes, Some(ids) if ids.is_empty())
    }

    fn base_url(&self) -> Option<Url> {
        self.shared.base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h1> Title </h1>
          <ul>
            <li class="item"><a href="/a">A</a></li>
            <li class="item"><a href="b.html">B</a></li>
            <li class="item"><a href="https://other.example/c">C</a></li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn test_query_all_preserves_document_order() {
        let doc = HtmlDocument::parse(PAGE, None);
        let items = doc.query_all("li.item").unwrap();
        let texts: Vec<_> = items.iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_narrow_keeps_self_matching_elements() {
        let doc = HtmlDocument::parse(PAGE, None);
        let items = doc.query_all("li.item").unwrap();
        let same = items[1].narrow("li").unwrap();
        assert_eq!(same.text(), "B");
        let link = items[1].narrow("a").unwrap();
        assert_eq!(link.attribute("href").as_deref(), Some("b.html"));
    }

    #[test]
    fn test_attributes_absolutized_against_base() {
        let doc = HtmlDocument::parse(PAGE, Some("https://example.com/list/"));
        let hrefs: Vec<_> = doc
            .query_all("a")
            .unwrap()
            .iter()
            .filter_map(|c| c.attribute("href"))
            .collect();
        assert_eq!(
            hrefs,
            vec![
                "https://example.com/a",
                "https://example.com/list/b.html",
                "https://other.example/c",
            ]
        );
    }

    #[test]
    fn test_base_element_overrides_base_url() {
        let html = r#"<html><head><base href="https://cdn.example/x/"></head>
            <body><img src="pic.png"></body></html>"#;
        let doc = HtmlDocument::parse(html, Some("https://example.com/"));
        let img = doc.narrow("img").unwrap();
        assert_eq!(
            img.attribute("src").as_deref(),
            Some("https://cdn.example/x/pic.png")
        );
    }

    #[test]
    fn test_invalid_selector_is_configuration_error() {
        let doc = HtmlDocument::parse(PAGE, None);
        let err = doc.query_all("li[").err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_selection() {
        let doc = HtmlDocument::parse(PAGE, None);
        let none = doc.narrow("table").unwrap();
        assert!(none.is_empty());
        assert_eq!(none.text(), "");
        assert_eq!(none.attribute("href"), None);
        assert!(none.elements().is_empty());
    }
}
