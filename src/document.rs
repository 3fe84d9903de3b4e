use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::normalize::{LINE_BREAK_TOKEN, RawFragments, collapse_whitespace};

/// Elements whose end is reported as a line break by [`Extract::RichText`].
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "tr",
    "table",
];

/// What to pull out of each element matched by a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    /// Every descendant text node, one fragment each.
    Text,
    /// Only the element's direct text children.
    OwnText,
    Attr(&'static str),
    /// Descendant text nodes interleaved with `<br>` tokens and absolute link targets.
    RichText,
}

/// A structural selection expression: a CSS selector plus an extraction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub selector: &'static str,
    pub extract: Extract,
}

impl Query {
    pub const fn text(selector: &'static str) -> Self {
        Self {
            selector,
            extract: Extract::Text,
        }
    }

    pub const fn own_text(selector: &'static str) -> Self {
        Self {
            selector,
            extract: Extract::OwnText,
        }
    }

    pub const fn attr(selector: &'static str, name: &'static str) -> Self {
        Self {
            selector,
            extract: Extract::Attr(name),
        }
    }

    pub const fn rich_text(selector: &'static str) -> Self {
        Self {
            selector,
            extract: Extract::RichText,
        }
    }
}

/// Node selection over an already-parsed page or a part of it.
pub trait DocumentQuery {
    /// Fragments for every match of `query`, in document order.
    fn select(&self, query: &Query) -> RawFragments;

    /// Sub-regions matching `selector`, each queryable on its own.
    fn regions(&self, selector: &'static str) -> Vec<Region<'_>>;

    fn exists(&self, selector: &'static str) -> bool {
        !self.regions(selector).is_empty()
    }
}

/// A fetched page: its final URL, raw body and parsed tree.
pub struct HtmlPage {
    url: Url,
    body: String,
    html: Html,
}

impl HtmlPage {
    pub fn parse(url: Url, body: String) -> Self {
        let html = Html::parse_document(&body);
        Self { url, body, html }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

impl DocumentQuery for HtmlPage {
    fn select(&self, query: &Query) -> RawFragments {
        let Some(selector) = parse_selector(query.selector) else {
            return RawFragments::new();
        };
        let mut out = RawFragments::new();
        for element in self.html.select(&selector) {
            extract_into(element, query.extract, &mut out);
        }
        out
    }

    fn regions(&self, selector: &'static str) -> Vec<Region<'_>> {
        match parse_selector(selector) {
            Some(selector) => self.html.select(&selector).map(Region).collect(),
            None => Vec::new(),
        }
    }
}

/// An element subtree of an [`HtmlPage`].
#[derive(Clone, Copy)]
pub struct Region<'a>(ElementRef<'a>);

impl<'a> Region<'a> {
    /// Whitespace-collapsed text of the whole region.
    pub fn label(&self) -> String {
        let text: Vec<String> = self.0.text().map(fold_line_breaks).collect();
        collapse_whitespace(&text.concat()).trim().to_string()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.0.value().attr(name)
    }
}

impl DocumentQuery for Region<'_> {
    fn select(&self, query: &Query) -> RawFragments {
        let Some(selector) = parse_selector(query.selector) else {
            return RawFragments::new();
        };
        let mut out = RawFragments::new();
        for element in self.0.select(&selector) {
            extract_into(element, query.extract, &mut out);
        }
        out
    }

    fn regions(&self, selector: &'static str) -> Vec<Region<'_>> {
        match parse_selector(selector) {
            Some(selector) => self.0.select(&selector).map(Region).collect(),
            None => Vec::new(),
        }
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(selector) => Some(selector),
        Err(e) => {
            log::warn!("Invalid selector '{}': {:?}", selector, e);
            None
        }
    }
}

/// Source line breaks inside HTML text are insignificant whitespace.
fn fold_line_breaks(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn extract_into(element: ElementRef<'_>, extract: Extract, out: &mut RawFragments) {
    match extract {
        Extract::Text => {
            for text in element.text() {
                out.push(fold_line_breaks(text));
            }
        }
        Extract::OwnText => {
            for child in element.children() {
                if let Node::Text(text) = child.value() {
                    out.push(fold_line_breaks(text));
                }
            }
        }
        Extract::Attr(name) => {
            if let Some(value) = element.value().attr(name) {
                out.push(value);
            }
        }
        Extract::RichText => rich_text(element, out),
    }
}

fn rich_text(element: ElementRef<'_>, out: &mut RawFragments) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push(fold_line_breaks(text)),
            Node::Element(el) if el.name() == "br" => out.push(LINE_BREAK_TOKEN),
            Node::Element(el) => {
                if el.name() == "a" {
                    if let Some(href) = el.attr("href") {
                        if href.starts_with("http://") || href.starts_with("https://") {
                            out.push(href);
                        }
                    }
                }
                if let Some(child) = ElementRef::wrap(child) {
                    rich_text(child, out);
                }
            }
            _ => {}
        }
    }

    if BLOCK_ELEMENTS.contains(&element.value().name()) {
        out.push(LINE_BREAK_TOKEN);
    }
}
