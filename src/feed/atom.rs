//! Atom 1.0 and legacy Atom 0.3 extraction.

use super::model::{Feed, FeedItem};
use super::parser::{parse_date, FeedFormat, ParseOptions, RawItem};
use super::xml::{Element, ATOM03_NS, ATOM_NS};
use crate::util::strip_html;

/// Entry date elements, most authoritative first. 0.3 documents use the
/// legacy names.
const DATE_ELEMENTS: [&str; 5] = ["updated", "modified", "issued", "published", "created"];

pub(super) fn read_feed(root: &Element, format: FeedFormat, options: &ParseOptions, feed: &mut Feed) {
    let ns = match format {
        FeedFormat::Atom03 => Some(ATOM03_NS),
        _ => Some(ATOM_NS),
    };

    feed.title = root.child(ns, "title").map(text_construct).unwrap_or_default();
    feed.description = ["subtitle", "tagline"]
        .iter()
        .find_map(|name| root.child(ns, name))
        .map(text_construct)
        .unwrap_or_default();
    feed.link = alternate_link(root, ns);
    feed.last_published = first_date(root, ns);

    feed.items = root
        .children_named(ns, "entry")
        .map(|entry| read_entry(entry, ns, options))
        .collect();
}

fn read_entry(entry: &Element, ns: Option<&str>, options: &ParseOptions) -> FeedItem {
    RawItem {
        title: entry.child(ns, "title").map(text_construct),
        link: alternate_link(entry, ns),
        description: entry.child(ns, "summary").map(content_construct),
        content: entry.child(ns, "content").map(content_construct),
        publish_time: first_date(entry, ns),
    }
    .finish(options)
}

fn first_date(element: &Element, ns: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    DATE_ELEMENTS
        .iter()
        .find_map(|name| element.child_text(ns, name).and_then(parse_date))
}

/// `<link rel="alternate">`, or a link without `rel`, falling back to the
/// first link with an href.
fn alternate_link(element: &Element, ns: Option<&str>) -> Option<String> {
    let links: Vec<&Element> = element
        .children_named(ns, "link")
        .filter(|l| l.attr("href").is_some_and(|h| !h.trim().is_empty()))
        .collect();

    links
        .iter()
        .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| l.attr("href"))
        .map(|h| h.trim().to_string())
}

/// Title-like text: HTML flattened to plain text.
fn text_construct(element: &Element) -> String {
    strip_html(&content_construct(element))
}

/// Content-like text: `xhtml` bodies arrive as child elements, everything
/// else as (possibly escaped) text.
fn content_construct(element: &Element) -> String {
    if element.attr("type") == Some("xhtml") {
        element.deep_text().trim().to_string()
    } else {
        element.text.trim().to_string()
    }
}
