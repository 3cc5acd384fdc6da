use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use url::Url;

use super::model::{Feed, FeedItem, ItemStatus};
use super::xml::{parse_document, Element, ATOM03_NS, ATOM_NS, RDF_NS, RSS10_NS};
use super::{atom, rss};
use crate::util::{strip_html, truncate_chars};

/// Default bound on item summaries, in chars.
pub const DEFAULT_MAX_SUMMARY_LENGTH: usize = 400;

/// Errors produced while turning a document into a [`Feed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes are not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// The document has no root element.
    #[error("Document is empty")]
    Empty,
    /// Nesting exceeds the safety limit.
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    TooDeep(usize),
    /// The root element is not a supported RSS or Atom root.
    #[error("Unrecognized feed format (root element <{0}>)")]
    UnknownFormat(String),
}

/// Syndication format, detected from the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedFormat {
    Rss091,
    Rss092,
    Rss10,
    Rss20,
    Atom03,
    Atom10,
    Unknown,
}

impl FeedFormat {
    pub fn is_atom(self) -> bool {
        matches!(self, FeedFormat::Atom03 | FeedFormat::Atom10)
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedFormat::Rss091 => "RSS 0.91",
            FeedFormat::Rss092 => "RSS 0.92",
            FeedFormat::Rss10 => "RSS 1.0",
            FeedFormat::Rss20 => "RSS 2.0",
            FeedFormat::Atom03 => "Atom 0.3",
            FeedFormat::Atom10 => "Atom 1.0",
            FeedFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Upper bound on [`FeedItem::summary`] length, in chars.
    pub max_summary_length: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_summary_length: DEFAULT_MAX_SUMMARY_LENGTH,
        }
    }
}

/// Detects the syndication format from a root element's name, namespace and
/// `version` attribute.
pub fn detect_format(root: &Element) -> FeedFormat {
    match (root.namespace.as_deref(), root.name.as_str()) {
        (None, "rss") => match root.attr("version").map(str::trim) {
            Some("0.91") => FeedFormat::Rss091,
            Some("0.92") => FeedFormat::Rss092,
            Some("2.0") => FeedFormat::Rss20,
            _ => FeedFormat::Unknown,
        },
        (Some(RDF_NS), "RDF") if root.child(Some(RSS10_NS), "channel").is_some() => {
            FeedFormat::Rss10
        }
        (Some(ATOM_NS), "feed") => FeedFormat::Atom10,
        (Some(ATOM03_NS), "feed") => FeedFormat::Atom03,
        _ => FeedFormat::Unknown,
    }
}

/// Parses an RSS or Atom document fetched from `uri`.
///
/// Items come back sorted newest first with undated items last, summaries
/// bounded by [`ParseOptions::max_summary_length`], and missing titles
/// replaced by the item or site link.
///
/// # Errors
///
/// - [`ParseError::Xml`] / [`ParseError::Empty`] / [`ParseError::TooDeep`] for
///   documents that are not usable XML
/// - [`ParseError::UnknownFormat`] when the root is not RSS 0.91/0.92/1.0/2.0
///   or Atom
pub fn parse_feed(bytes: &[u8], uri: &Url, options: &ParseOptions) -> Result<Feed, ParseError> {
    let root = parse_document(bytes)?;
    let format = detect_format(&root);

    let mut feed = Feed::new(uri.clone());
    match format {
        FeedFormat::Rss091 | FeedFormat::Rss092 | FeedFormat::Rss20 => {
            rss::read_channel(&root, options, &mut feed)
        }
        FeedFormat::Rss10 => rss::read_rdf(&root, options, &mut feed),
        FeedFormat::Atom03 | FeedFormat::Atom10 => atom::read_feed(&root, format, options, &mut feed),
        FeedFormat::Unknown => return Err(ParseError::UnknownFormat(root.name)),
    }

    feed.sort_items();
    if let Some(newest) = feed.items.iter().filter_map(|i| i.publish_time).max() {
        feed.last_published = Some(newest);
    }
    if feed.title.is_empty() {
        feed.title = feed.link.clone().unwrap_or_else(|| uri.to_string());
    }

    tracing::trace!(feed = %uri, format = %format, items = feed.items.len(), "Parsed feed");
    Ok(feed)
}

/// Fields pulled out of one `<item>`/`<entry>` before normalization.
#[derive(Debug, Default)]
pub(super) struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// `<description>` or Atom `<summary>`.
    pub description: Option<String>,
    /// `<content:encoded>` or Atom `<content>`.
    pub content: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
}

impl RawItem {
    pub fn finish(self, options: &ParseOptions) -> FeedItem {
        let description = self.description.as_deref().map(strip_html).unwrap_or_default();
        let plain = if description.is_empty() {
            self.content.as_deref().map(strip_html).unwrap_or_default()
        } else {
            description
        };
        let summary = truncate_chars(&plain, options.max_summary_length).into_owned();

        let content = self
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or_else(|| self.description.as_deref().map(str::trim))
            .unwrap_or_default()
            .to_string();

        let title = self
            .title
            .as_deref()
            .map(strip_html)
            .filter(|t| !t.is_empty())
            .or_else(|| self.link.clone())
            .unwrap_or_default();

        FeedItem {
            title,
            summary,
            content,
            link: self.link,
            publish_time: self.publish_time,
            status: ItemStatus::Unread,
        }
    }
}

/// Parses the date formats seen in feeds: RFC 2822 (RSS), RFC 3339 (Atom,
/// Dublin Core) and a few lenient ISO 8601 variants.
pub(super) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Text of the first child that exists and is non-empty.
pub(super) fn first_text(element: &Element, candidates: &[(Option<&str>, &str)]) -> Option<String> {
    candidates
        .iter()
        .find_map(|(ns, name)| element.child_text(*ns, name))
        .map(str::to_string)
}
