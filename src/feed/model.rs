use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Read state of a single article.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Not yet assigned by the reader.
    #[default]
    Uninitialized,
    Unread,
    Read,
}

impl ItemStatus {
    /// Anything the user has not explicitly read is kept when persisting.
    pub fn is_unread(self) -> bool {
        !matches!(self, ItemStatus::Read)
    }
}

/// One article within a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    /// Plain text, HTML stripped, bounded by the parser's summary length.
    pub summary: String,
    /// HTML content, trimmed but never truncated.
    pub content: String,
    pub link: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ItemStatus,
}

impl FeedItem {
    fn identity(&self) -> &str {
        self.link.as_deref().unwrap_or(&self.title)
    }
}

/// Current state of one subscribed site.
///
/// `uri` is the key the monitor schedules on and the cache stores under, so
/// it is fixed at construction and only exposed read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    uri: Url,
    pub title: String,
    pub description: String,
    /// Site homepage.
    pub link: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_published: Option<DateTime<Utc>>,
    /// Newest first.
    pub items: Vec<FeedItem>,
    /// Set when the most recent check failed.
    pub error: Option<String>,
}

impl Feed {
    /// Creates an empty feed for `uri`.
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            title: String::new(),
            description: String::new(),
            link: None,
            last_checked: None,
            last_published: None,
            items: Vec::new(),
            error: None,
        }
    }

    /// Empty feed standing in for a registration that has not been fetched yet.
    ///
    /// The title falls back to the URI until the first successful fetch.
    pub fn placeholder(uri: Url) -> Self {
        let title = uri.to_string();
        Self {
            title,
            ..Self::new(uri)
        }
    }

    /// Feed describing a failed check of `uri`.
    pub fn failed(uri: Url, error: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            last_checked: Some(checked_at),
            error: Some(error.into()),
            ..Self::placeholder(uri)
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_unread()).count()
    }

    /// Copies each item's status from the matching item of `previous`, so a
    /// refetch keeps what the user already read. Items match by link, or by
    /// title when they have none.
    pub fn carry_over_statuses(&mut self, previous: &Feed) {
        let known: HashMap<&str, ItemStatus> = previous
            .items
            .iter()
            .map(|item| (item.identity(), item.status))
            .collect();
        for item in &mut self.items {
            if let Some(status) = known.get(item.identity()) {
                item.status = *status;
            }
        }
    }

    /// Sorts items newest first; items without a publish time go last.
    pub fn sort_items(&mut self) {
        self.items.sort_by(|a, b| newest_first(a.publish_time, b.publish_time));
    }
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(title: &str, ts: Option<i64>) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            publish_time: ts.map(|t| Utc.timestamp_opt(t, 0).unwrap()),
            ..FeedItem::default()
        }
    }

    #[test]
    fn test_sort_items_newest_first_nulls_last() {
        let mut feed = Feed::new(Url::parse("https://example.com/feed").unwrap());
        feed.items = vec![
            item("none", None),
            item("old", Some(100)),
            item("new", Some(300)),
            item("mid", Some(200)),
        ];
        feed.sort_items();

        let titles: Vec<_> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["new", "mid", "old", "none"]);
    }

    #[test]
    fn test_failed_feed_keeps_uri() {
        let uri = Url::parse("https://example.com/feed").unwrap();
        let now = Utc::now();
        let feed = Feed::failed(uri.clone(), "HTTP error: status 500", now);

        assert_eq!(feed.uri(), &uri);
        assert!(feed.is_failed());
        assert_eq!(feed.last_checked, Some(now));
        assert!(feed.last_published.is_none());
        assert!(feed.items.is_empty());
        assert_eq!(feed.title, "https://example.com/feed");
    }

    #[test]
    fn test_unread_count_ignores_read() {
        let mut feed = Feed::new(Url::parse("https://example.com/feed").unwrap());
        feed.items = vec![item("a", None), item("b", None), item("c", None)];
        feed.items[0].status = ItemStatus::Read;
        feed.items[1].status = ItemStatus::Unread;
        assert_eq!(feed.unread_count(), 2);
    }

    #[test]
    fn test_carry_over_keeps_read_items_read() {
        let uri = Url::parse("https://example.com/feed").unwrap();
        let mut previous = Feed::new(uri.clone());
        previous.items = vec![item("a", Some(100)), item("b", Some(200)), item("untitled", None)];
        previous.items[0].link = Some("https://example.com/a".to_string());
        previous.items[0].status = ItemStatus::Read;
        previous.items[1].status = ItemStatus::Read;
        previous.items[2].status = ItemStatus::Unread;

        let mut fetched = Feed::new(uri);
        fetched.items = vec![item("a (edited)", Some(100)), item("b", Some(200)), item("c", Some(300))];
        fetched.items[0].link = Some("https://example.com/a".to_string());
        for item in &mut fetched.items {
            item.status = ItemStatus::Unread;
        }

        fetched.carry_over_statuses(&previous);
        let statuses: Vec<_> = fetched.items.iter().map(|i| i.status).collect();
        assert_eq!(statuses, [ItemStatus::Read, ItemStatus::Read, ItemStatus::Unread]);
    }
}
