//! RSS 0.91 / 0.92 / 2.0 (`<rss><channel>`) and RSS 1.0 (`<rdf:RDF>`) extraction.

use super::model::{Feed, FeedItem};
use super::parser::{first_text, parse_date, ParseOptions, RawItem};
use super::xml::{Element, CONTENT_NS, DC_NS, RSS10_NS};
use crate::util::strip_html;

/// Reads an `<rss>` root. Items live inside `<channel>`.
pub(super) fn read_channel(root: &Element, options: &ParseOptions, feed: &mut Feed) {
    let Some(channel) = root.child(None, "channel") else {
        return;
    };

    read_metadata(channel, None, feed);
    feed.last_published = first_text(
        channel,
        &[(None, "lastBuildDate"), (None, "pubDate"), (Some(DC_NS), "date")],
    )
    .and_then(|d| parse_date(&d));

    feed.items = channel
        .children_named(None, "item")
        .map(|item| read_item(item, None, options))
        .collect();
}

/// Reads an RSS 1.0 `<rdf:RDF>` root. Items are siblings of `<channel>`.
pub(super) fn read_rdf(root: &Element, options: &ParseOptions, feed: &mut Feed) {
    if let Some(channel) = root.child(Some(RSS10_NS), "channel") {
        read_metadata(channel, Some(RSS10_NS), feed);
        feed.last_published = channel
            .child_text(Some(DC_NS), "date")
            .and_then(parse_date);
    }

    feed.items = root
        .children_named(Some(RSS10_NS), "item")
        .map(|item| read_item(item, Some(RSS10_NS), options))
        .collect();
}

fn read_metadata(channel: &Element, ns: Option<&str>, feed: &mut Feed) {
    feed.title = channel
        .child_text(ns, "title")
        .map(strip_html)
        .unwrap_or_default();
    feed.description = channel
        .child_text(ns, "description")
        .map(strip_html)
        .unwrap_or_default();
    feed.link = channel.child_text(ns, "link").map(str::to_string);
}

fn read_item(item: &Element, ns: Option<&str>, options: &ParseOptions) -> FeedItem {
    // RSS 1.0 carries its date in Dublin Core; 2.0 uses pubDate
    let publish_time = if ns == Some(RSS10_NS) {
        item.child_text(Some(DC_NS), "date").and_then(parse_date)
    } else {
        first_text(item, &[(None, "pubDate"), (Some(DC_NS), "date")]).and_then(|d| parse_date(&d))
    };

    let link = item
        .child_text(ns, "link")
        .map(str::to_string)
        .or_else(|| permalink_guid(item));

    RawItem {
        title: item.child_text(ns, "title").map(str::to_string),
        link,
        description: item.child_text(ns, "description").map(str::to_string),
        content: item.child_text(Some(CONTENT_NS), "encoded").map(str::to_string),
        publish_time,
    }
    .finish(options)
}

/// `<guid>` doubles as the link unless marked `isPermaLink="false"`.
fn permalink_guid(item: &Element) -> Option<String> {
    let guid = item.child(None, "guid")?;
    if guid.attr("isPermaLink").map(str::trim) == Some("false") {
        return None;
    }
    guid.trimmed_text()
        .filter(|g| g.starts_with("http://") || g.starts_with("https://"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use crate::feed::{parse_feed, FeedFormat, ParseOptions};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use url::Url;

    fn uri() -> Url {
        Url::parse("https://example.com/rss").unwrap()
    }

    const RSS20: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Test &amp; Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First &lt;b&gt;bold&lt;/b&gt;</description>
    </item>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate>
      <description></description>
      <content:encoded><![CDATA[<p>Second body</p>]]></content:encoded>
    </item>
    <item>
      <guid>http://example.com/3</guid>
      <description>Undated</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_rss20_channel_and_items() {
        let feed = parse_feed(RSS20.as_bytes(), &uri(), &ParseOptions::default()).unwrap();

        assert_eq!(feed.title, "Test & Feed");
        assert_eq!(feed.description, "Test description");
        assert_eq!(feed.link.as_deref(), Some("http://example.com/"));
        assert_eq!(feed.items.len(), 3);

        // Newest first, undated last
        assert_eq!(feed.items[0].title, "Item 2");
        assert_eq!(feed.items[1].title, "Item 1");
        assert!(feed.items[2].publish_time.is_none());

        assert_eq!(
            feed.last_published,
            Some(Utc.with_ymd_and_hms(2024, 10, 21, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rss20_summary_and_content_rules() {
        let feed = parse_feed(RSS20.as_bytes(), &uri(), &ParseOptions::default()).unwrap();

        let second = &feed.items[0];
        assert_eq!(second.summary, "Second body");
        assert_eq!(second.content, "<p>Second body</p>");

        let first = &feed.items[1];
        assert_eq!(first.summary, "First bold");
        assert_eq!(first.content, "First <b>bold</b>");
    }

    #[test]
    fn test_rss20_title_falls_back_to_permalink_guid() {
        let feed = parse_feed(RSS20.as_bytes(), &uri(), &ParseOptions::default()).unwrap();
        let undated = &feed.items[2];
        assert_eq!(undated.link.as_deref(), Some("http://example.com/3"));
        assert_eq!(undated.title, "http://example.com/3");
    }

    #[test]
    fn test_rss091_without_dates() {
        let xml = r#"<rss version="0.91"><channel>
            <title>Old</title><link>http://old.example.com/</link>
            <item><title>A</title><link>http://old.example.com/a</link></item>
            <item><title>B</title><link>http://old.example.com/b</link></item>
        </channel></rss>"#;
        let feed = parse_feed(xml.as_bytes(), &uri(), &ParseOptions::default()).unwrap();
        assert_eq!(feed.items.len(), 2);
        // Stable order when nothing is dated
        assert_eq!(feed.items[0].title, "A");
        assert!(feed.last_published.is_none());
    }

    #[test]
    fn test_rss10_uses_dc_date() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="http://example.org/">
    <title>RDF Site</title>
    <link>http://example.org/</link>
    <description>An RSS 1.0 feed</description>
  </channel>
  <item rdf:about="http://example.org/older">
    <title>Older</title>
    <link>http://example.org/older</link>
    <dc:date>2024-01-01T00:00:00Z</dc:date>
  </item>
  <item rdf:about="http://example.org/newer">
    <title>Newer</title>
    <link>http://example.org/newer</link>
    <description>Fresh</description>
    <dc:date>2024-02-01T00:00:00Z</dc:date>
  </item>
</rdf:RDF>"#;
        let root = crate::feed::xml::parse_document(xml.as_bytes()).unwrap();
        assert_eq!(crate::feed::detect_format(&root), FeedFormat::Rss10);

        let feed = parse_feed(xml.as_bytes(), &uri(), &ParseOptions::default()).unwrap();
        assert_eq!(feed.title, "RDF Site");
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].title, "Newer");
        assert_eq!(feed.items[0].summary, "Fresh");
        assert_eq!(
            feed.items[1].publish_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_missing_channel_title_uses_link() {
        let xml = r#"<rss version="2.0"><channel><link>http://site.example/</link></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes(), &uri(), &ParseOptions::default()).unwrap();
        assert_eq!(feed.title, "http://site.example/");
        assert!(feed.items.is_empty());
    }
}
