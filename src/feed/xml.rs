//! Minimal namespace-aware element tree.
//!
//! Feeds are small enough to hold in memory, and the format extractors need
//! random access to children (fallback chains across several tags), so the
//! document is read once with `quick-xml` into owned [`Element`]s.

use std::borrow::Cow;

use quick_xml::encoding::Decoder;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use super::parser::ParseError;

/// Nesting limit; deeper documents are rejected rather than recursed into.
const MAX_DEPTH: usize = 64;

/// Longest entity name looked up; longer `&...;` runs are left as text.
const MAX_ENTITY_LEN: usize = 32;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const ATOM03_NS: &str = "http://purl.org/atom/ns#";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RSS10_NS: &str = "http://purl.org/rss/1.0/";
pub const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Resolved namespace URI, `None` for unqualified names.
    pub namespace: Option<String>,
    /// Local name without prefix.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Direct text and CDATA content.
    pub text: String,
}

impl Element {
    pub fn is(&self, namespace: Option<&str>, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == namespace
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, namespace: Option<&str>, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(namespace, name))
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, name))
    }

    /// Trimmed text of the first matching child, `None` when absent or blank.
    pub fn child_text(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.child(namespace, name).and_then(Element::trimmed_text)
    }

    pub fn trimmed_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Text of this element and all descendants, in document order.
    pub fn deep_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            let inner = child.deep_text();
            if !inner.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&inner);
            }
        }
        out
    }
}

/// Reads a complete document and returns its root element.
///
/// Text is decoded with the encoding named in the XML declaration (or BOM),
/// falling back to UTF-8.
pub fn parse_document(bytes: &[u8]) -> Result<Element, ParseError> {
    let mut reader = NsReader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let (resolved, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(e.to_string()))?;
        let namespace = match resolved {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            _ => None,
        };
        // The declaration can switch the encoding, so ask after every event
        let decoder = reader.decoder();

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::TooDeep(MAX_DEPTH));
                }
                stack.push(open_element(namespace, &e, decoder));
            }
            Event::Empty(e) => {
                let element = open_element(namespace, &e, decoder);
                close_element(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    close_element(&mut stack, &mut root, element);
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let raw = decode(decoder, &t);
                    top.text.push_str(&unescape_text(&raw));
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decode(decoder, &c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or(ParseError::Empty)
}

fn open_element(namespace: Option<String>, start: &BytesStart<'_>, decoder: Decoder) -> Element {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(element = %name, error = %e, "Skipping malformed attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        match attr.decode_and_unescape_value(decoder) {
            Ok(value) => attributes.push((key, value.into_owned())),
            Err(e) => {
                tracing::debug!(element = %name, attribute = %key, error = %e, "Skipping undecodable attribute");
            }
        }
    }

    Element {
        namespace,
        name,
        attributes,
        ..Element::default()
    }
}

fn close_element(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn decode<'b>(decoder: Decoder, bytes: &'b [u8]) -> Cow<'b, str> {
    match decoder.decode(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "Undecodable text, replacing invalid bytes");
            String::from_utf8_lossy(bytes)
        }
    }
}

/// Resolves XML, numeric and common HTML entity references. Unknown or
/// malformed references are kept as written.
fn unescape_text(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let resolved = tail[1..]
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| resolve_entity(&tail[1..=end]).map(|text| (text, end + 2)));
        match resolved {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_entity(name: &str) -> Option<Cow<'static, str>> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
    }
    resolve_predefined_entity(name)
        .or_else(|| resolve_html_entity(name))
        .map(Cow::Borrowed)
}

/// HTML entities commonly found in feeds that plain XML does not define.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    let resolved = match entity {
        "nbsp" => "\u{00A0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "copy" => "\u{00A9}",
        "reg" => "\u{00AE}",
        "trade" => "\u{2122}",
        _ => return None,
    };
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_namespaces() {
        let xml = br#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel><item><content:encoded><![CDATA[<p>Hi</p>]]></content:encoded></item></channel>
</rss>"#;
        let root = parse_document(xml).unwrap();
        assert!(root.is(None, "rss"));
        assert_eq!(root.attr("version"), Some("2.0"));

        let item = root
            .child(None, "channel")
            .and_then(|c| c.child(None, "item"))
            .unwrap();
        assert_eq!(item.child_text(Some(CONTENT_NS), "encoded"), Some("<p>Hi</p>"));
    }

    #[test]
    fn test_default_namespace_applies_to_children() {
        let xml = br#"<feed xmlns="http://www.w3.org/2005/Atom"><title>T &amp; U</title></feed>"#;
        let root = parse_document(xml).unwrap();
        assert!(root.is(Some(ATOM_NS), "feed"));
        assert_eq!(root.child_text(Some(ATOM_NS), "title"), Some("T & U"));
    }

    #[test]
    fn test_html_entities_in_text() {
        let xml = b"<a>one&nbsp;two &mdash; three</a>";
        let root = parse_document(xml).unwrap();
        assert_eq!(root.text, "one\u{00A0}two \u{2014} three");
    }

    #[test]
    fn test_markup_entities_unescape_to_html() {
        let xml = b"<description>First &lt;b&gt;bold&lt;/b&gt; &quot;quoted&quot; &apos;it&apos;</description>";
        let root = parse_document(xml).unwrap();
        assert_eq!(root.text, "First <b>bold</b> \"quoted\" 'it'");
    }

    #[test]
    fn test_unknown_entity_kept_literally() {
        let xml = b"<a>AT&amp;T &bogus; &#233;&#xE9; &amp lone</a>";
        let root = parse_document(xml).unwrap();
        assert_eq!(root.text, "AT&T &bogus; \u{e9}\u{e9} &amp lone");
    }

    #[test]
    fn test_declared_latin1_encoding() {
        let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<rss version=\"2.0\"><channel><title>Caf\xE9</title></channel></rss>";
        let root = parse_document(xml).unwrap();
        assert_eq!(
            root.child(None, "channel").and_then(|c| c.child_text(None, "title")),
            Some("Caf\u{e9}")
        );
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(parse_document(b"<rss><channel></rss>").is_err());
        assert!(parse_document(b"<rss><channel>").is_err());
        assert!(matches!(parse_document(b""), Err(ParseError::Empty)));
    }

    #[test]
    fn test_depth_limit() {
        let xml = format!("{}{}", "<a>".repeat(MAX_DEPTH + 1), "</a>".repeat(MAX_DEPTH + 1));
        assert!(matches!(
            parse_document(xml.as_bytes()),
            Err(ParseError::TooDeep(_))
        ));
    }
}
