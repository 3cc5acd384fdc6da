//! Feed model, parsing and retrieval.
//!
//! - [`parse_feed`] turns RSS 0.91/0.92/1.0/2.0 and Atom 0.3/1.0 documents
//!   into a [`Feed`]
//! - [`HttpFetcher`] performs conditional GETs with ETag support and hands
//!   the body to a converter
//! - [`registry`] reads the subscription list
//!
//! # Example
//!
//! ```
//! use feedwatch::feed::{parse_feed, ParseOptions};
//! use url::Url;
//!
//! let xml = br#"<rss version="2.0"><channel><title>Hello</title>
//!   <item><title>First</title></item></channel></rss>"#;
//! let uri = Url::parse("https://example.com/rss").unwrap();
//! let feed = parse_feed(xml, &uri, &ParseOptions::default()).unwrap();
//! assert_eq!(feed.title, "Hello");
//! assert_eq!(feed.items[0].title, "First");
//! ```

mod atom;
mod fetcher;
mod model;
mod parser;
pub mod registry;
mod rss;
pub mod xml;

pub use fetcher::{FetchError, FetchOptions, Fetched, HttpFetcher};
pub use model::{Feed, FeedItem, ItemStatus};
pub use parser::{
    detect_format, parse_feed, FeedFormat, ParseError, ParseOptions, DEFAULT_MAX_SUMMARY_LENGTH,
};
pub use registry::Subscription;
