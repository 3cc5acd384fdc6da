//! Utility functions shared by the parser, monitor and registry.
//!
//! - **Text processing**: HTML-to-text conversion, control character removal
//!   and char-bounded truncation used for item summaries
//! - **URI validation**: subscription endpoints must be http(s) URLs
//! - **Panic payloads**: readable messages for isolated callbacks
//!
//! # Examples
//!
//! ```
//! use feedwatch::util::{strip_html, truncate_chars};
//!
//! let text = strip_html("<p>Breaking <b>news</b></p>");
//! assert_eq!(text, "Breaking news");
//! assert_eq!(truncate_chars(&text, 8), "Break...");
//! ```

mod panic;
mod text;
mod uri;

pub use panic::panic_message;
pub use text::{strip_control_chars, strip_html, truncate_chars};
pub use uri::{parse_feed_uri, UriError};
