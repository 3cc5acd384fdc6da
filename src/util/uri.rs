use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a feed URI.
#[derive(Error, Debug)]
pub enum UriError {
    /// The string could not be parsed as a URL.
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Parses a subscription endpoint into a [`Url`].
///
/// Only `http` and `https` URLs with a host are accepted. Surrounding
/// whitespace is ignored.
///
/// # Examples
///
/// ```
/// use feedwatch::util::parse_feed_uri;
///
/// let uri = parse_feed_uri(" https://example.com/feed.xml ").unwrap();
/// assert_eq!(uri.host_str(), Some("example.com"));
///
/// assert!(parse_feed_uri("file:///etc/passwd").is_err());
/// ```
pub fn parse_feed_uri(input: &str) -> Result<Url, UriError> {
    let url = Url::parse(input.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UriError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UriError::MissingHost);
    }

    Ok(url)
}
