use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::util::panic_message;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and converting a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status other than 2xx or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The content converter failed
    #[error("Conversion failed: {0}")]
    Convert(String),
    /// The body was fetched but is not a usable feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// The configured User-Agent is not a valid header value
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Outcome of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<T> {
    /// 2xx with a body. `etag` is the validator to send next time.
    Modified { value: T, etag: Option<String> },
    /// 304: the copy identified by the ETag we sent is still current.
    NotModified,
}

impl<T> Fetched<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Modified { value, etag } => Fetched::Modified {
                value: f(value),
                etag,
            },
            Fetched::NotModified => Fetched::NotModified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    /// Send `Connection: close` instead of keeping sockets alive between polls.
    pub connection_close: bool,
    pub max_body_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("feedwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: DEFAULT_TIMEOUT,
            connection_close: true,
            max_body_bytes: DEFAULT_MAX_BODY,
        }
    }
}

/// HTTP GET with header injection, transparent gzip/deflate decoding and
/// pluggable body conversion.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if options.connection_close {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let client = reqwest::Client::builder()
            .user_agent(HeaderValue::from_str(&options.user_agent)?)
            .default_headers(headers)
            .gzip(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetches `uri`, sending `If-None-Match` when an ETag is supplied.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request plus body exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Any status other than 2xx or 304
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded `max_body_bytes`
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    pub async fn fetch(&self, uri: &Url, etag: Option<&str>) -> Result<Fetched<Vec<u8>>, FetchError> {
        let mut request = self.client.get(uri.as_str());
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        tokio::time::timeout(self.options.timeout, self.exchange(request))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<Fetched<Vec<u8>>, FetchError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_limited_bytes(response, self.options.max_body_bytes).await?;
        Ok(Fetched::Modified { value: body, etag })
    }

    /// Fetches `uri` and converts the body with `convert`.
    ///
    /// With `ignore_errors` set, a converter that returns an error or panics
    /// yields `T::default()` instead of failing the fetch, so callers running
    /// their own retry loop are not torn down by a conversion bug. Transport
    /// errors are always returned.
    pub async fn fetch_as<T, F>(
        &self,
        uri: &Url,
        etag: Option<&str>,
        convert: F,
        ignore_errors: bool,
    ) -> Result<Fetched<T>, FetchError>
    where
        T: Default,
        F: FnOnce(&[u8]) -> anyhow::Result<T>,
    {
        let (body, etag) = match self.fetch(uri, etag).await? {
            Fetched::Modified { value, etag } => (value, etag),
            Fetched::NotModified => return Ok(Fetched::NotModified),
        };

        let converted = match catch_unwind(AssertUnwindSafe(|| convert(&body))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FetchError::Convert(format!("{e:#}"))),
            Err(panic) => Err(FetchError::Convert(format!(
                "converter panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match converted {
            Ok(value) => Ok(Fetched::Modified { value, etag }),
            Err(e) if ignore_errors => {
                tracing::debug!(uri = %uri, error = %e, "Ignoring conversion failure");
                Ok(Fetched::Modified {
                    value: T::default(),
                    etag,
                })
            }
            Err(e) => Err(e),
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Content-Length refers to the encoded body; only trust it when the
    // client is not decompressing.
    let expected_length = response
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .is_none()
        .then(|| response.content_length())
        .flatten();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetchOptions {
            user_agent: "feedwatch-test/1.0".to_string(),
            timeout: Duration::from_secs(5),
            ..FetchOptions::default()
        })
        .unwrap()
    }

    fn feed_uri(server: &MockServer) -> Url {
        Url::parse(&format!("{}/feed", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_default_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("user-agent", "feedwatch-test/1.0"))
            .and(header("connection", "close"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"v1\""),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&feed_uri(&mock_server), None).await.unwrap();
        match result {
            Fetched::Modified { value, etag } => {
                assert_eq!(value, VALID_RSS.as_bytes());
                assert_eq!(etag.as_deref(), Some("\"v1\""));
            }
            Fetched::NotModified => panic!("Expected a body"),
        }
    }

    #[tokio::test]
    async fn test_fetch_conditional_not_modified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch(&feed_uri(&mock_server), Some("\"v1\""))
            .await
            .unwrap();
        assert_eq!(result, Fetched::NotModified);
    }

    #[tokio::test]
    async fn test_fetch_without_etag_omits_header() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("if-none-match"))
            .respond_with(ResponseTemplate::new(304))
            .expect(0)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&feed_uri(&mock_server), None).await.unwrap();
        assert!(matches!(result, Fetched::Modified { .. }));
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&feed_uri(&mock_server), None).await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(FetchOptions {
            timeout: Duration::from_millis(100),
            ..FetchOptions::default()
        })
        .unwrap();
        let result = fetcher.fetch(&feed_uri(&mock_server), None).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(FetchOptions {
            max_body_bytes: 1024,
            ..FetchOptions::default()
        })
        .unwrap();
        let result = fetcher.fetch(&feed_uri(&mock_server), None).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_fetch_as_converts_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("42"))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_as(
                &feed_uri(&mock_server),
                None,
                |body| Ok(std::str::from_utf8(body)?.parse::<u32>()?),
                false,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            Fetched::Modified {
                value: 42,
                etag: None
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_as_converter_error_propagates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a number"))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_as(
                &feed_uri(&mock_server),
                None,
                |body| Ok(std::str::from_utf8(body)?.parse::<u32>()?),
                false,
            )
            .await;
        assert!(matches!(result, Err(FetchError::Convert(_))));
    }

    #[tokio::test]
    async fn test_fetch_as_ignored_failures_yield_default() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body"))
            .mount(&mock_server)
            .await;
        let uri = feed_uri(&mock_server);

        let errored = fetcher()
            .fetch_as(&uri, None, |_| -> anyhow::Result<Option<u32>> { anyhow::bail!("boom") }, true)
            .await
            .unwrap();
        assert_eq!(errored.map(|v| v.is_none()), Fetched::Modified { value: true, etag: None });

        let panicked = fetcher()
            .fetch_as(&uri, None, |_| -> anyhow::Result<Option<u32>> { panic!("bug") }, true)
            .await
            .unwrap();
        assert_eq!(panicked.map(|v| v.is_none()), Fetched::Modified { value: true, etag: None });
    }

    #[tokio::test]
    async fn test_fetch_as_not_modified_skips_converter() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_as(
                &feed_uri(&mock_server),
                Some("\"v1\""),
                |_| -> anyhow::Result<u32> { panic!("converter must not run") },
                false,
            )
            .await
            .unwrap();
        assert_eq!(result, Fetched::NotModified);
    }
}
