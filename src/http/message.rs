//! HTTP message types
//!
//! This module defines the core types for HTTP requests and responses as
//! the HTTP/2 client sees them: a request is a method, a parsed URI,
//! headers and a body source; a response is a status, headers, optional
//! trailers and the assembled body.

use super::{Error, Headers, Result, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use bytes::Bytes;
use std::fmt;
use std::io::Read;
use std::time::Duration;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Parse the value of a `:status` pseudo-header
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != 3 {
            return Err(Error::InvalidStatus(value.to_string()));
        }
        let code = value
            .parse::<u16>()
            .map_err(|_| Error::InvalidStatus(value.to_string()))?;
        Self::new(code)
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    // Common status codes as constants
    pub const OK: Status = Status { code: 200 };
    pub const NOT_FOUND: Status = Status { code: 404 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Request target split into the parts HTTP/2 pseudo-headers need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    scheme: String,
    authority: String,
    path: String,
}

impl Uri {
    /// Parse an absolute `scheme://authority/path?query` URI
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidUri(format!("missing scheme: {}", s)))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(Error::InvalidUri(format!("unsupported scheme: {}", scheme)));
        }

        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(split);
        if authority.is_empty() {
            return Err(Error::InvalidUri(format!("missing authority: {}", s)));
        }
        let path = match path {
            "" => "/".to_string(),
            p if p.starts_with('?') => format!("/{}", p),
            p => p.to_string(),
        };

        Ok(Uri {
            scheme,
            authority: authority.to_string(),
            path,
        })
    }

    /// `http` or `https`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `host[:port]`
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Path and query
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` suitable for connecting, with the scheme's default port
    pub fn host_port(&self) -> String {
        let has_port = match self.authority.rfind(':') {
            Some(i) => !self.authority[i..].contains(']'),
            None => false,
        };
        if has_port {
            self.authority.clone()
        } else {
            let port = if self.scheme == "https" {
                DEFAULT_HTTPS_PORT
            } else {
                DEFAULT_HTTP_PORT
            };
            format!("{}:{}", self.authority, port)
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

/// Where a request body comes from
pub enum RequestBody {
    /// No body
    Empty,
    /// In-memory body; can be sent again on a new connection
    Bytes(Bytes),
    /// Streamed body with known or unknown length
    Reader {
        /// Body source
        reader: Box<dyn Read + Send>,
        /// Total length, if known
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Total length, if known
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Reader { length, .. } => *length,
        }
    }

    /// Whether the request carries no body at all
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Bytes(b) => b.is_empty(),
            RequestBody::Reader { .. } => false,
        }
    }

    /// Whether the body can be sent again after being partially sent
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Reader { .. })
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Reader { length, .. } => write!(f, "Reader(length={:?})", length),
        }
    }
}

/// HTTP request
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: Headers,
    body: RequestBody,
    /// `:protocol` for extended CONNECT (RFC 8441)
    protocol: Option<String>,
    streaming: bool,
    progress: bool,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl HttpRequest {
    /// Create a builder for constructing requests
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the body source
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Get the body source for reading
    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// `:protocol` pseudo-header value for extended CONNECT
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Whether response DATA is delivered as events instead of buffered
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether headers and progress events are reported
    pub fn reports_progress(&self) -> bool {
        self.progress
    }

    /// Overall exchange timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Retry limit, if set on the request
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    headers: Headers,
    body: RequestBody,
    protocol: Option<String>,
    streaming: bool,
    progress: bool,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl HttpRequestBuilder {
    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the absolute URI
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set an in-memory body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    /// Stream the body from a reader
    pub fn body_reader(mut self, reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        self.body = RequestBody::Reader {
            reader: Box::new(reader),
            length,
        };
        self
    }

    /// Set the `:protocol` pseudo-header (extended CONNECT)
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Deliver response DATA as events instead of buffering it
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Report response headers and transfer progress as events
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Set the overall exchange timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how often the request may be resent after a connection failure
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Build the request
    pub fn build(self) -> Result<HttpRequest> {
        let uri = self
            .uri
            .ok_or_else(|| Error::InvalidUri("no URI given".to_string()))?;
        Ok(HttpRequest {
            method: self.method.unwrap_or(Method::Get),
            uri: Uri::parse(&uri)?,
            headers: self.headers,
            body: self.body,
            protocol: self.protocol,
            streaming: self.streaming,
            progress: self.progress,
            timeout: self.timeout,
            max_retries: self.max_retries,
        })
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: Status,
    headers: Headers,
    trailers: Headers,
    body: Bytes,
}

impl HttpResponse {
    /// Create a response from its parts
    pub fn new(status: Status, headers: Headers, trailers: Headers, body: Bytes) -> Self {
        HttpResponse {
            status,
            headers,
            trailers,
            body,
        }
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the trailers (empty when none were sent)
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// Get the body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get body as string
    pub fn body_string(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| Error::InvalidHeader(format!("Invalid UTF-8 in body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("CONNECT").unwrap(), Method::Connect);
        assert!(Method::from_str("get").is_err());
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(Status::parse("200").unwrap(), Status::OK);
        assert!(Status::parse("103").unwrap().is_informational());
        assert!(Status::parse("20").is_err());
        assert!(Status::parse("abc").is_err());
        assert!(Status::new(600).is_err());
    }

    #[test]
    fn test_uri_parse() {
        let uri = Uri::parse("https://example.com:8443/a/b?c=d").unwrap();
        assert_eq!(uri.scheme(), "https");
        assert_eq!(uri.authority(), "example.com:8443");
        assert_eq!(uri.path(), "/a/b?c=d");
        assert_eq!(uri.host_port(), "example.com:8443");

        let uri = Uri::parse("HTTP://example.com").unwrap();
        assert_eq!(uri.scheme(), "http");
        assert_eq!(uri.path(), "/");
        assert_eq!(uri.host_port(), "example.com:80");

        let uri = Uri::parse("http://[::1]?x=1").unwrap();
        assert_eq!(uri.authority(), "[::1]");
        assert_eq!(uri.path(), "/?x=1");
        assert_eq!(uri.host_port(), "[::1]:80");

        assert!(Uri::parse("example.com/").is_err());
        assert!(Uri::parse("ftp://example.com/").is_err());
        assert!(Uri::parse("http:///path").is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri("http://localhost:8080/upload")
            .header("Content-Type", "text/plain")
            .body("hello")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.uri().path(), "/upload");
        assert_eq!(request.headers().get("content-type"), Some("text/plain"));
        assert_eq!(request.body().len(), Some(5));
        assert!(request.body().is_replayable());
        assert_eq!(request.timeout(), Some(Duration::from_secs(5)));

        assert!(HttpRequest::builder().build().is_err());
    }

    #[test]
    fn test_reader_body_is_not_replayable() {
        let body = RequestBody::Reader {
            reader: Box::new(std::io::Cursor::new(vec![1, 2, 3])),
            length: None,
        };
        assert!(!body.is_replayable());
        assert_eq!(body.len(), None);
        assert!(!body.is_empty());
        assert_eq!(format!("{:?}", body), "Reader(length=None)");
    }

    #[test]
    fn test_response_accessors() {
        let mut headers = Headers::new();
        headers.insert("content-type", "text/plain");
        let response = HttpResponse::new(Status::OK, headers, Headers::new(), Bytes::from("Hello"));

        assert_eq!(response.status().code(), 200);
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(response.body_string().unwrap(), "Hello");
        assert!(response.trailers().is_empty());
    }
}
