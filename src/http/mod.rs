//! HTTP request/response model and transport for the HTTP/2 client
//!
//! This module holds everything above and below the HTTP/2 core:
//!
//! - [`HttpRequest`] / [`HttpResponse`] and their parts (method, URI,
//!   headers, body source)
//! - [`Exchange`], the request/response pair a stream works on, and
//!   [`ExchangeHandle`], the caller's side of it
//! - [`SessionOps`], the transport abstraction the connection reads and
//!   writes through, with [`TcpSession`] for plain TCP
//!
//! # Examples
//!
//! ```no_run
//! use h2plex::http::{HttpRequest, Method};
//! use h2plex::http::h2::H2ClientBuilder;
//!
//! let client = H2ClientBuilder::new().connect("127.0.0.1:8080").unwrap();
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("http://127.0.0.1:8080/")
//!     .build()
//!     .unwrap();
//! let response = client.send(request).wait().unwrap();
//! assert_eq!(response.status().code(), 200);
//! ```

pub mod exchange;
pub mod h2;
pub mod headers;
pub mod message;
pub mod session;

pub use exchange::{
    Completion, Exchange, ExchangeEvent, ExchangeHandle, ExchangeState, Tunnel, TunnelSink,
    TunnelWriter,
};
pub use headers::Headers;
pub use message::{HttpRequest, HttpRequestBuilder, HttpResponse, Method, RequestBody, Status, Uri};
pub use session::{SessionOps, SessionWrite, TcpSession};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;
