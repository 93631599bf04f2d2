//! h2plex - HTTP/2 client connection multiplexer
//!
//! Runs many concurrent, flow-controlled request/response exchanges over
//! one HTTP/2 connection. See [`http::h2`] for the connection machinery
//! and [`http`] for the request/response model.

pub mod http;
