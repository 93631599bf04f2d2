//! HTTP/2 client connection multiplexer
//!
//! This module turns one reliable byte stream into many concurrent,
//! flow-controlled request/response exchanges as defined in RFC 7540.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - **Frames and codec** ([`frames`], [`codec`]): the 9-byte frame header
//!   and typed views of every frame payload
//! - **Settings** ([`settings`]): the three registries of a connection
//!   (values we honor, values we proposed, the peer's values)
//! - **Header compression** ([`hpack_table`], [`hpack_codec`]): the HPACK
//!   static and dynamic tables and the block codec consulting them
//! - **Reassembly views** ([`view`]): HEADERS+CONTINUATION and DATA frames
//!   read as one byte sequence, releasing each payload once consumed
//! - **Streams** ([`stream`]): the per-exchange state machine with its own
//!   flow-control windows
//! - **Connection** ([`connection`]): a reader thread and a driver thread
//!   owning the stream table, connection flow control, ping/RTT and GOAWAY
//! - **Client** ([`client`]): configuration and the owner that resends
//!   exchanges on a fresh connection when one fails
//!
//! # Examples
//!
//! ```no_run
//! use h2plex::http::h2::H2ClientBuilder;
//! use h2plex::http::{HttpRequest, Method};
//! use std::time::Duration;
//!
//! let client = H2ClientBuilder::new()
//!     .initial_window_size(1 << 20)
//!     .ping_frequency(Some(Duration::from_secs(10)))
//!     .connect("127.0.0.1:8080")
//!     .unwrap();
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Post)
//!     .uri("http://127.0.0.1:8080/upload")
//!     .body(vec![0u8; 300_000])
//!     .build()
//!     .unwrap();
//!
//! let handle = client.send(request);
//! let response = handle.wait().unwrap();
//! println!("Status: {}", response.status());
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack_codec;
pub mod hpack_table;
pub mod settings;
pub mod stream;
pub mod view;

pub use client::{Connector, H2Client, H2ClientBuilder, TcpConnector};
pub use codec::FrameCodec;
pub use connection::{
    ConnectionConfig, ConnectionContext, ConnectionEvent, ConnectionObserver, H2Connection,
};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType};
pub use hpack_codec::{HeaderCodec, HpackCodec};
pub use hpack_table::HeaderTable;
pub use settings::{SettingsBuilder, SettingsParameter, SettingsRegistry};
pub use stream::{H2Stream, StreamId, StreamState};
pub use view::{DataFrameView, FrameView, HeaderFrameView};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
