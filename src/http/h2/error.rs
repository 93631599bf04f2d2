//! HTTP/2 error types
//!
//! This module defines error types for HTTP/2 operations, mapping to
//! the error codes defined in RFC 7540 Section 7.

use std::fmt;
use std::sync::Arc;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error from the message layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol error detected (RFC 7540 Section 7 - Error code 0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error (RFC 7540 Section 7 - Error code 0x2)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (RFC 7540 Section 7 - Error code 0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Our SETTINGS frame was not acknowledged in time (error code 0x4)
    #[error("Settings timeout")]
    SettingsTimeout,

    /// Frame received for a closed stream (error code 0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size error (error code 0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Compression error (error code 0x9)
    #[error("Compression error: {0}")]
    Compression(String),

    /// The peer reset the stream with RST_STREAM
    #[error("Stream reset by peer: {0}")]
    Reset(ErrorCode),

    /// The peer sent GOAWAY
    #[error("Connection going away: {code}, last stream {last_stream_id}: {debug}")]
    GoAway {
        /// Error code carried by the GOAWAY frame
        code: ErrorCode,
        /// Highest stream id the peer will still process
        last_stream_id: u32,
        /// Opaque debug data, lossily decoded
        debug: String,
    },

    /// No PING ACK arrived within the configured timeout
    #[error("Ping ACK not received in time")]
    PingTimeout,

    /// The exchange was cancelled by its owner
    #[error("Exchange aborted")]
    Aborted,

    /// The exchange exceeded its timeout
    #[error("Exchange timed out")]
    TimedOut,

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection carrying this stream failed; the cause is shared by all streams
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Arc<Error>),

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Whether this error tears down the whole connection when it escapes
    /// the driver loop.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Protocol(_)
                | Error::Internal(_)
                | Error::FlowControl(_)
                | Error::FrameSize(_)
                | Error::PingTimeout
                | Error::InvalidSettings(_)
                | Error::ConnectionClosed
                | Error::ConnectionFailed(_)
        )
    }

    /// Error code to put on the wire when this error ends a stream or connection
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::InvalidHeader(_) | Error::InvalidSettings(_) => {
                ErrorCode::ProtocolError
            }
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::SettingsTimeout => ErrorCode::SettingsTimeout,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Aborted | Error::TimedOut => ErrorCode::Cancel,
            Error::Reset(code) => *code,
            Error::GoAway { code, .. } => *code,
            _ => ErrorCode::InternalError,
        }
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Map a code read off the wire. Unknown codes must not trigger special
    /// behavior (RFC 7540 Section 7) and are treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::ProtocolError.as_u32(), 0x1);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);

        assert_eq!(ErrorCode::from_u32(0x0), Some(ErrorCode::NoError));
        assert_eq!(ErrorCode::from_u32(0x1), Some(ErrorCode::ProtocolError));
        assert_eq!(ErrorCode::from_u32(0xff), None);
        assert_eq!(ErrorCode::from_wire(0xff), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_code_name() {
        assert_eq!(ErrorCode::NoError.name(), "NO_ERROR");
        assert_eq!(ErrorCode::RefusedStream.name(), "REFUSED_STREAM");
        assert_eq!(ErrorCode::FlowControlError.name(), "FLOW_CONTROL_ERROR");
    }

    #[test]
    fn test_error_display() {
        let err = Error::Protocol("test error".to_string());
        assert_eq!(err.to_string(), "Protocol error: test error");

        let err = Error::StreamClosed(42);
        assert_eq!(err.to_string(), "Stream closed: 42");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::PingTimeout.is_connection_fatal());
        assert!(Error::FlowControl("overflow".into()).is_connection_fatal());
        assert!(!Error::Reset(ErrorCode::Cancel).is_connection_fatal());
        assert!(!Error::Compression("bad index".into()).is_connection_fatal());
        assert!(!Error::Aborted.is_connection_fatal());

        assert_eq!(Error::TimedOut.code(), ErrorCode::Cancel);
        assert_eq!(Error::Reset(ErrorCode::RefusedStream).code(), ErrorCode::RefusedStream);
    }

    #[test]
    fn test_shared_cause_chain() {
        let cause = Arc::new(Error::PingTimeout);
        let first = Error::ConnectionFailed(cause.clone());
        let second = Error::ConnectionFailed(cause);

        let source = first.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Ping ACK not received in time"));
        assert_eq!(first.to_string(), second.to_string());
    }
}
