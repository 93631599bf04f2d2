//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6.
//! A [`Frame`] is the generic unit moved between the reader loop, streams
//! and the writer; the typed frames (`DataFrame`, `HeadersFrame`, ...) are
//! views parsed out of, or built into, a generic frame.

use super::error::{Error, ErrorCode, Result};
use super::settings::SettingsParameter;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Builder-style variant of [`FrameFlags::set`]
    pub fn with(mut self, flag: u8, enabled: bool) -> Self {
        if enabled {
            self.set(flag);
        }
        self
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    // Common flags

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Generic HTTP/2 frame
///
/// The payload is an owned `Bytes` handle; whichever component consumes the
/// frame last drops it, which releases the buffer exactly once.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID (0 for connection-level frames)
    pub stream_id: u32,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            frame_type,
            flags,
            stream_id: stream_id & 0x7FFF_FFFF,
            payload,
        }
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the frame carries END_STREAM (only meaningful on DATA/HEADERS)
    pub fn is_end_stream(&self) -> bool {
        matches!(self.frame_type, FrameType::Data | FrameType::Headers) && self.flags.is_end_stream()
    }

    /// Whether this is a connection-level frame (stream id 0)
    pub fn is_connection_level(&self) -> bool {
        self.stream_id == 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} stream={} flags=0x{:02x} len={}]",
            self.frame_type.name(),
            self.stream_id,
            self.flags.as_u8(),
            self.payload.len()
        )
    }
}

fn expect_type(frame: &Frame, expected: FrameType) -> Result<()> {
    if frame.frame_type != expected {
        return Err(Error::Internal(format!(
            "expected {} frame, got {}",
            expected.name(),
            frame.frame_type.name()
        )));
    }
    Ok(())
}

/// Remove the PADDED framing, returning the inner payload and pad length
fn strip_padding(flags: FrameFlags, mut payload: Bytes) -> Result<(Bytes, Option<u8>)> {
    if !flags.is_padded() {
        return Ok((payload, None));
    }
    if payload.is_empty() {
        return Err(Error::FrameSize("PADDED frame without pad length".to_string()));
    }
    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(Error::Protocol(format!(
            "padding length {} exceeds remaining payload {}",
            pad_len,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad_len as usize);
    Ok((payload, Some(pad_len)))
}

fn pad(buf: &mut BytesMut, padding: Option<u8>, body: &[u8]) {
    if let Some(pad_len) = padding {
        buf.put_u8(pad_len);
        buf.put_slice(body);
        buf.put_bytes(0, pad_len as usize);
    } else {
        buf.put_slice(body);
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Get total frame size including padding. This is the amount that
    /// counts against flow-control windows.
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize; // 1 byte for pad length field + padding
        }
        size
    }

    /// Interpret a generic DATA frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Data)?;
        if frame.stream_id == 0 {
            return Err(Error::Protocol("DATA frame on stream 0".to_string()));
        }
        let (data, padding) = strip_padding(frame.flags, frame.payload.clone())?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, self.end_stream)
            .with(FrameFlags::PADDED, self.padding.is_some());
        let payload = if self.padding.is_none() {
            self.data
        } else {
            let mut buf = BytesMut::with_capacity(self.frame_size());
            pad(&mut buf, self.padding, &self.data);
            buf.freeze()
        };
        Frame::new(FrameType::Data, flags, self.stream_id, payload)
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Interpret a generic HEADERS frame: optional pad length, optional
    /// stream dependency and weight, then the header block fragment.
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Headers)?;
        if frame.stream_id == 0 {
            return Err(Error::Protocol("HEADERS frame on stream 0".to_string()));
        }
        let (mut block, padding) = strip_padding(frame.flags, frame.payload.clone())?;
        let priority = if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS priority fields truncated".to_string()));
            }
            Some(PrioritySpec::read(&mut block))
        } else {
            None
        };
        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding,
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, self.end_stream)
            .with(FrameFlags::END_HEADERS, self.end_headers)
            .with(FrameFlags::PRIORITY, self.priority.is_some())
            .with(FrameFlags::PADDED, self.padding.is_some());
        if self.priority.is_none() && self.padding.is_none() {
            return Frame::new(FrameType::Headers, flags, self.stream_id, self.header_block);
        }
        let mut body = BytesMut::with_capacity(self.header_block.len() + 5);
        if let Some(priority) = &self.priority {
            priority.write(&mut body);
        }
        body.put_slice(&self.header_block);
        let mut buf = BytesMut::with_capacity(body.len() + 256);
        pad(&mut buf, self.padding, &body);
        Frame::new(FrameType::Headers, flags, self.stream_id, buf.freeze())
    }
}

/// Stream priority fields (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: u32,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight (1-256, stored minus one)
    pub weight: u8,
}

impl PrioritySpec {
    /// Create priority fields
    pub fn new(stream_dependency: u32, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    fn read(buf: &mut Bytes) -> Self {
        let dep = buf.get_u32();
        let weight = buf.get_u8();
        PrioritySpec {
            stream_dependency: dep & 0x7FFF_FFFF,
            exclusive: dep & 0x8000_0000 != 0,
            weight,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        let mut dep = self.stream_dependency & 0x7FFF_FFFF;
        if self.exclusive {
            dep |= 0x8000_0000; // Set exclusive bit
        }
        buf.put_u32(dep);
        buf.put_u8(self.weight);
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3). Parsed for validation only.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Priority fields
    pub priority: PrioritySpec,
}

impl PriorityFrame {
    /// Interpret a generic PRIORITY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Priority)?;
        if frame.payload.len() != 5 {
            return Err(Error::FrameSize("PRIORITY frame must be 5 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: PrioritySpec::read(&mut payload),
        })
    }
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    /// Create a new RST_STREAM frame
    pub fn new(stream_id: u32, error_code: ErrorCode) -> Self {
        RstStreamFrame { stream_id, error_code }
    }

    /// Interpret a generic RST_STREAM frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::RstStream)?;
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("RST_STREAM must be 4 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_wire(payload.get_u32()),
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.error_code.as_u32());
        Frame::new(FrameType::RstStream, FrameFlags::empty(), self.stream_id, buf.freeze())
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone, Default)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters in wire order
    pub settings: Vec<(SettingsParameter, u32)>,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Vec<(SettingsParameter, u32)>) -> Self {
        SettingsFrame { ack: false, settings }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Vec::new(),
        }
    }

    /// Interpret a generic SETTINGS frame. Unknown identifiers are skipped.
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Settings)?;
        if frame.stream_id != 0 {
            return Err(Error::Protocol("SETTINGS frame must have stream ID 0".to_string()));
        }
        let ack = frame.flags.is_ack();
        if ack && !frame.payload.is_empty() {
            return Err(Error::FrameSize("SETTINGS ACK with a payload".to_string()));
        }
        if frame.payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload length {} is not a multiple of 6",
                frame.payload.len()
            )));
        }

        let mut payload = frame.payload.clone();
        let mut settings = Vec::with_capacity(payload.len() / 6);
        while payload.remaining() >= 6 {
            let id = payload.get_u16();
            let value = payload.get_u32();
            if let Some(param) = SettingsParameter::from_u16(id) {
                settings.push((param, value));
            }
        }
        Ok(SettingsFrame { ack, settings })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, self.ack);
        // Each setting is 6 bytes (2 byte ID + 4 byte value)
        let mut buf = BytesMut::with_capacity(self.settings.len() * 6);
        if !self.ack {
            for (param, value) in &self.settings {
                buf.put_u16(param.as_u16());
                buf.put_u32(*value);
            }
        }
        Frame::new(FrameType::Settings, flags, 0, buf.freeze())
    }
}

/// PUSH_PROMISE frame (RFC 7540 Section 6.6)
#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Promised stream ID
    pub promised_stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl PushPromiseFrame {
    /// Interpret a generic PUSH_PROMISE frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::PushPromise)?;
        let (mut block, padding) = strip_padding(frame.flags, frame.payload.clone())?;
        if block.len() < 4 {
            return Err(Error::FrameSize("PUSH_PROMISE promised id truncated".to_string()));
        }
        let promised_stream_id = block.get_u32() & 0x7FFF_FFFF;
        Ok(PushPromiseFrame {
            stream_id: frame.stream_id,
            promised_stream_id,
            header_block: block,
            end_headers: frame.flags.is_end_headers(),
            padding,
        })
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    /// Interpret a generic PING frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Ping)?;
        if frame.stream_id != 0 {
            return Err(Error::Protocol("PING frame must have stream ID 0".to_string()));
        }
        if frame.payload.len() != 8 {
            return Err(Error::FrameSize("PING payload must be 8 bytes".to_string()));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload);
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, self.ack);
        Frame::new(FrameType::Ping, flags, 0, Bytes::copy_from_slice(&self.data))
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    /// Interpret a generic GOAWAY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Goaway)?;
        if frame.stream_id != 0 {
            return Err(Error::Protocol("GOAWAY frame must have stream ID 0".to_string()));
        }
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize("GOAWAY payload shorter than 8 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        // 4 bytes stream ID + 4 bytes error code + debug data
        let mut buf = BytesMut::with_capacity(8 + self.debug_data.len());
        buf.put_u32(self.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(self.error_code.as_u32());
        buf.put_slice(&self.debug_data);
        Frame::new(FrameType::Goaway, FrameFlags::empty(), 0, buf.freeze())
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Interpret a generic WINDOW_UPDATE frame. The reserved bit is masked off.
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::WindowUpdate)?;
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("WINDOW_UPDATE must be 4 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id,
            size_increment: payload.get_u32() & 0x7FFF_FFFF,
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        // Window size increment (reserved bit must be 0)
        buf.put_u32(self.size_increment & 0x7FFF_FFFF);
        Frame::new(FrameType::WindowUpdate, FrameFlags::empty(), self.stream_id, buf.freeze())
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

impl ContinuationFrame {
    /// Interpret a generic CONTINUATION frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        expect_type(frame, FrameType::Continuation)?;
        Ok(ContinuationFrame {
            stream_id: frame.stream_id,
            header_block: frame.payload.clone(),
            end_headers: frame.flags.is_end_headers(),
        })
    }

    /// Build the generic frame
    pub fn into_frame(self) -> Frame {
        let flags = FrameFlags::empty().with(FrameFlags::END_HEADERS, self.end_headers);
        Frame::new(FrameType::Continuation, flags, self.stream_id, self.header_block)
    }
}

/// Split an encoded header block into one HEADERS frame followed by as many
/// CONTINUATION frames as `max_frame_size` requires.
pub fn split_header_block(
    stream_id: u32,
    mut block: Bytes,
    max_frame_size: usize,
    end_stream: bool,
    out: &mut Vec<Frame>,
) {
    let max_frame_size = max_frame_size.max(1);
    let first = block.split_to(block.len().min(max_frame_size));
    out.push(HeadersFrame::new(stream_id, first, end_stream, block.is_empty()).into_frame());

    while !block.is_empty() {
        let fragment = block.split_to(block.len().min(max_frame_size));
        out.push(
            ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: block.is_empty(),
            }
            .into_frame(),
        );
    }
}
