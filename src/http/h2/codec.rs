//! HTTP/2 frame encoding and decoding
//!
//! This module moves whole frames on and off a byte stream: the 9-byte
//! header (24-bit length, type, flags, reserved bit + 31-bit stream id)
//! followed by `length` payload bytes. It is stateless apart from the
//! largest payload it will accept.

use super::error::{Error, Result};
use super::frames::{Frame, FrameFlags, FrameType};
use super::DEFAULT_MAX_FRAME_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Decoded 9-byte frame header
///
/// The type is kept raw so that frames of unknown types can be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub length: usize,
    /// Raw frame type octet
    pub kind: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID, reserved bit masked off
    pub stream_id: u32,
}

impl FrameHeader {
    /// Known frame type, if any
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.kind)
    }
}

/// Frame codec for reading and writing HTTP/2 frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Largest payload accepted by `read_frame` (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec accepting the default 16 KiB frame payload
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE as usize)
    }

    /// Create a codec accepting payloads up to `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        FrameCodec {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Largest payload this codec accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame header into a buffer
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & 0x7FFF_FFFF;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header from bytes
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;

        FrameHeader {
            length,
            kind: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Serialize a whole frame (header and payload) into `buf`
    pub fn encode_frame_into(frame: &Frame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_slice(&Self::encode_header(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        ));
        buf.put_slice(&frame.payload);
    }

    /// Serialize a whole frame into a fresh buffer
    pub fn encode_frame(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        Self::encode_frame_into(frame, &mut buf);
        buf.freeze()
    }

    /// Write a frame to a writer. The caller decides when to flush.
    pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
        let header = Self::encode_header(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        );
        writer.write_all(&header)?;
        writer.write_all(&frame.payload)?;
        Ok(())
    }

    /// Read one frame, blocking until the header and the whole payload
    /// are available.
    ///
    /// Returns `Ok(None)` for a frame of unknown type; its payload has
    /// been consumed and discarded. End of stream before a header starts
    /// is reported as [`Error::ConnectionClosed`].
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<Option<Frame>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::ConnectionClosed
            } else {
                Error::Io(e)
            }
        })?;

        let header = Self::decode_header(&header);
        if header.length > self.max_frame_size {
            return Err(Error::FrameSize(format!(
                "frame payload {} exceeds maximum {}",
                header.length, self.max_frame_size
            )));
        }

        let mut payload = BytesMut::zeroed(header.length);
        if header.length > 0 {
            reader.read_exact(&mut payload)?;
        }

        Ok(header
            .frame_type()
            .map(|frame_type| Frame::new(frame_type, header.flags, header.stream_id, payload.freeze())))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
