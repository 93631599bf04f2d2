//! Frame reassembly views
//!
//! A view queues the payloads of the frames that make up one logical
//! message (a header block split over HEADERS/PUSH_PROMISE and
//! CONTINUATION frames, or a body split over DATA frames) and exposes
//! them as a single byte sequence. Nothing is concatenated up front: the
//! reader walks the queue, and each payload buffer is dropped as soon as
//! its last byte has been read.

use super::error::{Error, Result};
use super::frames::{
    ContinuationFrame, DataFrame, Frame, FrameType, HeadersFrame, PushPromiseFrame,
};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;

/// Which frames a view accepts and how their content is extracted
pub trait ViewKind {
    /// Name used in error messages
    const NAME: &'static str;

    /// Extract the content bytes of an accepted frame. Returns the bytes
    /// and whether the frame completes the message.
    fn content(frame: Frame) -> Result<(Bytes, bool)>;
}

/// Header block fragments: HEADERS, PUSH_PROMISE, CONTINUATION
#[derive(Debug)]
pub enum HeaderBlock {}

/// Response body fragments: DATA
#[derive(Debug)]
pub enum DataBody {}

impl ViewKind for HeaderBlock {
    const NAME: &'static str = "header";

    fn content(frame: Frame) -> Result<(Bytes, bool)> {
        match frame.frame_type {
            FrameType::Headers => {
                let headers = HeadersFrame::parse(&frame)?;
                Ok((headers.header_block, headers.end_headers))
            }
            FrameType::PushPromise => {
                let promise = PushPromiseFrame::parse(&frame)?;
                Ok((promise.header_block, promise.end_headers))
            }
            FrameType::Continuation => {
                let continuation = ContinuationFrame::parse(&frame)?;
                Ok((continuation.header_block, continuation.end_headers))
            }
            other => Err(Error::Internal(format!(
                "{} frame added to a {} view",
                other.name(),
                Self::NAME
            ))),
        }
    }
}

impl ViewKind for DataBody {
    const NAME: &'static str = "data";

    fn content(frame: Frame) -> Result<(Bytes, bool)> {
        match frame.frame_type {
            FrameType::Data => {
                let data = DataFrame::parse(&frame)?;
                Ok((data.data, data.end_stream))
            }
            other => Err(Error::Internal(format!(
                "{} frame added to a {} view",
                other.name(),
                Self::NAME
            ))),
        }
    }
}

/// A readable view over a queue of frame payloads
#[derive(Debug)]
pub struct FrameView<K: ViewKind> {
    chunks: VecDeque<Bytes>,
    remaining: usize,
    frames: usize,
    complete: bool,
    _kind: PhantomData<K>,
}

/// View over a header block
pub type HeaderFrameView = FrameView<HeaderBlock>;

/// View over a response body
pub type DataFrameView = FrameView<DataBody>;

impl<K: ViewKind> FrameView<K> {
    /// Create an empty view
    pub fn new() -> Self {
        FrameView {
            chunks: VecDeque::new(),
            remaining: 0,
            frames: 0,
            complete: false,
            _kind: PhantomData,
        }
    }

    /// Append a frame. A frame of the wrong type is an internal error.
    pub fn add_frame(&mut self, frame: Frame) -> Result<()> {
        let (content, last) = K::content(frame)?;
        self.frames += 1;
        self.complete |= last;
        if !content.is_empty() {
            self.remaining += content.len();
            self.chunks.push_back(content);
        }
        Ok(())
    }

    /// Whether the frame ending the message (END_HEADERS or END_STREAM) was added
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of frames added so far
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Unread bytes
    pub fn len(&self) -> usize {
        self.remaining
    }

    /// Whether every queued byte has been read
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Copy up to `buf.len()` bytes out of the view. Returns 0 at the end.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&front[..n]);
            front.advance(n);
            written += n;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.remaining -= written;
        written
    }

    /// Read one byte, `None` at the end
    pub fn read_byte(&mut self) -> Option<u8> {
        let front = self.chunks.front_mut()?;
        let byte = front.get_u8();
        if front.is_empty() {
            self.chunks.pop_front();
        }
        self.remaining -= 1;
        Some(byte)
    }

    /// Take the next `len` bytes as one buffer; zero-copy when they lie in
    /// a single frame. `None` if fewer than `len` bytes remain.
    pub fn take_bytes(&mut self, len: usize) -> Option<Bytes> {
        if len > self.remaining {
            return None;
        }
        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= len {
                let out = front.split_to(len);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.remaining -= len;
                return Some(out);
            }
        }
        let mut out = BytesMut::with_capacity(len);
        while out.len() < len {
            let need = len - out.len();
            let front = self.chunks.front_mut()?;
            let n = front.len().min(need);
            out.extend_from_slice(&front.split_to(n));
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.remaining -= len;
        Some(out.freeze())
    }

    /// Everything unread as one buffer
    pub fn into_bytes(mut self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.pop_front().unwrap_or_default(),
            _ => {
                let mut out = BytesMut::with_capacity(self.remaining);
                for chunk in self.chunks.drain(..) {
                    out.extend_from_slice(&chunk);
                }
                out.freeze()
            }
        }
    }

    /// Drain the queued payloads without copying
    pub fn drain_chunks(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.remaining = 0;
        self.chunks.drain(..)
    }
}

impl<K: ViewKind> Default for FrameView<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ViewKind> io::Read for FrameView<K> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl<K: ViewKind> Buf for FrameView<K> {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        self.chunks.front().map(|c| c.as_ref()).unwrap_or(&[])
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(cnt <= self.remaining, "advance past end of frame view");
        self.remaining -= cnt;
        while cnt > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(cnt);
            front.advance(n);
            cnt -= n;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::{split_header_block, FrameFlags, PingFrame};
    use std::io::Read;

    fn message(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn data_frames(payload: &[u8], fragment: usize) -> Vec<Frame> {
        let chunks: Vec<&[u8]> = payload.chunks(fragment.max(1)).collect();
        let last = chunks.len().saturating_sub(1);
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| DataFrame::new(1, Bytes::copy_from_slice(c), i == last).into_frame())
            .collect()
    }

    #[test]
    fn test_header_reassembly_equivalence() {
        for continuations in [0usize, 1, 5, 100] {
            for fragment in [1usize, 16384] {
                let block = message(fragment * (continuations + 1));
                let mut frames = Vec::new();
                split_header_block(1, Bytes::from(block.clone()), fragment, false, &mut frames);
                assert_eq!(frames.len(), continuations + 1);

                let mut view = HeaderFrameView::new();
                for frame in frames {
                    assert!(!view.is_complete());
                    view.add_frame(frame).unwrap();
                }
                assert!(view.is_complete());

                let mut out = Vec::new();
                view.read_to_end(&mut out).unwrap();
                assert_eq!(out, block);
                assert!(view.is_empty());
            }
        }
    }

    #[test]
    fn test_data_reassembly_equivalence() {
        for count in [1usize, 5, 100] {
            for fragment in [1usize, 16384] {
                let body = message(fragment * count);
                let mut view = DataFrameView::new();
                for frame in data_frames(&body, fragment) {
                    view.add_frame(frame).unwrap();
                }
                assert!(view.is_complete());
                assert_eq!(view.frame_count(), count);
                assert_eq!(view.into_bytes(), Bytes::from(body));
            }
        }
    }

    #[test]
    fn test_read_byte_walks_frames() {
        let mut view = DataFrameView::new();
        for frame in data_frames(b"abc", 1) {
            view.add_frame(frame).unwrap();
        }
        assert_eq!(view.read_byte(), Some(b'a'));
        assert_eq!(view.read_byte(), Some(b'b'));
        assert_eq!(view.len(), 1);
        assert_eq!(view.read_byte(), Some(b'c'));
        assert_eq!(view.read_byte(), None);
    }

    #[test]
    fn test_take_across_frames() {
        let mut view = DataFrameView::new();
        for frame in data_frames(b"hello world", 4) {
            view.add_frame(frame).unwrap();
        }
        assert_eq!(view.take_bytes(3), Some(Bytes::from_static(b"hel")));
        assert_eq!(view.take_bytes(5), Some(Bytes::from_static(b"lo wo")));
        assert_eq!(view.take_bytes(4), None);
        assert_eq!(view.take_bytes(3), Some(Bytes::from_static(b"rld")));
    }

    #[test]
    fn test_padding_is_not_content() {
        let frame = DataFrame::new(1, Bytes::from_static(b"xy"), true)
            .with_padding(4)
            .into_frame();
        let mut view = DataFrameView::new();
        view.add_frame(frame).unwrap();
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_wrong_frame_type_rejected() {
        let mut headers = HeaderFrameView::new();
        let data = DataFrame::new(1, Bytes::from_static(b"x"), false).into_frame();
        assert!(matches!(headers.add_frame(data), Err(Error::Internal(_))));

        let mut body = DataFrameView::new();
        let cont = Frame::new(
            FrameType::Continuation,
            FrameFlags::from_u8(FrameFlags::END_HEADERS),
            1,
            Bytes::new(),
        );
        assert!(matches!(body.add_frame(cont), Err(Error::Internal(_))));
        assert!(body.add_frame(PingFrame::new([0; 8]).into_frame()).is_err());
    }

    #[test]
    fn test_buf_impl() {
        let mut view = DataFrameView::new();
        for frame in data_frames(&[0, 0, 1, 0, 9], 2) {
            view.add_frame(frame).unwrap();
        }
        assert_eq!(view.get_u32(), 256);
        assert_eq!(view.remaining(), 1);
        assert_eq!(view.chunk(), &[9]);
    }
}
