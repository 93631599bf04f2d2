//! Scripted HTTP/2 server peer for integration tests
//!
//! The peer speaks raw frames over a loopback socket so that tests decide
//! exactly what the client sees: which SETTINGS, when WINDOW_UPDATEs
//! arrive, whether PINGs are answered, when GOAWAY is sent.

#![allow(dead_code)]

use bytes::Bytes;
use h2plex::http::h2::frames::{
    DataFrame, GoawayFrame, PingFrame, SettingsFrame, WindowUpdateFrame,
};
use h2plex::http::h2::{
    ErrorCode, Frame, FrameCodec, FrameType, HeaderCodec, HeaderFrameView, HpackCodec,
    SettingsParameter, CONNECTION_PREFACE,
};
use h2plex::http::Headers;
use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bind a loopback listener on a free port
pub fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A received request
#[derive(Debug)]
pub struct Request {
    pub stream_id: u32,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Server side of one connection
pub struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    codec: FrameCodec,
    encoder: HpackCodec,
    decoder: HpackCodec,
    /// Frames read but not yet consumed by an `expect`
    backlog: Vec<Frame>,
}

impl Peer {
    /// Accept a connection and check the client preface
    pub fn accept(listener: &TcpListener) -> Peer {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        let mut preface = [0u8; 24];
        reader.read_exact(&mut preface).unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);

        Peer {
            reader,
            writer,
            codec: FrameCodec::with_max_frame_size(1 << 20),
            encoder: HpackCodec::new(),
            decoder: HpackCodec::new(),
            backlog: Vec::new(),
        }
    }

    /// Send our SETTINGS, then acknowledge the client's
    pub fn handshake(&mut self, settings: Vec<(SettingsParameter, u32)>) {
        self.send(SettingsFrame::new(settings).into_frame());
        let frame = self.expect(|f| f.frame_type == FrameType::Settings && !f.flags.is_ack());
        assert_eq!(frame.stream_id, 0);
        self.send(SettingsFrame::ack().into_frame());
    }

    pub fn send(&mut self, frame: Frame) {
        FrameCodec::write_frame(&mut self.writer, &frame).unwrap();
        self.writer.flush().unwrap();
    }

    /// Next frame from the wire, or `None` once the client closed
    pub fn read(&mut self) -> Option<Frame> {
        if !self.backlog.is_empty() {
            return Some(self.backlog.remove(0));
        }
        loop {
            match self.codec.read_frame(&mut self.reader) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Read until a frame matches `pred`; frames skipped on the way are
    /// kept for later reads.
    pub fn expect<F: Fn(&Frame) -> bool>(&mut self, pred: F) -> Frame {
        if let Some(pos) = self.backlog.iter().position(|f| pred(f)) {
            return self.backlog.remove(pos);
        }
        loop {
            let frame = match self.codec.read_frame(&mut self.reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => panic!("connection ended while waiting for a frame: {}", err),
            };
            if pred(&frame) {
                return frame;
            }
            self.backlog.push(frame);
        }
    }

    /// Drop frames already buffered
    pub fn clear_backlog(&mut self) {
        self.backlog.clear();
    }

    /// Read the next request header block
    pub fn read_headers(&mut self) -> (u32, Headers, bool) {
        let first = self.expect(|f| f.frame_type == FrameType::Headers);
        let stream_id = first.stream_id;
        let end_stream = first.flags.is_end_stream();

        let mut view = HeaderFrameView::new();
        view.add_frame(first).unwrap();
        while !view.is_complete() {
            let next = self.expect(|f| f.frame_type == FrameType::Continuation);
            view.add_frame(next).unwrap();
        }
        let mut headers = Headers::new();
        self.decoder.decode(&mut view, &mut headers).unwrap();
        (stream_id, headers, end_stream)
    }

    /// Read one request: its header block and DATA up to END_STREAM
    pub fn read_request(&mut self) -> Request {
        let (stream_id, headers, mut end_stream) = self.read_headers();
        let mut body = Vec::new();
        while !end_stream {
            let data = self.expect(|f| f.frame_type == FrameType::Data && f.stream_id == stream_id);
            let data = DataFrame::parse(&data).unwrap();
            body.extend_from_slice(&data.data);
            end_stream = data.end_stream;
        }
        Request {
            stream_id,
            headers,
            body,
        }
    }

    /// Frames arriving within `window`, plus any already buffered
    pub fn drain_for(&mut self, window: Duration) -> Vec<Frame> {
        self.reader.get_ref().set_read_timeout(Some(window)).unwrap();
        let mut frames = std::mem::take(&mut self.backlog);
        while let Some(frame) = self.read() {
            frames.push(frame);
        }
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        frames
    }

    /// Read until the client closes the transport
    pub fn wait_closed(&mut self) {
        self.backlog.clear();
        while self.read().is_some() {}
    }

    /// Send response headers
    pub fn send_headers(&mut self, stream_id: u32, fields: &[(&str, &str)], end_stream: bool) {
        let headers: Headers = fields.iter().copied().collect();
        let mut frames = Vec::new();
        self.encoder
            .encode(&headers, stream_id, 16384, end_stream, &mut frames)
            .unwrap();
        for frame in frames {
            self.send(frame);
        }
    }

    /// Send a complete response
    pub fn respond(&mut self, stream_id: u32, status: &str, body: &[u8]) {
        self.send_headers(stream_id, &[(":status", status)], body.is_empty());
        if !body.is_empty() {
            for (i, chunk) in body.chunks(16384).enumerate() {
                let last = (i + 1) * 16384 >= body.len();
                self.send(DataFrame::new(stream_id, Bytes::copy_from_slice(chunk), last).into_frame());
            }
        }
    }

    pub fn window_update(&mut self, stream_id: u32, increment: u32) {
        self.send(WindowUpdateFrame::new(stream_id, increment).into_frame());
    }

    pub fn goaway(&mut self, last_stream_id: u32, code: ErrorCode) {
        self.send(GoawayFrame::new(last_stream_id, code, Bytes::new()).into_frame());
    }

    /// Answer the next PING
    pub fn answer_ping(&mut self) {
        let frame = self.expect(|f| f.frame_type == FrameType::Ping && !f.flags.is_ack());
        let ping = PingFrame::parse(&frame).unwrap();
        self.send(PingFrame::ack(ping.data).into_frame());
    }

    /// Sum of DATA payloads on `stream_id` read until `limit` bytes arrived
    /// or no frame came within `quiet`.
    pub fn collect_data(&mut self, stream_id: u32, limit: usize, quiet: Duration) -> (usize, bool) {
        self.reader.get_ref().set_read_timeout(Some(quiet)).unwrap();
        let mut total = 0;
        let mut ended = false;
        let mut kept = Vec::new();
        while total < limit && !ended {
            match self.read() {
                Some(frame) if frame.frame_type == FrameType::Data && frame.stream_id == stream_id => {
                    total += frame.payload_len();
                    ended = frame.flags.is_end_stream();
                }
                Some(frame) => kept.push(frame),
                None => break,
            }
        }
        self.backlog.extend(kept);
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        (total, ended)
    }
}
