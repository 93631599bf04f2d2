//! HTTP/2 stream management
//!
//! This module implements the client side of the stream state machine
//! defined in RFC 7540 Section 5.1. An [`H2Stream`] owns one exchange for
//! its whole life, its two flow-control windows and its frame queues. The
//! connection feeds it incoming frames and calls [`H2Stream::process`] once
//! per driver iteration; the stream answers with at most one outgoing unit
//! (a frame, or a whole header block) per call.
//!
//! A stream either carries an HTTP request/response or tunnels opaque
//! bytes (extended CONNECT). Both share the state machine and flow
//! control; they differ only in where outgoing DATA comes from and where
//! incoming DATA goes.

use super::connection::ConnectionContext;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{FlowControlWindow, RecvWindow};
use super::frames::{
    DataFrame, Frame, FrameType, PriorityFrame, RstStreamFrame, WindowUpdateFrame,
};
use super::hpack_codec::HeaderCodec;
use super::view::{DataFrameView, HeaderFrameView};
use crate::http::exchange::{ResponseParts, TunnelPoll};
use crate::http::{Exchange, ExchangeEvent, ExchangeState, Headers, Method, RequestBody, Status};
use bytes::Bytes;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Instant;

/// Stream ID type
pub type StreamId = u32;

/// Headers that only make sense on an HTTP/1 connection (RFC 7540 Section 8.1.2.2)
const CONNECTION_HEADERS: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Stream state as defined in RFC 7540 Section 5.1 (client-initiated streams only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// State after we send END_STREAM
    fn close_local(self) -> StreamState {
        match self {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            _ => StreamState::Closed,
        }
    }

    /// State after the peer sends END_STREAM
    fn close_remote(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        }
    }
}

/// How a closed stream ended, as far as its exchange is concerned
#[derive(Debug)]
pub enum StreamOutcome {
    /// The response arrived in full
    Complete,
    /// The exchange ends with this state and error
    Failed(ExchangeState, Error),
    /// The connection went away under the stream; resend if the retry
    /// budget allows
    Interrupted(Error),
    /// The peer never processed the stream; resend without using a retry
    Refused,
}

/// What the connection does with a finished stream's exchange
#[derive(Debug)]
pub(crate) enum StreamResult {
    Response(ResponseParts),
    Failed(ExchangeState, Error),
    Interrupted(Error),
    Refused,
}

/// Where outgoing DATA comes from and where incoming DATA goes
#[derive(Debug)]
enum Role {
    /// Request body out, response body in
    Http {
        /// Request body bytes produced so far
        produced: u64,
    },
    /// Opaque bytes in both directions
    Tunnel {
        /// Chunk taken from the writer but not yet fully framed
        pending: Option<Bytes>,
    },
}

/// Connection state a stream needs during [`H2Stream::process`]
pub struct StreamContext<'a> {
    /// Header compression shared by every stream of the connection
    pub codec: &'a mut dyn HeaderCodec,
    /// Peer's SETTINGS_MAX_FRAME_SIZE
    pub max_frame_size: usize,
    /// Peer's SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size: u32,
    /// Largest DATA payload produced per frame
    pub chunk_size: usize,
    /// DATA frames are waiting for connection window; produce no more
    pub data_blocked: bool,
    /// Current time
    pub now: Instant,
}

/// Window sizes a new stream starts with
#[derive(Debug, Clone, Copy)]
pub struct StreamWindows {
    /// Peer's SETTINGS_INITIAL_WINDOW_SIZE
    pub send: u32,
    /// Our SETTINGS_INITIAL_WINDOW_SIZE
    pub recv: u32,
    /// Fraction of `recv` at which a WINDOW_UPDATE is sent
    pub threshold: f64,
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    /// Stream ID
    id: StreamId,
    /// Log prefix, `h2#N stream M`
    label: String,
    /// Stream state
    state: StreamState,
    exchange: Exchange,
    role: Role,
    /// Credit the peer granted us
    send_window: FlowControlWindow,
    /// Credit we granted the peer
    recv_window: RecvWindow,
    incoming: VecDeque<Frame>,
    outgoing: VecDeque<Frame>,
    /// Header block being reassembled
    header_view: HeaderFrameView,
    /// END_STREAM flag of the HEADERS frame starting `header_view`
    block_end_stream: bool,
    /// Buffered response body
    data_view: DataFrameView,
    status: Option<Status>,
    response_headers: Headers,
    trailers: Headers,
    expected_length: Option<u64>,
    downloaded: u64,
    uploaded: u64,
    headers_sent: bool,
    /// Whether any frame of this stream reached the connection
    emitted: bool,
    rst_sent: bool,
    outcome: Option<StreamOutcome>,
}

impl H2Stream {
    /// Create a stream bound to `exchange`
    pub fn new(
        id: StreamId,
        mut exchange: Exchange,
        windows: StreamWindows,
        ctx: &ConnectionContext,
    ) -> Self {
        exchange.set_state(ExchangeState::Processing);
        let role = if exchange.is_tunnel() {
            Role::Tunnel { pending: None }
        } else {
            Role::Http { produced: 0 }
        };
        H2Stream {
            id,
            label: format!("{} stream {}", ctx.name(), id),
            state: StreamState::Idle,
            exchange,
            role,
            send_window: FlowControlWindow::with_initial_size(windows.send),
            recv_window: RecvWindow::new(windows.recv, windows.threshold),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            header_view: HeaderFrameView::new(),
            block_end_stream: false,
            data_view: DataFrameView::new(),
            status: None,
            response_headers: Headers::new(),
            trailers: Headers::new(),
            expected_length: None,
            downloaded: 0,
            uploaded: 0,
            headers_sent: false,
            emitted: false,
            rst_sent: false,
            outcome: None,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the stream is closed and has nothing left to emit
    pub fn is_finished(&self) -> bool {
        self.state.is_closed() && self.outgoing.is_empty()
    }

    /// The bound exchange
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Credit the peer granted this stream
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Credit this stream granted the peer
    pub fn recv_window(&self) -> &RecvWindow {
        &self.recv_window
    }

    /// Whether any frame of this stream was handed to the connection
    pub fn has_emitted(&self) -> bool {
        self.emitted
    }

    /// Queue a frame received for this stream
    pub fn push_frame(&mut self, frame: Frame) {
        self.incoming.push_back(frame);
    }

    /// Exchange timeout, if any
    pub fn deadline(&self) -> Option<Instant> {
        if self.state.is_closed() {
            None
        } else {
            self.exchange.deadline()
        }
    }

    /// Whether calling [`H2Stream::process`] now would make progress
    pub fn has_work(&self, data_blocked: bool) -> bool {
        if self.state.is_closed() {
            return !self.outgoing.is_empty();
        }
        if !self.incoming.is_empty() || !self.outgoing.is_empty() || !self.headers_sent {
            return true;
        }
        if self.exchange.is_cancelled() {
            return true;
        }
        if data_blocked || !self.state.can_send() || self.send_window.available() == 0 {
            return false;
        }
        match &self.role {
            Role::Http { .. } => true,
            Role::Tunnel { pending } => pending.is_some(),
        }
    }

    /// Advance the stream by one step, appending what it emits to `out`
    pub fn process(&mut self, ctx: &mut StreamContext<'_>, out: &mut Vec<Frame>) {
        if self.state.is_closed() {
            self.discard_incoming(ctx);
            self.emit(out);
            return;
        }

        if self.check_cancelled(ctx.now, out) {
            self.discard_incoming(ctx);
            return;
        }

        while let Some(frame) = self.incoming.pop_front() {
            if let Err(err) = self.on_frame(frame, ctx) {
                self.fail(err, ExchangeState::Error);
            }
            if self.state.is_closed() {
                self.discard_incoming(ctx);
                break;
            }
        }

        if self.headers_sent && !self.state.is_closed() && !ctx.data_blocked {
            if let Err(err) = self.produce_data(ctx) {
                self.fail(err, ExchangeState::Error);
            }
        }

        if !self.headers_sent && !self.state.is_closed() {
            if let Err(err) = self.send_headers(ctx, out) {
                self.fail(err, ExchangeState::Error);
            }
            return;
        }

        self.emit(out);
    }

    /// Cancellation or timeout. Nothing goes on the wire unless the peer
    /// already saw part of the stream.
    fn check_cancelled(&mut self, now: Instant, out: &mut Vec<Frame>) -> bool {
        let state = if self.exchange.is_cancelled() {
            ExchangeState::Aborted
        } else if self.exchange.deadline().map_or(false, |deadline| now >= deadline) {
            ExchangeState::TimedOut
        } else {
            return false;
        };
        let error = if state == ExchangeState::Aborted {
            Error::Aborted
        } else {
            Error::TimedOut
        };
        debug!("{}: {}", self.label, error);

        self.outgoing.clear();
        if self.emitted && !self.rst_sent {
            self.rst_sent = true;
            out.push(RstStreamFrame::new(self.id, ErrorCode::Cancel).into_frame());
        }
        self.close(StreamOutcome::Failed(state, error));
        true
    }

    fn on_frame(&mut self, frame: Frame, ctx: &mut StreamContext<'_>) -> Result<()> {
        trace!("{}: received {}", self.label, frame);
        match frame.frame_type {
            FrameType::Headers | FrameType::Continuation => self.on_header_frame(frame, ctx),
            FrameType::Data => self.on_data(frame),
            FrameType::RstStream => {
                let rst = RstStreamFrame::parse(&frame)?;
                self.on_reset(rst.error_code);
                Ok(())
            }
            FrameType::WindowUpdate => {
                let update = WindowUpdateFrame::parse(&frame)?;
                self.send_window.increase(update.size_increment)?;
                Ok(())
            }
            FrameType::Priority => {
                let priority = PriorityFrame::parse(&frame)?;
                if priority.priority.stream_dependency == self.id {
                    return Err(Error::Protocol("stream depends on itself".to_string()));
                }
                Ok(())
            }
            other => {
                warn!("{}: ignoring {} frame", self.label, other);
                Ok(())
            }
        }
    }

    /// Drop queued frames. Header blocks still go through the decoder,
    /// whose table is shared by every stream of the connection.
    fn discard_incoming(&mut self, ctx: &mut StreamContext<'_>) {
        while let Some(frame) = self.incoming.pop_front() {
            match frame.frame_type {
                FrameType::Headers | FrameType::Continuation => {
                    self.discard_header_frame(frame, ctx)
                }
                _ => trace!("{}: dropping {} after close", self.label, frame),
            }
        }
    }

    fn discard_header_frame(&mut self, frame: Frame, ctx: &mut StreamContext<'_>) {
        if frame.frame_type == FrameType::Headers && self.header_view.frame_count() > 0 {
            warn!("{}: HEADERS inside an open header block", self.label);
            self.header_view = HeaderFrameView::new();
        }
        if frame.frame_type == FrameType::Continuation && self.header_view.frame_count() == 0 {
            warn!("{}: CONTINUATION without HEADERS", self.label);
            return;
        }
        if let Err(err) = self.header_view.add_frame(frame) {
            warn!("{}: dropping header frame: {}", self.label, err);
            return;
        }
        if !self.header_view.is_complete() {
            return;
        }
        let mut view = std::mem::take(&mut self.header_view);
        let mut fields = Headers::new();
        match ctx.codec.decode(&mut view, &mut fields) {
            Ok(()) => debug!(
                "{}: discarded header block of {} fields",
                self.label,
                fields.len()
            ),
            Err(err) => warn!("{}: discarded header block: {}", self.label, err),
        }
    }

    /// A header block still waiting for CONTINUATION frames. The connection
    /// takes it over when the stream goes away mid-block.
    pub fn take_open_header_block(&mut self) -> Option<HeaderFrameView> {
        if self.header_view.frame_count() > 0 && !self.header_view.is_complete() {
            Some(std::mem::take(&mut self.header_view))
        } else {
            None
        }
    }

    fn on_header_frame(&mut self, frame: Frame, ctx: &mut StreamContext<'_>) -> Result<()> {
        if !self.state.can_receive() {
            warn!("{}: unexpected {} in state {:?}", self.label, frame.frame_type, self.state);
            self.discard_header_frame(frame, ctx);
            return Ok(());
        }
        match frame.frame_type {
            FrameType::Headers if self.header_view.frame_count() > 0 => {
                return Err(Error::Protocol("HEADERS inside an open header block".to_string()));
            }
            FrameType::Headers => self.block_end_stream = frame.flags.is_end_stream(),
            _ if self.header_view.frame_count() == 0 => {
                return Err(Error::Protocol("CONTINUATION without HEADERS".to_string()));
            }
            _ => {}
        }

        self.header_view.add_frame(frame)?;
        if !self.header_view.is_complete() {
            return Ok(());
        }

        let mut view = std::mem::take(&mut self.header_view);
        let mut fields = Headers::new();
        ctx.codec.decode(&mut view, &mut fields)?;
        let end_stream = self.block_end_stream;

        if self.status.is_none() {
            let status = fields
                .get(":status")
                .ok_or_else(|| Error::Protocol("response without :status".to_string()))
                .and_then(|value| Status::parse(value).map_err(Error::from))?;
            if status.is_informational() {
                if end_stream {
                    return Err(Error::Protocol("END_STREAM on a 1xx response".to_string()));
                }
                debug!("{}: skipping informational {}", self.label, status);
                return Ok(());
            }

            let headers: Headers = fields
                .into_iter()
                .filter(|(name, _)| !name.starts_with(':'))
                .collect();
            self.expected_length = headers
                .get("content-length")
                .and_then(|value| value.trim().parse().ok());
            debug!("{}: response {}", self.label, status);
            self.exchange.emit(ExchangeEvent::HeadersReceived {
                status,
                headers: headers.clone(),
            });
            self.status = Some(status);
            self.response_headers = headers;
        } else {
            if !end_stream {
                return Err(Error::Protocol("trailers without END_STREAM".to_string()));
            }
            self.trailers.extend(fields);
        }

        if end_stream {
            self.on_remote_end();
        }
        Ok(())
    }

    fn on_data(&mut self, frame: Frame) -> Result<()> {
        let len = frame.payload_len();
        if !self.state.can_receive() {
            warn!("{}: dropping DATA in state {:?}", self.label, self.state);
            return Ok(());
        }
        if self.status.is_none() {
            return Err(Error::Protocol("DATA before response headers".to_string()));
        }
        self.recv_window.consume(len)?;
        let end_stream = frame.flags.is_end_stream();

        let received = if self.exchange.is_tunnel() || self.exchange.request().is_streaming() {
            let data = DataFrame::parse(&frame)?.data;
            let received = data.len();
            if !data.is_empty() {
                match self.exchange.tunnel_mut() {
                    Some(tunnel) => tunnel.deliver(data),
                    None => self.exchange.emit(ExchangeEvent::DataFragment(data)),
                }
            }
            received
        } else {
            let before = self.data_view.len();
            self.data_view.add_frame(frame)?;
            self.data_view.len() - before
        };

        if received > 0 {
            self.downloaded += received as u64;
            self.exchange.emit(ExchangeEvent::DownloadProgress {
                received: self.downloaded,
                total: self.expected_length,
            });
        }

        if end_stream {
            self.on_remote_end();
        } else if let Some(increment) = self.recv_window.take_update() {
            self.outgoing
                .push_back(WindowUpdateFrame::new(self.id, increment).into_frame());
        }
        Ok(())
    }

    fn on_remote_end(&mut self) {
        self.state = self.state.close_remote();
        if self.state.is_closed() {
            self.close(StreamOutcome::Complete);
        }
    }

    fn on_reset(&mut self, code: ErrorCode) {
        debug!("{}: reset by peer with {}", self.label, code);
        self.outgoing.clear();
        // The peer closed the stream; an RST from us would be answered with
        // another one
        self.rst_sent = true;
        let outcome = match code {
            ErrorCode::NoError if self.state == StreamState::HalfClosedRemote => StreamOutcome::Complete,
            ErrorCode::RefusedStream => StreamOutcome::Refused,
            code => StreamOutcome::Failed(ExchangeState::Error, Error::Reset(code)),
        };
        self.close(outcome);
    }

    /// Build request headers, encode them and emit the whole block
    fn send_headers(&mut self, ctx: &mut StreamContext<'_>, out: &mut Vec<Frame>) -> Result<()> {
        let headers = self.request_headers();
        if headers.list_size() > ctx.max_header_list_size as usize {
            return Err(Error::InvalidHeader(format!(
                "header list of {} bytes exceeds the peer's limit of {}",
                headers.list_size(),
                ctx.max_header_list_size
            )));
        }
        let end_stream = !self.exchange.is_tunnel() && self.exchange.request().body().is_empty();

        ctx.codec
            .encode(&headers, self.id, ctx.max_frame_size, end_stream, out)?;
        self.headers_sent = true;
        self.emitted = true;
        self.state = if end_stream {
            self.state.close_local()
        } else {
            StreamState::Open
        };
        debug!(
            "{}: sent {} {}{}",
            self.label,
            self.exchange.request().method(),
            self.exchange.request().uri(),
            if end_stream { " (no body)" } else { "" }
        );
        Ok(())
    }

    fn request_headers(&self) -> Headers {
        let request = self.exchange.request();
        let uri = request.uri();
        let mut headers = Headers::new();
        headers.insert(":method", request.method().as_str());
        if request.method() == Method::Connect && request.protocol().is_none() {
            headers.insert(":authority", uri.authority());
        } else {
            if let Some(protocol) = request.protocol() {
                headers.insert(":protocol", protocol);
            }
            headers.insert(":scheme", uri.scheme());
            headers.insert(":authority", uri.authority());
            headers.insert(":path", uri.path());
        }

        for (name, value) in request.headers().iter() {
            let name = name.to_ascii_lowercase();
            if CONNECTION_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if name == "te" && !value.eq_ignore_ascii_case("trailers") {
                continue;
            }
            headers.insert(name, value);
        }

        if !self.exchange.is_tunnel() && !headers.contains("content-length") {
            match request.body().len() {
                Some(len) if len > 0 => headers.insert("content-length", len.to_string()),
                _ => {}
            }
        }
        headers
    }

    /// Queue the next DATA frame if the window allows and none is waiting
    fn produce_data(&mut self, ctx: &StreamContext<'_>) -> Result<()> {
        if !self.state.can_send() || self.outgoing.iter().any(|f| f.frame_type == FrameType::Data) {
            return Ok(());
        }
        let max = ctx
            .chunk_size
            .min(ctx.max_frame_size)
            .min(self.send_window.available());

        let Some((data, end_stream)) = self.next_chunk(max)? else {
            return Ok(());
        };
        self.send_window.consume(data.len());
        self.exchange.mark_body_started();
        self.outgoing
            .push_back(DataFrame::new(self.id, data, end_stream).into_frame());
        Ok(())
    }

    /// Next piece of outgoing body: up to `max` bytes and whether it ends
    /// the body. `None` when nothing can be sent right now.
    fn next_chunk(&mut self, max: usize) -> Result<Option<(Bytes, bool)>> {
        match &mut self.role {
            Role::Http { produced } => match self.exchange.request_mut().body_mut() {
                RequestBody::Empty => Ok(Some((Bytes::new(), true))),
                RequestBody::Bytes(body) => {
                    let start = *produced as usize;
                    let end = (start + max).min(body.len());
                    if start == end && end < body.len() {
                        return Ok(None);
                    }
                    *produced = end as u64;
                    Ok(Some((body.slice(start..end), end == body.len())))
                }
                RequestBody::Reader { reader, length } => {
                    let remaining = length.map(|len| len.saturating_sub(*produced));
                    if remaining == Some(0) {
                        return Ok(Some((Bytes::new(), true)));
                    }
                    if max == 0 {
                        return Ok(None);
                    }
                    let want = remaining.map_or(max, |r| r.min(max as u64) as usize);
                    let mut buf = vec![0u8; want];
                    let n = read_some(reader.as_mut(), &mut buf)?;
                    if n == 0 && remaining.is_some() {
                        return Err(Error::Internal(format!(
                            "request body ended {} bytes short of its length",
                            remaining.unwrap_or(0)
                        )));
                    }
                    buf.truncate(n);
                    *produced += n as u64;
                    let end = n == 0 || remaining == Some(n as u64);
                    Ok(Some((Bytes::from(buf), end)))
                }
            },
            Role::Tunnel { pending } => {
                if pending.is_none() {
                    match self.exchange.tunnel_mut().map(|tunnel| tunnel.poll_outgoing()) {
                        Some(TunnelPoll::Data(data)) => *pending = Some(data),
                        Some(TunnelPoll::Pending) => return Ok(None),
                        Some(TunnelPoll::Closed) | None => return Ok(Some((Bytes::new(), true))),
                    }
                }
                match pending {
                    Some(chunk) if max > 0 => {
                        let data = chunk.split_to(chunk.len().min(max));
                        if chunk.is_empty() {
                            *pending = None;
                        }
                        Ok(Some((data, false)))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Hand one queued unit to the connection
    fn emit(&mut self, out: &mut Vec<Frame>) {
        let Some(frame) = self.outgoing.pop_front() else {
            return;
        };
        trace!("{}: emitting {}", self.label, frame);
        self.emitted = true;
        if frame.frame_type == FrameType::Data {
            let sent = frame.payload_len() as u64;
            if sent > 0 {
                self.uploaded += sent;
                let total = match &self.role {
                    Role::Http { .. } => self.exchange.request().body().len(),
                    Role::Tunnel { .. } => None,
                };
                self.exchange.emit(ExchangeEvent::UploadProgress {
                    sent: self.uploaded,
                    total,
                });
            }
            if frame.flags.is_end_stream() {
                self.state = self.state.close_local();
                if self.state.is_closed() && self.outcome.is_none() {
                    self.outcome = Some(StreamOutcome::Complete);
                }
            }
        }
        out.push(frame);
    }

    /// End the stream with an error. The peer is told with RST_STREAM if it
    /// saw any part of the stream.
    fn fail(&mut self, err: Error, state: ExchangeState) {
        warn!("{}: {}", self.label, err);
        self.outgoing.clear();
        if self.emitted && !self.rst_sent {
            self.rst_sent = true;
            self.outgoing
                .push_back(RstStreamFrame::new(self.id, err.code()).into_frame());
        }
        self.close(StreamOutcome::Failed(state, err));
    }

    fn close(&mut self, outcome: StreamOutcome) {
        self.state = StreamState::Closed;
        self.outcome.get_or_insert(outcome);
    }

    /// Close because the peer's GOAWAY excluded this stream
    pub fn refuse(&mut self) {
        self.outgoing.clear();
        self.rst_sent = true;
        self.close(StreamOutcome::Refused);
    }

    /// Close because the connection is going away or failed
    pub fn interrupt(&mut self, err: Error) {
        self.outgoing.clear();
        self.close(StreamOutcome::Interrupted(err));
    }

    /// Move the send window after the peer changed
    /// SETTINGS_INITIAL_WINDOW_SIZE; it may go negative
    pub fn update_send_window(&mut self, initial_size: u32) -> Result<()> {
        self.send_window.update_initial_size(initial_size)
    }

    /// Our SETTINGS_INITIAL_WINDOW_SIZE was acknowledged; announce any
    /// added credit
    pub fn update_recv_window(&mut self, initial_size: u32) {
        if let Some(increment) = self.recv_window.resize(initial_size) {
            if self.state.can_receive() {
                self.outgoing
                    .push_back(WindowUpdateFrame::new(self.id, increment).into_frame());
            }
        }
    }

    /// How the stream ended, once closed
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    /// Release the exchange together with what the connection must do with it
    pub(crate) fn finish(mut self) -> (Exchange, StreamResult) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            StreamOutcome::Interrupted(Error::Internal("stream finished while active".to_string()))
        });
        let result = match outcome {
            StreamOutcome::Complete => match self.status {
                Some(status) => StreamResult::Response(ResponseParts {
                    status,
                    headers: self.response_headers,
                    trailers: self.trailers,
                    body: self.data_view,
                }),
                None => StreamResult::Failed(
                    ExchangeState::Error,
                    Error::Protocol("stream closed without a response".to_string()),
                ),
            },
            StreamOutcome::Failed(state, err) => StreamResult::Failed(state, err),
            StreamOutcome::Interrupted(err) => StreamResult::Interrupted(err),
            StreamOutcome::Refused => StreamResult::Refused,
        };
        (self.exchange, result)
    }
}

fn read_some(reader: &mut (dyn Read + Send), buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}
