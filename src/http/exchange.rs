//! Request/response exchanges
//!
//! An [`Exchange`] is the unit of work a connection multiplexes: one
//! request, the channels its outcome and events are reported through, and
//! its retry bookkeeping. The caller keeps the matching [`ExchangeHandle`]
//! to wait for the response, watch progress events or cancel.
//!
//! A tunnel exchange carries opaque bytes instead of an HTTP body: outgoing
//! bytes are written through a [`TunnelWriter`] and incoming DATA payloads
//! are handed to a [`TunnelSink`].

use super::h2::{DataFrameView, Error as H2Error};
use super::{Headers, HttpRequest, HttpResponse, Status};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Callback that wakes the connection driving an exchange
pub(crate) type Waker = Arc<dyn Fn() + Send + Sync>;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Waiting for a stream
    Queued,
    /// Bound to a stream
    Processing,
    /// Response received
    Finished,
    /// Failed with an error
    Error,
    /// Cancelled by the caller
    Aborted,
    /// The connection stopped answering pings
    ConnectionTimedOut,
    /// The exchange's own timeout expired
    TimedOut,
}

impl ExchangeState {
    /// Whether this state ends the exchange
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeState::Queued | ExchangeState::Processing)
    }

    /// State name
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeState::Queued => "queued",
            ExchangeState::Processing => "processing",
            ExchangeState::Finished => "finished",
            ExchangeState::Error => "error",
            ExchangeState::Aborted => "aborted",
            ExchangeState::ConnectionTimedOut => "connection timed out",
            ExchangeState::TimedOut => "timed out",
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress reported while an exchange runs
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// Final (non-1xx) response headers arrived
    HeadersReceived {
        /// Response status
        status: Status,
        /// Response headers without pseudo-headers
        headers: Headers,
    },
    /// A DATA payload, delivered only for streaming requests
    DataFragment(Bytes),
    /// Response body bytes received so far, for requests with progress on
    DownloadProgress {
        /// Bytes received
        received: u64,
        /// Value of `content-length`, if the response had one
        total: Option<u64>,
    },
    /// Request body bytes sent so far, for requests with progress on
    UploadProgress {
        /// Bytes sent
        sent: u64,
        /// Body length, if known
        total: Option<u64>,
    },
    /// The exchange reached a terminal state
    Finished(ExchangeState),
}

/// Terminal outcome of an exchange
#[derive(Debug)]
pub struct Completion {
    /// Terminal state
    pub state: ExchangeState,
    /// Response, or the error that ended the exchange
    pub result: Result<HttpResponse, H2Error>,
}

/// State shared between an exchange and its handle
struct Shared {
    cancelled: AtomicBool,
    state: Mutex<ExchangeState>,
    waker: Mutex<Option<Waker>>,
}

impl Shared {
    fn wake(&self) {
        if let Ok(waker) = self.waker.lock() {
            if let Some(wake) = waker.as_ref() {
                wake();
            }
        }
    }

    fn set_state(&self, state: ExchangeState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    fn state(&self) -> ExchangeState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(ExchangeState::Error)
    }
}

/// Receives the bytes a tunnel peer sends
pub trait TunnelSink: Send {
    /// A DATA payload arrived
    fn on_data(&mut self, data: Bytes);

    /// The tunnel ended; `error` is set when it did not end cleanly
    fn on_close(&mut self, error: Option<&H2Error>);
}

/// What the stream found when polling a tunnel for outgoing bytes
#[derive(Debug)]
pub(crate) enum TunnelPoll {
    Data(Bytes),
    Pending,
    Closed,
}

/// Stream-side end of a tunnel
pub struct Tunnel {
    outgoing: Receiver<Bytes>,
    sink: Box<dyn TunnelSink>,
}

impl Tunnel {
    pub(crate) fn poll_outgoing(&self) -> TunnelPoll {
        match self.outgoing.try_recv() {
            Ok(data) => TunnelPoll::Data(data),
            Err(TryRecvError::Empty) => TunnelPoll::Pending,
            Err(TryRecvError::Disconnected) => TunnelPoll::Closed,
        }
    }

    pub(crate) fn deliver(&mut self, data: Bytes) {
        self.sink.on_data(data);
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel").finish_non_exhaustive()
    }
}

/// Caller-side writer of a tunnel. Dropping it (or calling
/// [`TunnelWriter::close`]) ends the outgoing direction with END_STREAM.
pub struct TunnelWriter {
    tx: Option<Sender<Bytes>>,
    shared: Arc<Shared>,
}

impl TunnelWriter {
    /// Queue bytes for the peer
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), H2Error> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.tx.as_ref().ok_or(H2Error::StreamClosed(0))?;
        tx.send(data).map_err(|_| H2Error::ConnectionClosed)?;
        self.shared.wake();
        Ok(())
    }

    /// End the outgoing direction
    pub fn close(self) {}
}

impl Drop for TunnelWriter {
    fn drop(&mut self) {
        self.tx.take();
        self.shared.wake();
    }
}

/// Response parts collected by a stream, turned into an [`HttpResponse`]
/// off the connection's driver thread.
#[derive(Debug)]
pub(crate) struct ResponseParts {
    pub status: Status,
    pub headers: Headers,
    pub trailers: Headers,
    pub body: DataFrameView,
}

impl ResponseParts {
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::new(self.status, self.headers, self.trailers, self.body.into_bytes())
    }
}

/// A request bound for a connection, with everything needed to report back
pub struct Exchange {
    id: u64,
    request: HttpRequest,
    tunnel: Option<Tunnel>,
    shared: Arc<Shared>,
    events: Sender<ExchangeEvent>,
    completion: Sender<Completion>,
    retries: u32,
    max_retries: Option<u32>,
    deadline: Option<Instant>,
    body_started: bool,
}

impl Exchange {
    /// Create an exchange for `request` and the handle the caller keeps
    pub fn new(request: HttpRequest) -> (Exchange, ExchangeHandle) {
        let id = NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            cancelled: AtomicBool::new(false),
            state: Mutex::new(ExchangeState::Queued),
            waker: Mutex::new(None),
        });
        let (events_tx, events_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();

        let exchange = Exchange {
            id,
            deadline: request.timeout().map(|timeout| Instant::now() + timeout),
            max_retries: request.max_retries(),
            request,
            tunnel: None,
            shared: shared.clone(),
            events: events_tx,
            completion: completion_tx,
            retries: 0,
            body_started: false,
        };
        let handle = ExchangeHandle {
            id,
            shared,
            events: events_rx,
            completion: completion_rx,
        };
        (exchange, handle)
    }

    /// Create a tunnel exchange. Incoming bytes go to `sink`; outgoing
    /// bytes are written through the returned [`TunnelWriter`].
    pub fn tunnel(
        request: HttpRequest,
        sink: impl TunnelSink + 'static,
    ) -> (Exchange, ExchangeHandle, TunnelWriter) {
        let (mut exchange, handle) = Exchange::new(request);
        let (tx, rx) = mpsc::channel();
        exchange.tunnel = Some(Tunnel {
            outgoing: rx,
            sink: Box::new(sink),
        });
        let writer = TunnelWriter {
            tx: Some(tx),
            shared: exchange.shared.clone(),
        };
        (exchange, handle, writer)
    }

    /// Unique exchange id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The request
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    /// Whether this exchange tunnels opaque bytes
    pub fn is_tunnel(&self) -> bool {
        self.tunnel.is_some()
    }

    pub(crate) fn tunnel_mut(&mut self) -> Option<&mut Tunnel> {
        self.tunnel.as_mut()
    }

    /// Whether the caller cancelled the exchange
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// When the exchange times out
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Current state
    pub fn state(&self) -> ExchangeState {
        self.shared.state()
    }

    pub(crate) fn set_state(&mut self, state: ExchangeState) {
        self.shared.set_state(state);
    }

    /// Connection wake-up used by cancellation and tunnel writes
    pub(crate) fn set_waker(&mut self, waker: Option<Waker>) {
        if let Ok(mut slot) = self.shared.waker.lock() {
            *slot = waker;
        }
    }

    /// Report an event. Headers and progress go out only when the request
    /// asked for them (headers also for streaming requests); a caller that
    /// stopped listening is not an error.
    pub(crate) fn emit(&self, event: ExchangeEvent) {
        let wanted = match event {
            ExchangeEvent::HeadersReceived { .. } => {
                self.request.reports_progress() || self.request.is_streaming()
            }
            ExchangeEvent::DownloadProgress { .. } | ExchangeEvent::UploadProgress { .. } => {
                self.request.reports_progress()
            }
            ExchangeEvent::DataFragment(_) | ExchangeEvent::Finished(_) => true,
        };
        if wanted {
            let _ = self.events.send(event);
        }
    }

    /// Resends used so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Apply the connection's retry limit unless the request set one
    pub fn set_default_max_retries(&mut self, max_retries: u32) {
        self.max_retries.get_or_insert(max_retries);
    }

    pub(crate) fn mark_body_started(&mut self) {
        self.body_started = true;
    }

    /// Whether the outgoing body can be produced again from the start
    fn body_replayable(&self) -> bool {
        !self.body_started || (self.tunnel.is_none() && self.request.body().is_replayable())
    }

    /// Whether the exchange may be sent again on another connection.
    /// A `free` resend (the peer never processed the stream) does not
    /// count against the retry limit.
    pub fn can_resubmit(&self, free: bool) -> bool {
        self.body_replayable() && (free || self.retries < self.max_retries.unwrap_or(0))
    }

    /// Reset per-attempt state before handing the exchange to another
    /// connection
    pub(crate) fn prepare_resubmit(&mut self, free: bool) {
        if !free {
            self.retries += 1;
        }
        self.body_started = false;
        self.set_waker(None);
        self.set_state(ExchangeState::Queued);
    }

    /// Deliver the terminal outcome
    pub fn finish(mut self, state: ExchangeState, result: Result<HttpResponse, H2Error>) {
        self.set_waker(None);
        self.set_state(state);
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.sink.on_close(result.as_ref().err());
        }
        self.emit(ExchangeEvent::Finished(state));
        let _ = self.completion.send(Completion { state, result });
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("method", &self.request.method())
            .field("uri", &self.request.uri().to_string())
            .field("tunnel", &self.tunnel.is_some())
            .field("retries", &self.retries)
            .finish()
    }
}

/// Caller's side of an exchange
pub struct ExchangeHandle {
    id: u64,
    shared: Arc<Shared>,
    events: Receiver<ExchangeEvent>,
    completion: Receiver<Completion>,
}

impl ExchangeHandle {
    /// Id of the exchange
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the exchange. It ends as [`ExchangeState::Aborted`] once the
    /// connection notices, unless it already finished.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.wake();
    }

    /// Current state
    pub fn state(&self) -> ExchangeState {
        self.shared.state()
    }

    /// Progress events
    pub fn events(&self) -> &Receiver<ExchangeEvent> {
        &self.events
    }

    /// Block until the exchange ends
    pub fn completion(&self) -> Completion {
        self.completion.recv().unwrap_or(Completion {
            state: ExchangeState::Error,
            result: Err(H2Error::ConnectionClosed),
        })
    }

    /// Block until the exchange ends and return its response
    pub fn wait(self) -> Result<HttpResponse, H2Error> {
        self.completion().result
    }

    /// Block for at most `timeout`; `None` if the exchange is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        match self.completion.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Completion {
                state: ExchangeState::Error,
                result: Err(H2Error::ConnectionClosed),
            }),
        }
    }
}

impl fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
