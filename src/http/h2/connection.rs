//! HTTP/2 connection
//!
//! A connection runs two threads over one transport:
//!
//! - the **reader** blocks on the transport, decodes one frame at a time
//!   and queues it for the driver. PING ACKs are timed and GOAWAY is
//!   flagged right there, before the driver sees the frame.
//! - the **driver** owns everything else (stream table, flow-control
//!   windows, settings, HPACK state) and is the only writer. Each
//!   iteration admits queued exchanges, handles connection frames, runs
//!   every stream once, writes the collected frames and then sleeps on
//!   the event channel until the next deadline.
//!
//! The two threads share nothing mutable but the event channel and the
//! RTT samples. [`H2Connection`] is the handle the owner keeps.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{FlowControlWindow, RecvWindow};
use super::frames::{
    Frame, FrameType, GoawayFrame, PingFrame, PushPromiseFrame, RstStreamFrame, SettingsFrame,
    WindowUpdateFrame,
};
use super::hpack_codec::{HeaderCodec, HpackCodec};
use super::settings::{SettingsManager, SettingsOutcome, SettingsParameter, SettingsRegistry};
use super::stream::{H2Stream, StreamContext, StreamResult, StreamWindows};
use super::view::HeaderFrameView;
use super::{CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_STREAM_ID};
use crate::http::exchange::Waker;
use crate::http::{Exchange, ExchangeState, Headers, SessionOps, SessionWrite};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection tuning
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection-level receive window announced after the preface
    pub initial_connection_window: u32,
    /// Fraction of a receive window at which a WINDOW_UPDATE is sent
    pub window_update_threshold: f64,
    /// Largest DATA payload produced per frame
    pub upload_chunk_size: usize,
    /// PING cadence; `None` disables pings
    pub ping_frequency: Option<Duration>,
    /// How long a PING may stay unacknowledged
    pub ping_timeout: Duration,
    /// Close the connection after this long without streams
    pub idle_timeout: Option<Duration>,
    /// Longest time streams may drain after a GOAWAY
    pub max_goaway_wait: Duration,
    /// How long our SETTINGS may stay unacknowledged before it is reported
    pub settings_ack_timeout: Duration,
    /// Number of RTT samples averaged into the latency
    pub rtt_samples: usize,
    /// Capacity of the reader-to-driver queue
    pub frame_queue_capacity: usize,
    /// Transport write buffer size
    pub write_buffer_size: usize,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Resends allowed per exchange when a connection fails under it
    pub default_max_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            initial_connection_window: 10 * 1024 * 1024,
            window_update_threshold: 0.5,
            upload_chunk_size: 16 * 1024,
            ping_frequency: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(20),
            idle_timeout: Some(Duration::from_secs(60)),
            max_goaway_wait: Duration::from_secs(10),
            settings_ack_timeout: Duration::from_secs(10),
            rtt_samples: 10,
            frame_queue_capacity: 256,
            write_buffer_size: 64 * 1024,
            connect_timeout: Duration::from_secs(10),
            default_max_retries: 1,
        }
    }
}

/// Identity of one connection, carried into every log line it produces
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    id: u64,
    name: String,
}

impl ConnectionContext {
    /// Allocate a new connection identity
    pub fn new() -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        ConnectionContext {
            id,
            name: format!("h2#{}", id),
        }
    }

    /// Process-unique connection number
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Log label, `h2#N`
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport-level events reported to the connection owner
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The preface and our SETTINGS went out
    Connected,
    /// Application protocol in use
    ProtocolSelected(&'static str),
    /// A connection attempt failed
    FailedToConnect(Arc<Error>),
    /// The connection closed in an orderly way
    Closed,
    /// The connection failed; every stream saw this cause
    ClosedWithError(Arc<Error>),
}

/// Owner of a connection
pub trait ConnectionObserver: Send + Sync {
    /// Transport event
    fn on_event(&self, ctx: &ConnectionContext, event: &ConnectionEvent) {
        let _ = (ctx, event);
    }

    /// An exchange must be sent again on another connection
    fn on_resubmit(&self, exchange: Exchange);

    /// The moving-average round-trip time changed
    fn on_latency(&self, ctx: &ConnectionContext, latency: Duration) {
        let _ = (ctx, latency);
    }
}

/// Ring of recent round-trip times
#[derive(Debug)]
struct RttSamples {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl RttSamples {
    fn new(capacity: usize) -> Self {
        RttSamples {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, rtt: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
    }

    fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }
}

/// State shared by the handle, the reader and the driver
#[derive(Debug)]
struct Shared {
    /// Base for PING payloads; a PING carries its send time relative to it
    epoch: Instant,
    /// Cleared once a GOAWAY was sent or received
    accepting: AtomicBool,
    closed: AtomicBool,
    shutdown: AtomicBool,
    rtt: Mutex<RttSamples>,
}

impl Shared {
    fn new(rtt_samples: usize) -> Self {
        Shared {
            epoch: Instant::now(),
            accepting: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            rtt: Mutex::new(RttSamples::new(rtt_samples)),
        }
    }

    fn ping_payload(&self, now: Instant) -> [u8; 8] {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        nanos.to_be_bytes()
    }

    /// Record the RTT of an acknowledged PING; returns the new average
    fn record_rtt(&self, payload: [u8; 8], received_at: Instant) -> Option<Duration> {
        let sent_at = self
            .epoch
            .checked_add(Duration::from_nanos(u64::from_be_bytes(payload)))?;
        if sent_at > received_at {
            return None;
        }
        let mut samples = self.rtt.lock().ok()?;
        samples.push(received_at - sent_at);
        samples.average()
    }

    fn latency(&self) -> Option<Duration> {
        self.rtt.lock().ok().and_then(|samples| samples.average())
    }
}

/// Everything the driver thread reacts to
pub(crate) enum DriverEvent {
    /// A frame from the reader
    Frame { frame: Frame, received_at: Instant },
    /// The reader stopped
    ReadFailed(Error),
    /// A new exchange
    Submit(Exchange),
    /// Something changed outside the driver (cancel, tunnel write, shutdown)
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Active,
    /// We sent GOAWAY
    GracefulShutdown { since: Instant },
    /// The peer sent GOAWAY
    Draining { until: Instant },
    Closed,
}

/// Header block decoded only to keep HPACK state in sync
#[derive(Debug)]
struct DiscardedBlock {
    stream_id: u32,
    /// Promised stream to refuse once the block is complete
    promised: Option<u32>,
    view: HeaderFrameView,
}

/// Driver-side connection state
pub(crate) struct Multiplexer<W: SessionWrite> {
    ctx: ConnectionContext,
    config: ConnectionConfig,
    state: ConnectionState,
    writer: BufWriter<W>,
    settings: SettingsManager,
    codec: Box<dyn HeaderCodec>,
    streams: BTreeMap<u32, H2Stream>,
    queued: VecDeque<Exchange>,
    incoming: VecDeque<Frame>,
    /// DATA frames waiting for connection window, in send order
    blocked: VecDeque<Frame>,
    discarded: Option<DiscardedBlock>,
    next_stream_id: u32,
    send_window: FlowControlWindow,
    recv_window: RecvWindow,
    ping_sent: Option<(Instant, [u8; 8])>,
    next_ping: Option<Instant>,
    last_activity: Instant,
    read_closed: bool,
    torn_down: bool,
    shared: Arc<Shared>,
    observer: Arc<dyn ConnectionObserver>,
    waker: Waker,
}

impl<W: SessionWrite> Multiplexer<W> {
    fn new(
        ctx: ConnectionContext,
        config: ConnectionConfig,
        settings: SettingsRegistry,
        writer: BufWriter<W>,
        shared: Arc<Shared>,
        observer: Arc<dyn ConnectionObserver>,
        waker: Waker,
    ) -> Self {
        let threshold = config.window_update_threshold;
        let settings_ack_timeout = config.settings_ack_timeout;
        Multiplexer {
            ctx,
            config,
            state: ConnectionState::Connecting,
            writer,
            settings: SettingsManager::new(settings, settings_ack_timeout),
            codec: Box::new(HpackCodec::new()),
            streams: BTreeMap::new(),
            queued: VecDeque::new(),
            incoming: VecDeque::new(),
            blocked: VecDeque::new(),
            discarded: None,
            next_stream_id: 1,
            send_window: FlowControlWindow::new(),
            recv_window: RecvWindow::new(DEFAULT_INITIAL_WINDOW_SIZE, threshold),
            ping_sent: None,
            next_ping: None,
            last_activity: Instant::now(),
            read_closed: false,
            torn_down: false,
            shared,
            observer,
            waker,
        }
    }

    /// Write the preface, our SETTINGS and the connection window increase
    fn start(&mut self, now: Instant) -> Result<()> {
        self.writer.write_all(CONNECTION_PREFACE)?;
        if let Some(settings) = self.settings.pending_frame(now, true) {
            FrameCodec::write_frame(&mut self.writer, &settings)?;
        }
        let target = self
            .config
            .initial_connection_window
            .max(DEFAULT_INITIAL_WINDOW_SIZE);
        if let Some(increment) = self.recv_window.resize(target) {
            let update = WindowUpdateFrame::new(0, increment).into_frame();
            FrameCodec::write_frame(&mut self.writer, &update)?;
        }
        self.writer.flush()?;

        self.state = ConnectionState::Active;
        self.last_activity = now;
        self.next_ping = self.config.ping_frequency.map(|every| now + every);
        debug!("{}: preface sent", self.ctx.name());
        self.observer.on_event(&self.ctx, &ConnectionEvent::Connected);
        self.observer
            .on_event(&self.ctx, &ConnectionEvent::ProtocolSelected("h2"));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn is_accepting(&self) -> bool {
        self.state == ConnectionState::Active && self.shared.accepting.load(Ordering::Acquire)
    }

    fn handle_event(&mut self, event: DriverEvent) -> Result<()> {
        match event {
            DriverEvent::Frame { frame, received_at } => {
                // Connection frames (our own PING ACKs included) are not activity
                if !frame.is_connection_level() {
                    self.last_activity = received_at;
                }
                self.incoming.push_back(frame);
            }
            DriverEvent::ReadFailed(err) => {
                let shutting_down = matches!(
                    self.state,
                    ConnectionState::GracefulShutdown { .. } | ConnectionState::Draining { .. }
                );
                if shutting_down {
                    debug!("{}: transport closed while shutting down: {}", self.ctx.name(), err);
                    self.read_closed = true;
                } else {
                    return Err(err);
                }
            }
            DriverEvent::Submit(exchange) => {
                if self.is_accepting() {
                    self.queued.push_back(exchange);
                } else {
                    self.observer.on_resubmit(exchange);
                }
            }
            DriverEvent::Wake => {}
        }
        Ok(())
    }

    /// One driver iteration. Returns when the driver must run again at the
    /// latest, or `None` to wait for the next event.
    fn tick(&mut self, now: Instant) -> Result<Option<Instant>> {
        let mut out = Vec::new();
        if let Some(settings) = self.settings.pending_frame(now, false) {
            out.push(settings);
        }

        self.admit(now);
        self.handle_frames(now, &mut out)?;
        self.process_streams(now, &mut out);
        self.reap_streams();
        self.housekeeping(now, &mut out)?;
        self.write_frames(out)?;

        if self.should_close(now) {
            self.close();
            return Ok(None);
        }
        Ok(self.next_wake(now))
    }

    fn concurrency_limit(&self) -> usize {
        let local = self.settings.my().max_concurrent_streams();
        let remote = self.settings.remote().max_concurrent_streams();
        local.min(remote) as usize
    }

    /// Bind queued exchanges to new streams while the limits allow
    fn admit(&mut self, now: Instant) {
        if !self.is_accepting() {
            self.resubmit_queued();
            return;
        }
        let windows = StreamWindows {
            send: self.settings.remote().initial_window_size(),
            recv: self.settings.initiated().initial_window_size(),
            threshold: self.config.window_update_threshold,
        };
        let limit = self.concurrency_limit();

        while self.streams.len() < limit {
            let Some(mut exchange) = self.queued.pop_front() else {
                break;
            };
            if exchange.is_cancelled() {
                exchange.finish(ExchangeState::Aborted, Err(Error::Aborted));
                continue;
            }
            if self.next_stream_id > MAX_STREAM_ID {
                warn!("{}: stream ids exhausted", self.ctx.name());
                self.queued.push_front(exchange);
                self.shared.shutdown.store(true, Ordering::Release);
                break;
            }

            let id = self.next_stream_id;
            self.next_stream_id += 2;
            exchange.set_waker(Some(self.waker.clone()));
            debug!("{}: exchange {} on stream {}", self.ctx.name(), exchange.id(), id);
            self.streams
                .insert(id, H2Stream::new(id, exchange, windows, &self.ctx));
            self.last_activity = now;
        }
    }

    fn handle_frames(&mut self, now: Instant, out: &mut Vec<Frame>) -> Result<()> {
        while let Some(frame) = self.incoming.pop_front() {
            trace!("{}: received {}", self.ctx.name(), frame);

            if let Some(block) = self.discarded.as_ref() {
                if frame.frame_type != FrameType::Continuation || frame.stream_id != block.stream_id {
                    return Err(Error::Protocol(format!(
                        "{} frame inside the header block of stream {}",
                        frame.frame_type, block.stream_id
                    )));
                }
                self.discard_header_frame(frame, out)?;
                continue;
            }

            match frame.frame_type {
                FrameType::Settings => self.on_settings(&frame, out)?,
                FrameType::Ping => self.on_ping(&frame, now, out)?,
                FrameType::Goaway => self.on_goaway(&frame, now)?,
                FrameType::WindowUpdate if frame.is_connection_level() => {
                    let update = WindowUpdateFrame::parse(&frame)?;
                    self.send_window.increase(update.size_increment)?;
                }
                FrameType::PushPromise => {
                    let promise = PushPromiseFrame::parse(&frame)?;
                    warn!(
                        "{}: refusing pushed stream {}",
                        self.ctx.name(),
                        promise.promised_stream_id
                    );
                    self.discarded = Some(DiscardedBlock {
                        stream_id: frame.stream_id,
                        promised: Some(promise.promised_stream_id),
                        view: HeaderFrameView::new(),
                    });
                    self.discard_header_frame(frame, out)?;
                }
                _ if frame.is_connection_level() => {
                    return Err(Error::Protocol(format!(
                        "{} frame on stream 0",
                        frame.frame_type
                    )));
                }
                _ => self.dispatch(frame)?,
            }
        }
        Ok(())
    }

    /// Route a stream frame to its stream
    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        if frame.frame_type == FrameType::Data {
            self.recv_window.consume(frame.payload_len())?;
        }
        if let Some(stream) = self.streams.get_mut(&frame.stream_id) {
            stream.push_frame(frame);
            return Ok(());
        }

        debug!(
            "{}: dropping {} for unknown stream {}",
            self.ctx.name(),
            frame.frame_type,
            frame.stream_id
        );
        if frame.frame_type == FrameType::Headers {
            // The block still has to pass through the decoder
            self.discarded = Some(DiscardedBlock {
                stream_id: frame.stream_id,
                promised: None,
                view: HeaderFrameView::new(),
            });
            let mut out = Vec::new();
            self.discard_header_frame(frame, &mut out)?;
        }
        Ok(())
    }

    fn discard_header_frame(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Result<()> {
        let Some(mut block) = self.discarded.take() else {
            return Ok(());
        };
        block.view.add_frame(frame)?;
        if !block.view.is_complete() {
            self.discarded = Some(block);
            return Ok(());
        }

        let mut fields = Headers::new();
        self.codec.decode(&mut block.view, &mut fields)?;
        if let Some(promised) = block.promised {
            out.push(RstStreamFrame::new(promised, ErrorCode::RefusedStream).into_frame());
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: &Frame, out: &mut Vec<Frame>) -> Result<()> {
        let settings = SettingsFrame::parse(frame)?;
        match self.settings.on_frame(&settings)? {
            SettingsOutcome::Acked(changes) => {
                debug!("{}: SETTINGS acknowledged", self.ctx.name());
                for change in changes {
                    match change.param {
                        SettingsParameter::HeaderTableSize => {
                            self.codec.set_decoder_table_size(change.new as usize)
                        }
                        SettingsParameter::InitialWindowSize => {
                            for stream in self.streams.values_mut() {
                                stream.update_recv_window(change.new);
                            }
                        }
                        _ => {}
                    }
                }
            }
            SettingsOutcome::Remote { changes, ack } => {
                out.push(ack);
                for change in changes {
                    debug!(
                        "{}: peer {} {} -> {}",
                        self.ctx.name(),
                        change.param,
                        change.old,
                        change.new
                    );
                    match change.param {
                        SettingsParameter::HeaderTableSize => {
                            self.codec.set_encoder_table_size(change.new as usize)
                        }
                        SettingsParameter::InitialWindowSize => {
                            for stream in self.streams.values_mut() {
                                stream.update_send_window(change.new)?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame, now: Instant, out: &mut Vec<Frame>) -> Result<()> {
        let ping = PingFrame::parse(frame)?;
        if !ping.ack {
            out.push(PingFrame::ack(ping.data).into_frame());
            return Ok(());
        }

        match self.ping_sent {
            Some((_, data)) if data == ping.data => {
                self.ping_sent = None;
                self.next_ping = self.config.ping_frequency.map(|every| now + every);
                if let Some(latency) = self.shared.latency() {
                    debug!("{}: latency {:?}", self.ctx.name(), latency);
                    self.observer.on_latency(&self.ctx, latency);
                }
            }
            _ => debug!("{}: unexpected PING ACK", self.ctx.name()),
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let goaway = GoawayFrame::parse(frame)?;
        let debug_data = String::from_utf8_lossy(&goaway.debug_data).into_owned();
        info!(
            "{}: GOAWAY {} last stream {} {}",
            self.ctx.name(),
            goaway.error_code,
            goaway.last_stream_id,
            debug_data
        );
        self.shared.accepting.store(false, Ordering::Release);

        for (_, stream) in self.streams.range_mut(goaway.last_stream_id + 1..) {
            if !stream.state().is_closed() {
                stream.refuse();
            }
        }
        if goaway.error_code != ErrorCode::NoError {
            for stream in self.streams.values_mut() {
                if !stream.state().is_closed() {
                    stream.interrupt(Error::GoAway {
                        code: goaway.error_code,
                        last_stream_id: goaway.last_stream_id,
                        debug: debug_data.clone(),
                    });
                }
            }
        }
        self.resubmit_queued();

        let wait = self
            .shared
            .latency()
            .map_or(Duration::ZERO, |latency| latency * 4)
            .max(Duration::from_secs(1))
            .min(self.config.max_goaway_wait);
        let until = match self.state {
            ConnectionState::Draining { until } => until.min(now + wait),
            _ => now + wait,
        };
        self.state = ConnectionState::Draining { until };
        Ok(())
    }

    fn process_streams(&mut self, now: Instant, out: &mut Vec<Frame>) {
        let remote = self.settings.remote();
        let mut ctx = StreamContext {
            max_frame_size: remote.max_frame_size() as usize,
            max_header_list_size: remote.max_header_list_size(),
            chunk_size: self.config.upload_chunk_size,
            data_blocked: !self.blocked.is_empty(),
            now,
            codec: self.codec.as_mut(),
        };
        for stream in self.streams.values_mut() {
            stream.process(&mut ctx, out);
        }
    }

    /// Remove closed streams and hand their exchanges on
    fn reap_streams(&mut self) {
        let finished: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, stream)| stream.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(mut stream) = self.streams.remove(&id) {
                if let Some(view) = stream.take_open_header_block() {
                    self.discarded = Some(DiscardedBlock {
                        stream_id: id,
                        promised: None,
                        view,
                    });
                }
                self.finish_stream(stream);
            }
        }
    }

    fn finish_stream(&mut self, stream: H2Stream) {
        let id = stream.id();
        let (exchange, result) = stream.finish();
        match result {
            StreamResult::Response(parts) => {
                trace!("{}: stream {} complete", self.ctx.name(), id);
                let spawned = thread::Builder::new()
                    .name(format!("{}-finish-{}", self.ctx.name(), id))
                    .spawn(move || {
                        let response = parts.into_response();
                        exchange.finish(ExchangeState::Finished, Ok(response));
                    });
                if let Err(err) = spawned {
                    error!("{}: cannot finish stream {}: {}", self.ctx.name(), id, err);
                }
            }
            StreamResult::Failed(state, err) => {
                self.blocked.retain(|frame| frame.stream_id != id);
                exchange.finish(state, Err(err));
            }
            StreamResult::Interrupted(err) => {
                self.blocked.retain(|frame| frame.stream_id != id);
                self.resubmit_or_fail(exchange, err, false);
            }
            StreamResult::Refused => {
                self.blocked.retain(|frame| frame.stream_id != id);
                self.resubmit_or_fail(exchange, Error::Reset(ErrorCode::RefusedStream), true);
            }
        }
    }

    fn resubmit_or_fail(&self, mut exchange: Exchange, err: Error, free: bool) {
        if exchange.can_resubmit(free) {
            debug!(
                "{}: resubmitting exchange {} after {}",
                self.ctx.name(),
                exchange.id(),
                err
            );
            exchange.prepare_resubmit(free);
            self.observer.on_resubmit(exchange);
        } else {
            let state = failure_state(&err);
            exchange.finish(state, Err(err));
        }
    }

    fn resubmit_queued(&mut self) {
        for exchange in self.queued.drain(..) {
            self.observer.on_resubmit(exchange);
        }
    }

    /// Pings, settings ACK tracking and graceful shutdown
    fn housekeeping(&mut self, now: Instant, out: &mut Vec<Frame>) -> Result<()> {
        let idle = self.streams.is_empty() && self.queued.is_empty();
        match self.ping_sent {
            Some((sent_at, _)) if now >= sent_at + self.config.ping_timeout => {
                return Err(Error::PingTimeout);
            }
            Some(_) => {}
            None => {
                let ping_due = self.next_ping.map_or(false, |due| now >= due);
                if ping_due && idle && self.config.idle_timeout.is_some() {
                    // The idle timeout ends an idle connection anyway
                    self.next_ping = self.config.ping_frequency.map(|every| now + every);
                } else if ping_due {
                    let payload = self.shared.ping_payload(now);
                    trace!("{}: sending PING", self.ctx.name());
                    out.push(PingFrame::new(payload).into_frame());
                    self.ping_sent = Some((now, payload));
                    self.next_ping = None;
                }
            }
        }

        if self.settings.check_ack_timeout(now) {
            error!(
                "{}: SETTINGS not acknowledged within {:?}",
                self.ctx.name(),
                self.config.settings_ack_timeout
            );
        }

        if !idle {
            self.last_activity = now;
        }
        if self.state == ConnectionState::Active {
            let idle_expired = idle
                && self
                    .config
                    .idle_timeout
                    .map_or(false, |timeout| now >= self.last_activity + timeout);
            if idle_expired || self.shared.shutdown.load(Ordering::Acquire) {
                info!(
                    "{}: shutting down{}",
                    self.ctx.name(),
                    if idle_expired { " (idle)" } else { "" }
                );
                out.push(GoawayFrame::new(0, ErrorCode::NoError, Bytes::new()).into_frame());
                self.shared.accepting.store(false, Ordering::Release);
                self.state = ConnectionState::GracefulShutdown { since: now };
                self.resubmit_queued();
            }
        }
        Ok(())
    }

    /// Write collected frames in order. A DATA frame larger than the
    /// connection window waits, and so does every DATA frame behind it.
    fn write_frames(&mut self, frames: Vec<Frame>) -> Result<()> {
        let mut pending = std::mem::take(&mut self.blocked);
        pending.extend(frames);

        let mut data_blocked = false;
        let mut written = 0;
        for frame in pending {
            if frame.frame_type == FrameType::Data {
                let len = frame.payload_len();
                if data_blocked || !self.send_window.can_send(len) {
                    data_blocked = true;
                    self.blocked.push_back(frame);
                    continue;
                }
                self.send_window.consume(len);
            }
            trace!("{}: sending {}", self.ctx.name(), frame);
            FrameCodec::write_frame(&mut self.writer, &frame)?;
            written += 1;
        }

        if let Some(increment) = self.recv_window.take_update() {
            let update = WindowUpdateFrame::new(0, increment).into_frame();
            trace!("{}: sending {}", self.ctx.name(), update);
            FrameCodec::write_frame(&mut self.writer, &update)?;
            written += 1;
        }
        if written > 0 {
            self.writer.flush()?;
        }
        if data_blocked {
            debug!(
                "{}: {} DATA frames waiting for connection window of {}",
                self.ctx.name(),
                self.blocked.len(),
                self.send_window.size()
            );
        }
        Ok(())
    }

    fn should_close(&self, now: Instant) -> bool {
        let done = self.streams.is_empty() || self.read_closed;
        match self.state {
            ConnectionState::GracefulShutdown { since } => {
                done || now >= since + self.config.max_goaway_wait
            }
            ConnectionState::Draining { until } => done || now >= until,
            _ => false,
        }
    }

    fn next_wake(&self, now: Instant) -> Option<Instant> {
        let data_blocked = !self.blocked.is_empty();
        let can_admit = self.is_accepting() && self.streams.len() < self.concurrency_limit();
        if !self.incoming.is_empty()
            || (can_admit && !self.queued.is_empty())
            || self.streams.values().any(|stream| stream.has_work(data_blocked))
        {
            return Some(now);
        }

        let mut wake = match self.ping_sent {
            Some((sent_at, _)) => Some(sent_at + self.config.ping_timeout),
            None => self.next_ping,
        };
        wake = earliest(wake, self.settings.ack_deadline());
        if self.state == ConnectionState::Active && self.streams.is_empty() && self.queued.is_empty() {
            wake = earliest(
                wake,
                self.config.idle_timeout.map(|timeout| self.last_activity + timeout),
            );
        }
        for stream in self.streams.values() {
            wake = earliest(wake, stream.deadline());
        }
        match self.state {
            ConnectionState::GracefulShutdown { since } => {
                earliest(wake, Some(since + self.config.max_goaway_wait))
            }
            ConnectionState::Draining { until } => earliest(wake, Some(until)),
            _ => wake,
        }
    }

    /// Orderly close once shutdown completed or its wait ran out
    fn close(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        let streams = std::mem::take(&mut self.streams);
        if !streams.is_empty() {
            warn!(
                "{}: closing with {} streams still open",
                self.ctx.name(),
                streams.len()
            );
        }
        for (_, mut stream) in streams {
            if !stream.state().is_closed() {
                stream.interrupt(Error::ConnectionClosed);
            }
            self.finish_stream(stream);
        }
        self.resubmit_queued();

        if let Err(err) = self.writer.flush() {
            debug!("{}: flush on close failed: {}", self.ctx.name(), err);
        }
        if let Err(err) = self.writer.get_mut().close() {
            debug!("{}: transport close failed: {}", self.ctx.name(), err);
        }
        self.state = ConnectionState::Closed;
        info!("{}: closed", self.ctx.name());
        self.observer.on_event(&self.ctx, &ConnectionEvent::Closed);
    }

    /// Fatal error: fail or resend every exchange, close the transport and
    /// notify the owner. Runs at most once.
    fn teardown(&mut self, cause: Error) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        error!("{}: connection failed: {}", self.ctx.name(), cause);

        if !matches!(cause, Error::Io(_) | Error::ConnectionClosed) {
            let goaway = GoawayFrame::new(0, cause.code(), Bytes::from(cause.to_string()));
            let sent = FrameCodec::write_frame(&mut self.writer, &goaway.into_frame())
                .and_then(|_| self.writer.flush());
            if let Err(err) = sent {
                debug!("{}: cannot send GOAWAY: {}", self.ctx.name(), err);
            }
        }
        if let Err(err) = self.writer.get_mut().close() {
            debug!("{}: transport close failed: {}", self.ctx.name(), err);
        }

        let cause = Arc::new(cause);
        let streams = std::mem::take(&mut self.streams);
        for (_, mut stream) in streams {
            if !stream.state().is_closed() {
                stream.interrupt(Error::ConnectionFailed(cause.clone()));
            }
            self.finish_stream(stream);
        }
        self.blocked.clear();
        self.resubmit_queued();

        self.state = ConnectionState::Closed;
        self.observer
            .on_event(&self.ctx, &ConnectionEvent::ClosedWithError(cause));
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Terminal state for an exchange failed by `err`
fn failure_state(err: &Error) -> ExchangeState {
    match err {
        Error::PingTimeout => ExchangeState::ConnectionTimedOut,
        Error::ConnectionFailed(cause) => failure_state(cause),
        _ => ExchangeState::Error,
    }
}

fn run_reader<R: Read>(
    name: String,
    reader: R,
    codec: FrameCodec,
    events: SyncSender<DriverEvent>,
    shared: Arc<Shared>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        let frame = match codec.read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                if !shared.closed.load(Ordering::Acquire) {
                    debug!("{}: read failed: {}", name, err);
                }
                let _ = events.send(DriverEvent::ReadFailed(err));
                break;
            }
        };

        let received_at = Instant::now();
        match frame.frame_type {
            FrameType::Ping if frame.flags.is_ack() => {
                if let Ok(ping) = PingFrame::parse(&frame) {
                    if let Some(latency) = shared.record_rtt(ping.data, received_at) {
                        trace!("{}: RTT average {:?}", name, latency);
                    }
                }
            }
            FrameType::Goaway => shared.accepting.store(false, Ordering::Release),
            _ => {}
        }

        if events
            .send(DriverEvent::Frame { frame, received_at })
            .is_err()
        {
            break;
        }
    }
    trace!("{}: reader stopped", name);
}

fn run_driver<W: SessionWrite>(mut mux: Multiplexer<W>, events: Receiver<DriverEvent>) {
    let batch = mux.config.frame_queue_capacity.max(1);
    let mut wake = Some(Instant::now());
    loop {
        let first = match wake {
            Some(at) => match events.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    mux.shared.shutdown.store(true, Ordering::Release);
                    None
                }
            },
            None => match events.recv() {
                Ok(event) => Some(event),
                Err(_) => {
                    mux.shared.shutdown.store(true, Ordering::Release);
                    None
                }
            },
        };

        let result = first
            .into_iter()
            .chain(std::iter::from_fn(|| events.try_recv().ok()).take(batch))
            .try_for_each(|event| mux.handle_event(event))
            .and_then(|_| mux.tick(Instant::now()));
        match result {
            Ok(next) => wake = next,
            Err(err) => mux.teardown(err),
        }
        if mux.is_closed() {
            break;
        }
    }

    while let Ok(event) = events.try_recv() {
        if let DriverEvent::Submit(exchange) = event {
            mux.observer.on_resubmit(exchange);
        }
    }
    debug!("{}: driver stopped", mux.ctx.name());
}

/// Handle to a running HTTP/2 connection
#[derive(Debug)]
pub struct H2Connection {
    ctx: ConnectionContext,
    events: SyncSender<DriverEvent>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
}

impl H2Connection {
    /// Send the preface over `session` and start the reader and driver
    /// threads. `settings` are the values proposed in the first SETTINGS
    /// frame.
    pub fn start<S: SessionOps>(
        session: S,
        settings: SettingsRegistry,
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<H2Connection> {
        let ctx = ConnectionContext::new();
        let (reader, writer) = session.split()?;
        let (events, receiver) = mpsc::sync_channel(config.frame_queue_capacity.max(1));
        let shared = Arc::new(Shared::new(config.rtt_samples));
        let waker: Waker = {
            let events = events.clone();
            Arc::new(move || {
                let _ = events.try_send(DriverEvent::Wake);
            })
        };

        let read_limit = settings.max_frame_size().max(DEFAULT_MAX_FRAME_SIZE) as usize;
        let writer = BufWriter::with_capacity(config.write_buffer_size, writer);
        let mut mux = Multiplexer::new(
            ctx.clone(),
            config,
            settings,
            writer,
            shared.clone(),
            observer,
            waker,
        );
        mux.start(Instant::now())?;

        let reader = {
            let name = ctx.name().to_string();
            let events = events.clone();
            let shared = shared.clone();
            let codec = FrameCodec::with_max_frame_size(read_limit);
            thread::Builder::new()
                .name(format!("{}-reader", ctx.name()))
                .spawn(move || run_reader(name, reader, codec, events, shared))?
        };
        let driver = thread::Builder::new()
            .name(format!("{}-driver", ctx.name()))
            .spawn(move || run_driver(mux, receiver))?;

        Ok(H2Connection {
            ctx,
            events,
            shared,
            reader: Some(reader),
            driver: Some(driver),
        })
    }

    /// Identity of this connection
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Hand an exchange to the connection. The exchange comes back when the
    /// connection no longer takes new streams.
    pub fn submit(&self, exchange: Exchange) -> std::result::Result<(), Exchange> {
        if !self.is_open() {
            return Err(exchange);
        }
        match self.events.send(DriverEvent::Submit(exchange)) {
            Ok(()) => Ok(()),
            Err(mpsc::SendError(DriverEvent::Submit(exchange))) => Err(exchange),
            Err(mpsc::SendError(_)) => Ok(()),
        }
    }

    /// Whether new exchanges are accepted
    pub fn is_open(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire) && !self.is_closed()
    }

    /// Whether the connection has shut down
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Moving average of measured round-trip times
    pub fn latency(&self) -> Option<Duration> {
        self.shared.latency()
    }

    /// Ask for an orderly shutdown: GOAWAY is sent, open streams finish,
    /// then the transport closes.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.events.try_send(DriverEvent::Wake);
    }

    /// Shut down and wait for both threads to exit
    pub fn join(mut self) {
        self.shutdown();
        for handle in [self.driver.take(), self.reader.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("{}: connection thread panicked", self.ctx.name());
            }
        }
    }
}

impl Drop for H2Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
