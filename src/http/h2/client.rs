//! HTTP/2 client
//!
//! [`H2Client`] owns at most one live [`H2Connection`] and is its
//! [`ConnectionObserver`]: exchanges a connection hands back (refused by
//! GOAWAY, submitted during shutdown, interrupted with retries left) are
//! dispatched again, opening a fresh connection when the old one stopped
//! accepting. Handed-back exchanges are queued to a client-owned resubmit
//! thread; a connection's driver never submits or connects itself.

use super::connection::{
    ConnectionConfig, ConnectionContext, ConnectionEvent, ConnectionObserver, H2Connection,
};
use super::error::{Error, Result};
use super::settings::{SettingsBuilder, SettingsRegistry};
use crate::http::{
    Exchange, ExchangeHandle, ExchangeState, HttpRequest, SessionOps, TcpSession, TunnelSink,
    TunnelWriter,
};
use log::{debug, info, warn};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

/// Listener for transport events of every connection a client opens
pub type EventListener = Arc<dyn Fn(&ConnectionContext, &ConnectionEvent) + Send + Sync>;

/// Opens transports for a client
pub trait Connector: Send + Sync + 'static {
    /// Session type produced
    type Session: SessionOps;

    /// Establish a new session
    fn connect(&self, timeout: Duration) -> Result<Self::Session>;
}

/// Plain TCP connector (prior-knowledge h2c)
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addrs: Vec<SocketAddr>,
}

impl TcpConnector {
    /// Resolve `addr` once; every connection attempt tries these addresses
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(Error::Internal("address resolved to nothing".to_string()));
        }
        Ok(TcpConnector { addrs })
    }
}

impl Connector for TcpConnector {
    type Session = TcpSession;

    fn connect(&self, timeout: Duration) -> Result<TcpSession> {
        Ok(TcpSession::connect(&self.addrs[..], timeout)?)
    }
}

/// HTTP/2 client builder
///
/// Starts from push disabled and 128 concurrent streams; every other
/// SETTINGS value starts at its RFC 7540 default.
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
    config: ConnectionConfig,
    listener: Option<EventListener>,
}

impl H2ClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: SettingsBuilder::new()
                .enable_push(false)
                .max_concurrent_streams(128),
            config: ConnectionConfig::default(),
            listener: None,
        }
    }

    /// SETTINGS_HEADER_TABLE_SIZE we propose
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// SETTINGS_MAX_CONCURRENT_STREAMS we propose
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE we propose (per-stream receive window)
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// SETTINGS_MAX_FRAME_SIZE we propose
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// SETTINGS_MAX_HEADER_LIST_SIZE we propose
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_header_list_size(size);
        self
    }

    /// Connection-level receive window
    pub fn connection_window_size(mut self, size: u32) -> Self {
        self.config.initial_connection_window = size;
        self
    }

    /// Fraction of a receive window at which it is topped up
    pub fn window_update_threshold(mut self, fraction: f64) -> Self {
        self.config.window_update_threshold = fraction;
        self
    }

    /// Largest DATA payload sent per frame
    pub fn upload_chunk_size(mut self, size: usize) -> Self {
        self.config.upload_chunk_size = size.max(1);
        self
    }

    /// PING cadence; `None` disables latency probing
    pub fn ping_frequency(mut self, every: Option<Duration>) -> Self {
        self.config.ping_frequency = every;
        self
    }

    /// How long a PING may stay unanswered before the connection fails
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Close connections idle for this long; `None` keeps them open
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Longest drain after a GOAWAY
    pub fn max_goaway_wait(mut self, wait: Duration) -> Self {
        self.config.max_goaway_wait = wait;
        self
    }

    /// How long our SETTINGS may stay unacknowledged before it is logged
    pub fn settings_ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.settings_ack_timeout = timeout;
        self
    }

    /// TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Resends allowed when a request does not set its own limit
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.default_max_retries = retries;
        self
    }

    /// Capacity of each connection's reader-to-driver queue
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Receive transport events of every connection
    pub fn on_connection_event<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ConnectionContext, &ConnectionEvent) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Connect over plain TCP
    pub fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<H2Client<TcpConnector>> {
        let connector = TcpConnector::new(addr)?;
        self.connect_with(connector)
    }

    /// Connect through `connector`. The first connection is opened right
    /// away so that an unreachable peer fails here.
    pub fn connect_with<C: Connector>(self, connector: C) -> Result<H2Client<C>> {
        let settings = self.settings.build()?;
        let config = self.config;
        let listener = self.listener;
        let (resubmits, queued) = mpsc::channel();
        let inner = Arc::new(ClientInner {
            connector,
            settings,
            config,
            observer: Arc::new(ClientObserver {
                resubmits: Mutex::new(resubmits),
                listener: listener.clone(),
            }),
            listener,
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let client = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("h2-resubmit".to_string())
            .spawn(move || run_resubmitter(client, queued))?;
        inner.connection()?;
        Ok(H2Client { inner })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP/2 client
pub struct H2Client<C: Connector = TcpConnector> {
    inner: Arc<ClientInner<C>>,
}

impl H2Client<TcpConnector> {
    /// Connect with default settings
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        H2ClientBuilder::new().connect(addr)
    }
}

impl<C: Connector> H2Client<C> {
    /// Builder with default settings
    pub fn builder() -> H2ClientBuilder {
        H2ClientBuilder::new()
    }

    /// Send a request. The handle reports progress and the outcome.
    pub fn send(&self, request: HttpRequest) -> ExchangeHandle {
        let (mut exchange, handle) = Exchange::new(request);
        exchange.set_default_max_retries(self.inner.config.default_max_retries);
        self.inner.dispatch(exchange);
        handle
    }

    /// Open a tunnel (CONNECT, or extended CONNECT when the request
    /// carries a protocol). Bytes from the peer go to `sink`.
    pub fn tunnel(
        &self,
        request: HttpRequest,
        sink: impl TunnelSink + 'static,
    ) -> (ExchangeHandle, TunnelWriter) {
        let (mut exchange, handle, writer) = Exchange::tunnel(request, sink);
        exchange.set_default_max_retries(self.inner.config.default_max_retries);
        self.inner.dispatch(exchange);
        (handle, writer)
    }

    /// Round-trip time of the current connection
    pub fn latency(&self) -> Option<Duration> {
        self.inner.current().and_then(|conn| conn.latency())
    }

    /// Identity of the current connection
    pub fn connection_context(&self) -> Option<ConnectionContext> {
        self.inner.current().map(|conn| conn.context().clone())
    }

    /// Stop opening connections and shut the current one down gracefully
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let conn = self
            .inner
            .connection
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(conn) = conn {
            info!("{}: client shutdown", conn.context().name());
            conn.shutdown();
        }
    }
}

struct ClientInner<C: Connector> {
    connector: C,
    settings: SettingsRegistry,
    config: ConnectionConfig,
    observer: Arc<ClientObserver>,
    listener: Option<EventListener>,
    connection: Mutex<Option<Arc<H2Connection>>>,
    closed: AtomicBool,
}

impl<C: Connector> ClientInner<C> {
    fn current(&self) -> Option<Arc<H2Connection>> {
        self.connection.lock().ok().and_then(|slot| slot.clone())
    }

    /// The open connection, opening a new one if needed
    fn connection(&self) -> Result<Arc<H2Connection>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| Error::Internal("connection slot poisoned".to_string()))?;
        if let Some(conn) = slot.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
        }

        let conn = Arc::new(self.open()?);
        if let Some(old) = slot.replace(conn.clone()) {
            debug!(
                "{}: replaced by {}",
                old.context().name(),
                conn.context().name()
            );
        }
        Ok(conn)
    }

    fn open(&self) -> Result<H2Connection> {
        let observer: Arc<dyn ConnectionObserver> = self.observer.clone();
        let started = self
            .connector
            .connect(self.config.connect_timeout)
            .and_then(|session| {
                H2Connection::start(session, self.settings.clone(), self.config.clone(), observer)
            });
        match started {
            Ok(conn) => {
                info!("{}: connected", conn.context().name());
                Ok(conn)
            }
            Err(err) => {
                let err = Arc::new(err);
                warn!("connection attempt failed: {}", err);
                if let Some(listener) = &self.listener {
                    listener(
                        &ConnectionContext::new(),
                        &ConnectionEvent::FailedToConnect(err.clone()),
                    );
                }
                Err(Error::ConnectionFailed(err))
            }
        }
    }

    /// Hand `exchange` to an open connection or fail it
    fn dispatch(&self, mut exchange: Exchange) {
        // A connection may close between the check and the submit; one
        // fresh connection is tried before giving up.
        for _ in 0..2 {
            let conn = match self.connection() {
                Ok(conn) => conn,
                Err(err) => {
                    exchange.finish(ExchangeState::Error, Err(err));
                    return;
                }
            };
            match conn.submit(exchange) {
                Ok(()) => return,
                Err(returned) => exchange = returned,
            }
        }
        exchange.finish(ExchangeState::Error, Err(Error::ConnectionClosed));
    }
}

struct ClientObserver {
    /// Feeds the resubmit thread; sending never blocks
    resubmits: Mutex<Sender<Exchange>>,
    listener: Option<EventListener>,
}

impl ConnectionObserver for ClientObserver {
    fn on_event(&self, ctx: &ConnectionContext, event: &ConnectionEvent) {
        if let Some(listener) = &self.listener {
            listener(ctx, event);
        }
    }

    fn on_resubmit(&self, exchange: Exchange) {
        let queued = match self.resubmits.lock() {
            Ok(resubmits) => resubmits.send(exchange).map_err(|mpsc::SendError(e)| e),
            Err(_) => Err(exchange),
        };
        if let Err(exchange) = queued {
            exchange.finish(ExchangeState::Error, Err(Error::ConnectionClosed));
        }
    }
}

/// Dispatch handed-back exchanges until every connection and the client
/// are gone. Submitting may block on a full driver queue and dispatching
/// may open a connection, so this runs apart from every driver.
fn run_resubmitter<C: Connector>(client: Weak<ClientInner<C>>, queued: Receiver<Exchange>) {
    while let Ok(exchange) = queued.recv() {
        match client.upgrade() {
            Some(client) => {
                debug!("resubmitting exchange {}", exchange.id());
                client.dispatch(exchange);
            }
            None => exchange.finish(ExchangeState::Error, Err(Error::ConnectionClosed)),
        }
    }
    debug!("resubmit thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn unused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = H2ClientBuilder::new()
            .max_frame_size(1000)
            .connect(unused_addr());
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_refused_connection_is_reported() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = failures.clone();
        let result = H2ClientBuilder::new()
            .connect_timeout(Duration::from_millis(500))
            .on_connection_event(move |_ctx, event| {
                if let ConnectionEvent::FailedToConnect(err) = event {
                    seen.lock().unwrap().push(err.to_string());
                }
            })
            .connect(unused_addr());

        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
        assert_eq!(failures.lock().unwrap().len(), 1);
    }

    fn request() -> HttpRequest {
        HttpRequest::builder()
            .uri("http://localhost/")
            .build()
            .unwrap()
    }

    #[test]
    fn test_resubmit_is_queued_not_dispatched() {
        let (resubmits, queued) = mpsc::channel();
        let observer = ClientObserver {
            resubmits: Mutex::new(resubmits),
            listener: None,
        };

        let (exchange, _handle) = Exchange::new(request());
        let id = exchange.id();
        observer.on_resubmit(exchange);
        assert_eq!(queued.try_recv().unwrap().id(), id);

        drop(queued);
        let (exchange, handle) = Exchange::new(request());
        observer.on_resubmit(exchange);
        let completion = handle.completion();
        assert_eq!(completion.state, ExchangeState::Error);
        assert!(matches!(completion.result, Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_resubmitter_fails_exchanges_once_client_is_gone() {
        let (resubmits, queued) = mpsc::channel();
        let worker = thread::spawn(move || {
            run_resubmitter::<TcpConnector>(Weak::new(), queued);
        });

        let (exchange, handle) = Exchange::new(request());
        resubmits.send(exchange).unwrap();
        drop(resubmits);
        worker.join().unwrap();

        assert!(matches!(handle.completion().result, Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_tcp_connector_resolves() {
        let connector = TcpConnector::new("127.0.0.1:443").unwrap();
        assert_eq!(connector.addrs.len(), 1);
        assert_eq!(connector.addrs[0].port(), 443);
    }
}
