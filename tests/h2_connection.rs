//! End-to-end client tests against a scripted server peer
//!
//! Each test runs the peer on its own thread and drives an [`H2Client`]
//! over loopback TCP.

mod common;

use bytes::Bytes;
use common::{init_logging, listen, Peer};
use h2plex::http::h2::frames::{DataFrame, PingFrame, RstStreamFrame};
use h2plex::http::h2::{
    ConnectionEvent, Error, ErrorCode, FrameType, H2ClientBuilder, SettingsParameter,
};
use h2plex::http::{ExchangeState, HttpRequest, Method, TunnelSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn quiet_builder() -> H2ClientBuilder {
    H2ClientBuilder::new()
        .ping_frequency(None)
        .idle_timeout(None)
}

fn get(addr: std::net::SocketAddr, path: &str) -> HttpRequest {
    HttpRequest::builder()
        .method(Method::Get)
        .uri(format!("http://{}{}", addr, path))
        .build()
        .unwrap()
}

#[test]
fn test_simple_get() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        let request = peer.read_request();
        assert_eq!(request.headers.get(":method"), Some("GET"));
        assert_eq!(request.headers.get(":path"), Some("/hello"));
        assert_eq!(request.headers.get(":scheme"), Some("http"));
        assert!(request.body.is_empty());
        peer.send_headers(request.stream_id, &[(":status", "200"), ("server", "peer")], false);
        peer.send(DataFrame::new(request.stream_id, Bytes::from_static(b"hi"), true).into_frame());
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    let response = client.send(get(addr, "/hello")).wait().unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("server"), Some("peer"));
    assert_eq!(response.body_string().unwrap(), "hi");

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_upload_pauses_until_window_update() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![(SettingsParameter::InitialWindowSize, 65535)]);
        let (stream_id, headers, end_stream) = peer.read_headers();
        assert!(!end_stream);
        assert_eq!(headers.get("content-length"), Some("300000"));

        let (sent, ended) = peer.collect_data(stream_id, 300_000, Duration::from_millis(300));
        assert_eq!(sent, 65535);
        assert!(!ended);

        peer.window_update(stream_id, 300_000 - 65535);
        peer.window_update(0, 300_000 - 65535);
        let (rest, ended) = peer.collect_data(stream_id, 300_000, Duration::from_secs(5));
        assert_eq!(sent + rest, 300_000);
        assert!(ended);

        peer.respond(stream_id, "200", b"stored");
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    let request = HttpRequest::builder()
        .method(Method::Post)
        .uri(format!("http://{}/upload", addr))
        .body(vec![7u8; 300_000])
        .build()
        .unwrap();
    let handle = client.send(request);
    let response = handle.wait().unwrap();
    assert_eq!(response.body_string().unwrap(), "stored");

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_goaway_resends_on_new_connection() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut first = Peer::accept(&listener);
        first.handshake(vec![]);
        let (stream_id, _, _) = first.read_headers();
        assert_eq!(stream_id, 1);
        first.goaway(0, ErrorCode::NoError);

        let mut second = Peer::accept(&listener);
        second.handshake(vec![]);
        let request = second.read_request();
        assert_eq!(request.headers.get(":path"), Some("/again"));
        second.respond(request.stream_id, "200", b"second");
        first.wait_closed();
        second.wait_closed();
    });

    let connected = Arc::new(AtomicUsize::new(0));
    let counter = connected.clone();
    let client = quiet_builder()
        .max_retries(0)
        .on_connection_event(move |_ctx, event| {
            if let ConnectionEvent::Connected = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .connect(addr)
        .unwrap();

    let response = client.send(get(addr, "/again")).wait().unwrap();
    assert_eq!(response.body_string().unwrap(), "second");
    assert_eq!(connected.load(Ordering::SeqCst), 2);

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_refused_stream_resent_while_frames_queue_up() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        let (stream_id, _, _) = peer.read_headers();
        peer.send(RstStreamFrame::new(stream_id, ErrorCode::RefusedStream).into_frame());
        // Keep the client's small frame queue full while it resubmits
        for i in 0..500u64 {
            peer.send(PingFrame::new(i.to_be_bytes()).into_frame());
        }
        let request = peer.read_request();
        assert!(request.stream_id > stream_id);
        assert_eq!(request.headers.get(":path"), Some("/refused"));
        peer.respond(request.stream_id, "200", b"accepted");
        peer.wait_closed();
    });

    let client = quiet_builder()
        .max_retries(0)
        .frame_queue_capacity(4)
        .connect(addr)
        .unwrap();
    let response = client.send(get(addr, "/refused")).wait().unwrap();
    assert_eq!(response.body_string().unwrap(), "accepted");

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_unanswered_ping_fails_all_streams() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        peer.read_request();
        peer.read_request();
        peer.wait_closed();
    });

    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let client = H2ClientBuilder::new()
        .idle_timeout(None)
        .ping_frequency(Some(Duration::from_millis(100)))
        .ping_timeout(Duration::from_millis(200))
        .max_retries(0)
        .on_connection_event(move |_ctx, event| {
            if let ConnectionEvent::ClosedWithError(err) = event {
                seen.lock().unwrap().push(err.clone());
            }
        })
        .connect(addr)
        .unwrap();

    let first = client.send(get(addr, "/one"));
    let second = client.send(get(addr, "/two"));
    let first = first.completion();
    let second = second.completion();

    assert_eq!(first.state, ExchangeState::ConnectionTimedOut);
    assert_eq!(second.state, ExchangeState::ConnectionTimedOut);
    let (a, b) = match (first.result, second.result) {
        (Err(Error::ConnectionFailed(a)), Err(Error::ConnectionFailed(b))) => (a, b),
        other => panic!("unexpected results: {:?}", other),
    };
    assert!(Arc::ptr_eq(&a, &b));
    assert!(matches!(*a, Error::PingTimeout));

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(Arc::ptr_eq(&failures[0], &a));

    drop(client);
    server.join().unwrap();
}

#[test]
fn test_concurrent_streams_respect_peer_limit() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![(SettingsParameter::MaxConcurrentStreams, 1)]);
        let warmup = peer.read_request();
        peer.respond(warmup.stream_id, "200", b"");

        for expected in [3u32, 5, 7] {
            let request = peer.read_request();
            assert_eq!(request.stream_id, expected);
            let early = peer.drain_for(Duration::from_millis(100));
            assert!(early.iter().all(|f| f.frame_type != FrameType::Headers));
            let path = request.headers.get(":path").unwrap_or("").to_string();
            peer.respond(request.stream_id, "200", path.as_bytes());
        }
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    client.send(get(addr, "/warmup")).wait().unwrap();

    let handles: Vec<_> = ["/a", "/b", "/c"]
        .iter()
        .map(|path| (path.to_string(), client.send(get(addr, path))))
        .collect();
    for (path, handle) in handles {
        let response = handle.wait().unwrap();
        assert_eq!(response.body_string().unwrap(), path);
    }

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_many_streams_answered_out_of_order() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        let mut requests: Vec<_> = (0..10).map(|_| peer.read_request()).collect();
        requests.reverse();
        for request in requests {
            let path = request.headers.get(":path").unwrap_or("").to_string();
            peer.respond(request.stream_id, "200", path.as_bytes());
        }
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let path = format!("/item/{}", i);
            (path.clone(), client.send(get(addr, &path)))
        })
        .collect();
    for (path, handle) in handles {
        assert_eq!(handle.wait().unwrap().body_string().unwrap(), path);
    }

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_cancel_sends_rst_stream() {
    init_logging();
    let (listener, addr) = listen();
    let (cancelled_tx, cancelled_rx) = mpsc::channel();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        let (stream_id, _, _) = peer.read_headers();
        cancelled_tx.send(()).unwrap();
        let rst = peer.expect(|f| f.frame_type == FrameType::RstStream);
        let rst = RstStreamFrame::parse(&rst).unwrap();
        assert_eq!(rst.stream_id, stream_id);
        assert_eq!(rst.error_code, ErrorCode::Cancel);
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    let handle = client.send(get(addr, "/slow"));
    cancelled_rx.recv().unwrap();
    handle.cancel();
    let completion = handle.completion();
    assert_eq!(completion.state, ExchangeState::Aborted);
    assert!(matches!(completion.result, Err(Error::Aborted)));

    client.shutdown();
    server.join().unwrap();
}

#[test]
fn test_latency_measured_from_ping() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        peer.answer_ping();
        peer.wait_closed();
    });

    let client = H2ClientBuilder::new()
        .idle_timeout(None)
        .ping_frequency(Some(Duration::from_millis(50)))
        .connect(addr)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.latency().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(client.latency().is_some());

    client.shutdown();
    server.join().unwrap();
}

struct Collect(mpsc::Sender<Bytes>);

impl TunnelSink for Collect {
    fn on_data(&mut self, data: Bytes) {
        let _ = self.0.send(data);
    }

    fn on_close(&mut self, _error: Option<&Error>) {}
}

#[test]
fn test_connect_tunnel_carries_bytes_both_ways() {
    init_logging();
    let (listener, addr) = listen();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.handshake(vec![]);
        let (stream_id, headers, end_stream) = peer.read_headers();
        assert!(!end_stream);
        assert_eq!(headers.get(":method"), Some("CONNECT"));
        assert!(!headers.contains(":path"));
        peer.send_headers(stream_id, &[(":status", "200")], false);

        let data = peer.expect(|f| f.frame_type == FrameType::Data);
        assert_eq!(&DataFrame::parse(&data).unwrap().data[..], b"ping");
        peer.send(DataFrame::new(stream_id, Bytes::from_static(b"pong"), false).into_frame());

        let end = peer.expect(|f| f.frame_type == FrameType::Data && f.flags.is_end_stream());
        assert_eq!(end.stream_id, stream_id);
        peer.send(DataFrame::new(stream_id, Bytes::new(), true).into_frame());
        peer.wait_closed();
    });

    let client = quiet_builder().connect(addr).unwrap();
    let request = HttpRequest::builder()
        .method(Method::Connect)
        .uri("https://upstream.example:443")
        .build()
        .unwrap();
    let (received_tx, received_rx) = mpsc::channel();
    let (handle, writer) = client.tunnel(request, Collect(received_tx));

    writer.send(&b"ping"[..]).unwrap();
    let reply = received_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(&reply[..], b"pong");
    writer.close();

    let completion = handle.completion();
    assert_eq!(completion.state, ExchangeState::Finished);
    assert_eq!(completion.result.unwrap().status().code(), 200);

    client.shutdown();
    server.join().unwrap();
}
