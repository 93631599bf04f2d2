//! HTTP/2 integration tests
//!
//! Cross-module checks of the framing layer: wire encoding, header blocks
//! split over CONTINUATION frames, reassembly views and flow control.

use bytes::{Buf, Bytes};
use h2plex::http::h2::codec::FRAME_HEADER_SIZE;
use h2plex::http::h2::flow_control::{FlowControlWindow, RecvWindow};
use h2plex::http::h2::frames::*;
use h2plex::http::h2::settings::{SettingsManager, SettingsOutcome};
use h2plex::http::h2::*;
use h2plex::http::Headers;
use std::io::{Cursor, Read};
use std::time::{Duration, Instant};

#[test]
fn test_settings_frame_carries_changed_values_only() {
    let mut settings = SettingsBuilder::new()
        .enable_push(false)
        .max_concurrent_streams(100)
        .initial_window_size(1 << 20)
        .build()
        .unwrap();

    let frame = settings.build_frame();
    let encoded = FrameCodec::encode_frame(&frame);

    assert_eq!(encoded[3], FrameType::Settings.as_u8());
    assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
    assert_eq!(encoded[4], 0);
    let length = u32::from_be_bytes([0, encoded[0], encoded[1], encoded[2]]);
    assert_eq!(length, 18);

    let parsed = SettingsFrame::parse(&frame).unwrap();
    assert!(parsed.settings.contains(&(SettingsParameter::EnablePush, 0)));
    assert!(parsed
        .settings
        .contains(&(SettingsParameter::InitialWindowSize, 1 << 20)));

    // Nothing changed since
    assert!(SettingsFrame::parse(&settings.build_frame())
        .unwrap()
        .settings
        .is_empty());
}

#[test]
fn test_settings_exchange() {
    let initiated = SettingsBuilder::new()
        .header_table_size(8192)
        .build()
        .unwrap();
    let mut manager = SettingsManager::new(initiated, Duration::from_secs(1));
    let now = Instant::now();

    assert!(manager.pending_frame(now, true).is_some());
    assert!(manager.awaiting_ack());
    assert_eq!(manager.my().header_table_size(), 4096);

    let peer = SettingsFrame::new(vec![(SettingsParameter::MaxConcurrentStreams, 10)]);
    match manager.on_frame(&peer).unwrap() {
        SettingsOutcome::Remote { changes, ack } => {
            assert_eq!(changes.len(), 1);
            assert!(ack.flags.is_ack());
        }
        other => panic!("expected remote settings, got {:?}", other),
    }
    assert_eq!(manager.remote().max_concurrent_streams(), 10);

    match manager.on_frame(&SettingsFrame::ack()).unwrap() {
        SettingsOutcome::Acked(changes) => {
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].old, 4096);
            assert_eq!(changes[0].new, 8192);
        }
        other => panic!("expected ack, got {:?}", other),
    }
    assert_eq!(manager.my().header_table_size(), 8192);
    assert!(!manager.awaiting_ack());
}

#[test]
fn test_frames_through_a_byte_stream() {
    let mut wire = Vec::new();
    FrameCodec::write_frame(&mut wire, &PingFrame::new(*b"abcdefgh").into_frame()).unwrap();
    // Unknown frame type 0xfa with a 3-byte payload
    wire.extend_from_slice(&[0, 0, 3, 0xfa, 0, 0, 0, 0, 1, 1, 2, 3]);
    FrameCodec::write_frame(&mut wire, &WindowUpdateFrame::new(3, 2048).into_frame()).unwrap();

    let codec = FrameCodec::new();
    let mut cursor = Cursor::new(wire);

    let ping = codec.read_frame(&mut cursor).unwrap().unwrap();
    assert_eq!(PingFrame::parse(&ping).unwrap().data, *b"abcdefgh");

    assert!(codec.read_frame(&mut cursor).unwrap().is_none());

    let update = codec.read_frame(&mut cursor).unwrap().unwrap();
    let update = WindowUpdateFrame::parse(&update).unwrap();
    assert_eq!(update.stream_id, 3);
    assert_eq!(update.size_increment, 2048);

    assert!(matches!(
        codec.read_frame(&mut cursor),
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn test_oversized_frame_rejected() {
    let frame = DataFrame::new(1, Bytes::from(vec![0u8; 20_000]), false).into_frame();
    let wire = FrameCodec::encode_frame(&frame);
    assert_eq!(wire.len(), FRAME_HEADER_SIZE + 20_000);

    let codec = FrameCodec::new();
    let result = codec.read_frame(&mut Cursor::new(wire));
    assert!(matches!(result, Err(Error::FrameSize(_))));
}

#[test]
fn test_header_block_split_and_reassembled() {
    let mut encoder = HpackCodec::new();
    let mut decoder = HpackCodec::new();
    let mut headers = Headers::new();
    headers.insert(":status", "200");
    for i in 0..20 {
        headers.insert(format!("x-header-{}", i), "v".repeat(20));
    }

    let mut frames = Vec::new();
    encoder.encode(&headers, 5, 64, true, &mut frames).unwrap();
    assert!(frames.len() > 2);
    assert_eq!(frames[0].frame_type, FrameType::Headers);
    assert!(frames[0].flags.is_end_stream());
    assert!(frames[1..]
        .iter()
        .all(|f| f.frame_type == FrameType::Continuation));
    assert!(frames.last().unwrap().flags.is_end_headers());

    let mut view = HeaderFrameView::new();
    for frame in frames {
        assert!(!view.is_complete());
        view.add_frame(frame).unwrap();
    }
    assert!(view.is_complete());

    let mut decoded = Headers::new();
    decoder.decode(&mut view, &mut decoded).unwrap();
    assert_eq!(decoded.get(":status"), Some("200"));
    assert_eq!(decoded.get("x-header-19"), Some("v".repeat(20).as_str()));
    assert_eq!(decoded.len(), 21);
}

#[test]
fn test_data_view_reads_across_frames() {
    let mut view = DataFrameView::new();
    view.add_frame(DataFrame::new(1, Bytes::from_static(b"Hello, "), false).into_frame())
        .unwrap();
    view.add_frame(DataFrame::new(1, Bytes::from_static(b"HTTP/2"), false).into_frame())
        .unwrap();
    view.add_frame(
        DataFrame::new(1, Bytes::from_static(b"!"), true)
            .with_padding(4)
            .into_frame(),
    )
    .unwrap();
    assert!(view.is_complete());
    assert_eq!(view.len(), 14);

    let mut prefix = [0u8; 5];
    view.read_exact(&mut prefix).unwrap();
    assert_eq!(&prefix, b"Hello");
    assert_eq!(view.remaining(), 9);

    let mut rest = String::new();
    view.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, ", HTTP/2!");
}

#[test]
fn test_send_window_goes_negative_and_recovers() {
    let mut window = FlowControlWindow::with_initial_size(65535);
    window.consume(60_000);
    window.update_initial_size(16_384).unwrap();
    assert_eq!(window.size(), 16_384 - 60_000);
    assert!(!window.can_send(1));

    window.increase(50_000).unwrap();
    assert_eq!(window.size(), 6_384);
    assert!(window.can_send(6_384));
    assert!(!window.can_send(6_385));
}

#[test]
fn test_window_overflow_is_flow_control_error() {
    let mut window = FlowControlWindow::with_initial_size(0x7FFF_FFFF);
    assert!(matches!(window.increase(1), Err(Error::FlowControl(_))));
    assert!(matches!(window.increase(0), Err(Error::Protocol(_))));
}

#[test]
fn test_recv_window_tops_up_at_threshold() {
    let mut window = RecvWindow::new(100_000, 0.5);
    window.consume(40_000).unwrap();
    assert_eq!(window.take_update(), None);

    window.consume(20_000).unwrap();
    assert_eq!(window.take_update(), Some(60_000));
    assert_eq!(window.available(), 100_000);

    assert!(matches!(window.consume(100_001), Err(Error::FlowControl(_))));
}
