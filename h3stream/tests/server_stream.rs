// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use bytes::Bytes;
use h3stream::{
    details, ByteCounter, CloseSource, Error, HeadersWithUnderscoresAction, ResetCategory,
    ResetDirection, ResetReason, ServerStream, StatsCell, StreamConfig, StreamFrame, StreamState,
    BAD_APPLICATION_PAYLOAD, H3_EXCESSIVE_LOAD, H3_FRAME_ERROR, H3_MESSAGE_ERROR,
    H3_REQUEST_CANCELLED, MIN_RECEIVE_WINDOW,
};
use h3stream_common::{Header, HeaderList, SliceBuffer};
use test_fixture::{
    default_config, new_fixture, request_headers, request_headers_with, response_headers,
    trailers, Event, Fixture, Recorder, DEFAULT_STREAM_ID as ID,
};

fn strict_stream_config() -> StreamConfig {
    default_config().override_stream_error_on_invalid_http_message(true)
}

fn body(data: &[u8]) -> SliceBuffer {
    SliceBuffer::from(data)
}

fn frame(offset: u64, data: &'static [u8], fin: bool) -> StreamFrame {
    StreamFrame::new(offset, data, fin)
}

/// Receive request headers without FIN.
fn open_request(f: &mut Fixture) {
    f.stream
        .on_initial_headers(&mut f.conn, &request_headers("POST", "/upload"), false, 40);
    assert!(matches!(
        f.recorder.events().as_slice(),
        [Event::Headers {
            end_stream: false,
            ..
        }]
    ));
}

fn local_reset(code: u64, details: &str) -> Event {
    Event::Reset {
        reason: ResetReason::local(code),
        details: details.to_owned(),
    }
}

#[test]
fn receive_window_must_exceed_floor() {
    let res = ServerStream::new(
        ID,
        StreamConfig::default().receive_window(MIN_RECEIVE_WINDOW),
        StatsCell::default(),
        Box::new(Recorder::default()),
        None,
    );
    assert_eq!(res.err(), Some(Error::ReceiveWindowTooSmall(MIN_RECEIVE_WINDOW)));
}

#[test]
fn request_and_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"hello", true));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(
        f.recorder.events()[1],
        Event::Data {
            data: Bytes::from_static(b"hello"),
            end_stream: true
        }
    );
    assert_eq!(f.stream.state(), StreamState::HalfClosedRemote);
    assert!(f.stream.end_stream_decoded());

    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.encode_data(&mut f.conn, &mut body(b"world"), true);
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert!(f.stream.local_end_stream());
    assert_eq!(&f.conn.sent(ID).body[..], b"world");
    assert!(f.conn.sent(ID).fin_buffered);
    assert_eq!(f.account.cleared(), 1);
    assert!(f.recorder.resets().is_empty());

    let meter = f.stream.bytes_meter();
    assert_eq!(meter[ByteCounter::HeaderReceived], 40);
    assert_eq!(meter[ByteCounter::ContentReceived], 5);
    assert_eq!(meter[ByteCounter::WireReceived], 5);
    assert_eq!(meter[ByteCounter::HeaderSent], 26);
    assert_eq!(meter[ByteCounter::ContentSent], 5);
    assert_eq!(meter[ByteCounter::WireSent], 31);
}

#[test]
fn empty_header_block_resets_stream() {
    let mut f = new_fixture(strict_stream_config());
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.stream
        .on_initial_headers(&mut f.conn, &HeaderList::new(Vec::new()), true, 2);
    assert_eq!(
        f.recorder.events(),
        vec![local_reset(H3_MESSAGE_ERROR, details::INVALID_HTTP_HEADER)]
    );
    assert_eq!(f.conn.sent(ID).reset, Some(H3_MESSAGE_ERROR));
    assert_eq!(f.stream.details(), details::INVALID_HTTP_HEADER);
    assert_eq!(f.stats.borrow().tx_reset, 1);
    assert!(f.conn.closed.is_none());
}

#[test]
fn empty_header_block_closes_connection_by_default() {
    let mut f = new_fixture(default_config());
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.stream
        .on_initial_headers(&mut f.conn, &HeaderList::new(Vec::new()), true, 2);
    assert_eq!(
        f.conn.closed,
        Some((H3_FRAME_ERROR, details::INVALID_HTTP_HEADER.to_owned()))
    );
    assert!(f.recorder.events().is_empty());
    assert_eq!(f.conn.sent(ID).reset, None);
}

#[test]
fn incomplete_header_block() {
    let mut f = new_fixture(strict_stream_config());
    let list = HeaderList::incomplete(vec![Header::new(":method", "GET")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 10);
    assert_eq!(
        f.recorder.events(),
        vec![local_reset(H3_MESSAGE_ERROR, details::INVALID_HTTP_HEADER)]
    );
}

#[test]
fn partial_body_write_resets_stream() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.recorder.take();
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.conn.accept_limit = Some(60);

    let mut data = body(&[0; 50]);
    data.add(vec![1_u8; 50]);
    f.stream.encode_data(&mut f.conn, &mut data, true);

    assert!(data.is_empty());
    assert_eq!(f.conn.sent(ID).body.len(), 60);
    assert_eq!(f.conn.sent(ID).reset, Some(BAD_APPLICATION_PAYLOAD));
    assert!(!f.stream.local_end_stream());
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert_eq!(
        f.recorder.resets(),
        vec![ResetReason::new(
            ResetDirection::Local,
            ResetCategory::ProtocolError
        )]
    );

    // Nothing is retried or accepted afterwards.
    f.conn.accept_limit = None;
    f.stream.encode_data(&mut f.conn, &mut body(&[2; 40]), true);
    assert_eq!(f.conn.sent(ID).body_writes, 1);
    assert_eq!(f.conn.sent(ID).body.len(), 60);
}

#[test]
fn reset_after_early_response_only_stops_reading() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.recorder.take();
    f.stream.encode_headers(&mut f.conn, &response_headers(403), true);
    assert_eq!(f.stream.state(), StreamState::HalfClosedLocal);

    f.stream.reset_stream(&mut f.conn, ResetCategory::RefusedStream);
    assert_eq!(
        f.recorder.events(),
        vec![Event::Reset {
            reason: ResetReason::new(ResetDirection::Local, ResetCategory::Reset),
            details: String::new(),
        }]
    );
    let sent = f.conn.sent(ID);
    assert_eq!(sent.reset, None);
    assert_eq!(sent.reset_send, None);
    assert!(sent.stop_reading);
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert_eq!(f.stats.borrow().tx_reset, 0);
}

#[test]
fn local_reset_notifies_then_resets() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.recorder.take();
    f.stream.reset_stream(&mut f.conn, ResetCategory::Overload);
    assert_eq!(f.recorder.events(), vec![local_reset(H3_EXCESSIVE_LOAD, "")]);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_EXCESSIVE_LOAD));
    assert_eq!(f.account.cleared(), 1);

    // No response bytes after a reset.
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    assert!(f.conn.sent(ID).headers.is_empty());
}

#[test]
fn stop_sending_after_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    f.stream.on_stop_sending(&mut f.conn, H3_REQUEST_CANCELLED);

    let sent = f.conn.sent(ID);
    assert_eq!(sent.reset_send, Some(H3_REQUEST_CANCELLED));
    assert!(sent.stop_reading);
    assert!(f.recorder.resets().is_empty());
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert_eq!(f.stats.borrow().rx_reset, 1);
}

#[test]
fn stop_sending_mid_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.on_stop_sending(&mut f.conn, H3_REQUEST_CANCELLED);
    assert_eq!(
        f.recorder.resets(),
        vec![ResetReason::remote(H3_REQUEST_CANCELLED)]
    );
    assert!(f.conn.sent(ID).stop_reading);
}

#[test]
fn reset_notified_once() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.reset_stream(&mut f.conn, ResetCategory::Reset);
    f.stream.on_stop_sending(&mut f.conn, H3_REQUEST_CANCELLED);
    f.stream.on_stream_reset(&mut f.conn, H3_REQUEST_CANCELLED);
    f.stream
        .on_connection_closed(&mut f.conn, 0, CloseSource::Peer);
    f.stream.reset_stream(&mut f.conn, ResetCategory::Overload);
    assert_eq!(f.recorder.resets().len(), 1);
}

#[test]
fn peer_reset_keeps_response_open() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_stream_reset(&mut f.conn, H3_REQUEST_CANCELLED);
    assert_eq!(f.stream.state(), StreamState::HalfClosedRemote);
    assert!(f.recorder.resets().is_empty());

    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert!(f.recorder.resets().is_empty());
    assert_eq!(f.stats.borrow().rx_reset, 1);
}

#[test]
fn peer_reset_after_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    f.stream.on_stream_reset(&mut f.conn, H3_REQUEST_CANCELLED);
    assert_eq!(
        f.recorder.resets(),
        vec![ResetReason::remote(H3_REQUEST_CANCELLED)]
    );
}

#[test]
fn trailers_wait_for_body() {
    let mut f = new_fixture(default_config());
    f.stream.read_disable(true);
    f.stream.switch_stream_block_state(&mut f.conn);
    assert!(f.conn.blocked(ID));
    open_request(&mut f);

    // Body and trailers arrive while reading is blocked.
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"0123456789", false));
    f.stream.on_stream_frame(&mut f.conn, frame(10, b"", true));
    f.stream
        .on_trailing_headers(&mut f.conn, trailers(&[("grpc-status", "0")]), true, 14);
    assert_eq!(f.recorder.events().len(), 1);

    f.stream.read_disable(false);
    f.stream.switch_stream_block_state(&mut f.conn);
    f.stream.on_body_available(&mut f.conn);

    let events = f.recorder.events();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[1],
        Event::Data {
            data: Bytes::from_static(b"0123456789"),
            end_stream: false
        }
    );
    assert_eq!(
        events[2],
        Event::Trailers(vec![Header::new("grpc-status", "0")])
    );
    assert_eq!(f.recorder.end_stream_count(), 1);
    assert_eq!(f.stream.state(), StreamState::HalfClosedRemote);
}

#[test]
fn trailers_after_body() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"abc", false));
    f.stream.on_body_available(&mut f.conn);
    f.stream.on_stream_frame(&mut f.conn, frame(3, b"", true));
    f.stream
        .on_trailing_headers(&mut f.conn, trailers(&[("x-checksum", "1")]), true, 12);

    assert_eq!(
        f.recorder.events()[1..],
        [
            Event::Data {
                data: Bytes::from_static(b"abc"),
                end_stream: false
            },
            Event::Trailers(vec![Header::new("x-checksum", "1")]),
        ]
    );
    assert!(f.stream.end_stream_decoded());
    assert_eq!(f.stream.state(), StreamState::HalfClosedRemote);
}

#[test]
fn trailers_without_fin() {
    let mut f = new_fixture(strict_stream_config());
    open_request(&mut f);
    f.stream
        .on_trailing_headers(&mut f.conn, trailers(&[("x-a", "1")]), false, 8);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_MESSAGE_ERROR));
    assert_eq!(f.recorder.resets(), vec![ResetReason::local(H3_MESSAGE_ERROR)]);
}

#[test]
fn invalid_trailers() {
    let mut f = new_fixture(strict_stream_config());
    open_request(&mut f);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.stream
        .on_trailing_headers(&mut f.conn, trailers(&[(":path", "/")]), true, 8);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_MESSAGE_ERROR));
    assert!(!f
        .recorder
        .events()
        .iter()
        .any(|e| matches!(e, Event::Trailers(_))));
}

#[test]
fn trailers_ignored_when_disconnected() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.conn.connected = false;
    f.stream
        .on_trailing_headers(&mut f.conn, trailers(&[("x-a", "1")]), true, 8);
    assert_eq!(f.recorder.events().len(), 1);
}

#[test]
fn headers_with_fin_end_request_once() {
    let mut f = new_fixture(default_config());
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.stream
        .on_initial_headers(&mut f.conn, &request_headers("GET", "/"), true, 30);
    assert_eq!(f.stream.state(), StreamState::HalfClosedRemote);

    // The FIN shows up as an empty readable chunk as well.
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.recorder.events().len(), 1);
    assert_eq!(f.recorder.end_stream_count(), 1);
}

#[test]
fn drain_consumes_every_region() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_stream_frame(&mut f.conn, frame(4, b"ef", false));
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"ab", false));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.conn.consumed(ID), 2);

    f.stream.on_stream_frame(&mut f.conn, frame(2, b"cd", false));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.conn.consumed(ID), 6);
    assert_eq!(f.recorder.body(), b"abcdef");
    assert!(matches!(
        f.recorder.events().last(),
        Some(Event::Data {
            end_stream: false,
            ..
        })
    ));
}

#[test]
fn empty_chunk_is_not_forwarded() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.recorder.events().len(), 1);
}

#[test]
fn wire_bytes_count_overlap_once() {
    let mut f = new_fixture(default_config());
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"abcd", false));
    f.stream.on_stream_frame(&mut f.conn, frame(2, b"cdef", false));
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"ab", false));
    assert_eq!(f.stream.bytes_meter()[ByteCounter::WireReceived], 6);
}

#[test]
fn read_disable_uses_net_count() {
    for (disables, enables) in [(0, 0), (1, 0), (2, 1), (1, 1), (1, 2), (3, 5), (4, 1)] {
        let mut f = new_fixture(default_config());
        for _ in 0..disables {
            f.stream.read_disable(true);
        }
        for _ in 0..enables {
            f.stream.read_disable(false);
        }
        f.stream.switch_stream_block_state(&mut f.conn);

        let mut once = new_fixture(default_config());
        match disables.cmp(&enables) {
            std::cmp::Ordering::Greater => once.stream.read_disable(true),
            std::cmp::Ordering::Less => once.stream.read_disable(false),
            std::cmp::Ordering::Equal => {}
        }
        once.stream.switch_stream_block_state(&mut once.conn);

        assert_eq!(
            f.conn.blocked(ID),
            once.conn.blocked(ID),
            "{disables} disables, {enables} enables"
        );
        assert_eq!(f.conn.blocked(ID), disables > enables);
        assert!(!f.stream.block_state_switch_pending());
    }
}

#[test]
fn read_disable_marks_switch_on_flip() {
    let mut f = new_fixture(default_config());
    f.stream.read_disable(true);
    assert!(f.stream.block_state_switch_pending());
    f.stream.switch_stream_block_state(&mut f.conn);
    f.stream.read_disable(true);
    assert!(!f.stream.block_state_switch_pending());
    f.stream.read_disable(false);
    assert!(!f.stream.block_state_switch_pending());
    f.stream.read_disable(false);
    assert!(f.stream.block_state_switch_pending());
}

#[test]
fn headers_too_large() {
    let mut f = new_fixture(default_config());
    f.stream.on_headers_too_large();
    f.stream
        .on_initial_headers(&mut f.conn, &request_headers("GET", "/"), false, 100_000);
    assert_eq!(
        f.recorder.events(),
        vec![local_reset(H3_EXCESSIVE_LOAD, details::HEADERS_TOO_LARGE)]
    );
    assert_eq!(f.conn.sent(ID).reset, Some(H3_EXCESSIVE_LOAD));
    assert!(f.conn.closed.is_none());
}

#[test]
fn too_many_headers() {
    let mut f = new_fixture(default_config());
    f.conn.max_headers = 5;
    let list = request_headers_with("GET", "/", &[("x-a", "1"), ("x-b", "2")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    assert_eq!(
        f.conn.closed,
        Some((H3_FRAME_ERROR, details::TOO_MANY_HEADERS.to_owned()))
    );
    assert_eq!(f.stats.borrow().header_overflow, 1);

    let mut f = new_fixture(strict_stream_config());
    f.conn.max_headers = 5;
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_EXCESSIVE_LOAD));
    assert_eq!(f.stream.details(), details::TOO_MANY_HEADERS);
}

#[test]
fn underscore_headers_dropped() {
    let mut f = new_fixture(
        default_config().headers_with_underscores_action(HeadersWithUnderscoresAction::DropHeader),
    );
    let list = request_headers_with("GET", "/", &[("x_forwarded", "1"), ("x-ok", "2")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    let events = f.recorder.events();
    let Event::Headers { headers, .. } = &events[0] else {
        panic!("expected headers, got {events:?}");
    };
    assert!(headers.iter().all(|h| h.name() != "x_forwarded"));
    assert!(headers.iter().any(|h| h.name() == "x-ok"));
    assert_eq!(f.stats.borrow().dropped_headers_with_underscores, 1);
}

#[test]
fn underscore_headers_rejected() {
    let mut f = new_fixture(
        strict_stream_config()
            .headers_with_underscores_action(HeadersWithUnderscoresAction::RejectRequest),
    );
    let list = request_headers_with("GET", "/", &[("x_forwarded", "1")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    assert_eq!(
        f.recorder.events(),
        vec![local_reset(H3_MESSAGE_ERROR, details::INVALID_UNDERSCORE)]
    );
    assert_eq!(
        f.stats.borrow().requests_rejected_with_underscores_in_headers,
        1
    );
}

#[test]
fn extended_connect() {
    let list: HeaderList = [
        Header::new(":method", "CONNECT"),
        Header::new(":protocol", "websocket"),
        Header::new(":scheme", "https"),
        Header::new(":authority", "example.com"),
        Header::new(":path", "/chat"),
    ]
    .into_iter()
    .collect();

    let mut f = new_fixture(strict_stream_config());
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_MESSAGE_ERROR));
    assert_eq!(f.stream.details(), details::INVALID_HTTP_HEADER);

    let mut f = new_fixture(strict_stream_config());
    f.conn.extended_connect = true;
    f.stream.on_initial_headers(&mut f.conn, &list, false, 60);
    assert!(matches!(
        f.recorder.events().as_slice(),
        [Event::Headers { .. }]
    ));
}

#[test]
fn body_longer_than_content_length() {
    let mut f = new_fixture(default_config());
    let list = request_headers_with("POST", "/", &[("content-length", "3")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 40);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"abcd", true));
    f.stream.on_body_available(&mut f.conn);

    assert_eq!(
        f.recorder.events()[1..],
        [local_reset(
            H3_MESSAGE_ERROR,
            details::INCONSISTENT_CONTENT_LENGTH
        )]
    );
    // Always the stream, never the connection.
    assert!(f.conn.closed.is_none());
}

#[test]
fn body_shorter_than_content_length() {
    let mut f = new_fixture(default_config());
    let list = request_headers_with("POST", "/", &[("content-length", "5")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 40);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"abc", false));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.recorder.body(), b"abc");
    f.stream.on_stream_frame(&mut f.conn, frame(3, b"", true));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_MESSAGE_ERROR));
    assert_eq!(f.stream.details(), details::INCONSISTENT_CONTENT_LENGTH);
}

#[test]
fn body_matches_content_length() {
    let mut f = new_fixture(default_config());
    let list = request_headers_with("POST", "/", &[("content-length", "3")]);
    f.stream.on_initial_headers(&mut f.conn, &list, false, 40);
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"abc", true));
    f.stream.on_body_available(&mut f.conn);
    assert_eq!(f.recorder.end_stream_count(), 1);
    assert!(f.recorder.resets().is_empty());
}

#[test]
fn interim_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    assert!(f
        .stream
        .encode_1xx_headers(&mut f.conn, &response_headers(100))
        .is_ok());
    assert_eq!(f.conn.sent(ID).headers.len(), 1);
    assert!(!f.conn.sent(ID).headers[0].1);
    assert_eq!(f.stream.state(), StreamState::Open);

    assert_eq!(
        f.stream
            .encode_1xx_headers(&mut f.conn, &response_headers(200)),
        Err(Error::NotInterimResponse)
    );
    assert_eq!(f.conn.sent(ID).headers.len(), 1);
}

#[test]
fn metadata_is_dropped() {
    let mut f = new_fixture(default_config());
    f.stream.encode_metadata(&[Header::new("k", "v")]);
    assert_eq!(f.stats.borrow().metadata_not_supported_error, 1);
    assert_eq!(f.stream.state(), StreamState::Open);
}

fn watermark_events(recorder: &Recorder) -> Vec<Event> {
    recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::AboveHighWatermark | Event::BelowLowWatermark))
        .collect()
}

#[test]
fn send_buffer_watermarks() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    assert!(watermark_events(&f.recorder).is_empty());

    f.stream
        .encode_data(&mut f.conn, &mut body(&[0; 70_000]), false);
    assert_eq!(watermark_events(&f.recorder), vec![Event::AboveHighWatermark]);
    assert_eq!(f.stream.buffered_send_bytes(), 70_026);

    f.conn.flush_budget = Some(20_000);
    f.stream.on_can_write(&mut f.conn);
    assert_eq!(watermark_events(&f.recorder), vec![Event::AboveHighWatermark]);

    f.stream.on_can_write(&mut f.conn);
    assert_eq!(
        watermark_events(&f.recorder),
        vec![Event::AboveHighWatermark, Event::BelowLowWatermark]
    );
    assert_eq!(f.stream.buffered_send_bytes(), 30_026);
}

#[test]
fn no_watermark_callbacks_after_reset() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream
        .encode_data(&mut f.conn, &mut body(&[0; 70_000]), false);
    f.stream.reset_stream(&mut f.conn, ResetCategory::Reset);
    f.stream.on_can_write(&mut f.conn);
    assert_eq!(watermark_events(&f.recorder), vec![Event::AboveHighWatermark]);
    assert_eq!(f.stream.buffered_send_bytes(), 0);
}

#[test]
fn close_releases_buffered_bytes() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream
        .encode_data(&mut f.conn, &mut body(&[0; 70_000]), false);
    f.stream.on_close();
    assert_eq!(f.stream.buffered_send_bytes(), 0);
    assert_eq!(f.account.cleared(), 1);
    assert_eq!(
        watermark_events(&f.recorder),
        vec![Event::AboveHighWatermark, Event::BelowLowWatermark]
    );
}

#[test]
fn account_detached_once() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(204), true);
    assert_eq!(f.account.cleared(), 1);
    f.stream.on_stop_sending(&mut f.conn, H3_REQUEST_CANCELLED);
    f.stream.on_close();
    assert_eq!(f.account.cleared(), 1);
}

#[test]
fn pending_flush_timeout() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    assert!(f.stream.has_pending_data(&f.conn));

    f.stream.on_pending_flush_timer(&mut f.conn);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_REQUEST_CANCELLED));
    assert_eq!(f.stats.borrow().tx_flush_timeout, 1);
    assert_eq!(f.stats.borrow().tx_reset, 1);
    assert!(f.recorder.resets().is_empty());
    assert!(!f.stream.has_pending_data(&f.conn));
}

/// Receive a whole GET request, ending with FIN.
fn finished_request(f: &mut Fixture) {
    f.stream.on_stream_frame(&mut f.conn, frame(0, b"", true));
    f.stream
        .on_initial_headers(&mut f.conn, &request_headers("GET", "/"), true, 30);
    f.recorder.take();
}

#[test]
fn flush_timeout_after_complete_exchange() {
    let mut f = new_fixture(default_config());
    finished_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert!(f.stream.has_pending_data(&f.conn));

    f.stream.on_pending_flush_timer(&mut f.conn);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_REQUEST_CANCELLED));
    assert_eq!(f.stats.borrow().tx_flush_timeout, 1);
    assert_eq!(f.stats.borrow().tx_reset, 1);
    assert!(f.recorder.resets().is_empty());
    assert!(!f.stream.has_pending_data(&f.conn));
}

#[test]
fn reset_discards_queued_response() {
    let mut f = new_fixture(default_config());
    finished_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.encode_data(&mut f.conn, &mut body(&[0; 100]), true);
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert!(!f.conn.sent(ID).fin_sent());

    f.stream.reset_stream(&mut f.conn, ResetCategory::Reset);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_REQUEST_CANCELLED));
    assert_eq!(f.conn.sent(ID).buffered, 0);
    assert_eq!(f.stats.borrow().tx_reset, 1);
    assert!(f.recorder.resets().is_empty());

    // Only one RESET_STREAM goes out.
    f.stream.reset_stream(&mut f.conn, ResetCategory::Overload);
    assert_eq!(f.conn.sent(ID).reset, Some(H3_REQUEST_CANCELLED));
    assert_eq!(f.stats.borrow().tx_reset, 1);
}

#[test]
fn reset_after_fin_sent_is_ignored() {
    let mut f = new_fixture(default_config());
    finished_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.encode_data(&mut f.conn, &mut body(&[0; 100]), true);
    f.stream.on_can_write(&mut f.conn);
    assert!(f.conn.sent(ID).fin_sent());

    f.stream.reset_stream(&mut f.conn, ResetCategory::Reset);
    assert_eq!(f.conn.sent(ID).reset, None);
    assert_eq!(f.stats.borrow().tx_reset, 0);
    assert!(f.recorder.resets().is_empty());
}

#[test]
fn pending_data_until_flushed() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    assert!(f.stream.has_pending_data(&f.conn));
    f.stream.on_can_write(&mut f.conn);
    assert!(!f.stream.has_pending_data(&f.conn));
    assert!(f.conn.sent(ID).fin_sent());
}

#[test]
fn connection_closed_by_peer() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream
        .on_connection_closed(&mut f.conn, 0, CloseSource::Peer);
    assert_eq!(
        f.recorder.resets(),
        vec![ResetReason::new(
            ResetDirection::Remote,
            ResetCategory::ConnectionTermination
        )]
    );
    assert_eq!(f.stream.state(), StreamState::Closed);
    assert_eq!(f.account.cleared(), 1);
}

#[test]
fn connection_closed_after_response() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), true);
    f.stream
        .on_connection_closed(&mut f.conn, 0x0a, CloseSource::Local);
    assert!(f.recorder.resets().is_empty());
}

#[test]
fn response_trailers_end_stream() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.encode_data(&mut f.conn, &mut body(b"x"), false);
    f.stream
        .encode_trailers(&mut f.conn, &[Header::new("grpc-status", "0")]);
    assert!(f.stream.local_end_stream());
    assert_eq!(f.stream.state(), StreamState::HalfClosedLocal);
    assert_eq!(
        f.conn.sent(ID).trailers,
        Some(vec![Header::new("grpc-status", "0")])
    );

    // Further writes are dropped.
    f.stream.encode_data(&mut f.conn, &mut body(b"late"), true);
    assert_eq!(&f.conn.sent(ID).body[..], b"x");
}

#[test]
fn empty_non_final_write_is_a_no_op() {
    let mut f = new_fixture(default_config());
    open_request(&mut f);
    f.stream.encode_headers(&mut f.conn, &response_headers(200), false);
    f.stream.encode_data(&mut f.conn, &mut SliceBuffer::new(), false);
    assert_eq!(f.conn.sent(ID).body_writes, 0);

    f.stream.encode_data(&mut f.conn, &mut SliceBuffer::new(), true);
    assert_eq!(f.conn.sent(ID).body_writes, 1);
    assert!(f.stream.local_end_stream());
}
