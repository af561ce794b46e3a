// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// A scripted QUIC connection for driving a server stream in tests.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use h3stream::{AppError, Session, StreamFrame};
use h3stream_common::{qtrace, Header, Slices, StreamId};

use crate::DEFAULT_MAX_HEADERS;

/// Received bytes, reordered. Frames are kept as they arrived and may
/// overlap; reads always continue at `retired`.
#[derive(Debug, Default)]
struct Sequencer {
    ranges: BTreeMap<u64, Bytes>,
    retired: u64,
    fin_offset: Option<u64>,
    blocked: bool,
    stopped: bool,
}

impl Sequencer {
    fn inbound_frame(&mut self, frame: StreamFrame) {
        let end = frame.offset + frame.data.len() as u64;
        if frame.fin {
            self.fin_offset = Some(end);
        }
        if self.stopped || end <= self.retired || frame.data.is_empty() {
            return;
        }
        qtrace!("inbound data offset={} len={}", frame.offset, frame.data.len());
        let keep = self
            .ranges
            .get(&frame.offset)
            .map_or(true, |prev| prev.len() < frame.data.len());
        if keep {
            self.ranges.insert(frame.offset, frame.data);
        }
    }

    fn readable_region(&self) -> Option<Bytes> {
        if self.blocked {
            return None;
        }
        self.ranges
            .range(..=self.retired)
            .rev()
            .find(|&(&start, data)| start + data.len() as u64 > self.retired)
            .map(|(&start, data)| data.slice(usize::try_from(self.retired - start).unwrap()..))
    }

    fn mark_consumed(&mut self, amount: usize) {
        self.retired += amount as u64;
        let retired = self.retired;
        self.ranges
            .retain(|&start, data| start + data.len() as u64 > retired);
    }

    fn closed(&self) -> bool {
        self.fin_offset == Some(self.retired)
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.ranges.clear();
    }
}

/// What a stream wrote, plus its send buffer.
#[derive(Debug, Default)]
pub struct SentStream {
    pub headers: Vec<(Vec<Header>, bool)>,
    pub body: BytesMut,
    pub trailers: Option<Vec<Header>>,
    /// Bytes written but not yet flushed.
    pub buffered: u64,
    pub fin_buffered: bool,
    pub reset: Option<AppError>,
    pub reset_send: Option<AppError>,
    pub stop_reading: bool,
    pub body_writes: usize,
}

impl SentStream {
    #[must_use]
    pub fn fin_sent(&self) -> bool {
        self.fin_buffered && self.buffered == 0 && self.reset.is_none()
    }
}

#[derive(Debug, Default)]
struct TestStream {
    sequencer: Sequencer,
    sent: SentStream,
}

/// A connection that records everything streams do to it.
///
/// By default it accepts every write whole and never flushes on its own;
/// `on_can_write` on the stream (via `stream_flush`) sends up to
/// `flush_budget` bytes.
#[derive(Debug)]
pub struct TestSession {
    streams: BTreeMap<StreamId, TestStream>,
    pub connected: bool,
    pub max_headers: usize,
    pub extended_connect: bool,
    /// Largest body write accepted in one call; `None` takes everything.
    pub accept_limit: Option<usize>,
    /// Bytes sent per flush; `None` sends everything.
    pub flush_budget: Option<u64>,
    pub closed: Option<(AppError, String)>,
}

impl Default for TestSession {
    fn default() -> Self {
        Self {
            streams: BTreeMap::new(),
            connected: true,
            max_headers: DEFAULT_MAX_HEADERS,
            extended_connect: false,
            accept_limit: None,
            flush_budget: None,
            closed: None,
        }
    }
}

impl TestSession {
    fn stream(&mut self, stream_id: StreamId) -> &mut TestStream {
        self.streams.entry(stream_id).or_default()
    }

    /// What was written on `stream_id`.
    ///
    /// # Panics
    ///
    /// If nothing touched the stream.
    #[must_use]
    pub fn sent(&self, stream_id: StreamId) -> &SentStream {
        &self.streams.get(&stream_id).expect("stream exists").sent
    }

    #[must_use]
    pub fn blocked(&self, stream_id: StreamId) -> bool {
        self.streams
            .get(&stream_id)
            .is_some_and(|s| s.sequencer.blocked)
    }

    #[must_use]
    pub fn consumed(&self, stream_id: StreamId) -> u64 {
        self.streams
            .get(&stream_id)
            .map_or(0, |s| s.sequencer.retired)
    }

    /// Pretend some bytes left.
    pub fn send_buffered(&mut self, stream_id: StreamId, amount: u64) {
        let sent = &mut self.stream(stream_id).sent;
        sent.buffered = sent.buffered.saturating_sub(amount);
    }

    fn header_block_len(headers: &[Header]) -> usize {
        // Two bytes of frame header plus the fields, uncompressed.
        2 + headers.iter().map(Header::len).sum::<usize>()
    }
}

impl Session for TestSession {
    fn stream_write_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        fin: bool,
    ) -> usize {
        let n = Self::header_block_len(headers);
        let sent = &mut self.stream(stream_id).sent;
        sent.headers.push((headers.to_vec(), fin));
        sent.buffered += n as u64;
        sent.fin_buffered |= fin;
        n
    }

    fn stream_write_body(&mut self, stream_id: StreamId, slices: Slices, fin: bool) -> usize {
        let limit = self.accept_limit.unwrap_or(usize::MAX);
        let sent = &mut self.stream(stream_id).sent;
        sent.body_writes += 1;
        let total: usize = slices.iter().map(Bytes::len).sum();
        let mut accepted = 0;
        for s in &slices {
            let take = s.len().min(limit - accepted);
            sent.body.extend_from_slice(&s[..take]);
            accepted += take;
        }
        sent.buffered += accepted as u64;
        if fin && accepted == total {
            sent.fin_buffered = true;
        }
        accepted
    }

    fn stream_write_trailers(&mut self, stream_id: StreamId, trailers: &[Header]) -> usize {
        let n = Self::header_block_len(trailers);
        let sent = &mut self.stream(stream_id).sent;
        sent.trailers = Some(trailers.to_vec());
        sent.buffered += n as u64;
        sent.fin_buffered = true;
        n
    }

    fn stream_reset(&mut self, stream_id: StreamId, error: AppError) {
        let s = self.stream(stream_id);
        s.sent.reset = Some(error);
        s.sent.buffered = 0;
        s.sequencer.stop();
    }

    fn stream_reset_send(&mut self, stream_id: StreamId, error: AppError) {
        let sent = &mut self.stream(stream_id).sent;
        sent.reset_send = Some(error);
        sent.buffered = 0;
    }

    fn stream_stop_reading(&mut self, stream_id: StreamId) {
        let s = self.stream(stream_id);
        s.sent.stop_reading = true;
        s.sequencer.stop();
    }

    fn stream_buffered_bytes(&self, stream_id: StreamId) -> u64 {
        self.streams.get(&stream_id).map_or(0, |s| s.sent.buffered)
    }

    fn stream_flush(&mut self, stream_id: StreamId) {
        let budget = self.flush_budget.unwrap_or(u64::MAX);
        let sent = &mut self.stream(stream_id).sent;
        sent.buffered -= sent.buffered.min(budget);
    }

    fn stream_fin_sent(&self, stream_id: StreamId) -> bool {
        self.streams
            .get(&stream_id)
            .is_some_and(|s| s.sent.fin_sent())
    }

    fn stream_accept_frame(&mut self, stream_id: StreamId, frame: StreamFrame) {
        self.stream(stream_id).sequencer.inbound_frame(frame);
    }

    fn stream_readable_region(&self, stream_id: StreamId) -> Option<Bytes> {
        self.streams
            .get(&stream_id)
            .and_then(|s| s.sequencer.readable_region())
    }

    fn stream_mark_consumed(&mut self, stream_id: StreamId, amount: usize) {
        self.stream(stream_id).sequencer.mark_consumed(amount);
    }

    fn stream_sequencer_closed(&self, stream_id: StreamId) -> bool {
        self.streams
            .get(&stream_id)
            .is_some_and(|s| s.sequencer.closed())
    }

    fn stream_set_blocked(&mut self, stream_id: StreamId, blocked: bool) {
        self.stream(stream_id).sequencer.blocked = blocked;
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn max_incoming_headers_count(&self) -> usize {
        self.max_headers
    }

    fn allow_extended_connect(&self) -> bool {
        self.extended_connect
    }

    fn close_connection(&mut self, error: AppError, details: &str) {
        self.closed = Some((error, details.to_owned()));
        self.connected = false;
    }
}
