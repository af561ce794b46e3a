// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The parties a server stream talks to but does not own.

use std::fmt::Debug;

use bytes::Bytes;
use h3stream_common::{Header, SliceBuffer, Slices, StreamId};

use crate::{AppError, ResetReason};

/// A STREAM frame as received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
}

impl StreamFrame {
    #[must_use]
    pub fn new(offset: u64, data: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            offset,
            data: data.into(),
            fin,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The QUIC connection as one of its request streams sees it.
///
/// Every call names the stream it is about. The connection owns the stream's
/// send buffer and its inbound sequencer, which reorders received frames and
/// hands out the request body in contiguous regions.
///
/// The connection reports an oversized header block by calling
/// `on_headers_too_large` before `on_initial_headers` for that block.
pub trait Session {
    /// Encode and buffer a HEADERS frame. Returns the number of bytes added
    /// to the send buffer.
    fn stream_write_headers(&mut self, stream_id: StreamId, headers: &[Header], fin: bool)
        -> usize;

    /// Take ownership of a batch of body slices. Returns how many bytes were
    /// accepted; anything short of the whole batch is a failure.
    fn stream_write_body(&mut self, stream_id: StreamId, slices: Slices, fin: bool) -> usize;

    /// Encode and buffer the trailers; this always ends the stream.
    fn stream_write_trailers(&mut self, stream_id: StreamId, trailers: &[Header]) -> usize;

    /// Send `RESET_STREAM` and `STOP_SENDING` with `error`.
    fn stream_reset(&mut self, stream_id: StreamId, error: AppError);

    /// Send `RESET_STREAM` only.
    fn stream_reset_send(&mut self, stream_id: StreamId, error: AppError);

    /// Discard request bytes from now on.
    fn stream_stop_reading(&mut self, stream_id: StreamId);

    /// Bytes buffered for sending but not yet sent.
    fn stream_buffered_bytes(&self, stream_id: StreamId) -> u64;

    /// Send as much of the buffered data as flow control allows.
    fn stream_flush(&mut self, stream_id: StreamId);

    /// Whether the FIN went out.
    fn stream_fin_sent(&self, stream_id: StreamId) -> bool;

    /// Hand a received frame to the sequencer.
    fn stream_accept_frame(&mut self, stream_id: StreamId, frame: StreamFrame);

    /// The next readable region of request body, if any.
    fn stream_readable_region(&self, stream_id: StreamId) -> Option<Bytes>;

    fn stream_mark_consumed(&mut self, stream_id: StreamId, amount: usize);

    /// The FIN was received and every byte before it was consumed.
    fn stream_sequencer_closed(&self, stream_id: StreamId) -> bool;

    /// Block (or unblock) delivery of request bytes to the stream.
    fn stream_set_blocked(&mut self, stream_id: StreamId, blocked: bool);

    fn connected(&self) -> bool;

    fn max_incoming_headers_count(&self) -> usize;

    /// Whether we advertised `SETTINGS_ENABLE_CONNECT_PROTOCOL`.
    fn allow_extended_connect(&self) -> bool;

    /// Close the whole connection.
    fn close_connection(&mut self, error: AppError, details: &str);
}

/// The HTTP layer's request sink.
pub trait RequestDecoder: Debug {
    fn decode_headers(&mut self, headers: Vec<Header>, end_stream: bool);
    fn decode_data(&mut self, data: SliceBuffer, end_stream: bool);
    fn decode_trailers(&mut self, trailers: Vec<Header>);
}

/// Observers of the stream's fate.
pub trait StreamCallbacks: Debug {
    /// The stream was reset. Called at most once per stream.
    fn on_reset_stream(&mut self, reason: ResetReason, details: &str);
    fn on_above_write_buffer_high_watermark(&mut self);
    fn on_below_write_buffer_low_watermark(&mut self);
}

/// Memory accounting shared with the connection. The stream only ever
/// detaches itself from it.
pub trait BufferMemoryAccount: Debug {
    fn clear_downstream(&self);
}
