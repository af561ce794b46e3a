// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

use h3stream_common::{
    qdebug, qinfo, qtrace, qwarn, Header, HeaderList, SliceBuffer, StreamId,
};

use crate::{
    codec::{self, HeaderCodec},
    details,
    stream_state::Actions,
    BufferMemoryAccount, BytesMeter, CloseSource, Error, LifecycleAction, RequestDecoder,
    ResetCategory, Res, SendBufferMonitor, Session, StatsCell, StreamCallbacks, StreamConfig,
    StreamFrame, StreamLifecycle, StreamState, WatermarkEvent, H3_FRAME_ERROR, is_interim,
};

/// The server side of one HTTP/3 request stream.
///
/// The connection that carries the stream is passed into every call that
/// needs it; the stream never keeps hold of it.
#[derive(Debug)]
pub struct ServerStream {
    stream_id: StreamId,
    config: StreamConfig,
    close_connection_on_invalid_header: bool,
    lifecycle: StreamLifecycle,
    meter: BytesMeter,
    send_buffer: SendBufferMonitor,
    stats: StatsCell,
    decoder: Box<dyn RequestDecoder>,
    callbacks: Vec<Box<dyn StreamCallbacks>>,
    account: Option<Rc<dyn BufferMemoryAccount>>,
    /// Why the request was rejected, empty until it was.
    details: &'static str,
    read_disable_counter: i32,
    block_state_switch_pending: bool,
    headers_too_large: bool,
    received_trailers: Option<HeaderList>,
    trailers_consumed: bool,
    content_length: Option<u64>,
    received_content_bytes: u64,
}

impl ServerStream {
    /// # Errors
    ///
    /// `ReceiveWindowTooSmall` if the configured receive window is not above
    /// the minimum.
    pub fn new(
        stream_id: StreamId,
        config: StreamConfig,
        stats: StatsCell,
        decoder: Box<dyn RequestDecoder>,
        account: Option<Rc<dyn BufferMemoryAccount>>,
    ) -> Res<Self> {
        config.validate()?;
        debug_assert!(stream_id.is_request_stream());
        let s = Self {
            stream_id,
            close_connection_on_invalid_header: config.close_connection_on_invalid_header(),
            send_buffer: SendBufferMonitor::new(config.high_watermark(), config.low_watermark()),
            config,
            lifecycle: StreamLifecycle::default(),
            meter: BytesMeter::default(),
            stats,
            decoder,
            callbacks: Vec::new(),
            account,
            details: "",
            read_disable_counter: 0,
            block_state_switch_pending: false,
            headers_too_large: false,
            received_trailers: None,
            trailers_consumed: false,
            content_length: None,
            received_content_bytes: 0,
        };
        qdebug!([s], "created, receive window {}", s.config.get_receive_window());
        Ok(s)
    }

    pub fn add_callbacks(&mut self, callbacks: Box<dyn StreamCallbacks>) {
        self.callbacks.push(callbacks);
    }

    #[must_use]
    pub const fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.lifecycle.state()
    }

    #[must_use]
    pub const fn bytes_meter(&self) -> &BytesMeter {
        &self.meter
    }

    #[must_use]
    pub const fn details(&self) -> &'static str {
        self.details
    }

    #[must_use]
    pub const fn local_end_stream(&self) -> bool {
        self.lifecycle.local_end_stream()
    }

    #[must_use]
    pub const fn end_stream_decoded(&self) -> bool {
        self.lifecycle.end_stream_decoded()
    }

    #[must_use]
    pub const fn read_disabled(&self) -> bool {
        self.read_disable_counter > 0
    }

    #[must_use]
    pub const fn block_state_switch_pending(&self) -> bool {
        self.block_state_switch_pending
    }

    #[must_use]
    pub const fn buffered_send_bytes(&self) -> u64 {
        self.send_buffer.buffered()
    }

    /// Whether the transport still holds response bytes for this stream.
    #[must_use]
    pub fn has_pending_data(&self, conn: &impl Session) -> bool {
        conn.stream_buffered_bytes(self.stream_id) > 0
            || (self.lifecycle.local_end_stream()
                && !self.lifecycle.rst_sent()
                && !conn.stream_fin_sent(self.stream_id))
    }

    fn codec(&self, conn: &impl Session) -> HeaderCodec {
        HeaderCodec::new(
            conn.max_incoming_headers_count(),
            self.config.get_headers_with_underscores_action(),
            conn.allow_extended_connect(),
        )
    }

    fn clear_account(&mut self) {
        if let Some(account) = self.account.take() {
            qtrace!([self], "detaching from buffer memory account");
            account.clear_downstream();
        }
    }

    /// Run `f` as one change to the send buffer and report the watermark
    /// crossing, if any, when the outermost change completes.
    fn with_send_buffer<C: Session, T>(
        &mut self,
        conn: &mut C,
        f: impl FnOnce(&mut Self, &mut C) -> T,
    ) -> T {
        self.send_buffer.begin();
        let res = f(self, conn);
        let buffered = conn.stream_buffered_bytes(self.stream_id);
        if let Some(event) = self.send_buffer.end(buffered) {
            self.on_watermark(event);
        }
        res
    }

    fn on_watermark(&mut self, event: WatermarkEvent) {
        if self.lifecycle.reset_notified() {
            // The HTTP layer is gone.
            return;
        }
        qdebug!([self], "send buffer {:?} at {}", event, self.send_buffer.buffered());
        for cb in &mut self.callbacks {
            match event {
                WatermarkEvent::AboveHigh => cb.on_above_write_buffer_high_watermark(),
                WatermarkEvent::BelowLow => cb.on_below_write_buffer_low_watermark(),
            }
        }
    }

    fn apply(&mut self, conn: &mut impl Session, actions: Actions) {
        for action in actions {
            qtrace!([self], "{:?}", action);
            match action {
                LifecycleAction::NotifyReset(reason) => {
                    qdebug!([self], "reset: {} {}", reason, self.details);
                    for cb in &mut self.callbacks {
                        cb.on_reset_stream(reason, self.details);
                    }
                }
                LifecycleAction::SendReset(code) => {
                    self.stats.borrow_mut().tx_reset += 1;
                    conn.stream_reset(self.stream_id, code);
                }
                LifecycleAction::ResetWriteSide(code) => {
                    conn.stream_reset_send(self.stream_id, code);
                }
                LifecycleAction::StopReading => conn.stream_stop_reading(self.stream_id),
                LifecycleAction::WriteSideClosed => self.clear_account(),
            }
        }
    }

    /// A request failed validation. Depending on the failure and the
    /// configuration, this closes the connection or resets the stream.
    fn on_stream_error(&mut self, conn: &mut impl Session, err: &Error) {
        self.details = err.details();
        let close_connection = err
            .close_connection_override()
            .unwrap_or(self.close_connection_on_invalid_header);
        qinfo!(
            [self],
            "request rejected: {} ({}), closing {}",
            err,
            self.details,
            if close_connection { "connection" } else { "stream" }
        );
        if close_connection {
            conn.close_connection(H3_FRAME_ERROR, self.details);
        } else {
            let actions = self.lifecycle.reset_with_error(err.code());
            self.apply(conn, actions);
        }
    }

    /// Returns `false` if the body turned out not to match `content-length`,
    /// in which case the stream was reset.
    fn update_received_content_bytes(
        &mut self,
        conn: &mut impl Session,
        amount: u64,
        end_stream: bool,
    ) -> bool {
        let Some(expected) = self.content_length else {
            return true;
        };
        self.received_content_bytes = self.received_content_bytes.saturating_add(amount);
        if self.received_content_bytes > expected
            || (end_stream && self.received_content_bytes != expected)
        {
            qdebug!(
                [self],
                "content-length {} but received {} (end_stream={})",
                expected,
                self.received_content_bytes,
                end_stream
            );
            self.on_stream_error(conn, &Error::InconsistentContentLength);
            return false;
        }
        true
    }

    // Egress, called by the HTTP layer.

    /// Send response headers.
    pub fn encode_headers(&mut self, conn: &mut impl Session, headers: &[Header], end_stream: bool) {
        qdebug!([self], "encode_headers (end_stream={}) {} fields", end_stream, headers.len());
        if self.lifecycle.state().write_closed() {
            qwarn!([self], "encode_headers on a write-closed stream");
            return;
        }
        self.with_send_buffer(conn, |s, conn| {
            let n = conn.stream_write_headers(s.stream_id, headers, end_stream) as u64;
            s.meter.add_header_bytes_sent(n);
            s.meter.add_wire_bytes_sent(n);
            if end_stream {
                let actions = s.lifecycle.end_local();
                s.apply(conn, actions);
            }
        });
    }

    /// Send an informational (1xx) response.
    ///
    /// # Errors
    ///
    /// `NotInterimResponse` if `headers` do not start with a 1xx `:status`.
    pub fn encode_1xx_headers(&mut self, conn: &mut impl Session, headers: &[Header]) -> Res<()> {
        if !is_interim(headers).unwrap_or(false) {
            return Err(Error::NotInterimResponse);
        }
        self.encode_headers(conn, headers, false);
        Ok(())
    }

    /// Send response body. The transport has to take all of it; if it does
    /// not, the stream is reset and the remainder is dropped.
    pub fn encode_data(&mut self, conn: &mut impl Session, data: &mut SliceBuffer, end_stream: bool) {
        qdebug!([self], "encode_data (end_stream={}) of {} bytes", end_stream, data.len());
        if data.is_empty() && !end_stream {
            return;
        }
        if self.lifecycle.state().write_closed() {
            qwarn!([self], "encode_data on a write-closed stream");
            return;
        }
        let total = data.len();
        let slices = data.drain_slices();
        self.with_send_buffer(conn, |s, conn| {
            let accepted = conn.stream_write_body(s.stream_id, slices, end_stream);
            s.meter.add_content_bytes_sent(accepted as u64);
            s.meter.add_wire_bytes_sent(accepted as u64);
            if accepted < total {
                qwarn!(
                    [s],
                    "send buffer took {} of {} bytes, write side is {}",
                    accepted,
                    total,
                    if s.lifecycle.state().write_closed() { "closed" } else { "open" }
                );
                // Deliberately not treated as the end of the response: the
                // observers hear about a local protocol error.
                let actions = s
                    .lifecycle
                    .reset_with_error(Error::BadApplicationPayload.code());
                s.apply(conn, actions);
                return;
            }
            if end_stream {
                let actions = s.lifecycle.end_local();
                s.apply(conn, actions);
            }
        });
    }

    /// Send trailers, ending the response.
    pub fn encode_trailers(&mut self, conn: &mut impl Session, trailers: &[Header]) {
        qdebug!([self], "encode_trailers {} fields", trailers.len());
        if self.lifecycle.state().write_closed() {
            qwarn!([self], "encode_trailers on a write-closed stream");
            return;
        }
        self.with_send_buffer(conn, |s, conn| {
            let n = conn.stream_write_trailers(s.stream_id, trailers) as u64;
            s.meter.add_header_bytes_sent(n);
            s.meter.add_wire_bytes_sent(n);
            let actions = s.lifecycle.end_local();
            s.apply(conn, actions);
        });
    }

    /// HTTP/3 has no METADATA frame.
    pub fn encode_metadata(&mut self, metadata: &[Header]) {
        qdebug!([self], "dropping {} metadata entries, not supported", metadata.len());
        self.stats.borrow_mut().metadata_not_supported_error += 1;
    }

    /// Abort the stream on behalf of the HTTP layer. Observers are told
    /// before this returns.
    pub fn reset_stream(&mut self, conn: &mut impl Session, category: ResetCategory) {
        qdebug!([self], "reset_stream {}", category);
        self.clear_account();
        let fin_sent = conn.stream_fin_sent(self.stream_id);
        let actions = self.lifecycle.reset_stream(category, fin_sent);
        self.apply(conn, actions);
    }

    /// Ask for the request to be paused (`true`) or resumed (`false`).
    /// Calls nest; nothing happens until [`Self::switch_stream_block_state`].
    pub fn read_disable(&mut self, disable: bool) {
        let changed = if disable {
            self.read_disable_counter += 1;
            self.read_disable_counter == 1
        } else {
            self.read_disable_counter -= 1;
            self.read_disable_counter == 0
        };
        qtrace!([self], "read_disable({}), counter {}", disable, self.read_disable_counter);
        if changed {
            self.block_state_switch_pending = true;
        }
    }

    /// Apply the read-disable state as it is now, however many times it
    /// flipped since the switch was scheduled.
    pub fn switch_stream_block_state(&mut self, conn: &mut impl Session) {
        self.block_state_switch_pending = false;
        let blocked = self.read_disabled();
        qdebug!([self], "{}", if blocked { "blocking" } else { "unblocking" });
        conn.stream_set_blocked(self.stream_id, blocked);
    }

    // Ingress, called by the transport.

    pub fn on_stream_frame(&mut self, conn: &mut impl Session, frame: StreamFrame) {
        qtrace!(
            [self],
            "frame offset={} len={} fin={}",
            frame.offset,
            frame.len(),
            frame.fin
        );
        self.meter.observe_received_frame(frame.offset, frame.len() as u64);
        conn.stream_accept_frame(self.stream_id, frame);
    }

    pub fn on_headers_too_large(&mut self) {
        qdebug!([self], "headers too large");
        self.details = details::HEADERS_TOO_LARGE;
        self.headers_too_large = true;
    }

    /// The request header block was decoded.
    pub fn on_initial_headers(
        &mut self,
        conn: &mut impl Session,
        list: &HeaderList,
        fin: bool,
        frame_len: usize,
    ) {
        self.meter.add_header_bytes_received(frame_len as u64);
        if self.lifecycle.state().read_closed() {
            return;
        }
        qdebug!([self], "received headers (fin={}): {}", fin, list);
        if self.headers_too_large {
            self.on_stream_error(conn, &Error::HeadersTooLarge);
            return;
        }
        let headers = match self.codec(&*conn).decode_request_headers(list, &self.stats) {
            Ok(headers) => headers,
            Err(e) => {
                self.on_stream_error(conn, &e);
                return;
            }
        };
        // Validated by the codec.
        self.content_length = codec::content_length(&headers).ok().flatten();
        if fin {
            if !self.update_received_content_bytes(conn, 0, true) {
                return;
            }
            self.lifecycle.mark_end_stream_decoded();
        }
        self.decoder.decode_headers(headers, fin);
        if fin && conn.stream_sequencer_closed(self.stream_id) {
            self.on_body_available(conn);
        }
    }

    /// The sequencer has request body to read.
    pub fn on_body_available(&mut self, conn: &mut impl Session) {
        if self.lifecycle.state().read_closed() {
            return;
        }
        let mut buffer = SliceBuffer::new();
        while let Some(region) = conn.stream_readable_region(self.stream_id) {
            if region.is_empty() {
                break;
            }
            let n = region.len();
            buffer.add(region);
            conn.stream_mark_consumed(self.stream_id, n);
        }

        let sequencer_closed = conn.stream_sequencer_closed(self.stream_id);
        let fin_read_and_no_trailers =
            sequencer_closed && (self.received_trailers.is_none() || self.trailers_consumed);
        // An empty chunk only matters if it ends the request, and the end of
        // the request is delivered once.
        let skip_decoding = (buffer.is_empty() && !fin_read_and_no_trailers)
            || self.lifecycle.end_stream_decoded();
        if !skip_decoding {
            if fin_read_and_no_trailers {
                self.lifecycle.mark_end_stream_decoded();
            }
            let len = buffer.len() as u64;
            self.meter.add_content_bytes_received(len);
            if !self.update_received_content_bytes(conn, len, fin_read_and_no_trailers) {
                return;
            }
            qtrace!([self], "decode_data {} bytes, fin={}", len, fin_read_and_no_trailers);
            self.decoder.decode_data(buffer, fin_read_and_no_trailers);
        }

        if !sequencer_closed || self.lifecycle.state().read_closed() {
            return;
        }
        // Trailers that arrived early go out after the whole body.
        self.maybe_decode_trailers(conn);
        self.lifecycle.fin_read();
    }

    /// The trailer block was decoded.
    pub fn on_trailing_headers(
        &mut self,
        conn: &mut impl Session,
        list: HeaderList,
        fin: bool,
        frame_len: usize,
    ) {
        self.meter.add_header_bytes_received(frame_len as u64);
        if self.lifecycle.state().read_closed() {
            return;
        }
        qdebug!([self], "received trailers (fin={}): {}", fin, list);
        self.received_trailers = Some(list);
        if !fin {
            self.on_stream_error(conn, &Error::TrailersWithoutFin);
            return;
        }
        if conn.connected() && !self.lifecycle.rst_sent() && conn.stream_sequencer_closed(self.stream_id)
        {
            self.on_body_available(conn);
        }
    }

    fn maybe_decode_trailers(&mut self, conn: &mut impl Session) {
        if self.trailers_consumed || !conn.stream_sequencer_closed(self.stream_id) {
            return;
        }
        let Some(list) = self.received_trailers.take() else {
            return;
        };
        self.lifecycle.mark_end_stream_decoded();
        if !self.update_received_content_bytes(conn, 0, true) {
            return;
        }
        match self.codec(&*conn).decode_request_trailers(&list, &self.stats) {
            Ok(trailers) => {
                self.trailers_consumed = true;
                self.decoder.decode_trailers(trailers);
            }
            Err(e) => self.on_stream_error(conn, &e),
        }
    }

    /// The peer sent `STOP_SENDING`.
    pub fn on_stop_sending(&mut self, conn: &mut impl Session, error: u64) {
        qdebug!([self], "received STOP_SENDING code={:#x}", error);
        self.stats.borrow_mut().rx_reset += 1;
        let actions = self.lifecycle.stop_sending(error);
        self.apply(conn, actions);
    }

    /// The peer sent `RESET_STREAM`.
    pub fn on_stream_reset(&mut self, conn: &mut impl Session, error: u64) {
        qdebug!([self], "received RESET_STREAM code={:#x}", error);
        self.stats.borrow_mut().rx_reset += 1;
        let actions = self.lifecycle.peer_reset(error);
        self.apply(conn, actions);
    }

    pub fn on_connection_closed(&mut self, conn: &mut impl Session, error: u64, source: CloseSource) {
        qdebug!([self], "connection closed by {:?} error={:#x}", source, error);
        let actions = self.lifecycle.connection_closed(error, source);
        self.apply(conn, actions);
    }

    /// Flow control lets the stream send again.
    pub fn on_can_write(&mut self, conn: &mut impl Session) {
        self.with_send_buffer(conn, |s, conn| conn.stream_flush(s.stream_id));
    }

    /// The response was complete but did not leave in time.
    pub fn on_pending_flush_timer(&mut self, conn: &mut impl Session) {
        qdebug!([self], "pending stream flush timeout");
        self.stats.borrow_mut().tx_flush_timeout += 1;
        let actions = self.lifecycle.flush_timeout();
        self.apply(conn, actions);
    }

    /// The transport is about to release the stream.
    pub fn on_close(&mut self) {
        qdebug!([self], "closed in state {:?}", self.lifecycle.state());
        self.clear_account();
        if self.send_buffer.is_doing_accounting() {
            return;
        }
        // Whatever is still buffered will never be sent; count it as gone.
        if let Some(event) = self.send_buffer.update(0) {
            self.on_watermark(event);
        }
    }
}

impl Display for ServerStream {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "ServerStream {}", self.stream_id)
    }
}
