// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The half-close lifecycle of a request stream.
//
// Transitions never perform I/O. They update the state and return the
// actions the stream has to carry out, in the order they must happen.

use h3stream_common::qdebug;
use smallvec::SmallVec;

use crate::{
    AppError, CloseSource, ResetCategory, ResetDirection, ResetReason, H3_REQUEST_CANCELLED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Open,
    /// We sent everything; the request is still being read.
    HalfClosedLocal,
    /// The request is fully read; the response is still being sent.
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    #[must_use]
    pub const fn close_local(self) -> Self {
        match self {
            Self::Open | Self::HalfClosedLocal => Self::HalfClosedLocal,
            Self::HalfClosedRemote | Self::Closed => Self::Closed,
        }
    }

    #[must_use]
    pub const fn close_remote(self) -> Self {
        match self {
            Self::Open | Self::HalfClosedRemote => Self::HalfClosedRemote,
            Self::HalfClosedLocal | Self::Closed => Self::Closed,
        }
    }

    #[must_use]
    pub const fn read_closed(self) -> bool {
        matches!(self, Self::HalfClosedRemote | Self::Closed)
    }

    #[must_use]
    pub const fn write_closed(self) -> bool {
        matches!(self, Self::HalfClosedLocal | Self::Closed)
    }
}

/// What the stream has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Tell the reset observers. Always precedes the transport actions of
    /// the same transition.
    NotifyReset(ResetReason),
    /// Reset both directions on the wire.
    SendReset(AppError),
    /// Reset only the sending direction (answer to `STOP_SENDING`).
    ResetWriteSide(AppError),
    /// Stop reading; the transport discards further request bytes.
    StopReading,
    /// The write side is done for good.
    WriteSideClosed,
}

pub type Actions = SmallVec<[LifecycleAction; 4]>;

#[derive(Debug, Default)]
pub struct StreamLifecycle {
    state: StreamState,
    /// The final response chunk was accepted by the transport.
    local_end_stream: bool,
    /// The end of the request was delivered to the HTTP layer.
    end_stream_decoded: bool,
    reading_stopped: bool,
    rst_sent: bool,
    /// Nothing more can go out on the write side: it was reset, the peer
    /// asked us to stop, or the connection is gone.
    write_aborted: bool,
    reset_notified: bool,
}

impl StreamLifecycle {
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub const fn local_end_stream(&self) -> bool {
        self.local_end_stream
    }

    #[must_use]
    pub const fn end_stream_decoded(&self) -> bool {
        self.end_stream_decoded
    }

    #[must_use]
    pub const fn reading_stopped(&self) -> bool {
        self.reading_stopped || self.state.read_closed()
    }

    #[must_use]
    pub const fn rst_sent(&self) -> bool {
        self.rst_sent
    }

    #[must_use]
    pub const fn reset_notified(&self) -> bool {
        self.reset_notified
    }

    fn notify(&mut self, reason: ResetReason, actions: &mut Actions) {
        if self.reset_notified {
            return;
        }
        self.reset_notified = true;
        actions.push(LifecycleAction::NotifyReset(reason));
    }

    fn close_write(&mut self, actions: &mut Actions) {
        if !self.state.write_closed() {
            self.state = self.state.close_local();
            actions.push(LifecycleAction::WriteSideClosed);
        }
    }

    /// The final response chunk went to the transport.
    pub fn end_local(&mut self) -> Actions {
        debug_assert!(!self.local_end_stream);
        let mut actions = Actions::new();
        self.local_end_stream = true;
        self.close_write(&mut actions);
        actions
    }

    /// The end of the request was handed to the HTTP layer.
    pub fn mark_end_stream_decoded(&mut self) {
        self.end_stream_decoded = true;
    }

    /// The sequencer consumed everything up to the FIN.
    pub fn fin_read(&mut self) {
        self.state = self.state.close_remote();
    }

    /// The HTTP layer resets the stream. `fin_sent` says whether the
    /// transport already sent the FIN of the response.
    ///
    /// If the response is already complete and only the request is still
    /// being read, nothing is sent to the peer: reading stops and the
    /// observers see a local reset. The requested category is discarded.
    /// A complete response whose FIN is still queued is reset silently.
    pub fn reset_stream(&mut self, category: ResetCategory, fin_sent: bool) -> Actions {
        if self.local_end_stream && !self.reading_stopped() {
            qdebug!(
                "reset ({}) after the response was complete, stop reading instead",
                category
            );
            let mut actions = Actions::new();
            self.notify(
                ResetReason::new(ResetDirection::Local, ResetCategory::Reset),
                &mut actions,
            );
            self.stop_reading(&mut actions);
            return actions;
        }
        self.reset(category.code(), !self.local_end_stream, fin_sent)
    }

    /// Reset both directions with `code`. Observers hear about it first,
    /// unless the response was already complete.
    pub fn reset_with_error(&mut self, code: AppError) -> Actions {
        self.reset(code, !self.local_end_stream, false)
    }

    /// The response was complete but never flushed. The HTTP layer already
    /// considers the exchange finished, so nobody is notified.
    pub fn flush_timeout(&mut self) -> Actions {
        self.reset(H3_REQUEST_CANCELLED, false, false)
    }

    /// A queued FIN does not finish the write side; only a sent one does.
    fn reset(&mut self, code: AppError, notify: bool, fin_sent: bool) -> Actions {
        let mut actions = Actions::new();
        if self.write_aborted || (self.local_end_stream && fin_sent) {
            return actions;
        }
        if notify {
            self.notify(ResetReason::local(code), &mut actions);
        }
        self.rst_sent = true;
        self.write_aborted = true;
        actions.push(LifecycleAction::SendReset(code));
        self.close_write(&mut actions);
        self.reading_stopped = true;
        self.state = StreamState::Closed;
        actions
    }

    fn stop_reading(&mut self, actions: &mut Actions) {
        if !self.reading_stopped() {
            self.reading_stopped = true;
            actions.push(LifecycleAction::StopReading);
        }
        self.state = self.state.close_remote();
    }

    /// The peer will not read the response any more.
    pub fn stop_sending(&mut self, code: AppError) -> Actions {
        let end_stream_encoded = self.local_end_stream;
        let mut actions = Actions::new();
        if !self.rst_sent {
            self.rst_sent = true;
            actions.push(LifecycleAction::ResetWriteSide(code));
        }
        self.write_aborted = true;
        self.close_write(&mut actions);
        // Nobody wants the response, so the rest of the request is useless.
        self.stop_reading(&mut actions);
        if self.state == StreamState::Closed && !end_stream_encoded {
            // Keep the notification ahead of the transport actions.
            let mut notify = Actions::new();
            self.notify(ResetReason::remote(code), &mut notify);
            notify.extend(actions);
            return notify;
        }
        actions
    }

    /// The peer aborted its sending direction.
    pub fn peer_reset(&mut self, code: AppError) -> Actions {
        let completed = self.state.read_closed() && self.local_end_stream;
        let mut actions = Actions::new();
        self.state = self.state.close_remote();
        if self.state.write_closed() && !completed {
            self.notify(ResetReason::remote(code), &mut actions);
        }
        actions
    }

    /// The connection is gone, taking both directions with it.
    pub fn connection_closed(&mut self, error: u64, source: CloseSource) -> Actions {
        let mut actions = Actions::new();
        if !self.local_end_stream {
            self.notify(ResetReason::connection_closed(error, source), &mut actions);
        }
        self.close_write(&mut actions);
        self.write_aborted = true;
        self.reading_stopped = true;
        self.state = StreamState::Closed;
        actions
    }
}
