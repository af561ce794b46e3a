// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use bytes::Bytes;
use h3stream::{BufferMemoryAccount, RequestDecoder, ResetReason, StreamCallbacks};
use h3stream_common::{Header, SliceBuffer};

/// Everything the HTTP layer heard from a stream, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Headers {
        headers: Vec<Header>,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    Trailers(Vec<Header>),
    Reset {
        reason: ResetReason,
        details: String,
    },
    AboveHighWatermark,
    BelowLowWatermark,
}

/// Stands in for the HTTP layer. Clones share one event log, so a clone can
/// be handed to the stream as decoder and another as callbacks.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Recorder {
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Return the events recorded so far and forget them.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    #[must_use]
    pub fn resets(&self) -> Vec<ResetReason> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Reset { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// All request body bytes delivered so far.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Data { data, .. } => Some(data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// How many events announced the end of the request.
    #[must_use]
    pub fn end_stream_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::Headers {
                        end_stream: true,
                        ..
                    } | Event::Data {
                        end_stream: true,
                        ..
                    } | Event::Trailers(_)
                )
            })
            .count()
    }

    fn push(&self, e: Event) {
        self.events.borrow_mut().push(e);
    }
}

impl RequestDecoder for Recorder {
    fn decode_headers(&mut self, headers: Vec<Header>, end_stream: bool) {
        self.push(Event::Headers {
            headers,
            end_stream,
        });
    }

    fn decode_data(&mut self, data: SliceBuffer, end_stream: bool) {
        self.push(Event::Data {
            data: data.to_bytes(),
            end_stream,
        });
    }

    fn decode_trailers(&mut self, trailers: Vec<Header>) {
        self.push(Event::Trailers(trailers));
    }
}

impl StreamCallbacks for Recorder {
    fn on_reset_stream(&mut self, reason: ResetReason, details: &str) {
        self.push(Event::Reset {
            reason,
            details: details.to_owned(),
        });
    }

    fn on_above_write_buffer_high_watermark(&mut self) {
        self.push(Event::AboveHighWatermark);
    }

    fn on_below_write_buffer_low_watermark(&mut self) {
        self.push(Event::BelowLowWatermark);
    }
}

/// Counts how often a stream detached itself.
#[derive(Debug, Default)]
pub struct TestAccount {
    cleared: Cell<usize>,
}

impl TestAccount {
    #[must_use]
    pub fn cleared(&self) -> usize {
        self.cleared.get()
    }
}

impl BufferMemoryAccount for TestAccount {
    fn clear_downstream(&self) {
        self.cleared.set(self.cleared.get() + 1);
    }
}
