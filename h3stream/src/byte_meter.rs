// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{
    fmt::{self, Display, Formatter},
    ops::Deref,
};

use enum_map::{Enum, EnumMap};
use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum, EnumIter, Display)]
pub enum ByteCounter {
    #[strum(to_string = "wire rx")]
    WireReceived,
    #[strum(to_string = "wire tx")]
    WireSent,
    #[strum(to_string = "header rx")]
    HeaderReceived,
    #[strum(to_string = "header tx")]
    HeaderSent,
    #[strum(to_string = "content rx")]
    ContentReceived,
    #[strum(to_string = "content tx")]
    ContentSent,
}

/// Byte counts for one stream. Counters only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BytesMeter {
    counts: EnumMap<ByteCounter, u64>,
    /// The largest `offset + length` of any frame received so far.
    highest_received_offset: u64,
}

impl Deref for BytesMeter {
    type Target = EnumMap<ByteCounter, u64>;

    fn deref(&self) -> &Self::Target {
        &self.counts
    }
}

impl BytesMeter {
    fn add(&mut self, counter: ByteCounter, n: u64) {
        self.counts[counter] = self.counts[counter].saturating_add(n);
    }

    pub fn add_wire_bytes_received(&mut self, n: u64) {
        self.add(ByteCounter::WireReceived, n);
    }

    pub fn add_wire_bytes_sent(&mut self, n: u64) {
        self.add(ByteCounter::WireSent, n);
    }

    pub fn add_header_bytes_received(&mut self, n: u64) {
        self.add(ByteCounter::HeaderReceived, n);
    }

    pub fn add_header_bytes_sent(&mut self, n: u64) {
        self.add(ByteCounter::HeaderSent, n);
    }

    pub fn add_content_bytes_received(&mut self, n: u64) {
        self.add(ByteCounter::ContentReceived, n);
    }

    pub fn add_content_bytes_sent(&mut self, n: u64) {
        self.add(ByteCounter::ContentSent, n);
    }

    /// Account for a received frame covering `[offset, offset + len)`.
    /// Only the part beyond anything seen before counts as wire bytes, so
    /// retransmitted or overlapping frames are not counted twice.
    pub fn observe_received_frame(&mut self, offset: u64, len: u64) {
        let end = offset.saturating_add(len);
        if end > self.highest_received_offset {
            self.add_wire_bytes_received(end - self.highest_received_offset);
            self.highest_received_offset = end;
        }
    }
}

impl Display for BytesMeter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut first = true;
        for (counter, n) in &self.counts {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{counter}={n}")?;
        }
        Ok(())
    }
}
