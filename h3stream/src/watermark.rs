// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Backpressure tracking for the bytes a stream has handed to the transport
// but not yet sent.

use std::fmt::{self, Display, Formatter};

use h3stream_common::qtrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkEvent {
    /// The buffer reached the high watermark; stop producing.
    AboveHigh,
    /// The buffer drained below the low watermark; resume.
    BelowLow,
}

/// Watches the send buffer of one stream.
///
/// Every operation that can change the buffered byte count runs inside a
/// scope: `begin` before it, `end` with the new count after it. Scopes nest
/// (writing headers can trigger a flush, for instance); only the outermost
/// `end` compares the count against the watermarks.
#[derive(Debug)]
pub struct SendBufferMonitor {
    high: u64,
    low: u64,
    buffered: u64,
    above_high: bool,
    depth: usize,
}

impl SendBufferMonitor {
    #[must_use]
    pub const fn new(high: u64, low: u64) -> Self {
        Self {
            high,
            low,
            buffered: 0,
            above_high: false,
            depth: 0,
        }
    }

    /// Enter a scope. Returns `true` for the outermost scope.
    pub fn begin(&mut self) -> bool {
        self.depth += 1;
        self.depth == 1
    }

    /// Leave a scope, `buffered` being the transport's count at that time.
    pub fn end(&mut self, buffered: u64) -> Option<WatermarkEvent> {
        debug_assert!(self.depth > 0, "unbalanced send buffer scope");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.update(buffered)
        } else {
            None
        }
    }

    /// Record a new buffered byte count.
    pub fn update(&mut self, buffered: u64) -> Option<WatermarkEvent> {
        if buffered == self.buffered {
            return None;
        }
        qtrace!([self], "buffered {} -> {}", self.buffered, buffered);
        self.buffered = buffered;
        if !self.above_high && buffered >= self.high {
            self.above_high = true;
            Some(WatermarkEvent::AboveHigh)
        } else if self.above_high && buffered < self.low {
            self.above_high = false;
            Some(WatermarkEvent::BelowLow)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_doing_accounting(&self) -> bool {
        self.depth > 0
    }

    #[must_use]
    pub const fn buffered(&self) -> u64 {
        self.buffered
    }

    #[must_use]
    pub const fn above_high_watermark(&self) -> bool {
        self.above_high
    }
}

impl Display for SendBufferMonitor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "SendBuffer {}/{}/{}", self.buffered, self.low, self.high)
    }
}
