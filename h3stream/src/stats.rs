// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Counters shared between a connection and its streams.

use std::{
    cell::{Ref, RefCell, RefMut},
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

#[derive(Default, Debug, Clone, PartialEq, Eq)]
/// Stream statistics, summed over every stream of a connection.
pub struct Stats {
    /// Peer reset a stream.
    pub rx_reset: u64,
    /// We reset a stream.
    pub tx_reset: u64,
    /// A completed response was not flushed in time.
    pub tx_flush_timeout: u64,
    /// The HTTP layer tried to send metadata.
    pub metadata_not_supported_error: u64,
    pub dropped_headers_with_underscores: u64,
    pub requests_rejected_with_underscores_in_headers: u64,
    /// A request had more headers than the session allows.
    pub header_overflow: u64,
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "stats for stream resets and headers:")?;
        writeln!(
            f,
            "  reset: rx {} tx {} flush timeout {}",
            self.rx_reset, self.tx_reset, self.tx_flush_timeout
        )?;
        writeln!(
            f,
            "  headers: overflow {} underscore dropped {} underscore rejected {}",
            self.header_overflow,
            self.dropped_headers_with_underscores,
            self.requests_rejected_with_underscores_in_headers
        )?;
        write!(f, "  metadata rejected {}", self.metadata_not_supported_error)
    }
}

/// A handle to the connection's [`Stats`]. Clones share the same counters.
#[derive(Default, Clone)]
pub struct StatsCell {
    stats: Rc<RefCell<Stats>>,
}

impl StatsCell {
    #[must_use]
    pub fn borrow(&self) -> Ref<Stats> {
        self.stats.borrow()
    }

    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<Stats> {
        self.stats.borrow_mut()
    }
}

impl Debug for StatsCell {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&*self.stats.borrow(), f)
    }
}

impl Display for StatsCell {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&*self.stats.borrow(), f)
    }
}
