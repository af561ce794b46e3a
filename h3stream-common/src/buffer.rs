// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;

/// The batch of slices handed to the transport in one write. Most response
/// bodies arrive in a handful of regions, so keep them inline.
pub type Slices = SmallVec<[Bytes; 4]>;

/// A byte buffer made of independently owned regions.
///
/// Adding data never copies it into a common allocation; each region keeps
/// the storage it arrived in, so the whole buffer can be handed over region by
/// region without copying.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SliceBuffer {
    regions: VecDeque<Bytes>,
    len: usize,
}

impl SliceBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a region. Empty regions are not stored.
    pub fn add(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.regions.push_back(data);
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move every region out of the buffer, leaving it empty.
    pub fn drain_slices(&mut self) -> Slices {
        self.len = 0;
        self.regions.drain(..).collect()
    }

    /// Copy the content into a single contiguous region.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        if self.regions.len() == 1 {
            return self.regions[0].clone();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for r in &self.regions {
            out.extend_from_slice(r);
        }
        out.freeze()
    }
}

impl From<&[u8]> for SliceBuffer {
    fn from(data: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.add(Bytes::copy_from_slice(data));
        buf
    }
}

impl From<Vec<u8>> for SliceBuffer {
    fn from(data: Vec<u8>) -> Self {
        let mut buf = Self::new();
        buf.add(data);
        buf
    }
}
