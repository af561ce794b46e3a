// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod buffer;
mod header;
pub mod log;
mod stream_id;

pub use self::{
    buffer::{SliceBuffer, Slices},
    header::{Header, HeaderList, HeadersExt},
    stream_id::StreamId,
};
