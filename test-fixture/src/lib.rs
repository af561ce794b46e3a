// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![allow(clippy::missing_panics_doc)]

use std::rc::Rc;

use h3stream::{BufferMemoryAccount, ServerStream, StatsCell, StreamConfig};
use h3stream_common::{Header, HeaderList, StreamId};

mod recorder;
mod session;

pub use recorder::{Event, Recorder, TestAccount};
pub use session::TestSession;

/// Initialize the test fixture. Only call this if you aren't also calling a
/// fixture function that depends on setup.
pub fn fixture_init() {
    h3stream_common::log::init(None);
}

pub const DEFAULT_STREAM_ID: StreamId = StreamId::new(0);
pub const DEFAULT_MAX_HEADERS: usize = 100;
pub const DEFAULT_SERVER_NAME: &str = "example.com";

/// A small receive window, so that the send buffer watermarks are easy to
/// reach: high at 64 KiB, low at 32 KiB.
#[must_use]
pub fn default_config() -> StreamConfig {
    StreamConfig::default().receive_window(64 * 1024)
}

/// Everything a test needs to drive one stream.
pub struct Fixture {
    pub stream: ServerStream,
    pub conn: TestSession,
    pub recorder: Recorder,
    pub stats: StatsCell,
    pub account: Rc<TestAccount>,
}

/// Create a server stream on [`DEFAULT_STREAM_ID`] with a recorder attached
/// as both request decoder and stream callbacks.
#[must_use]
pub fn new_fixture(config: StreamConfig) -> Fixture {
    fixture_init();
    let recorder = Recorder::default();
    let stats = StatsCell::default();
    let account = Rc::new(TestAccount::default());
    let mut stream = ServerStream::new(
        DEFAULT_STREAM_ID,
        config,
        stats.clone(),
        Box::new(recorder.clone()),
        Some(Rc::clone(&account) as Rc<dyn BufferMemoryAccount>),
    )
    .expect("valid stream config");
    stream.add_callbacks(Box::new(recorder.clone()));
    Fixture {
        stream,
        conn: TestSession::default(),
        recorder,
        stats,
        account,
    }
}

/// A request header block for `method` on `path`.
#[must_use]
pub fn request_headers(method: &str, path: &str) -> HeaderList {
    request_headers_with(method, path, &[])
}

/// As [`request_headers`], followed by `extra` regular fields.
#[must_use]
pub fn request_headers_with(method: &str, path: &str, extra: &[(&str, &str)]) -> HeaderList {
    [
        Header::new(":method", method),
        Header::new(":scheme", "https"),
        Header::new(":authority", DEFAULT_SERVER_NAME),
        Header::new(":path", path),
    ]
    .into_iter()
    .chain(extra.iter().map(|(n, v)| Header::new(*n, *v)))
    .collect()
}

#[must_use]
pub fn response_headers(status: u16) -> Vec<Header> {
    vec![
        Header::new(":status", status.to_string()),
        Header::new("server", "h3stream"),
    ]
}

#[must_use]
pub fn trailers(fields: &[(&str, &str)]) -> HeaderList {
    fields.iter().map(|(n, v)| Header::new(*n, *v)).collect()
}
