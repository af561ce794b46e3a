// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{Error, Res};

/// A stream's receive window has to be larger than this.
pub const MIN_RECEIVE_WINDOW: u64 = 8 * 1024;
const DEFAULT_RECEIVE_WINDOW: u64 = 16 * 1024 * 1024;

/// What to do with a request header whose name contains `_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadersWithUnderscoresAction {
    #[default]
    Allow,
    /// Remove the field and carry on.
    DropHeader,
    /// Reject the whole request.
    RejectRequest,
}

/// Per-stream settings. These are fixed when the stream is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    receive_window: u64,
    headers_with_underscores_action: HeadersWithUnderscoresAction,
    override_stream_error_on_invalid_http_message: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            receive_window: DEFAULT_RECEIVE_WINDOW,
            headers_with_underscores_action: HeadersWithUnderscoresAction::Allow,
            override_stream_error_on_invalid_http_message: false,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn get_receive_window(&self) -> u64 {
        self.receive_window
    }

    /// Set the flow control window of the stream. This also sizes the send
    /// buffer watermarks.
    #[must_use]
    pub const fn receive_window(mut self, window: u64) -> Self {
        self.receive_window = window;
        self
    }

    #[must_use]
    pub const fn get_headers_with_underscores_action(&self) -> HeadersWithUnderscoresAction {
        self.headers_with_underscores_action
    }

    #[must_use]
    pub const fn headers_with_underscores_action(
        mut self,
        action: HeadersWithUnderscoresAction,
    ) -> Self {
        self.headers_with_underscores_action = action;
        self
    }

    /// When set, a malformed request resets only its stream instead of
    /// closing the connection.
    #[must_use]
    pub const fn override_stream_error_on_invalid_http_message(mut self, v: bool) -> Self {
        self.override_stream_error_on_invalid_http_message = v;
        self
    }

    #[must_use]
    pub const fn close_connection_on_invalid_header(&self) -> bool {
        !self.override_stream_error_on_invalid_http_message
    }

    /// Send buffer high watermark.
    #[must_use]
    pub const fn high_watermark(&self) -> u64 {
        self.receive_window
    }

    /// Send buffer low watermark.
    #[must_use]
    pub const fn low_watermark(&self) -> u64 {
        self.receive_window / 2
    }

    /// # Errors
    ///
    /// `ReceiveWindowTooSmall` if the receive window is not above
    /// [`MIN_RECEIVE_WINDOW`].
    pub const fn validate(&self) -> Res<()> {
        if self.receive_window <= MIN_RECEIVE_WINDOW {
            return Err(Error::ReceiveWindowTooSmall(self.receive_window));
        }
        Ok(())
    }
}
