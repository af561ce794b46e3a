// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

/*!

# The HTTP/3 server request stream

This crate adapts one bidirectional QUIC stream to an HTTP request/response
exchange on the server side. It sits between two parties it does not own:

 - the QUIC connection, seen through the [`Session`] trait. The connection
   reassembles inbound bytes (the sequencer), buffers outbound bytes and sends
   frames. It calls into [`ServerStream`] when something happens on the stream
   (`on_initial_headers`, `on_body_available`, `on_stop_sending`, ...).
 - the HTTP layer, seen through [`RequestDecoder`] (request headers, body and
   trailers are pushed into it) and [`StreamCallbacks`] (reset and
   backpressure notifications). The HTTP layer calls `encode_headers`,
   `encode_data`, `encode_trailers` and `reset_stream` on the stream.

Everything runs on one thread; every call completes synchronously.

## Lifecycle

The stream is `Open` when created. Sending the final response chunk closes the
write side, delivering the end of the request closes the read side; see
[`StreamState`]. Resets, `STOP_SENDING`, `RESET_STREAM` and connection closure
close one or both sides early and raise a reset notification at most once per
stream.

*/

mod byte_meter;
mod codec;
mod config;
mod headers_checks;
mod reset;
mod server_stream;
mod session;
mod stats;
mod stream_state;
mod watermark;

pub use byte_meter::{ByteCounter, BytesMeter};
pub use codec::HeaderCodec;
pub use config::{HeadersWithUnderscoresAction, StreamConfig, MIN_RECEIVE_WINDOW};
pub use headers_checks::{headers_valid, is_interim, trailers_valid};
pub use reset::{
    AppError, CloseSource, ResetCategory, ResetDirection, ResetReason, BAD_APPLICATION_PAYLOAD,
    H3_CONNECT_ERROR, H3_EXCESSIVE_LOAD, H3_FRAME_ERROR, H3_FRAME_UNEXPECTED,
    H3_GENERAL_PROTOCOL_ERROR, H3_INTERNAL_ERROR, H3_MESSAGE_ERROR, H3_NO_ERROR,
    H3_REQUEST_CANCELLED, H3_REQUEST_INCOMPLETE, H3_REQUEST_REJECTED,
};
pub use server_stream::ServerStream;
pub use session::{BufferMemoryAccount, RequestDecoder, Session, StreamCallbacks, StreamFrame};
pub use stats::{Stats, StatsCell};
pub use stream_state::{LifecycleAction, StreamLifecycle, StreamState};
pub use watermark::{SendBufferMonitor, WatermarkEvent};

pub type Res<T> = Result<T, Error>;

/// Short reason strings recorded when the stream rejects a request.
pub mod details {
    pub const HEADERS_TOO_LARGE: &str = "http3.headers_too_large";
    pub const INVALID_HTTP_HEADER: &str = "http3.invalid_header_field";
    pub const TOO_MANY_HEADERS: &str = "http3.too_many_headers";
    pub const TOO_MANY_TRAILERS: &str = "http3.too_many_trailers";
    pub const INVALID_UNDERSCORE: &str = "http3.unexpected_underscore";
    pub const INCONSISTENT_CONTENT_LENGTH: &str = "http3.inconsistent_content_length";
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("header block exceeds the size limit")]
    HeadersTooLarge,
    #[error("header block was not fully decompressed")]
    DecompressionIncomplete,
    #[error("empty header block")]
    EmptyHeaderBlock,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("too many trailers")]
    TooManyTrailers,
    #[error("invalid header")]
    InvalidHeader,
    #[error("header name contains an underscore")]
    UnderscoreInHeaderName,
    #[error("extended CONNECT was not negotiated")]
    ExtendedConnectNotAllowed,
    #[error("trailers did not end the stream")]
    TrailersWithoutFin,
    #[error("body length does not match content-length")]
    InconsistentContentLength,
    #[error("transport did not accept the whole body")]
    BadApplicationPayload,
    #[error("receive window {0} is not larger than {min}", min = MIN_RECEIVE_WINDOW)]
    ReceiveWindowTooSmall(u64),
    #[error("not an informational response")]
    NotInterimResponse,
}

impl Error {
    /// The code the stream is reset with when this error is handled by
    /// resetting the stream alone.
    #[must_use]
    pub const fn code(&self) -> AppError {
        match self {
            Self::HeadersTooLarge | Self::TooManyHeaders | Self::TooManyTrailers => {
                H3_EXCESSIVE_LOAD
            }
            Self::BadApplicationPayload => BAD_APPLICATION_PAYLOAD,
            Self::ReceiveWindowTooSmall(_) => H3_INTERNAL_ERROR,
            Self::DecompressionIncomplete
            | Self::EmptyHeaderBlock
            | Self::InvalidHeader
            | Self::UnderscoreInHeaderName
            | Self::ExtendedConnectNotAllowed
            | Self::TrailersWithoutFin
            | Self::InconsistentContentLength
            | Self::NotInterimResponse => H3_MESSAGE_ERROR,
        }
    }

    #[must_use]
    pub const fn details(&self) -> &'static str {
        match self {
            Self::HeadersTooLarge => details::HEADERS_TOO_LARGE,
            Self::TooManyHeaders => details::TOO_MANY_HEADERS,
            Self::TooManyTrailers => details::TOO_MANY_TRAILERS,
            Self::UnderscoreInHeaderName => details::INVALID_UNDERSCORE,
            Self::InconsistentContentLength => details::INCONSISTENT_CONTENT_LENGTH,
            _ => details::INVALID_HTTP_HEADER,
        }
    }

    /// Some failures decide for themselves whether the connection has to go;
    /// `None` leaves it to the stream's configured policy.
    #[must_use]
    pub const fn close_connection_override(&self) -> Option<bool> {
        match self {
            Self::HeadersTooLarge | Self::InconsistentContentLength => Some(false),
            _ => None,
        }
    }
}
