// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Translation between HTTP/3 application error codes and the reset reasons
// reported to the HTTP layer.

use enum_map::Enum;
use strum::{Display, EnumIter};

/// An HTTP/3 application error code, as carried by `RESET_STREAM`,
/// `STOP_SENDING` and `CONNECTION_CLOSE`.
pub type AppError = u64;

pub const H3_NO_ERROR: AppError = 0x100;
pub const H3_GENERAL_PROTOCOL_ERROR: AppError = 0x101;
pub const H3_INTERNAL_ERROR: AppError = 0x102;
pub const H3_FRAME_UNEXPECTED: AppError = 0x105;
pub const H3_FRAME_ERROR: AppError = 0x106;
pub const H3_EXCESSIVE_LOAD: AppError = 0x107;
pub const H3_REQUEST_REJECTED: AppError = 0x10b;
pub const H3_REQUEST_CANCELLED: AppError = 0x10c;
pub const H3_REQUEST_INCOMPLETE: AppError = 0x10d;
pub const H3_MESSAGE_ERROR: AppError = 0x10e;
pub const H3_CONNECT_ERROR: AppError = 0x10f;

/// Used when the transport did not accept a complete body write.
pub const BAD_APPLICATION_PAYLOAD: AppError = H3_GENERAL_PROTOCOL_ERROR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, EnumIter, Display)]
pub enum ResetCategory {
    #[strum(to_string = "reset")]
    Reset,
    #[strum(to_string = "refused stream")]
    RefusedStream,
    #[strum(to_string = "connection failure")]
    ConnectionFailure,
    #[strum(to_string = "connection termination")]
    ConnectionTermination,
    #[strum(to_string = "connect error")]
    ConnectError,
    #[strum(to_string = "protocol error")]
    ProtocolError,
    #[strum(to_string = "overload")]
    Overload,
    #[strum(to_string = "unknown")]
    Unknown,
}

struct ResetCode {
    code: AppError,
    category: ResetCategory,
    /// The code sent when the HTTP layer resets with this category.
    canonical: bool,
}

const fn entry(code: AppError, category: ResetCategory, canonical: bool) -> ResetCode {
    ResetCode {
        code,
        category,
        canonical,
    }
}

/// Both directions of the translation read this one table, so a code
/// classifies the same way whether we sent it or the peer did.
const RESET_CODES: &[ResetCode] = &[
    entry(H3_NO_ERROR, ResetCategory::Reset, false),
    entry(H3_GENERAL_PROTOCOL_ERROR, ResetCategory::ProtocolError, true),
    entry(H3_INTERNAL_ERROR, ResetCategory::ConnectionFailure, true),
    entry(H3_FRAME_UNEXPECTED, ResetCategory::ProtocolError, false),
    entry(H3_FRAME_ERROR, ResetCategory::ProtocolError, false),
    entry(H3_EXCESSIVE_LOAD, ResetCategory::Overload, true),
    entry(H3_REQUEST_REJECTED, ResetCategory::RefusedStream, true),
    entry(H3_REQUEST_CANCELLED, ResetCategory::Reset, true),
    entry(H3_REQUEST_INCOMPLETE, ResetCategory::Reset, false),
    entry(H3_MESSAGE_ERROR, ResetCategory::ProtocolError, false),
    entry(H3_CONNECT_ERROR, ResetCategory::ConnectError, true),
];

impl ResetCategory {
    /// Classify an application error code. Every code has a category;
    /// codes outside the table are `Unknown`.
    #[must_use]
    pub fn from_code(code: AppError) -> Self {
        RESET_CODES
            .iter()
            .find(|e| e.code == code)
            .map_or(Self::Unknown, |e| e.category)
    }

    /// The code to put on the wire when resetting a stream for this reason.
    /// Categories without a code of their own cancel the request.
    #[must_use]
    pub fn code(self) -> AppError {
        RESET_CODES
            .iter()
            .find(|e| e.canonical && e.category == self)
            .map_or(H3_REQUEST_CANCELLED, |e| e.code)
    }

    /// Classify the error a connection was closed with. A clean close
    /// terminates the stream, anything else is a failure.
    #[must_use]
    pub const fn from_connection_error(error: u64) -> Self {
        if error == 0 {
            Self::ConnectionTermination
        } else {
            Self::ConnectionFailure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, EnumIter, Display)]
pub enum ResetDirection {
    #[strum(to_string = "local")]
    Local,
    #[strum(to_string = "remote")]
    Remote,
}

/// Who closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseSource {
    Local,
    Peer,
}

impl From<CloseSource> for ResetDirection {
    fn from(source: CloseSource) -> Self {
        match source {
            CloseSource::Local => Self::Local,
            CloseSource::Peer => Self::Remote,
        }
    }
}

/// The reason handed to reset observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResetReason {
    pub direction: ResetDirection,
    pub category: ResetCategory,
}

impl ResetReason {
    #[must_use]
    pub const fn new(direction: ResetDirection, category: ResetCategory) -> Self {
        Self {
            direction,
            category,
        }
    }

    /// We reset the stream with `code`.
    #[must_use]
    pub fn local(code: AppError) -> Self {
        Self::new(ResetDirection::Local, ResetCategory::from_code(code))
    }

    /// The peer aborted the stream with `code`.
    #[must_use]
    pub fn remote(code: AppError) -> Self {
        Self::new(ResetDirection::Remote, ResetCategory::from_code(code))
    }

    /// The connection carrying the stream went away.
    #[must_use]
    pub fn connection_closed(error: u64, source: CloseSource) -> Self {
        Self::new(
            ResetDirection::from(source),
            ResetCategory::from_connection_error(error),
        )
    }
}

impl ::std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{} {}", self.direction, self.category)
    }
}
