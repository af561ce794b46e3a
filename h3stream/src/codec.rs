// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Turns decoded header blocks into request headers and trailers the HTTP
// layer can trust.

use h3stream_common::{qdebug, Header, HeaderList, HeadersExt as _};

use crate::{
    headers_checks::{headers_valid, parse_content_length, trailers_valid, value_valid},
    Error, HeadersWithUnderscoresAction, Res, StatsCell,
};

#[derive(Debug, Clone, Copy)]
pub struct HeaderCodec {
    max_headers: usize,
    underscores: HeadersWithUnderscoresAction,
    allow_extended_connect: bool,
}

impl HeaderCodec {
    #[must_use]
    pub const fn new(
        max_headers: usize,
        underscores: HeadersWithUnderscoresAction,
        allow_extended_connect: bool,
    ) -> Self {
        Self {
            max_headers,
            underscores,
            allow_extended_connect,
        }
    }

    /// Apply the underscore policy and the value checks to every field,
    /// keeping the ones that survive.
    fn filter_fields(&self, list: &HeaderList, stats: &StatsCell) -> Res<Vec<Header>> {
        let mut fields = Vec::with_capacity(list.len());
        for h in list {
            if !h.is_pseudo() && h.name().contains('_') {
                match self.underscores {
                    HeadersWithUnderscoresAction::Allow => {}
                    HeadersWithUnderscoresAction::DropHeader => {
                        qdebug!("dropping header with underscore: {}", h.name());
                        stats.borrow_mut().dropped_headers_with_underscores += 1;
                        continue;
                    }
                    HeadersWithUnderscoresAction::RejectRequest => {
                        qdebug!("rejecting request with header {}", h.name());
                        stats.borrow_mut().requests_rejected_with_underscores_in_headers += 1;
                        return Err(Error::UnderscoreInHeaderName);
                    }
                }
            }
            if !value_valid(h) {
                return Err(Error::InvalidHeader);
            }
            fields.push(h.clone());
        }
        Ok(fields)
    }

    /// Validate a request header block.
    ///
    /// # Errors
    ///
    /// The first check that fails, in this order: decompression did not
    /// finish, the block is empty, a field is malformed or rejected by the
    /// underscore policy, there are too many fields, pseudo-headers are
    /// wrong, `content-length` is malformed, extended CONNECT is used
    /// without being allowed.
    pub fn decode_request_headers(
        &self,
        list: &HeaderList,
        stats: &StatsCell,
    ) -> Res<Vec<Header>> {
        if !list.is_complete() {
            return Err(Error::DecompressionIncomplete);
        }
        if list.is_empty() {
            return Err(Error::EmptyHeaderBlock);
        }
        let fields = self.filter_fields(list, stats)?;
        if fields.len() > self.max_headers {
            stats.borrow_mut().header_overflow += 1;
            return Err(Error::TooManyHeaders);
        }
        headers_valid(&fields)?;
        content_length(&fields)?;
        if !self.allow_extended_connect && fields.iter().find_header(":protocol").is_some() {
            return Err(Error::ExtendedConnectNotAllowed);
        }
        Ok(fields)
    }

    /// Validate a trailer block.
    ///
    /// # Errors
    ///
    /// As for headers, except that pseudo-headers are not allowed at all and
    /// an oversized block is `TooManyTrailers`.
    pub fn decode_request_trailers(
        &self,
        list: &HeaderList,
        stats: &StatsCell,
    ) -> Res<Vec<Header>> {
        if !list.is_complete() {
            return Err(Error::DecompressionIncomplete);
        }
        let fields = self.filter_fields(list, stats)?;
        if fields.len() > self.max_headers {
            stats.borrow_mut().header_overflow += 1;
            return Err(Error::TooManyTrailers);
        }
        trailers_valid(&fields)?;
        Ok(fields)
    }
}

/// The declared body length. Repeated `content-length` fields have to agree.
///
/// # Errors
///
/// `InvalidHeader` if a value is not a decimal number or values differ.
pub(crate) fn content_length(headers: &[Header]) -> Res<Option<u64>> {
    let mut length = None;
    for h in headers.iter().filter(|h| h.name() == "content-length") {
        let v = parse_content_length(h.value())?;
        if length.is_some_and(|l| l != v) {
            return Err(Error::InvalidHeader);
        }
        length = Some(v);
    }
    Ok(length)
}
