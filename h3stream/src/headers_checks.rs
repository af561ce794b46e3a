// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use enumset::{EnumSet, EnumSetType};
use h3stream_common::Header;

use crate::{Error, Res};

#[derive(EnumSetType, Debug)]
enum PseudoHeaderState {
    Method,
    Scheme,
    Authority,
    Path,
    Protocol,
    None,
}

/// Check whether the response is informational(1xx).
/// # Errors
/// Returns an error if response headers do not start with
/// a status header or if the value of the header cannot be parsed.
pub fn is_interim(headers: &[Header]) -> Res<bool> {
    let status = headers.iter().take(1).find(|h| h.name() == ":status");
    if let Some(h) = status {
        let status_code = h
            .value_utf8()
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .ok_or(Error::InvalidHeader)?;
        Ok((100..200).contains(&status_code))
    } else {
        Err(Error::InvalidHeader)
    }
}

fn track_pseudo(name: &str, state: &mut EnumSet<PseudoHeaderState>) -> Res<bool> {
    let (pseudo, bit) = if name.starts_with(':') {
        if state.contains(PseudoHeaderState::None) {
            // Pseudo-headers after regular ones.
            return Err(Error::InvalidHeader);
        }
        let bit = match name {
            ":method" => PseudoHeaderState::Method,
            ":scheme" => PseudoHeaderState::Scheme,
            ":authority" => PseudoHeaderState::Authority,
            ":path" => PseudoHeaderState::Path,
            ":protocol" => PseudoHeaderState::Protocol,
            _ => return Err(Error::InvalidHeader),
        };
        (true, bit)
    } else {
        (false, PseudoHeaderState::None)
    };

    if !state.contains(bit) || !pseudo {
        state.insert(bit);
        Ok(pseudo)
    } else {
        Err(Error::InvalidHeader)
    }
}

/// Checks if request headers are well formed, i.e. contain
/// allowed pseudo headers and in a right order, etc.
/// # Errors
/// Returns an error if headers are not well formed.
pub fn headers_valid(headers: &[Header]) -> Res<()> {
    let mut method_value: Option<&[u8]> = None;
    let mut pseudo_state = EnumSet::new();
    for header in headers {
        let is_pseudo = track_pseudo(header.name(), &mut pseudo_state)?;

        let mut bytes = header.name().bytes();
        if is_pseudo {
            if header.name() == ":method" {
                method_value = Some(header.value());
            }
            _ = bytes.next();
        }

        if bytes.any(|b| matches!(b, 0 | 0x0a | 0x0d | 0x3a | 0x41..=0x5a)) {
            return Err(Error::InvalidHeader); // illegal characters.
        }
    }
    let is_connect = method_value == Some(b"CONNECT".as_slice());
    // Clear the regular header bit, since we only check pseudo headers below.
    pseudo_state.remove(PseudoHeaderState::None);
    let pseudo_header_mask = if is_connect && !pseudo_state.contains(PseudoHeaderState::Protocol)
    {
        PseudoHeaderState::Method | PseudoHeaderState::Authority
    } else {
        PseudoHeaderState::Method | PseudoHeaderState::Scheme | PseudoHeaderState::Path
    };

    if pseudo_state.contains(PseudoHeaderState::Protocol) && !is_connect {
        return Err(Error::InvalidHeader);
    }

    if pseudo_state & pseudo_header_mask != pseudo_header_mask {
        return Err(Error::InvalidHeader);
    }

    Ok(())
}

/// Checks if trailers are well formed, i.e. pseudo headers are not
/// allowed in trailers.
/// # Errors
/// Returns an error if trailers are not well formed.
pub fn trailers_valid(headers: &[Header]) -> Res<()> {
    for header in headers {
        if header.is_pseudo() {
            return Err(Error::InvalidHeader);
        }
    }
    Ok(())
}

/// Field values must not contain NUL, CR or LF.
pub(crate) fn value_valid(header: &Header) -> bool {
    !header.value().iter().any(|b| matches!(b, 0 | b'\r' | b'\n'))
}

/// Parse a `content-length` value. Only plain decimal digits are accepted.
pub(crate) fn parse_content_length(value: &[u8]) -> Res<u64> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(Error::InvalidHeader);
    }
    value.iter().try_fold(0_u64, |acc, &d| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(d - b'0')))
            .ok_or(Error::InvalidHeader)
    })
}
