// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt::{self, Display, Formatter};

/// A single header field as it comes out of the QPACK decoder.
#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone)]
pub struct Header {
    name: String,
    /// Field values are not guaranteed to be UTF-8 (`obs-text`).
    value: Vec<u8>,
}

impl Header {
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Try to interpret the header value as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error if the value contains invalid UTF-8.
    pub fn value_utf8(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.value)
    }

    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }

    /// The number of bytes this field contributes to an uncompressed header
    /// block, excluding the per-field overhead QPACK accounts for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.name.len() + self.value.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, String::from_utf8_lossy(&self.value))
    }
}

pub trait HeadersExt<'h> {
    fn find_header<T: AsRef<str> + 'h>(self, name: T) -> Option<&'h Header>;
}

impl<'h, H> HeadersExt<'h> for H
where
    H: IntoIterator<Item = &'h Header> + 'h,
{
    fn find_header<T: AsRef<str> + 'h>(self, name: T) -> Option<&'h Header> {
        let name = name.as_ref();
        self.into_iter().find(|h| h.name == name)
    }
}

/// A header block as delivered by the transport once a HEADERS frame has
/// been decoded.
///
/// The transport can hand over a block that it failed to decompress in full
/// (for example when the QPACK decoder gave up); `is_complete` reports that.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderList {
    fields: Vec<Header>,
    complete: bool,
}

impl HeaderList {
    #[must_use]
    pub const fn new(fields: Vec<Header>) -> Self {
        Self {
            fields,
            complete: true,
        }
    }

    /// A block whose decompression did not finish.
    #[must_use]
    pub const fn incomplete(fields: Vec<Header>) -> Self {
        Self {
            fields,
            complete: false,
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.fields.iter()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<Header> for HeaderList {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Display for HeaderList {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{{ ")?;
        for h in &self.fields {
            write!(f, "{h}, ")?;
        }
        write!(f, "}}")
    }
}
