//! Header bridge between [`Headers`] and native string-list pairs.
//!
//! # Design
//! Encoding produces one `StringsList` for names and one for values with a
//! shared count. Decoding walks the pairs and routes each one by name: the
//! fixed set of representation headers goes to the response's content
//! headers, everything else to its message headers. Duplicates are appended
//! without validation.

use crate::abi::RawHeaders;
use crate::error::HttpError;
use crate::http::{Headers, HttpResponse};
use crate::strings::{decode_raw_item, StringsList};

/// Header names that describe the body rather than the message.
pub const KNOWN_CONTENT_HEADERS: [&str; 11] = [
    "Allow",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Range",
    "Content-Type",
    "Expires",
    "Last-Modified",
];

pub fn is_content_header(name: &str) -> bool {
    KNOWN_CONTENT_HEADERS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

/// An owned native header mapping.
pub struct HeaderList {
    count: usize,
    names: StringsList,
    values: StringsList,
}

impl HeaderList {
    pub fn encode(headers: &Headers) -> Result<Self, HttpError> {
        let names = StringsList::new(headers.iter().map(|(name, _)| name))?;
        let values = StringsList::new(headers.iter().map(|(_, value)| value))?;
        Self::from_lists(names, values)
    }

    /// Pair two lists. Their counts must match.
    pub fn from_lists(names: StringsList, values: StringsList) -> Result<Self, HttpError> {
        if names.count() != values.count() {
            return Err(HttpError::InvariantViolation(format!(
                "{} header names but {} values",
                names.count(),
                values.count()
            )));
        }
        Ok(Self {
            count: names.count(),
            names,
            values,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_raw(&self) -> RawHeaders {
        RawHeaders {
            count: self.count,
            names: self.names.as_raw(),
            values: self.values.as_raw(),
        }
    }

    /// Transfer ownership into a raw struct; see [`HeaderList::from_raw`].
    pub fn into_raw(self) -> RawHeaders {
        RawHeaders {
            count: self.count,
            names: self.names.into_raw(),
            values: self.values.into_raw(),
        }
    }

    /// # Safety
    /// `raw` must come from [`HeaderList::into_raw`] and not be reclaimed
    /// twice.
    pub unsafe fn from_raw(raw: RawHeaders) -> Self {
        Self {
            count: raw.count,
            names: StringsList::from_raw(raw.names, raw.count),
            values: StringsList::from_raw(raw.values, raw.count),
        }
    }
}

/// Decode every pair of a raw mapping in order.
///
/// # Safety
/// `raw.names` and `raw.values` must each hold `raw.count` valid entries.
pub unsafe fn decode_raw(raw: &RawHeaders) -> Result<Headers, HttpError> {
    let mut headers = Headers::new();
    for index in 0..raw.count {
        let name = decode_raw_item(&raw.names, index)?;
        let value = decode_raw_item(&raw.values, index)?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Decode a raw mapping into the response's two header buckets.
///
/// # Safety
/// Same contract as [`decode_raw`].
pub unsafe fn copy_to(raw: &RawHeaders, response: &mut HttpResponse) -> Result<(), HttpError> {
    for index in 0..raw.count {
        let name = decode_raw_item(&raw.names, index)?;
        let value = decode_raw_item(&raw.values, index)?;
        let target = if is_content_header(&name) {
            &mut response.content_headers
        } else {
            &mut response.headers
        };
        target.append(name, value);
    }
    Ok(())
}
