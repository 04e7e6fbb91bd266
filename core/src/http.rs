//! Request and response types on the managed side of the bridge.
//!
//! # Design
//! These types describe HTTP messages as plain data. `Headers` is an ordered
//! list of name/value pairs with case-insensitive lookup; appending never
//! validates or rejects a name, so whatever the native stack returns can be
//! stored as-is.
//!
//! Request content headers and message headers are kept in separate groups,
//! and the response mirrors that split: known representation headers land in
//! `content_headers`, everything else in `headers`.

use std::fmt;

use url::Url;

use crate::error::HttpError;
use crate::stream::ResponseBody;

/// HTTP method as an ASCII token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
    /// Any other token, passed through verbatim.
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Other(token) => token,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header collection with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Duplicates are kept; nothing is validated.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace every value stored under `name` with `value`. The entry keeps
    /// the position of the first match, or is appended when there is none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let Some(first) = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(&name))
        else {
            self.entries.push((name, value));
            return;
        };
        self.entries[first].1 = value;
        let mut index = 0;
        self.entries.retain(|(key, _)| {
            let keep = index <= first || !key.eq_ignore_ascii_case(&name);
            index += 1;
            keep
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One entry per case-insensitive name, in first-seen order, with
    /// repeated values joined by commas.
    pub fn flatten(&self) -> Headers {
        let mut flattened: Vec<(String, String)> = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            match flattened
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some((_, joined)) => {
                    joined.push(',');
                    joined.push_str(value);
                }
                None => flattened.push((name.clone(), value.clone())),
            }
        }
        Headers { entries: flattened }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// An HTTP request for the native stack.
///
/// The request body is not carried across the boundary; `content_headers`
/// still describe the representation and are sent with the request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: Url,
    pub headers: Headers,
    pub content_headers: Headers,
}

impl HttpRequest {
    /// Build a request for an absolute URI.
    pub fn new(method: HttpMethod, uri: &str) -> Result<Self, HttpError> {
        if uri.trim().is_empty() {
            return Err(HttpError::Argument("request URI is required".to_string()));
        }
        let uri = Url::parse(uri)
            .map_err(|e| HttpError::Argument(format!("request URI {uri:?} is not absolute: {e}")))?;
        Ok(Self::from_url(method, uri))
    }

    pub fn from_url(method: HttpMethod, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            content_headers: Headers::new(),
        }
    }

    pub fn get(uri: &str) -> Result<Self, HttpError> {
        Self::new(HttpMethod::Get, uri)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_content_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.content_headers.append(name, value);
        self
    }
}

/// An HTTP response produced by the native stack.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// The URI the native stack actually connected to.
    pub connection_uri: Url,
    pub headers: Headers,
    pub content_headers: Headers,
    pub body: ResponseBody,
    /// The request this response answers, with its effective URI.
    pub request: Option<HttpRequest>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Serialize a URI for the native stack.
///
/// `Url` drops a port equal to the scheme's default while parsing, so the
/// serialization never carries `:80` for http or `:443` for https.
pub fn encode_uri(uri: &Url) -> String {
    uri.as_str().to_string()
}
