//! Cookie storage used by the handler.
//!
//! The handler stores every response's `Set-Cookie` values as one
//! comma-joined string and asks for a single-line `Cookie` value before each
//! request. [`CookieStoreJar`] backs that with `cookie_store`.

use std::sync::{PoisonError, RwLock};

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("invalid Set-Cookie value {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: cookie::ParseError,
    },
}

pub trait CookieJar: Send + Sync {
    /// `name=value` pairs for `url` joined with `"; "`. Empty when there are
    /// none.
    fn cookie_header(&self, url: &Url) -> String;

    /// Store comma-joined `Set-Cookie` values received from `url`.
    fn set_cookies(&self, url: &Url, set_cookie: &str) -> Result<(), CookieError>;
}

#[derive(Debug, Default)]
pub struct CookieStoreJar(RwLock<cookie_store::CookieStore>);

impl CookieStoreJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for CookieStoreJar {
    fn cookie_header(&self, url: &Url) -> String {
        let store = self.0.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookies(&self, url: &Url, set_cookie: &str) -> Result<(), CookieError> {
        let cookies = split_set_cookie(set_cookie)
            .into_iter()
            .map(|value| {
                cookie::Cookie::parse(value.clone())
                    .map_err(|source| CookieError::Parse { value, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = self.0.write().unwrap_or_else(PoisonError::into_inner);
        store.store_response_cookies(cookies.into_iter(), url);
        Ok(())
    }
}

/// Split comma-joined `Set-Cookie` values back into single cookies.
///
/// `Expires` dates contain a comma, so a piece only starts a new cookie when
/// the text before its first `;` looks like `name=value` with no space in the
/// name.
pub fn split_set_cookie(joined: &str) -> Vec<String> {
    let mut cookies: Vec<String> = Vec::new();
    for piece in joined.split(',') {
        let starts_cookie = {
            let pair = piece.split(';').next().unwrap_or_default().trim_start();
            match pair.split_once('=') {
                Some((name, _)) => !name.is_empty() && !name.contains(' '),
                None => false,
            }
        };
        match cookies.last_mut() {
            Some(last) if !starts_cookie => {
                last.push(',');
                last.push_str(piece);
            }
            _ => cookies.push(piece.trim_start().to_string()),
        }
    }
    cookies.retain(|cookie| !cookie.trim().is_empty());
    cookies
}
