//! Redirect hook point.
//!
//! The native stack never follows redirects. After every response the
//! handler asks its [`RedirectPolicy`] for a follow-up request, as long as
//! automatic redirects are enabled and the redirect budget is not spent.

use crate::http::{HttpRequest, HttpResponse};

pub trait RedirectPolicy: Send + Sync {
    /// The request to issue next, or `None` to hand `response` back to the
    /// caller. `request` carries the effective URI of the exchange.
    fn redirect_request(&self, request: &HttpRequest, response: &HttpResponse)
        -> Option<HttpRequest>;
}

/// Never produces a follow-up request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRedirects;

impl RedirectPolicy for NoRedirects {
    fn redirect_request(
        &self,
        _request: &HttpRequest,
        _response: &HttpResponse,
    ) -> Option<HttpRequest> {
        None
    }
}
