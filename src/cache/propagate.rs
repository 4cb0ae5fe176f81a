//! Carries a request's cache key from the request hook to the response hook.
//!
//! The key travels in the reserved `X-HTTP-REQUEST-ID` request header. The
//! proxy hands the same request value to both hooks, so the header is the
//! only state the two phases share. The header is forwarded to the origin as
//! part of the request; origins are expected to ignore it.

use crate::http::Request;

/// Reserved request header holding the cache key of an in-flight exchange.
pub const REQUEST_ID_HEADER: &str = "X-HTTP-REQUEST-ID";

/// Attaches `key` to `request`, replacing any value a client may have sent.
pub fn attach(request: &mut Request, key: &str) {
    request.headers_mut().set(REQUEST_ID_HEADER, key);
}

/// Recovers the key attached by [`attach`]. Empty values count as absent.
pub fn recover(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .map(str::trim)
        .filter(|key| !key.is_empty())
}
