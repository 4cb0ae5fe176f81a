//! HTTP/1.x request parsing using the [`httparse`] crate.
//!
//! Proxy clients send absolute-form targets (`GET http://host/path HTTP/1.1`);
//! origin-form targets are accepted too and resolved against `Host`.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::body::BodyError;
use super::{Headers, Method, protocol};

/// Errors that can occur while parsing an HTTP/1.x request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid request body: {0}")]
    Body(#[from] BodyError),

    #[error("declared body of {declared} bytes exceeds the {limit} byte limit")]
    TooLarge { declared: usize, limit: usize },
}

/// A parsed HTTP/1.x request.
///
/// Created by [`Request::parse`] from a raw byte buffer, or assembled with
/// [`Request::new`] and the builder methods. The body is a [`Bytes`] buffer,
/// so reading it never consumes it: the same bytes are fingerprinted and
/// forwarded.
///
/// # Examples
///
/// ```
/// use hcproxy::http::request::Request;
///
/// let raw = b"GET http://api.local/orders?page=2 HTTP/1.1\r\nHost: api.local\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.url(), "http://api.local/orders?page=2");
/// assert_eq!(request.protocol(), "HTTP/1.1");
/// assert_eq!(request.headers().get("host"), Some("api.local"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.x request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. The body holds the bytes after the head, capped at the declared
    /// `Content-Length`; it may be shorter than declared when `buf` is
    /// truncated. Callers that frame bodies themselves replace it with
    /// [`set_body`](Self::set_body).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request head.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, target, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(token) => token.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;
        let headers = Headers::from_parsed(raw_req.headers);

        let rest = &buf[body_offset..];
        let declared = super::body::content_length(&headers).ok().flatten();
        let body = match declared {
            Some(n) => Bytes::copy_from_slice(&rest[..n.min(rest.len())]),
            None => Bytes::copy_from_slice(rest),
        };

        Ok((
            Self {
                method,
                target,
                version,
                headers,
                body,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the absolute URL of the request.
    ///
    /// Absolute-form targets are returned verbatim; origin-form targets are
    /// resolved as `http://<Host><target>`.
    pub fn url(&self) -> Cow<'_, str> {
        if self.target.contains("://") {
            Cow::Borrowed(&self.target)
        } else {
            let host = self.headers.get("host").unwrap_or_default();
            Cow::Owned(format!("http://{host}{}", self.target))
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the protocol token, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        protocol(self.version)
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the request body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Returns `true` if the client connection should be kept alive after this request.
    ///
    /// Honors both `Connection` and the non-standard `Proxy-Connection` header.
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    pub fn is_keep_alive(&self) -> bool {
        for name in ["connection", "proxy-connection"] {
            if self.headers.has_token(name, "close") {
                return false;
            }
            if self.headers.has_token(name, "keep-alive") {
                return true;
            }
        }
        self.version == 1
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Serializes the request as received: request line, headers, blank line, body.
    ///
    /// Used for diagnostic dumps.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + self.body.len());
        buf.put(format!("{} {} {}\r\n", self.method, self.target, self.protocol()).as_bytes());
        self.headers.write_to(&mut buf);
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute_form_get() {
        let raw = b"GET http://example.com/orders HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.target(), "http://example.com/orders");
        assert_eq!(req.url(), "http://example.com/orders");
        assert_eq!(req.version(), 1);
        assert_eq!(offset, raw.len());
        assert!(req.body().is_empty());
    }

    #[test]
    fn origin_form_resolves_against_host() {
        let raw = b"GET /orders?id=7 HTTP/1.0\r\nHost: backend:8080\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.url(), "http://backend:8080/orders?id=7");
        assert_eq!(req.protocol(), "HTTP/1.0");
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_is_capped_at_content_length() {
        let raw = b"POST http://h/soap HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET ";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.body().as_ref(), b"hello");
        assert_eq!(&raw[body_offset..body_offset + 5], b"hello");
    }

    #[test]
    fn truncated_body_is_kept_short() {
        let raw = b"POST http://h/soap HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"abc");
        assert_eq!(req.content_length(), Some(10));
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET http://h/ HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());

        let (req, _) =
            Request::parse(b"GET http://h/ HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());

        let (req, _) =
            Request::parse(b"GET http://h/ HTTP/1.0\r\nProxy-Connection: keep-alive\r\n\r\n")
                .unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn lowercase_method_is_kept_verbatim() {
        let (req, _) = Request::parse(b"get http://h/ HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), &Method::Custom("get".into()));
        assert!(req.method().eq_ignore_case("GET"));
    }
}
