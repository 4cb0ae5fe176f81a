//! Wire-faithful HTTP/1.x responses.
//!
//! A [`Response`] keeps the status line, header order, header name casing and
//! body exactly as read, so that [`Response::to_bytes`] reproduces the message
//! an origin sent. Cache entries are these bytes; replaying one is
//! [`Response::parse`] followed by writing [`Response::to_bytes`] to the client.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, StatusCode, protocol};

/// Errors that can occur while parsing an HTTP/1.x response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("response body is truncated: Content-Length {declared}, got {actual} bytes")]
    Truncated { declared: usize, actual: usize },
}

/// An HTTP/1.x response.
///
/// # Examples
///
/// ```
/// use hcproxy::http::Response;
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nX-Origin: a\r\n\r\nok";
/// let response = Response::parse(raw).unwrap();
///
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.reason(), "OK");
/// assert_eq!(response.body().as_ref(), b"ok");
/// assert_eq!(&response.to_bytes()[..], &raw[..]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    status: u16,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Maximum number of headers we accept in a response.
    const MAX_HEADERS: usize = 128;

    /// Creates an HTTP/1.1 response with the canonical reason phrase, no
    /// headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: 1,
            status: status.as_u16(),
            reason: status.canonical_reason().to_owned(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// A plain-text response generated by the proxy itself. Carries
    /// `Content-Length` and `Connection: close`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Content-Length", message.len().to_string())
            .header("Connection", "close")
            .with_body(message)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body. Framing headers are left untouched.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parses the status line and headers at the start of `buf`.
    ///
    /// Returns the response with an empty body and the offset at which the
    /// body begins.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the head is not complete yet.
    /// - [`ResponseError::Parse`] — the head is malformed.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let version = raw
            .version
            .ok_or(ResponseError::MissingField { field: "version" })?;
        let status = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;

        Ok((
            Self {
                version,
                status,
                reason: raw.reason.unwrap_or_default().to_owned(),
                headers: Headers::from_parsed(raw.headers),
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    /// Parses a complete serialized response, such as a cache entry.
    ///
    /// Everything after the head is the body. A body shorter than a declared
    /// `Content-Length` is rejected.
    pub fn parse(buf: &[u8]) -> Result<Self, ResponseError> {
        let (mut response, offset) = Self::parse_head(buf)?;
        let body = &buf[offset..];
        if let Some(declared) = response.content_length() {
            if body.len() < declared {
                return Err(ResponseError::Truncated {
                    declared,
                    actual: body.len(),
                });
            }
        }
        response.body = Bytes::copy_from_slice(body);
        Ok(response)
    }

    /// Returns the numeric status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase as received.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the HTTP minor version number.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the response body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the response body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the response asks for the connection to be closed.
    pub fn is_close(&self) -> bool {
        self.headers.has_token("connection", "close")
    }

    /// Re-frames a fully buffered body with `Content-Length`, dropping any
    /// `Transfer-Encoding`. Makes the serialized form self-delimiting.
    pub fn frame_with_length(&mut self) {
        self.headers.remove("transfer-encoding");
        self.headers
            .set("Content-Length", self.body.len().to_string());
    }

    /// Serializes the response in HTTP/1.x wire format.
    ///
    /// Nothing is added or reordered: the output is the status line, the
    /// headers in order, a blank line and the body.
    pub fn to_bytes(&self) -> Bytes {
        let estimated_size = 64 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "{} {} {}\r\n",
                protocol(self.version),
                self.status,
                self.reason
            )
            .as_bytes(),
        );
        self.headers.write_to(&mut buf);
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_byte_exact() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-type: text/xml\r\nContent-Length: 11\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n<ok>1</ok>\n";
        let parsed = Response::parse(raw).unwrap();
        assert_eq!(parsed.status(), 200);
        assert_eq!(parsed.headers().get_all("set-cookie").count(), 2);
        assert_eq!(&parsed.to_bytes()[..], raw);

        let reparsed = Response::parse(&parsed.to_bytes()).unwrap();
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn keeps_non_canonical_reason_phrase() {
        let raw: &[u8] = b"HTTP/1.0 299 Mostly Fine\r\nContent-Length: 0\r\n\r\n";
        let parsed = Response::parse(raw).unwrap();
        assert_eq!(parsed.reason(), "Mostly Fine");
        assert_eq!(parsed.version(), 0);
        assert_eq!(&parsed.to_bytes()[..], raw);
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            Response::parse(raw),
            Err(ResponseError::Truncated {
                declared: 10,
                actual: 3
            })
        ));
    }

    #[test]
    fn incomplete_head() {
        assert!(matches!(
            Response::parse(b"HTTP/1.1 200 OK\r\nContent-"),
            Err(ResponseError::Incomplete)
        ));
    }

    #[test]
    fn frame_with_length_replaces_chunked() {
        let mut r = Response::new(StatusCode::Ok)
            .header("Transfer-Encoding", "chunked")
            .with_body("hello");
        r.frame_with_length();
        assert!(!r.headers().contains("transfer-encoding"));
        assert_eq!(r.content_length(), Some(5));
    }

    #[test]
    fn error_response_is_self_describing() {
        let r = Response::error(StatusCode::BadGateway, "upstream down");
        let text = String::from_utf8(r.to_bytes().to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Content-Length: 13\r\n"));
        assert!(text.ends_with("\r\n\r\nupstream down"));
        assert!(r.is_close());
    }
}
