//! HTTP/1.x protocol types and parsing.
//!
//! This module provides the primitives the proxy moves between client,
//! cache and origin: [`Method`], [`StatusCode`], [`Headers`], [`Request`],
//! and the wire-faithful [`Response`].

use std::fmt;

pub mod body;
pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// Renders an HTTP/1.x minor version as its protocol token.
///
/// ```
/// use hcproxy::http::protocol;
///
/// assert_eq!(protocol(1), "HTTP/1.1");
/// assert_eq!(protocol(0), "HTTP/1.0");
/// ```
pub fn protocol(minor: u8) -> &'static str {
    match minor {
        0 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

/// Status codes the proxy generates itself.
///
/// Responses relayed from an origin or replayed from the cache keep their
/// numeric code and reason phrase verbatim and never go through this type.
///
/// # Examples
///
/// ```
/// use hcproxy::http::StatusCode;
///
/// let status = StatusCode::BadGateway;
/// assert_eq!(status.as_u16(), 502);
/// assert_eq!(status.canonical_reason(), "Bad Gateway");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    PayloadTooLarge = 413,
    BadGateway = 502,
    GatewayTimeout = 504,
}

impl StatusCode {
    /// Returns the numeric status code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::BadGateway => "Bad Gateway",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// Request method. Only exact uppercase tokens map to the named variants;
/// everything else is forwarded as it was received.
///
/// # Examples
///
/// ```
/// use hcproxy::http::Method;
///
/// let method: Method = "POST".parse().unwrap();
/// assert_eq!(method, Method::Post);
/// assert_eq!(method.as_str(), "POST");
/// assert!(Method::Custom("get".into()).eq_ignore_case("GET"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// Extension methods and non-canonical spellings, kept verbatim.
    Custom(String),
}

impl Method {
    /// Returns the method token as sent on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Compares the method token against `other` ignoring ASCII case.
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}
