//! Forwarding a request to its origin server and reading the response.
//!
//! Each forwarded request uses a fresh connection with `Connection: close`.
//! The response body is buffered whole. Chunked and close-delimited bodies
//! are re-framed with `Content-Length`, so the [`Response`] handed to the
//! response hook is self-delimiting when serialized.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::http::body::{self, BodyError, Framing};
use crate::http::response::ResponseError;
use crate::http::{Method, Request, Response, StatusCode};

/// Largest response head we buffer before giving up (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Largest response body we buffer (64 MiB).
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Request headers that apply to a single hop and are not forwarded.
/// `Content-Length` is dropped too and re-added from the buffered body.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Errors raised while forwarding to an origin.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid target URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {0:?}: only http:// targets are forwarded")]
    UnsupportedScheme(String),

    #[error("target URL {0:?} has no host")]
    MissingHost(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to origin: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response from origin: {0}")]
    Response(#[from] ResponseError),

    #[error("malformed response body from origin: {0}")]
    Body(#[from] BodyError),

    #[error("origin closed the connection before the response was complete")]
    Truncated,

    #[error("origin response exceeds {0} bytes")]
    TooLarge(usize),

    #[error("origin did not answer within {0:?}")]
    Timeout(Duration),
}

impl UpstreamError {
    /// Status reported to the client when forwarding fails.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GatewayTimeout,
            _ => StatusCode::BadGateway,
        }
    }
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    host: String,
    port: u16,
    /// Origin-form request target: path plus optional `?query`.
    path: String,
}

impl Target {
    pub(crate) fn from_url(raw: &str) -> Result<Self, UpstreamError> {
        let url = url::Url::parse(raw).map_err(|source| UpstreamError::InvalidUrl {
            url: raw.to_owned(),
            source,
        })?;
        if url.scheme() != "http" {
            return Err(UpstreamError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_owned(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(UpstreamError::MissingHost(raw.to_owned())),
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        Ok(Self { host, port, path })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Sends `request` to its origin and returns the complete response.
///
/// The whole exchange (connect, write, read) is bounded by `timeout`.
pub async fn forward(request: &Request, timeout: Duration) -> Result<Response, UpstreamError> {
    tokio::time::timeout(timeout, exchange(request))
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))?
}

async fn exchange(request: &Request) -> Result<Response, UpstreamError> {
    let target = Target::from_url(&request.url())?;
    let mut stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|source| UpstreamError::Connect {
            addr: target.authority(),
            source,
        })?;
    debug!(origin = %target.authority(), path = %target.path, "forwarding request");

    stream.write_all(&encode_request(request, &target)).await?;
    stream.flush().await?;

    read_response(&mut stream, *request.method() == Method::Head).await
}

/// Serializes `request` in origin-form for `target`.
pub(crate) fn encode_request(request: &Request, target: &Target) -> BytesMut {
    let body = request.body();
    let mut buf = BytesMut::with_capacity(256 + request.headers().len() * 64 + body.len());

    buf.put(format!("{} {} {}\r\n", request.method(), target.path, request.protocol()).as_bytes());
    if !request.headers().contains("host") {
        buf.put(format!("Host: {}\r\n", target.authority()).as_bytes());
    }
    for (name, value) in request.headers().iter() {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }
    if !body.is_empty() || request.headers().contains("content-length") {
        buf.put(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    buf.put(&b"Connection: close\r\n\r\n"[..]);
    buf.put(body.as_ref());
    buf
}

/// Reads one complete response from `reader`, skipping interim `1xx`
/// responses.
pub(crate) async fn read_response<R>(
    reader: &mut R,
    request_was_head: bool,
) -> Result<Response, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let (mut response, offset) = match Response::parse_head(&buf) {
            Ok(pair) => pair,
            Err(ResponseError::Incomplete) => {
                if buf.len() > MAX_HEAD_SIZE {
                    return Err(UpstreamError::TooLarge(MAX_HEAD_SIZE));
                }
                if reader.read_buf(&mut buf).await? == 0 {
                    return Err(UpstreamError::Truncated);
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if (100..200).contains(&response.status()) && response.status() != 101 {
            let _ = buf.split_to(offset);
            continue;
        }

        let framing = body::response_framing(request_was_head, response.status(), response.headers())?;
        let _ = buf.split_to(offset);
        let body = read_body(reader, &mut buf, framing).await?;
        response.set_body(body);
        if matches!(framing, Framing::Chunked | Framing::UntilClose) {
            response.frame_with_length();
        }
        return Ok(response);
    }
}

async fn read_body<R>(reader: &mut R, buf: &mut BytesMut, framing: Framing) -> Result<Bytes, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    match framing {
        Framing::Empty => Ok(Bytes::new()),
        Framing::Length(len) => {
            if len > MAX_BODY_SIZE {
                return Err(UpstreamError::TooLarge(MAX_BODY_SIZE));
            }
            while buf.len() < len {
                if reader.read_buf(buf).await? == 0 {
                    return Err(UpstreamError::Truncated);
                }
            }
            Ok(buf.split_to(len).freeze())
        }
        Framing::Chunked => loop {
            if let Some((decoded, _)) = body::decode_chunked(buf)? {
                return Ok(Bytes::from(decoded));
            }
            if buf.len() > MAX_BODY_SIZE {
                return Err(UpstreamError::TooLarge(MAX_BODY_SIZE));
            }
            if reader.read_buf(buf).await? == 0 {
                return Err(UpstreamError::Truncated);
            }
        },
        Framing::UntilClose => loop {
            if buf.len() > MAX_BODY_SIZE {
                return Err(UpstreamError::TooLarge(MAX_BODY_SIZE));
            }
            if reader.read_buf(buf).await? == 0 {
                return Ok(buf.split().freeze());
            }
        },
    }
}
