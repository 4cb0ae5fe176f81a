//! Async forward proxy using Tokio.
//!
//! Accepts client connections, reads HTTP/1.x requests, runs them through an
//! [`Interceptor`], forwards what the request hook does not answer, runs the
//! response hook on whatever comes back, and writes the result to the client.
//! Client connections are persistent (keep-alive); origin connections are
//! one per request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::http::body::{self, Framing};
use crate::http::request::RequestError;
use crate::http::{Method, Request, Response, StatusCode};

pub mod hooks;
mod tunnel;
pub mod upstream;

pub use hooks::{HookFuture, Interceptor, PassThrough, RequestAction};
pub use upstream::UpstreamError;

/// Errors produced by the proxy listener.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Per-proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Bound on connecting to and exchanging with an origin.
    pub upstream_timeout: Duration,
    /// Log every exchange at `info` rather than `debug`.
    pub verbose: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            verbose: false,
        }
    }
}

/// The forward proxy.
///
/// # Examples
///
/// ```rust,no_run
/// use hcproxy::proxy::{PassThrough, ProxyOptions, ProxyServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let proxy = ProxyServer::bind("127.0.0.1:48080", ProxyOptions::default()).await?;
///     proxy.run(PassThrough).await?;
///     Ok(())
/// }
/// ```
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: ProxyOptions,
}

impl ProxyServer {
    /// Binds the proxy to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>, options: ProxyOptions) -> Result<Self, ProxyError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Returns the local address the proxy is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections, intercepting every exchange with
    /// `interceptor`.
    ///
    /// Runs until the task is dropped or the process ends. Per-connection
    /// failures are logged and never stop the accept loop.
    pub async fn run<I>(self, interceptor: I) -> Result<(), ProxyError>
    where
        I: Interceptor + 'static,
    {
        let interceptor = Arc::new(interceptor);
        let options = Arc::new(self.options);
        info!(address = %self.local_addr, "proxy listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let interceptor = Arc::clone(&interceptor);
            let options = Arc::clone(&options);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, interceptor, options).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles one client connection over its lifetime: one request per
/// iteration until the client closes, asks for `Connection: close`, or
/// switches to a `CONNECT` tunnel.
async fn handle_connection<I>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    interceptor: Arc<I>,
    options: Arc<ProxyOptions>,
) -> Result<(), std::io::Error>
where
    I: Interceptor + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, consumed) = match next_request(&buf) {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large — sending 413");
                    let response =
                        Response::error(StatusCode::PayloadTooLarge, "Request entity too large");
                    stream.write_all(&response.to_bytes()).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e @ RequestError::TooLarge { .. }) => {
                warn!(peer = %peer_addr, error = %e, "request too large — sending 413");
                let response =
                    Response::error(StatusCode::PayloadTooLarge, "Request entity too large");
                stream.write_all(&response.to_bytes()).await?;
                break;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::error(StatusCode::BadRequest, format!("Bad Request: {e}"));
                stream.write_all(&response.to_bytes()).await?;
                break;
            }
        };
        let _ = buf.split_to(consumed);

        if *request.method() == Method::Connect {
            let buffered: Bytes = buf.split().freeze();
            return tunnel::run(stream, peer_addr, &request, buffered, options.upstream_timeout)
                .await;
        }

        let keep_alive = request.is_keep_alive();
        let response = exchange(interceptor.as_ref(), request, &options).await;
        stream.write_all(&response.to_bytes()).await?;
        stream.flush().await?;

        if !keep_alive || response.is_close() {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

/// Extracts the next complete request from the front of `buf`.
///
/// Returns `Ok(None)` while the head or body is still incomplete, otherwise
/// the request with its body attached and the number of bytes it occupied.
/// Chunked request bodies are decoded and re-framed with `Content-Length`.
fn next_request(buf: &[u8]) -> Result<Option<(Request, usize)>, RequestError> {
    let (mut request, body_offset) = match Request::parse(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) => return Ok(None),
        Err(e) => return Err(e),
    };

    match body::request_framing(request.headers())? {
        Framing::Length(len) => {
            if len > MAX_REQUEST_SIZE {
                return Err(RequestError::TooLarge {
                    declared: len,
                    limit: MAX_REQUEST_SIZE,
                });
            }
            let end = body_offset + len;
            if buf.len() < end {
                return Ok(None);
            }
            request.set_body(Bytes::copy_from_slice(&buf[body_offset..end]));
            Ok(Some((request, end)))
        }
        Framing::Chunked => match body::decode_chunked(&buf[body_offset..])? {
            Some((decoded, used)) => {
                let len = decoded.len();
                request.set_body(decoded);
                request.headers_mut().remove("transfer-encoding");
                request.headers_mut().set("Content-Length", len.to_string());
                Ok(Some((request, body_offset + used)))
            }
            None => Ok(None),
        },
        Framing::Empty | Framing::UntilClose => {
            request.set_body(Bytes::new());
            Ok(Some((request, body_offset)))
        }
    }
}

/// Runs one exchange through the hooks and, unless answered by the request
/// hook, the origin.
async fn exchange<I>(interceptor: &I, request: Request, options: &ProxyOptions) -> Response
where
    I: Interceptor + ?Sized,
{
    let start = Instant::now();
    let method = request.method().clone();
    let url = request.url().into_owned();

    let (request, response) = match interceptor.on_request(request).await {
        RequestAction::Respond(request, response) => (request, response),
        RequestAction::Forward(request) => {
            match upstream::forward(&request, options.upstream_timeout).await {
                Ok(response) => (request, response),
                Err(e) => {
                    warn!(method = %method, url = %url, error = %e, "forwarding failed");
                    return Response::error(e.status(), format!("{}: {e}", e.status()));
                }
            }
        }
    };

    let response = interceptor.on_response(Some(&request), response).await;

    let status = response.status();
    let elapsed = start.elapsed();
    if options.verbose {
        info!(method = %method, url = %url, status, ?elapsed, "proxied");
    } else {
        debug!(method = %method, url = %url, status, ?elapsed, "proxied");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_complete_body() {
        let raw = b"POST http://h/soap HTTP/1.1\r\nContent-Length: 10\r\n\r\n<Env";
        assert!(next_request(raw).unwrap().is_none());
    }

    #[test]
    fn oversized_content_length_is_rejected_up_front() {
        let raw = b"POST http://h/soap HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        assert!(matches!(
            next_request(raw),
            Err(RequestError::TooLarge { declared: usize::MAX, limit: MAX_REQUEST_SIZE })
        ));

        let raw = format!(
            "POST http://h/soap HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_SIZE + 1
        );
        assert!(matches!(
            next_request(raw.as_bytes()),
            Err(RequestError::TooLarge { .. })
        ));
    }

    #[test]
    fn pipelined_requests_are_split() {
        let raw = b"POST http://h/a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET http://h/b HTTP/1.1\r\n\r\n";
        let (first, used) = next_request(raw).unwrap().unwrap();
        assert_eq!(first.body().as_ref(), b"abc");

        let (second, rest) = next_request(&raw[used..]).unwrap().unwrap();
        assert_eq!(second.url(), "http://h/b");
        assert_eq!(used + rest, raw.len());
    }

    #[test]
    fn chunked_request_is_reframed() {
        let raw = b"POST http://h/soap HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n<Env\r\n0\r\n\r\n";
        let (request, used) = next_request(raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(request.body().as_ref(), b"<Env");
        assert_eq!(request.content_length(), Some(4));
        assert!(!request.headers().contains("transfer-encoding"));
    }

    #[test]
    fn malformed_request_is_an_error() {
        assert!(next_request(b"\x01\x02 nonsense\r\n\r\n").is_err());
        assert!(matches!(
            next_request(b"POST http://h/ HTTP/1.1\r\nContent-Length: x\r\n\r\n"),
            Err(RequestError::Body(_))
        ));
    }

    #[tokio::test]
    async fn forwarding_failure_becomes_bad_gateway() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let request = Request::new(Method::Get, "http://127.0.0.1:9/orders");
        let options = ProxyOptions {
            upstream_timeout: Duration::from_secs(5),
            verbose: false,
        };
        let response = exchange(&PassThrough, request, &options).await;
        assert_eq!(response.status(), 502);
        assert!(response.is_close());
    }

    #[tokio::test]
    async fn short_circuit_skips_the_origin() {
        struct Canned;

        impl Interceptor for Canned {
            fn on_request(&self, request: Request) -> HookFuture<'_, RequestAction> {
                Box::pin(async move {
                    let response = Response::new(StatusCode::Ok)
                        .header("Content-Length", "6")
                        .with_body("cached");
                    RequestAction::Respond(request, response)
                })
            }

            fn on_response<'a>(
                &'a self,
                request: Option<&'a Request>,
                response: Response,
            ) -> HookFuture<'a, Response> {
                Box::pin(async move {
                    assert!(request.is_some());
                    response.header("X-Seen", "1")
                })
            }
        }

        // The unroutable target would fail if the origin were contacted.
        let request = Request::new(Method::Get, "http://127.0.0.1:9/orders");
        let response = exchange(&Canned, request, &ProxyOptions::default()).await;
        assert_eq!(response.body().as_ref(), b"cached");
        assert_eq!(response.headers().get("x-seen"), Some("1"));
    }
}
