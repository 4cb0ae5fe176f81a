//! Transparent `CONNECT` tunnelling. Tunnelled traffic is opaque (usually
//! TLS) and bypasses the interception hooks.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::http::{Request, Response, StatusCode};

/// Connects to the `host:port` authority named by a `CONNECT` request and
/// relays bytes both ways until either side closes. `buffered` holds client
/// bytes already read past the `CONNECT` head.
pub(super) async fn run(
    mut client: TcpStream,
    peer: SocketAddr,
    request: &Request,
    buffered: Bytes,
    connect_timeout: Duration,
) -> std::io::Result<()> {
    let authority = request.target();
    let connected = tokio::time::timeout(connect_timeout, TcpStream::connect(authority)).await;
    let mut origin = match connected {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(peer = %peer, authority = %authority, error = %e, "tunnel connect failed");
            let response = Response::error(StatusCode::BadGateway, format!("cannot reach {authority}: {e}"));
            return client.write_all(&response.to_bytes()).await;
        }
        Err(_) => {
            warn!(peer = %peer, authority = %authority, "tunnel connect timed out");
            let response = Response::error(StatusCode::GatewayTimeout, format!("cannot reach {authority}: timed out"));
            return client.write_all(&response.to_bytes()).await;
        }
    };

    client
        .write_all(
            format!(
                "{} {} Connection established\r\n\r\n",
                request.protocol(),
                StatusCode::Ok.as_u16()
            )
            .as_bytes(),
        )
        .await?;
    if !buffered.is_empty() {
        origin.write_all(&buffered).await?;
    }

    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut origin).await?;
    debug!(peer = %peer, authority = %authority, sent, received, "tunnel closed");
    Ok(())
}
