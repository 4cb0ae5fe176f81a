//! Message body framing (RFC 9112 §6) and chunked transfer decoding.
//!
//! The proxy always buffers whole bodies: request bodies are needed for
//! fingerprinting, response bodies for caching. Chunked bodies are decoded on
//! receipt and re-framed with `Content-Length`.

use thiserror::Error;

use super::Headers;

/// Errors raised while framing or decoding a body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("invalid Content-Length header: {0:?}")]
    InvalidContentLength(String),

    #[error("invalid chunk size line")]
    InvalidChunkSize,

    #[error("chunk data is not terminated by CRLF")]
    MalformedChunk,

    #[error("chunk of {0} bytes does not fit in memory")]
    ChunkTooLarge(u64),
}

/// How the end of a message body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The message has no body.
    Empty,
    /// The body is exactly this many bytes.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// The body runs until the peer closes the connection (responses only).
    UntilClose,
}

/// Determines the body framing of a request.
///
/// Requests without `Content-Length` or chunked encoding have no body.
pub fn request_framing(headers: &Headers) -> Result<Framing, BodyError> {
    if headers.has_token("transfer-encoding", "chunked") {
        return Ok(Framing::Chunked);
    }
    match content_length(headers)? {
        Some(0) | None => Ok(Framing::Empty),
        Some(n) => Ok(Framing::Length(n)),
    }
}

/// Determines the body framing of a response. Responses to `HEAD` requests
/// never carry a body.
pub fn response_framing(
    request_was_head: bool,
    status: u16,
    headers: &Headers,
) -> Result<Framing, BodyError> {
    if request_was_head || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(Framing::Empty);
    }
    if headers.has_token("transfer-encoding", "chunked") {
        return Ok(Framing::Chunked);
    }
    match content_length(headers)? {
        Some(0) => Ok(Framing::Empty),
        Some(n) => Ok(Framing::Length(n)),
        None => Ok(Framing::UntilClose),
    }
}

/// Parses the `Content-Length` header, if present.
pub fn content_length(headers: &Headers) -> Result<Option<usize>, BodyError> {
    headers
        .get("content-length")
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| BodyError::InvalidContentLength(raw.to_owned()))
        })
        .transpose()
}

/// Decodes a chunked body from the start of `buf`.
///
/// Returns `Ok(None)` while more data is needed, otherwise the decoded
/// payload and the number of bytes of `buf` consumed, trailers included.
/// Trailer fields are discarded.
pub fn decode_chunked(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, BodyError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let (line_len, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(BodyError::InvalidChunkSize),
        };
        pos += line_len;

        if size == 0 {
            // Trailer section: zero or more field lines, then an empty line.
            loop {
                let Some(end) = find_crlf(&buf[pos..]) else {
                    return Ok(None);
                };
                let line_is_empty = end == 0;
                pos += end + 2;
                if line_is_empty {
                    return Ok(Some((body, pos)));
                }
            }
        }

        // Chunk data plus its trailing CRLF.
        let chunk_end = usize::try_from(size)
            .ok()
            .and_then(|len| pos.checked_add(len))
            .and_then(|end| end.checked_add(2))
            .ok_or(BodyError::ChunkTooLarge(size))?;
        if buf.len() < chunk_end {
            return Ok(None);
        }
        let data_end = chunk_end - 2;
        if &buf[data_end..chunk_end] != b"\r\n" {
            return Err(BodyError::MalformedChunk);
        }
        body.extend_from_slice(&buf[pos..data_end]);
        pos = chunk_end;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
