//! Deterministic request fingerprints.
//!
//! The canonical form of a request is a newline-joined list of lines:
//!
//! ```text
//! URL: <url>
//! Method: <method>
//! Protocol: <protocol>
//! <header>: <value>      one line per allow-listed header, in policy order
//! <body>                 POST only, decoded lossily as UTF-8
//! ```
//!
//! Absent headers render with an empty value, so absence and an empty value
//! fingerprint identically. The digest is MD5 over the canonical string.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::CachePolicy;
use crate::http::{Method, Request};

/// The body of a `POST` request could not be read in full.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("request body is incomplete: Content-Length {declared}, received {received} bytes")]
    IncompleteBody { declared: usize, received: usize },
}

/// A 128-bit request digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Lowercase, 32-character hex rendering; the literal store key.
    pub fn to_hex(&self) -> String {
        format!("{self}")
    }

    /// Returns the raw 16-byte digest.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Output of [`Fingerprinter::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    pub fingerprint: Fingerprint,
    /// `METHOD_PROTOCOL_URL_HEX`, for logs only. Never a lookup key.
    pub composite: String,
}

impl RequestKey {
    /// The store key.
    pub fn key(&self) -> String {
        self.fingerprint.to_hex()
    }
}

/// Computes fingerprints against an allow-list policy.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    policy: Arc<CachePolicy>,
}

impl Fingerprinter {
    /// Creates a fingerprinter for `policy`.
    pub fn new(policy: Arc<CachePolicy>) -> Self {
        Self { policy }
    }

    /// Fingerprints `request` without touching its body.
    ///
    /// # Errors
    ///
    /// [`FingerprintError::IncompleteBody`] when a `POST` body is shorter than
    /// its declared `Content-Length`; the request must then be treated as not
    /// cacheable for this exchange.
    pub fn fingerprint(&self, request: &Request) -> Result<RequestKey, FingerprintError> {
        let canonical = self.canonical(request)?;
        debug!(canonical = %canonical, "fingerprint input");

        let fingerprint = Fingerprint(md5::compute(canonical.as_bytes()).0);
        let composite = format!(
            "{}_{}_{}_{}",
            request.method(),
            request.protocol(),
            request.url(),
            fingerprint
        );
        debug!(key = %fingerprint, composite = %composite, "fingerprint computed");

        Ok(RequestKey {
            fingerprint,
            composite,
        })
    }

    /// Builds the canonical string that is hashed.
    pub fn canonical(&self, request: &Request) -> Result<String, FingerprintError> {
        let mut lines = Vec::with_capacity(self.policy.fingerprint_headers().len() + 2);
        lines.push(format!(
            "URL: {}\nMethod: {}\nProtocol: {}",
            request.url(),
            request.method(),
            request.protocol()
        ));
        for name in self.policy.fingerprint_headers() {
            let value = request.headers().get(name).unwrap_or_default();
            lines.push(format!("{name}: {value}"));
        }

        if *request.method() == Method::Post {
            let body = request.body();
            if let Some(declared) = request.content_length() {
                if body.len() < declared {
                    return Err(FingerprintError::IncompleteBody {
                        declared,
                        received: body.len(),
                    });
                }
            }
            lines.push(String::from_utf8_lossy(body).into_owned());
        }

        Ok(lines.join("\n"))
    }
}
