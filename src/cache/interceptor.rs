//! Cache lookup on the request hook, cache fill on the response hook.
//!
//! Request phase: classify, fingerprint, attach the key to the request, look
//! it up, and answer from the cache on a hit. Response phase: recover the key
//! from the request, and store the serialized response unless an entry
//! already exists. Every failure on the cache path degrades to plain
//! proxying; neither phase ever fails the exchange.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::CachePolicy;
use super::classifier::Classifier;
use super::fingerprint::Fingerprinter;
use super::propagate;
use super::store::{CacheStore, ENTRY_TTL};
use crate::http::{Request, Response};
use crate::proxy::{HookFuture, Interceptor, RequestAction};

/// What the response phase did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// No originating request, or the request is not cacheable.
    NotCacheable,
    /// The request carries no cache key; the request phase chose not to cache.
    NoKey,
    /// The response was written to the store.
    Stored,
    /// An entry already existed, so nothing was written.
    AlreadyCached,
    /// The store failed during the check or the write.
    StoreFailed,
}

/// [`Interceptor`] that serves and fills a response cache.
pub struct CachingInterceptor<S> {
    classifier: Classifier,
    fingerprinter: Fingerprinter,
    store: S,
    ttl: Duration,
}

impl<S: CacheStore> CachingInterceptor<S> {
    /// Creates an interceptor whose entries live for [`ENTRY_TTL`].
    pub fn new(policy: CachePolicy, store: S) -> Self {
        let policy = Arc::new(policy);
        Self {
            classifier: Classifier::new(Arc::clone(&policy)),
            fingerprinter: Fingerprinter::new(policy),
            store,
            ttl: ENTRY_TTL,
        }
    }

    /// Overrides the entry lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Request phase.
    pub async fn handle_request(&self, mut request: Request) -> RequestAction {
        if !self.classifier.is_cacheable(&request) {
            debug!(
                method = %request.method(),
                url = %request.url(),
                "not a cacheable request, forwarding"
            );
            debug!(dump = %String::from_utf8_lossy(&request.to_bytes()), "request");
            return RequestAction::Forward(request);
        }

        let key = match self.fingerprinter.fingerprint(&request) {
            Ok(key) => key.key(),
            Err(e) => {
                warn!(url = %request.url(), error = %e, "cannot fingerprint request, forwarding uncached");
                return RequestAction::Forward(request);
            }
        };

        propagate::attach(&mut request, &key);
        debug!(dump = %String::from_utf8_lossy(&request.to_bytes()), "request");

        match self.store.get(&key).await {
            Ok(Some(entry)) => match Response::parse(&entry) {
                Ok(response) => {
                    info!(key = %key, url = %request.url(), "cache hit");
                    RequestAction::Respond(request, response)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "cached entry is unreadable, forwarding");
                    RequestAction::Forward(request)
                }
            },
            Ok(None) => {
                info!(key = %key, url = %request.url(), "cache miss");
                RequestAction::Forward(request)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, forwarding");
                RequestAction::Forward(request)
            }
        }
    }

    /// Response phase. The response itself is never modified.
    pub async fn handle_response(
        &self,
        request: Option<&Request>,
        response: &Response,
    ) -> ResponseOutcome {
        let Some(request) = request else {
            return ResponseOutcome::NotCacheable;
        };
        if !self.classifier.is_cacheable(request) {
            return ResponseOutcome::NotCacheable;
        }
        let Some(key) = propagate::recover(request) else {
            debug!(url = %request.url(), "no cache key on request, not storing");
            return ResponseOutcome::NoKey;
        };

        let entry = response.to_bytes();
        debug!(dump = %String::from_utf8_lossy(&entry), "response");

        match self.store.get(key).await {
            Ok(Some(_)) => {
                debug!(key = %key, "entry already cached, not overwriting");
                ResponseOutcome::AlreadyCached
            }
            Ok(None) => match self.store.set_if_absent(key, entry, self.ttl).await {
                Ok(true) => {
                    info!(key = %key, status = response.status(), "stored response");
                    ResponseOutcome::Stored
                }
                Ok(false) => {
                    debug!(key = %key, "entry written concurrently, not overwriting");
                    ResponseOutcome::AlreadyCached
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "cache write failed");
                    ResponseOutcome::StoreFailed
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "cache check failed, skipping write");
                ResponseOutcome::StoreFailed
            }
        }
    }
}

impl<S: CacheStore> Interceptor for CachingInterceptor<S> {
    fn on_request(&self, request: Request) -> HookFuture<'_, RequestAction> {
        Box::pin(self.handle_request(request))
    }

    fn on_response<'a>(
        &'a self,
        request: Option<&'a Request>,
        response: Response,
    ) -> HookFuture<'a, Response> {
        Box::pin(async move {
            self.handle_response(request, &response).await;
            response
        })
    }
}
