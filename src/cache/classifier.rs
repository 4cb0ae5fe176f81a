//! Decides whether a request is a caching candidate.

use std::sync::Arc;

use tracing::debug;

use super::CachePolicy;
use crate::http::{Method, Request};

/// Pure predicate over requests.
///
/// - `GET` (any case) is always cacheable.
/// - `POST` is cacheable when its action header, with every `"` removed,
///   exactly matches an allow-listed action.
/// - Every other method is not.
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: Arc<CachePolicy>,
}

impl Classifier {
    /// Creates a classifier for `policy`.
    pub fn new(policy: Arc<CachePolicy>) -> Self {
        Self { policy }
    }

    /// Returns `true` if `request` may be served from and stored in the cache.
    pub fn is_cacheable(&self, request: &Request) -> bool {
        if request.method().eq_ignore_case("GET") {
            return true;
        }
        if *request.method() != Method::Post {
            return false;
        }

        let action = self.action(request);
        let allowed = self.policy.is_cacheable_action(&action);
        debug!(action = %action, allowed, "classified SOAP action");
        allowed
    }

    /// The action header value with double quotes removed; empty when absent.
    pub fn action(&self, request: &Request) -> String {
        request
            .headers()
            .get(self.policy.action_header())
            .unwrap_or_default()
            .replace('"', "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(CachePolicy::default()))
    }

    fn soap(action: &str) -> Request {
        Request::new(Method::Post, "http://backend/soap")
            .header("Soapaction", action)
            .with_body("<Envelope/>")
    }

    #[test]
    fn get_is_always_cacheable() {
        let c = classifier();
        assert!(c.is_cacheable(&Request::new(Method::Get, "http://backend/orders")));
        assert!(c.is_cacheable(
            &Request::new(Method::Custom("get".into()), "http://backend/orders")
                .header("Soapaction", "\"deleteAll\"")
        ));
    }

    #[test]
    fn post_depends_on_quoted_action() {
        let c = classifier();
        assert!(c.is_cacheable(&soap("\"getList\"")));
        assert!(c.is_cacheable(&soap("getMessage")));
        assert!(!c.is_cacheable(&soap("\"deleteAll\"")));
        assert!(!c.is_cacheable(&soap("\"GETLIST\"")));
        assert!(!c.is_cacheable(&Request::new(Method::Post, "http://backend/soap")));
    }

    #[test]
    fn action_header_name_is_case_insensitive() {
        let c = classifier();
        let req = Request::new(Method::Post, "http://backend/soap").header("SOAPAction", "\"call\"");
        assert!(c.is_cacheable(&req));
    }

    #[test]
    fn other_methods_are_never_cacheable() {
        let c = classifier();
        for method in [Method::Put, Method::Delete, Method::Head, Method::Patch] {
            let req = Request::new(method, "http://backend/x").header("Soapaction", "getList");
            assert!(!c.is_cacheable(&req));
        }
    }

    #[test]
    fn custom_policy_is_honored() {
        let policy = CachePolicy::new(["accept"], "X-Action", ["sync"]);
        let c = Classifier::new(Arc::new(policy));
        let req = Request::new(Method::Post, "http://backend/rpc").header("X-Action", "\"sync\"");
        assert!(c.is_cacheable(&req));
        assert!(!c.is_cacheable(&soap("getList")));
    }
}
