//! Interception hooks: the two callbacks the proxy invokes per exchange.
//!
//! The request hook sees each client request before it is forwarded and may
//! answer it directly. The response hook sees every response, live or
//! short-circuited, together with the request that produced it. The two
//! calls are independent: whatever the hooks need to correlate must travel
//! on the request itself.

use std::future::Future;
use std::pin::Pin;

use crate::http::{Request, Response};

/// Boxed, `Send` future returned by hook methods.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the proxy should do with a request after the request hook.
#[derive(Debug)]
pub enum RequestAction {
    /// Send the (possibly modified) request to the origin.
    Forward(Request),
    /// Answer with `response` without contacting the origin.
    Respond(Request, Response),
}

/// Request/response interception.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; hooks run concurrently on
///   every connection task.
/// - Hooks must not fail the exchange. Whatever goes wrong inside a hook is
///   handled there, and a request or response is always handed back.
///
/// # Examples
///
/// ```rust
/// use hcproxy::http::{Request, Response};
/// use hcproxy::proxy::{HookFuture, Interceptor, RequestAction};
///
/// struct Tag;
///
/// impl Interceptor for Tag {
///     fn on_request(&self, request: Request) -> HookFuture<'_, RequestAction> {
///         Box::pin(async move { RequestAction::Forward(request.header("Via", "1.1 hcproxy")) })
///     }
///
///     fn on_response<'a>(
///         &'a self,
///         _request: Option<&'a Request>,
///         response: Response,
///     ) -> HookFuture<'a, Response> {
///         Box::pin(async move { response })
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync {
    /// Invoked with each outbound request.
    fn on_request(&self, request: Request) -> HookFuture<'_, RequestAction>;

    /// Invoked with each response before it is written to the client.
    fn on_response<'a>(
        &'a self,
        request: Option<&'a Request>,
        response: Response,
    ) -> HookFuture<'a, Response>;
}

/// Interceptor that forwards everything untouched.
pub struct PassThrough;

impl Interceptor for PassThrough {
    fn on_request(&self, request: Request) -> HookFuture<'_, RequestAction> {
        Box::pin(async move { RequestAction::Forward(request) })
    }

    fn on_response<'a>(
        &'a self,
        _request: Option<&'a Request>,
        response: Response,
    ) -> HookFuture<'a, Response> {
        Box::pin(async move { response })
    }
}
