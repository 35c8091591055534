//! Handler contract for routed messages.

use crate::request::Request;
use async_trait::async_trait;
use std::future::Future;

/// Handler registered for one message kind.
///
/// The dispatcher runs `pre_handle`, `handle` and `post_handle` in that
/// order for every request of the kind. All three stages must be provided;
/// use [`handler_fn`] when only `handle` matters.
#[async_trait]
pub trait Router: Send + Sync {
    async fn pre_handle(&self, request: &Request);

    async fn handle(&self, request: &Request);

    async fn post_handle(&self, request: &Request);
}

/// Router built from an async closure, with no-op pre/post stages.
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Router`].
///
/// ```ignore
/// server.add_route(1, handler_fn(|req: Request| async move {
///     let _ = req.connection().send_buffered(req.kind(), req.data()).await;
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Router for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn pre_handle(&self, _request: &Request) {}

    async fn handle(&self, request: &Request) {
        (self.f)(request.clone()).await
    }

    async fn post_handle(&self, _request: &Request) {}
}
