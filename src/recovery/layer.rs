use crate::context::RequestContext;
use crate::recovery::Recovery;
use axum::{http::Request, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer guarding every request that passes through it
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use salvage::{Recovery, RecoveryLayer};
///
/// let app: Router = Router::new()
///     .route("/", get(|| async { "ok" }))
///     .layer(RecoveryLayer::new(Recovery::new()));
/// ```
#[derive(Clone, Default)]
pub struct RecoveryLayer {
    recovery: Recovery,
}

impl RecoveryLayer {
    pub fn new(recovery: Recovery) -> Self {
        Self { recovery }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            recovery: self.recovery.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RecoveryService<S> {
    inner: S,
    recovery: Recovery,
}

impl<S, B> Service<Request<B>> for RecoveryService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let recovery = self.recovery.clone();
        let context = RequestContext::from_request(&request);

        Box::pin(async move { recovery.run(context, move || inner.call(request)).await })
    }
}
