//! Handler chain.
//!
//! An ordered list of [`Interceptor`]s wraps an inner service. Each link
//! receives the request and a [`Next`] continuation that runs the rest of the
//! chain; [`Recovery`](crate::recovery::Recovery) is one such link.

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use std::future::Future;
use std::pin::Pin;

pub mod layer;

pub use layer::{InterceptorLayer, InterceptorService};

/// Result of running (part of) the chain
pub type InterceptorResult = Result<Response, InterceptorError>;

/// A type-erased error returned by a link or by the inner service
pub type InterceptorError = Box<dyn std::error::Error + Send + Sync>;

/// Future produced by a continuation
pub type ChainFuture = Pin<Box<dyn Future<Output = InterceptorResult> + Send>>;

/// The rest of the handler chain for one request
pub struct Next {
    run: Box<dyn FnOnce(Request<Body>) -> ChainFuture + Send>,
}

impl Next {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Request<Body>) -> ChainFuture + Send + 'static,
    {
        Self { run: Box::new(f) }
    }

    /// Start the rest of the chain without awaiting it
    pub fn call(self, request: Request<Body>) -> ChainFuture {
        (self.run)(request)
    }

    /// Run the rest of the chain
    pub async fn run(self, request: Request<Body>) -> InterceptorResult {
        self.call(request).await
    }
}

/// One link of the handler chain
///
/// # Example
/// ```rust,ignore
/// struct RequireJson;
///
/// #[async_trait]
/// impl Interceptor for RequireJson {
///     async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
///         if request.headers().get(CONTENT_TYPE) != Some(&HeaderValue::from_static("application/json")) {
///             return Ok(StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response());
///         }
///         next.run(request).await
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult;
}
