use crate::interceptor::{ChainFuture, Interceptor, InterceptorError, InterceptorResult, Next};
use axum::{body::Body, http::Request, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer running an ordered list of interceptors around a service
///
/// The first interceptor is the outermost link.
#[derive(Clone)]
pub struct InterceptorLayer {
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorLayer {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: Arc::new(interceptors),
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl<S> Layer<S> for InterceptorLayer {
    type Service = InterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            inner,
            interceptors: Arc::clone(&self.interceptors),
        }
    }
}

#[derive(Clone)]
pub struct InterceptorService<S> {
    inner: S,
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
}

impl<S> Service<Request<Body>> for InterceptorService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<InterceptorError> + Send,
{
    type Response = Response;
    type Error = InterceptorError;
    type Future = Pin<Box<dyn Future<Output = InterceptorResult> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // take the service that was driven to readiness, leave a clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let mut chain = Next::new(move |req| -> ChainFuture {
            let fut = inner.call(req);
            Box::pin(async move { fut.await.map_err(Into::into) })
        });

        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let next = chain;
            chain = Next::new(move |req| -> ChainFuture {
                Box::pin(async move { interceptor.intercept(req, next).await })
            });
        }

        chain.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Interceptor;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::{ServiceExt, service_fn};

    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Tag {
        async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
            self.seen.lock().unwrap().push(format!("> {}", self.name));
            let response = next.run(request).await;
            self.seen.lock().unwrap().push(format!("< {}", self.name));
            response
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        async fn intercept(&self, _request: Request<Body>, _next: Next) -> InterceptorResult {
            Ok(StatusCode::UNAUTHORIZED.into_response())
        }
    }

    fn handler(
        seen: Arc<Mutex<Vec<String>>>,
    ) -> impl Service<Request<Body>, Response = Response, Error = Infallible, Future: Send> + Clone + Send
    {
        service_fn(move |_req: Request<Body>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push("handler".to_string());
                Ok::<_, Infallible>(StatusCode::OK.into_response())
            }
        })
    }

    #[tokio::test]
    async fn test_interceptors_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let layer = InterceptorLayer::new(vec![
            Arc::new(Tag { name: "a", seen: Arc::clone(&seen) }) as Arc<dyn Interceptor>,
            Arc::new(Tag { name: "b", seen: Arc::clone(&seen) }) as Arc<dyn Interceptor>,
        ]);
        assert_eq!(layer.len(), 2);

        let service = layer.layer(handler(Arc::clone(&seen)));
        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["> a", "> b", "handler", "< b", "< a"]
        );
    }

    #[tokio::test]
    async fn test_interceptor_can_stop_the_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let layer = InterceptorLayer::new(vec![Arc::new(ShortCircuit) as Arc<dyn Interceptor>]);

        let service = layer.layer(handler(Arc::clone(&seen)));
        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.lock().unwrap().is_empty());
    }
}
