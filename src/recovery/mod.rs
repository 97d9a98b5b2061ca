//! Fault interception for handler chains.
//!
//! [`Recovery`] runs the rest of a request's handler chain inside a guarded
//! scope. A panic raised anywhere below it is stopped at that scope, logged
//! once through the configured [`FaultReporter`], and answered with a
//! well-formed HTTP response, either by the configured [`ExceptionFilter`] or
//! by the default resolution:
//!
//! ```text
//! running ──panic──▶ faulted: report logged ─▶ response written
//! ```
//!
//! There is no way back from the faulted state; the faulted handler is never
//! resumed and nothing else in the chain runs for that request.
//!
//! # Registration
//!
//! ```rust,no_run
//! use axum::{Router, http::StatusCode, routing::get};
//! use salvage::{Recovery, RecoveryLayer, exception::raise};
//!
//! async fn find_user() -> &'static str {
//!     raise(StatusCode::NOT_FOUND, "no such user")
//! }
//!
//! let recovery = Recovery::new();
//! let app: Router = Router::new()
//!     .route("/users/{id}", get(find_user))
//!     .layer(RecoveryLayer::new(recovery));
//! ```
//!
//! # Cancellation
//!
//! A cancelled request is a dropped future. It never unwinds, so it never
//! reaches the guard and is neither reported nor answered here.

use crate::config::RecoveryConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::exception::{DefaultExceptionFilter, ExceptionFilter, Fault};
use crate::interceptor::{ChainFuture, Interceptor, InterceptorResult, Next};
use crate::trace::{DiagnosticReport, Traceback};
use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use std::future::Future;
use std::sync::Arc;

mod hook;
pub mod layer;
pub mod reporter;

use hook::{Caught, Guarded, PanicCapture, catch};

pub use hook::install_panic_hook;
pub use layer::{RecoveryLayer, RecoveryService};
pub use reporter::{FaultReporter, LOG_TARGET, TracingReporter};

/// The fault interceptor
///
/// Cloning is cheap; all clones share the same filter, reporter and config,
/// none of which change after construction.
#[derive(Clone)]
pub struct Recovery {
    inner: Arc<RecoveryInner>,
}

struct RecoveryInner {
    filter: Option<Arc<dyn ExceptionFilter>>,
    reporter: Arc<dyn FaultReporter>,
    config: RecoveryConfig,
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Recovery {
    /// Default resolution, reports through `tracing`
    pub fn new() -> Self {
        RecoveryBuilder::new().assemble()
    }

    /// Let `filter` decide every faulted response
    pub fn with_filter(filter: impl ExceptionFilter) -> Self {
        RecoveryBuilder::new().filter(filter).assemble()
    }

    pub fn builder() -> RecoveryBuilder {
        RecoveryBuilder::new()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Run a handler chain inside a guarded scope
    ///
    /// `chain` is invoked inside the scope too, so a panic while building the
    /// future is handled like one raised while polling it. Errors returned
    /// by the chain are not faults and are passed through.
    pub async fn run<C, F, E>(&self, context: RequestContext, chain: C) -> std::result::Result<Response, E>
    where
        C: FnOnce() -> F,
        F: Future<Output = std::result::Result<Response, E>>,
    {
        let future = match catch(chain) {
            Ok(future) => future,
            Err(caught) => return Ok(self.recover(caught, context)),
        };

        match Guarded::new(future).await {
            Ok(result) => result,
            Err(caught) => Ok(self.recover(caught, context)),
        }
    }

    /// Guard the continuation of an interceptor chain
    pub fn wrap(&self, next: Next) -> Next {
        let recovery = self.clone();
        Next::new(move |request| -> ChainFuture {
            let context = RequestContext::from_request(&request);
            Box::pin(async move { recovery.run(context, move || next.call(request)).await })
        })
    }

    #[inline(never)]
    fn recover(&self, caught: Caught, context: RequestContext) -> Response {
        let Caught { payload, capture } = caught;
        let fault = Fault::from_panic(payload);

        let report = DiagnosticReport::new(&fault, self.traceback(capture));
        let context = context.with_fault_id(report.id());

        if catch(|| self.inner.reporter.report(&report, &context)).is_err() {
            tracing::error!(
                target: LOG_TARGET,
                { fault.id = %report.id() },
                "fault reporter panicked; original fault: {}",
                report.description()
            );
        }

        self.respond(&fault, &context)
    }

    fn traceback(&self, capture: Option<PanicCapture>) -> Traceback {
        let config = &self.inner.config;
        let location = capture.as_ref().and_then(|c| c.location.clone());

        let traceback = if !config.capture_traceback {
            Traceback::default()
        } else {
            let max_frames = config.max_frames;
            match capture {
                Some(capture) => catch(move || capture.raw.resolve(0, max_frames)),
                None => catch(move || Traceback::capture(0, max_frames)),
            }
            .unwrap_or_default()
        };

        match location {
            Some(location) if traceback.is_empty() => Traceback::from_frames(vec![location], 1),
            _ => traceback,
        }
    }

    fn respond(&self, fault: &Fault, context: &RequestContext) -> Response {
        let default = DefaultExceptionFilter {
            expose_fault_id: self.inner.config.expose_fault_id,
        };

        let Some(filter) = &self.inner.filter else {
            return default.catch(fault, context);
        };

        match catch(|| filter.catch(fault, context)) {
            Ok(response) => response,
            Err(caught) => {
                tracing::error!(
                    target: LOG_TARGET,
                    { fault.id = ?context.fault_id() },
                    "exception filter panicked: {}",
                    Fault::from_panic(caught.payload)
                );
                default.catch(fault, context)
            }
        }
    }
}

#[async_trait]
impl Interceptor for Recovery {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let context = RequestContext::from_request(&request);
        self.run(context, move || next.call(request)).await
    }
}

/// Builder for [`Recovery`]
pub struct RecoveryBuilder {
    filter: Option<Arc<dyn ExceptionFilter>>,
    reporter: Arc<dyn FaultReporter>,
    config: RecoveryConfig,
}

impl Default for RecoveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryBuilder {
    pub fn new() -> Self {
        Self {
            filter: None,
            reporter: Arc::new(TracingReporter),
            config: RecoveryConfig::default(),
        }
    }

    /// Replace the default response resolution
    pub fn filter(mut self, filter: impl ExceptionFilter) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn reporter(mut self, reporter: impl FaultReporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and install the panic hook
    pub fn build(self) -> Result<Recovery> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> Recovery {
        install_panic_hook();
        Recovery {
            inner: Arc::new(RecoveryInner {
                filter: self.filter,
                reporter: self.reporter,
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::HttpException;
    use crate::exception::filter::INTERNAL_SERVER_ERROR_MESSAGE;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::convert::Infallible;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Events(Arc<Mutex<Vec<String>>>);

    impl Events {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn recording(events: &Events) -> RecoveryBuilder {
        let events = events.clone();
        Recovery::builder().reporter(move |report: &DiagnosticReport, _: &RequestContext| {
            events.push(format!("report:{}", report.render()));
        })
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[inline(never)]
    fn explode() -> Response {
        panic!("divide by zero")
    }

    async fn not_found() -> std::result::Result<Response, Infallible> {
        HttpException::not_found("not found").raise()
    }

    #[tokio::test]
    async fn test_classified_fault() {
        let events = Events::default();
        let recovery = recording(&events).build().unwrap();

        let response = recovery
            .run(RequestContext::default(), not_found)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "not found");

        let events = events.take();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("report:404 Not Found: not found\nTraceback:\n\t"));
    }

    #[tokio::test]
    async fn test_unclassified_fault() {
        let events = Events::default();
        let recovery = recording(&events).build().unwrap();

        let response = recovery
            .run(RequestContext::default(), || async { Ok::<_, Infallible>(explode()) })
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, INTERNAL_SERVER_ERROR_MESSAGE);

        let events = events.take();
        assert_eq!(events.len(), 1);
        assert!(events[0].contains("divide by zero"));
    }

    #[tokio::test]
    async fn test_traceback_starts_at_faulting_function() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let recovery = Recovery::builder()
            .reporter(move |report: &DiagnosticReport, _: &RequestContext| {
                sink.lock().unwrap().push(report.clone());
            })
            .build()
            .unwrap();

        recovery
            .run(RequestContext::default(), || async { Ok::<_, Infallible>(explode()) })
            .await
            .unwrap();

        let reports = reports.lock().unwrap();
        let frames = reports[0].traceback().frames();
        assert!(!frames.is_empty());
        assert!(frames.len() <= Traceback::DEFAULT_MAX_FRAMES);
        let first = frames[0].function.as_deref().unwrap_or_default();
        assert!(first.contains("explode"), "first frame was {first}");
    }

    #[tokio::test]
    async fn test_override_filter_replaces_resolution() {
        let events = Events::default();
        let filter_events = events.clone();
        let recovery = recording(&events)
            .filter(move |fault: &Fault, _: &RequestContext| {
                filter_events.push(format!("filter:{}", fault.kind()));
                (StatusCode::IM_A_TEAPOT, "teapot").into_response()
            })
            .build()
            .unwrap();

        let classified = recovery
            .run(RequestContext::default(), not_found)
            .await
            .unwrap();
        assert_eq!(classified.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_string(classified).await, "teapot");

        let unclassified = recovery
            .run(RequestContext::default(), || async { Ok::<_, Infallible>(explode()) })
            .await
            .unwrap();
        assert_eq!(unclassified.status(), StatusCode::IM_A_TEAPOT);

        let events = events.take();
        assert_eq!(events.len(), 4);
        assert!(events[0].starts_with("report:404 Not Found: not found"));
        assert_eq!(events[1], "filter:classified");
        assert!(events[2].starts_with("report:divide by zero"));
        assert_eq!(events[3], "filter:unclassified");
    }

    #[tokio::test]
    async fn test_panicking_filter_falls_back_to_default() {
        let events = Events::default();
        let recovery = recording(&events)
            .filter(|_: &Fault, _: &RequestContext| -> Response { panic!("filter broke") })
            .build()
            .unwrap();

        let response = recovery
            .run(RequestContext::default(), || async { Ok::<_, Infallible>(explode()) })
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(events.take().len(), 1);
    }

    #[tokio::test]
    async fn test_normal_completion_is_untouched() {
        let events = Events::default();
        let recovery = recording(&events).build().unwrap();

        let response = recovery
            .run(RequestContext::default(), || async {
                tokio::task::yield_now().await;
                Ok::<_, Infallible>((StatusCode::CREATED, "made").into_response())
            })
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_string(response).await, "made");
        assert!(events.take().is_empty());
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let events = Events::default();
        let recovery = recording(&events).build().unwrap();

        let result = recovery
            .run(RequestContext::default(), || async { Err::<Response, _>("upstream down") })
            .await;

        assert_eq!(result.unwrap_err(), "upstream down");
        assert!(events.take().is_empty());
    }

    #[tokio::test]
    async fn test_panic_while_starting_chain() {
        let events = Events::default();
        let recovery = recording(&events).build().unwrap();

        let response = recovery
            .run(RequestContext::default(), || -> std::future::Ready<std::result::Result<Response, Infallible>> {
                panic!("could not build handler")
            })
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(events.take()[0].contains("could not build handler"));
    }

    #[tokio::test]
    async fn test_traceback_disabled_keeps_location() {
        let events = Events::default();
        let config = RecoveryConfig {
            capture_traceback: false,
            ..RecoveryConfig::default()
        };
        let recovery = recording(&events).config(config).build().unwrap();

        recovery
            .run(RequestContext::default(), || async { Ok::<_, Infallible>(explode()) })
            .await
            .unwrap();

        let events = events.take();
        let lines: Vec<_> = events[0].lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("recovery/mod.rs:"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RecoveryConfig {
            max_frames: 0,
            ..RecoveryConfig::default()
        };
        assert!(Recovery::builder().config(config).build().is_err());
    }
}
