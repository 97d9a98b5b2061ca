//! # Salvage
//!
//! Panic recovery for axum/tower handler chains.
//!
//! A fault raised while a request is being handled (a panic, a failed
//! `unwrap`, an explicitly raised [`HttpException`]) is stopped before it can
//! reach the connection-serving loop, logged with a traceback, and turned into
//! a well-formed HTTP response.
//!
//! ## Features
//!
//! - **Guarded scope per request**: every poll of the handler chain runs under
//!   `catch_unwind`, so faults after an `.await` are caught too
//! - **Classified errors**: `raise(StatusCode::NOT_FOUND, "...")` reaches the
//!   client verbatim; anything else becomes a plain `500 Internal Server Error`
//! - **Diagnostic reports**: fault description plus a bounded, innermost-first
//!   list of `file:line` call sites taken where the fault was raised
//! - **Pluggable resolution**: an [`ExceptionFilter`] replaces the default
//!   response, a [`FaultReporter`] replaces the `tracing` sink
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{Router, http::StatusCode, routing::get};
//! use salvage::prelude::*;
//!
//! async fn find_user() -> &'static str {
//!     raise(StatusCode::NOT_FOUND, "user not found")
//! }
//!
//! async fn divide() -> String {
//!     let zero = "0".parse::<i32>().unwrap();
//!     (1 / zero).to_string()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     let app: Router = Router::new()
//!         .route("/users/{id}", get(find_user))
//!         .route("/divide", get(divide))
//!         .layer(RecoveryLayer::new(Recovery::new()));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod exception;
pub mod interceptor;
pub mod recovery;
pub mod trace;

// Re-export core types
pub use config::{ConfigService, RecoveryConfig};
pub use context::RequestContext;
pub use error::{Result, SalvageError};
pub use exception::{ExceptionFilter, Fault, FaultKind, HttpException, raise};
pub use recovery::{FaultReporter, Recovery, RecoveryBuilder, RecoveryLayer, TracingReporter};
pub use trace::{CallSite, DiagnosticReport, Traceback};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use salvage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, RecoveryConfig};
    pub use crate::context::RequestContext;
    pub use crate::error::{Result, SalvageError};
    pub use crate::exception::{
        DefaultExceptionFilter, ExceptionFilter, Fault, FaultKind, HttpException,
        JsonExceptionFilter, raise, resolve,
    };
    pub use crate::interceptor::{Interceptor, InterceptorLayer, InterceptorResult, Next};
    pub use crate::recovery::{
        FaultReporter, Recovery, RecoveryBuilder, RecoveryLayer, TracingReporter,
        install_panic_hook,
    };
    pub use crate::trace::{CallSite, DiagnosticReport, Traceback};
    pub use async_trait::async_trait;
    pub use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    pub use std::sync::Arc;
}
