//! Fault values carried by an unwinding handler chain.
//!
//! Handlers signal a client-facing error by raising an [`HttpException`]; any
//! other panic payload becomes an unclassified fault. Both arrive at the
//! recovery layer as a [`Fault`].

use crate::error::{Result, SalvageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::any::Any;
use std::fmt;
use thiserror::Error;

pub mod filter;

pub use filter::{DefaultExceptionFilter, ExceptionFilter, JsonExceptionFilter, resolve};

/// Description used when a panic payload has no textual form
pub const NON_TEXTUAL_PAYLOAD: &str = "non-textual panic payload";

/// A classified HTTP error: the status and message are sent to the client verbatim
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HttpException {
    pub status: StatusCode,
    pub message: String,
}

impl HttpException {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from a raw status code
    ///
    /// Codes are not checked against the registered ranges; only values the
    /// `http` crate cannot represent are rejected.
    pub fn from_u16(status: u16, message: impl Into<String>) -> Result<Self> {
        let status = StatusCode::from_u16(status).map_err(|_| SalvageError::InvalidStatus(status))?;
        Ok(Self::new(status, message))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Abort the current handler chain with this exception as the fault value
    #[track_caller]
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}

impl IntoResponse for HttpException {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Abort the current handler chain with a classified HTTP error
///
/// ```rust,no_run
/// use salvage::exception::raise;
/// use axum::http::StatusCode;
///
/// async fn get_user() -> &'static str {
///     raise(StatusCode::NOT_FOUND, "user not found")
/// }
/// ```
#[track_caller]
pub fn raise(status: StatusCode, message: impl Into<String>) -> ! {
    HttpException::new(status, message).raise()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    Classified,
    Unclassified,
}

/// The value an intercepted fault carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Application code raised a specific HTTP error
    Http(HttpException),

    /// Anything else: a plain panic, a failed assertion, a third-party error
    Unclassified { description: String },
}

impl Fault {
    /// Classify a panic payload
    ///
    /// Besides a bare [`HttpException`], an `anyhow::Error` wrapping one is
    /// also treated as classified.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<HttpException>() {
            Ok(exception) => return Fault::Http(*exception),
            Err(other) => other,
        };

        if let Some(error) = payload.downcast_ref::<anyhow::Error>() {
            if let Some(exception) = error.downcast_ref::<HttpException>() {
                return Fault::Http(exception.clone());
            }
        }

        Fault::Unclassified {
            description: describe(payload.as_ref()),
        }
    }

    pub fn unclassified(description: impl Into<String>) -> Self {
        Fault::Unclassified {
            description: description.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Http(_) => FaultKind::Classified,
            Fault::Unclassified { .. } => FaultKind::Unclassified,
        }
    }

    pub fn as_http(&self) -> Option<&HttpException> {
        match self {
            Fault::Http(exception) => Some(exception),
            Fault::Unclassified { .. } => None,
        }
    }

    /// Textual description used in diagnostics
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Http(exception) => write!(f, "{}: {}", exception.status, exception.message),
            Fault::Unclassified { description } => f.write_str(description),
        }
    }
}

impl From<HttpException> for Fault {
    fn from(exception: HttpException) -> Self {
        Fault::Http(exception)
    }
}

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    if let Some(error) = payload.downcast_ref::<anyhow::Error>() {
        return format!("{error:#}");
    }
    if let Some(error) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        return error.to_string();
    }
    NON_TEXTUAL_PAYLOAD.to_string()
}
