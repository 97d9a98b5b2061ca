use crate::context::RequestContext;
use crate::exception::Fault;
use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Body sent for every unclassified fault
pub const INTERNAL_SERVER_ERROR_MESSAGE: &str = "Internal Server Error";

/// Header carrying the fault id when exposure is enabled
pub const FAULT_ID_HEADER: &str = "x-fault-id";

/// Turns an intercepted fault into the response the client receives
///
/// Installing a filter on [`Recovery`](crate::recovery::Recovery) replaces the
/// default resolution entirely. The fault has already been logged by the time
/// `catch` runs.
pub trait ExceptionFilter: Send + Sync + 'static {
    fn catch(&self, fault: &Fault, context: &RequestContext) -> Response;
}

impl<F> ExceptionFilter for F
where
    F: Fn(&Fault, &RequestContext) -> Response + Send + Sync + 'static,
{
    fn catch(&self, fault: &Fault, context: &RequestContext) -> Response {
        self(fault, context)
    }
}

/// Status and body for a fault, never leaking unclassified detail
fn status_and_message(fault: &Fault) -> (StatusCode, String) {
    match fault {
        Fault::Http(exception) => (exception.status, exception.message.clone()),
        Fault::Unclassified { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            INTERNAL_SERVER_ERROR_MESSAGE.to_string(),
        ),
    }
}

/// Default response resolution
///
/// A classified fault answers with its own status and message; everything
/// else answers `500 Internal Server Error`.
pub fn resolve(fault: &Fault) -> Response {
    status_and_message(fault).into_response()
}

/// The filter used when no override is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionFilter {
    pub expose_fault_id: bool,
}

impl ExceptionFilter for DefaultExceptionFilter {
    fn catch(&self, fault: &Fault, context: &RequestContext) -> Response {
        let mut response = resolve(fault);
        if self.expose_fault_id {
            if let Some(id) = context.fault_id() {
                if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                    response.headers_mut().insert(FAULT_ID_HEADER, value);
                }
            }
        }
        response
    }
}

/// Answers with a JSON document instead of plain text
///
/// ```json
/// {"statusCode": 404, "message": "not found", "faultId": "...", "timestamp": "..."}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExceptionFilter;

impl ExceptionFilter for JsonExceptionFilter {
    fn catch(&self, fault: &Fault, context: &RequestContext) -> Response {
        let (status, message) = status_and_message(fault);

        (
            status,
            Json(json!({
                "statusCode": status.as_u16(),
                "message": message,
                "faultId": context.fault_id().map(|id| id.to_string()),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}
