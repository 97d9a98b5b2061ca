use crate::context::RequestContext;
use crate::trace::DiagnosticReport;

/// Target of every event emitted by the recovery layer
pub const LOG_TARGET: &str = "salvage::recovery";

/// Sink for diagnostic reports
///
/// Called exactly once per intercepted fault, before the response is
/// resolved.
pub trait FaultReporter: Send + Sync + 'static {
    fn report(&self, report: &DiagnosticReport, context: &RequestContext);
}

impl<F> FaultReporter for F
where
    F: Fn(&DiagnosticReport, &RequestContext) + Send + Sync + 'static,
{
    fn report(&self, report: &DiagnosticReport, context: &RequestContext) {
        self(report, context)
    }
}

/// Emits each report as an error event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, report: &DiagnosticReport, context: &RequestContext) {
        tracing::error!(
            target: LOG_TARGET,
            {
                fault.id = %report.id(),
                fault.kind = %report.kind(),
                http.method = %context.method(),
                http.uri = %context.uri()
            },
            "{}\n",
            report
        );
    }
}
