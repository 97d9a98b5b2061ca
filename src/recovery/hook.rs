//! Guarded scopes and the panic hook that observes faults inside them.
//!
//! Unwinding destroys the frames that raised a fault before `catch_unwind`
//! returns, so the stack is recorded by a process-wide panic hook while it is
//! still intact. The hook only records for threads currently inside a guarded
//! scope and keeps the default panic output for everything else.
//!
//! Panics inside a guarded scope are never passed to the previous hook, so
//! they are not printed to stderr, including panics that application code
//! stops with its own `catch_unwind`. A capture left behind by such a panic
//! is discarded when the thread next enters its outermost guarded scope.

use crate::trace::{CallSite, RawTrace, Traceback};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

/// Raw frames recorded per panic; resolution happens later
const HOOK_CAPTURE_LIMIT: usize = Traceback::FRAME_LIMIT + 48;

static INSTALL: Once = Once::new();

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

/// What the hook saw while the faulting frames were still on the stack
#[derive(Debug, Clone)]
pub(crate) struct PanicCapture {
    pub(crate) location: Option<CallSite>,
    pub(crate) raw: RawTrace,
}

/// A panic stopped at a guarded scope
pub(crate) struct Caught {
    pub(crate) payload: Box<dyn Any + Send>,
    pub(crate) capture: Option<PanicCapture>,
}

/// Install the recording panic hook, chaining to the one already set
///
/// Safe to call any number of times. If another hook replaces this one later,
/// faults are still intercepted but their traceback is taken at the
/// interception point.
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if in_guarded_scope() {
                record(info);
            } else {
                previous(info);
            }
        }));
        tracing::debug!("recovery panic hook installed");
    });
}

fn in_guarded_scope() -> bool {
    DEPTH.try_with(|depth| depth.get() > 0).unwrap_or(false)
}

fn record(info: &PanicHookInfo<'_>) {
    let capture = PanicCapture {
        location: info.location().map(CallSite::from_location),
        raw: RawTrace::capture(HOOK_CAPTURE_LIMIT),
    };
    // a nested panic while the slot is borrowed just loses its capture
    let _ = CAPTURED.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = Some(capture);
        }
    });
}

fn take_capture() -> Option<PanicCapture> {
    CAPTURED
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

/// Marks the current thread as inside a guarded scope until dropped
struct ScopeGuard;

impl ScopeGuard {
    fn enter() -> Self {
        let outermost = DEPTH
            .try_with(|depth| {
                let current = depth.get();
                depth.set(current + 1);
                current == 0
            })
            .unwrap_or(false);
        if outermost {
            // stale capture from a panic the application caught itself
            let _ = take_capture();
        }
        ScopeGuard
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let _ = DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f`, stopping any panic it raises
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Caught> {
    let _scope = ScopeGuard::enter();
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Caught {
        payload,
        capture: take_capture(),
    })
}

/// Future adapter that guards every poll of the wrapped future
///
/// After a panic the inner future is dropped and never polled again.
pub(crate) struct Guarded<F> {
    inner: Option<Pin<Box<F>>>,
}

impl<F: Future> Guarded<F> {
    pub(crate) fn new(future: F) -> Self {
        Self {
            inner: Some(Box::pin(future)),
        }
    }
}

impl<F: Future> Future for Guarded<F> {
    type Output = Result<F::Output, Caught>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = self.inner.as_mut() else {
            // polled after completion
            return Poll::Pending;
        };

        match catch(|| inner.as_mut().poll(cx)) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(output)) => {
                self.inner = None;
                Poll::Ready(Ok(output))
            }
            Err(caught) => {
                let poisoned = self.inner.take();
                let _ = catch(move || drop(poisoned));
                Poll::Ready(Err(caught))
            }
        }
    }
}
