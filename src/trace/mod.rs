//! Diagnostic reports for intercepted faults.
//!
//! A [`DiagnosticReport`] is the fault description followed by a bounded list
//! of call sites:
//!
//! ```text
//! divide by zero
//! Traceback:
//!     src/handlers/math.rs:42 (app::handlers::math::divide)
//!     src/handlers/mod.rs:17 (app::handlers::dispatch)
//!     ...
//! ```
//!
//! Call sites are ordered innermost first: the frame where the fault was
//! raised comes first and the interception point comes last. At most
//! [`Traceback::DEFAULT_MAX_FRAMES`] frames are kept unless configured
//! otherwise, never more than [`Traceback::FRAME_LIMIT`].

use crate::exception::{Fault, FaultKind};
use chrono::{DateTime, Utc};
use std::fmt::{self, Write as _};
use std::panic::Location;
use uuid::Uuid;

/// Frames captured beyond the configured bound, to leave room for the panic
/// machinery that sits above the faulting code
const MACHINERY_HEADROOM: usize = 48;

/// Frames that belong to stack capture itself
const CAPTURE_PREFIXES: &[&str] = &[
    "backtrace::",
    "_Unwind_",
    "salvage::trace::RawTrace::",
    "salvage::trace::Traceback::capture",
    "salvage::trace::format",
];

/// Frames between a panic being raised and the panic hook running
const PANIC_ENTRY_MARKERS: &[&str] = &[
    "rust_begin_unwind",
    "__rust_end_short_backtrace",
    "__rust_start_panic",
    "core::panicking::",
    "std::panicking::begin_panic",
    "std::panic::panic_any",
    "core::result::unwrap_failed",
    "core::option::unwrap_failed",
    "core::option::expect_failed",
    "salvage::exception::raise",
    "salvage::exception::HttpException::raise",
];

const STD_PREFIXES: &[&str] = &["std::", "core::", "alloc::"];

/// One entry of a traceback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            function: None,
            file: Some(file.into()),
            line: Some(line),
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn from_location(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }

    fn is_std_internal(&self) -> bool {
        self.function.as_deref().is_some_and(|name| {
            let name = name.trim_start_matches('<');
            STD_PREFIXES.iter().any(|p| name.starts_with(p))
        })
    }

    fn matches_any(&self, patterns: &[&str]) -> bool {
        self.function
            .as_deref()
            .is_some_and(|name| patterns.iter().any(|p| name.contains(p)))
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.file.as_deref().unwrap_or("<unknown>"),
            self.line.unwrap_or(0)
        )?;
        if let Some(function) = &self.function {
            write!(f, " ({function})")?;
        }
        Ok(())
    }
}

/// Unresolved instruction pointers, cheap enough to collect inside a panic hook
#[derive(Debug, Clone, Default)]
pub(crate) struct RawTrace {
    ips: Vec<usize>,
    exhausted: bool,
}

impl RawTrace {
    /// Walk the current stack, keeping at most `limit` frames
    pub(crate) fn capture(limit: usize) -> Self {
        let mut ips = Vec::with_capacity(limit.min(64));
        let mut exhausted = true;
        backtrace::trace(|frame| {
            if ips.len() == limit {
                exhausted = false;
                return false;
            }
            ips.push(frame.ip() as usize);
            true
        });
        Self { ips, exhausted }
    }

    /// Capture enough frames for a traceback of up to `max_frames` entries
    pub(crate) fn capture_for(skip: usize, max_frames: usize) -> Self {
        Self::capture(skip + bounded(max_frames) + MACHINERY_HEADROOM)
    }

    /// Symbolize and trim to a traceback
    ///
    /// Leading frames belonging to stack capture or to the panic machinery
    /// are dropped, then `skip` more, then at most `max_frames` are kept.
    pub(crate) fn resolve(&self, skip: usize, max_frames: usize) -> Traceback {
        let max_frames = bounded(max_frames);
        let mut sites = Vec::with_capacity(self.ips.len());
        for &ip in &self.ips {
            let before = sites.len();
            backtrace::resolve(ip as *mut std::ffi::c_void, |symbol| {
                sites.push(CallSite {
                    function: symbol.name().map(|name| format!("{name:#}")),
                    file: symbol.filename().map(|path| path.display().to_string()),
                    line: symbol.lineno(),
                });
            });
            if sites.len() == before {
                sites.push(CallSite::default());
            }
        }

        let start = panic_entry_end(&sites).unwrap_or_else(|| capture_end(&sites)) + skip;
        let available = sites.len().saturating_sub(start);
        let truncated = available > max_frames || (!self.exhausted && available > 0);

        Traceback {
            frames: sites.into_iter().skip(start).take(max_frames).collect(),
            truncated,
        }
    }
}

fn bounded(max_frames: usize) -> usize {
    max_frames.clamp(1, Traceback::FRAME_LIMIT)
}

/// Index just past the panic machinery, if this stack is a panicking one
///
/// Standard library frames may be interleaved with the markers (inlined
/// helpers); the machinery ends at the last marker before the first frame
/// outside the standard library.
fn panic_entry_end(sites: &[CallSite]) -> Option<usize> {
    let first = sites.iter().position(|s| s.matches_any(PANIC_ENTRY_MARKERS))?;
    let mut last = first;
    for (offset, site) in sites[first..].iter().enumerate() {
        if site.matches_any(PANIC_ENTRY_MARKERS) {
            last = first + offset;
        } else if !site.is_std_internal() {
            break;
        }
    }
    Some(last + 1)
}

fn capture_end(sites: &[CallSite]) -> usize {
    sites
        .iter()
        .take_while(|s| s.matches_any(CAPTURE_PREFIXES) || (s.function.is_none() && s.file.is_none()))
        .count()
}

/// Bounded, innermost-first list of call sites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
    frames: Vec<CallSite>,
    truncated: bool,
}

impl Traceback {
    pub const DEFAULT_MAX_FRAMES: usize = 32;
    pub const FRAME_LIMIT: usize = 256;

    /// Capture the caller's stack
    ///
    /// `skip` counts frames to drop after the capture machinery itself, so
    /// `capture(0, n)` starts at the function calling `capture`.
    #[inline(never)]
    pub fn capture(skip: usize, max_frames: usize) -> Self {
        RawTrace::capture_for(skip, max_frames).resolve(skip, max_frames)
    }

    /// Build from already known call sites, keeping at most `max_frames`
    pub fn from_frames(frames: Vec<CallSite>, max_frames: usize) -> Self {
        let max_frames = bounded(max_frames);
        let truncated = frames.len() > max_frames;
        let mut frames = frames;
        frames.truncate(max_frames);
        Self { frames, truncated }
    }

    pub fn frames(&self) -> &[CallSite] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether frames beyond the bound were dropped
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Everything logged about one intercepted fault
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    kind: FaultKind,
    description: String,
    traceback: Traceback,
}

impl DiagnosticReport {
    pub fn new(fault: &Fault, traceback: Traceback) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind: fault.kind(),
            description: fault.description(),
            traceback,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn traceback(&self) -> &Traceback {
        &self.traceback
    }

    /// The report as multi-line text
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.description.len() + 64 * self.traceback.len());
        // writing into a String cannot fail
        let _ = write!(out, "{self}");
        out
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)?;
        f.write_str("\nTraceback:")?;
        for site in self.traceback.frames() {
            write!(f, "\n\t{site}")?;
        }
        if self.traceback.is_truncated() {
            f.write_str("\n\t... (frames truncated)")?;
        }
        Ok(())
    }
}

/// Build a report for `fault` from the caller's stack
///
/// For code that catches a fault itself, outside any guarded scope, and so
/// has no panic hook capture. The traceback starts `skip` frames above the
/// caller and holds at most [`Traceback::DEFAULT_MAX_FRAMES`] entries.
///
/// ```
/// use salvage::{Fault, trace};
///
/// let report = trace::format(&Fault::unclassified("queue drained"), 0);
/// assert_eq!(report.description(), "queue drained");
/// assert!(report.render().starts_with("queue drained\nTraceback:"));
/// ```
#[inline(never)]
pub fn format(fault: &Fault, skip: usize) -> DiagnosticReport {
    let traceback = Traceback::capture(skip, Traceback::DEFAULT_MAX_FRAMES);
    DiagnosticReport::new(fault, traceback)
}
