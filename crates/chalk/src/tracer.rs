//! Compilation tracing infrastructure.
//!
//! The VM is generic over a [`CompileTracer`]. With [`NoopTracer`] every hook is
//! an empty inline function and compiles away entirely, the same way
//! [`NoLimitTracker`](crate::resource::NoLimitTracker) removes resource checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable compile log to stderr |
//! | [`RecordingTracer`] | Event recording for tests and post-mortems |

use crate::error::CompileErrorKind;

/// Event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    ModuleStart { module: String },
    FunctionStart { depth: usize },
    FunctionEnd { name: String, code_len: usize, max_stack: u32 },
    Error { kind: CompileErrorKind, line: u32 },
    Gc { before: usize, after: usize },
    ModuleLoaded { module: String, variables: usize },
}

/// Hooks fired at the milestones of a compilation.
///
/// All methods default to no-ops, so implementations only override the hooks
/// they care about.
pub trait CompileTracer: std::fmt::Debug {
    /// A module is about to be compiled.
    #[inline(always)]
    fn on_module_start(&mut self, _module: &str) {}

    /// A function compiler was pushed; `depth` counts enclosing functions.
    #[inline(always)]
    fn on_function_start(&mut self, _depth: usize) {}

    /// A function finished compiling without errors.
    #[inline(always)]
    fn on_function_end(&mut self, _name: &str, _code_len: usize, _max_stack: u32) {}

    /// A compile error was recorded. Only the first error of a compile is reported.
    #[inline(always)]
    fn on_error(&mut self, _kind: CompileErrorKind, _line: u32) {}

    /// A collection ran; counts are live heap objects.
    #[inline(always)]
    fn on_gc(&mut self, _before: usize, _after: usize) {}

    /// A module compiled successfully and its top-level fiber was created.
    #[inline(always)]
    fn on_module_loaded(&mut self, _module: &str, _variables: usize) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

/// Tracer that prints one line per event to stderr.
///
/// ```text
/// === module main
///   >>> function depth=1
///   <<< f                    code=3 max_stack=1
/// !!! UndefinedVariable at line 4
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of events to print. None = unlimited.
    limit: Option<usize>,
    count: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if self.limit.is_some_and(|limit| self.count >= limit) {
            return;
        }
        eprintln!("{line}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} events) ---");
        }
    }
}

impl CompileTracer for StderrTracer {
    fn on_module_start(&mut self, module: &str) {
        self.emit(format_args!("=== module {module}"));
    }

    fn on_function_start(&mut self, depth: usize) {
        self.emit(format_args!("  >>> function depth={depth}"));
    }

    fn on_function_end(&mut self, name: &str, code_len: usize, max_stack: u32) {
        self.emit(format_args!("  <<< {name:<20} code={code_len} max_stack={max_stack}"));
    }

    fn on_error(&mut self, kind: CompileErrorKind, line: u32) {
        self.emit(format_args!("!!! {kind} at line {line}"));
    }

    fn on_gc(&mut self, before: usize, after: usize) {
        self.emit(format_args!("  ... gc {before} -> {after} objects"));
    }

    fn on_module_loaded(&mut self, module: &str, variables: usize) {
        self.emit(format_args!("=== loaded {module} ({variables} variables)"));
    }
}

/// Tracer that records every event.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl CompileTracer for RecordingTracer {
    fn on_module_start(&mut self, module: &str) {
        self.events.push(TraceEvent::ModuleStart {
            module: module.to_owned(),
        });
    }

    fn on_function_start(&mut self, depth: usize) {
        self.events.push(TraceEvent::FunctionStart { depth });
    }

    fn on_function_end(&mut self, name: &str, code_len: usize, max_stack: u32) {
        self.events.push(TraceEvent::FunctionEnd {
            name: name.to_owned(),
            code_len,
            max_stack,
        });
    }

    fn on_error(&mut self, kind: CompileErrorKind, line: u32) {
        self.events.push(TraceEvent::Error { kind, line });
    }

    fn on_gc(&mut self, before: usize, after: usize) {
        self.events.push(TraceEvent::Gc { before, after });
    }

    fn on_module_loaded(&mut self, module: &str, variables: usize) {
        self.events.push(TraceEvent::ModuleLoaded {
            module: module.to_owned(),
            variables,
        });
    }
}
