use std::io::{self, Write as _};

use crate::error::CompileErrorKind;

/// What an error report to the host is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// A compile failure of the given kind.
    Compile(CompileErrorKind),
    /// One frame of a stack trace, innermost first.
    StackTrace,
}

/// Callbacks through which the compiler talks to its embedder.
///
/// Implement this trait to capture or redirect diagnostics. The default
/// implementation `StdHost` writes errors to stderr and output to stdout.
pub trait Host {
    /// Called for compile errors and for stack trace frames.
    ///
    /// # Arguments
    /// * `report` - What the message describes
    /// * `module` - Name of the module the error occurred in
    /// * `line` - 1-based source line, or 0 when unknown
    /// * `message` - Human-readable text, without a trailing newline
    fn error(&mut self, report: Report, module: &str, line: u32, message: &str);

    /// Called with disassembly and other debug output. Lines carry their own newlines.
    fn write(&mut self, message: &str);
}

/// Default `Host` that writes to the process's standard streams.
#[derive(Debug, Default)]
pub struct StdHost;

impl Host for StdHost {
    fn error(&mut self, report: Report, module: &str, line: u32, message: &str) {
        match report {
            Report::Compile(_) => eprintln!("{module}:{line}: {message}"),
            Report::StackTrace => eprintln!("  {message}"),
        }
    }

    fn write(&mut self, message: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(message.as_bytes());
        let _ = stdout.flush();
    }
}

/// One error report captured by [`CollectHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedError {
    pub report: Report,
    pub module: String,
    pub line: u32,
    pub message: String,
}

/// A `Host` that keeps everything it receives.
///
/// Useful for testing or capturing diagnostics programmatically.
#[derive(Debug, Default)]
pub struct CollectHost {
    errors: Vec<CollectedError>,
    output: String,
}

impl CollectHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn errors(&self) -> &[CollectedError] {
        &self.errors
    }

    /// Returns the collected `write` output.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.output.clear();
    }
}

impl Host for CollectHost {
    fn error(&mut self, report: Report, module: &str, line: u32, message: &str) {
        self.errors.push(CollectedError {
            report,
            module: module.to_owned(),
            line,
            message: message.to_owned(),
        });
    }

    fn write(&mut self, message: &str) {
        self.output.push_str(message);
    }
}

/// `Host` that ignores everything.
#[derive(Debug, Default)]
pub struct NoHost;

impl Host for NoHost {
    fn error(&mut self, _report: Report, _module: &str, _line: u32, _message: &str) {}

    fn write(&mut self, _message: &str) {}
}
