use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::resource::ResourceError;

/// Longest identifier, in bytes, the compiler accepts.
pub const MAX_NAME: usize = 64;

/// Categories of compile failure. Flat by design: every failure has exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, Display)]
pub enum CompileErrorKind {
    /// A byte sequence that matches no token.
    Lex,
    /// The parser could not continue.
    Syntax,
    UndefinedVariable,
    /// A local or module variable declared twice in the same scope.
    Duplicate,
    DuplicateMethod,
    /// Too many locals, upvalues, constants, arguments or fields; a jump or a
    /// name that is too long.
    LimitExceeded,
    /// Assignment to something that cannot be stored into.
    NotAnLvalue,
    ThisOutsideMethod,
    /// The resource tracker refused an allocation.
    Allocation,
    /// A construct used where it is not allowed, such as `break` outside a loop.
    Misuse,
}

/// A compile failure as delivered to the host.
///
/// `message` is already rendered in the `Error near '<token>': <text>` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub module: String,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, module: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
            line,
            message: message.into(),
        }
    }

    /// Wraps a resource failure raised while allocating on behalf of `module`.
    ///
    /// The limit details stay with the tracker; the host only learns that
    /// memory ran out.
    #[must_use]
    pub fn out_of_memory(module: impl Into<String>, line: u32, _err: &ResourceError) -> Self {
        Self::new(CompileErrorKind::Allocation, module, line, render_message(None, "Out of memory"))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.module, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Renders `message` with the token it was reported at.
///
/// Overlong tokens are cut to `MAX_NAME - 4` bytes plus `...`; a missing or
/// empty token falls back to a bare `Error:` label.
#[must_use]
pub fn render_message(token: Option<&str>, message: &str) -> String {
    match token {
        Some(text) if !text.is_empty() => {
            if text.len() > MAX_NAME {
                let mut cut = MAX_NAME - 4;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("Error near '{}...': {message}", &text[..cut])
            } else {
                format!("Error near '{text}': {message}")
            }
        }
        _ => format!("Error: {message}"),
    }
}
