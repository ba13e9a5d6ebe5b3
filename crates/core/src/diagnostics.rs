//! A `Diagnostics` sink threaded explicitly through the public entry
//! points of this crate, rather than a global mutable error list -- so
//! that assembling several `Object`s concurrently on separate threads
//! never contends on shared state.

use std::fmt;

/// Where in the original source a diagnostic applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    /// 1-based source line number; 0 means "no associated source line"
    /// (synthetic bytecodes the optimizer itself introduces).
    pub line: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.line == 0 {
            write!(f, "<generated>")
        } else {
            write!(f, "{}", self.line)
        }
    }
}

/// Severity of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Assembly cannot produce valid output; the owning pass stops as
    /// soon as it notices one of these.
    Error,
    /// Assembly continues; the CLI layer decides whether to surface these.
    Warning,
}

/// A single recorded error or warning.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: Severity,
    /// Primary source location.
    pub loc: SourceLoc,
    /// Human-readable message.
    pub message: String,
    /// Optional secondary location, e.g. "previously defined here".
    pub note: Option<(SourceLoc, String)>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", self.loc, kind, self.message)?;
        if let Some((loc, note)) = &self.note {
            write!(f, "\n{}: note: {}", loc, note)?;
        }
        Ok(())
    }
}

/// Accumulates errors and warnings produced while assembling one `Object`.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    error_count: usize,
    undefined_symbol_noted: bool,
}

impl Diagnostics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error at `loc`.
    pub fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.error_count += 1;
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            loc,
            message: message.into(),
            note: None,
        });
    }

    /// Record an error at `loc` with a secondary cross-reference location.
    pub fn error_with_note(
        &mut self,
        loc: SourceLoc,
        message: impl Into<String>,
        note_loc: SourceLoc,
        note: impl Into<String>,
    ) {
        self.error_count += 1;
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            loc,
            message: message.into(),
            note: Some((note_loc, note.into())),
        });
    }

    /// Record a warning at `loc`.
    pub fn warn(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            loc,
            message: message.into(),
            note: None,
        });
    }

    /// Record the "first use of an undefined symbol" note exactly once per
    /// compile, so a symbol used hundreds of times does not flood the log.
    pub fn note_undefined_symbol_once(&mut self, loc: SourceLoc, name: &str) {
        if !self.undefined_symbol_noted {
            self.undefined_symbol_noted = true;
            self.error(loc, format!("undefined symbol `{}`", name));
        } else {
            self.error_count += 1;
        }
    }

    /// Number of errors recorded so far. A pass boundary checks this and
    /// returns early once it is non-zero.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// True if no errors (warnings are fine) have been recorded.
    pub fn is_ok(&self) -> bool {
        self.error_count == 0
    }

    /// All diagnostics recorded so far, in recording order.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}
