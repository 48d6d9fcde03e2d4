//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Additional context about another diagnostic.
    Note,
    /// Actionable suggestion to fix the issue.
    Help,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
            DiagnosticKind::Help => "help",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `FT0xx` - Task protocol issues (tokens, continuations)
/// - `FT1xx` - Pooling issues
/// - `FT2xx` - Runner and timing issues
/// - `FT3xx` - Threading and unobserved faults
/// - `FT9xx` - Internal errors
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "FT001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }

    /// Same diagnostic at a different severity.
    pub const fn with_kind(mut self, kind: DiagnosticKind) -> Self {
        self.kind = kind;
        self
    }
}

// =============================================================================
// Predefined diagnostics (FT0xx - Task protocol)
// =============================================================================

/// FT001: A second continuation was registered on one task.
pub const FT001: Diagnostic = Diagnostic::error(
    "FT001",
    "continuation registered twice on the same task"
).with_note("a task source fires exactly one continuation per version")
 .with_help("await or observe each Task exactly once; convert to a shared future if several consumers need it");

/// FT002: A stale token was presented to a task source.
pub const FT002: Diagnostic = Diagnostic::warning(
    "FT002",
    "stale task token presented"
).with_note("the task source was already consumed and recycled for another operation")
 .with_help("do not keep using a Task after reading its result");

// =============================================================================
// Predefined diagnostics (FT1xx - Pooling)
// =============================================================================

/// FT101: A pooled operation was returned while still referenced.
pub const FT101: Diagnostic = Diagnostic::warning(
    "FT101",
    "pooled operation still referenced at return; discarding instead of recycling"
).with_note("another owner still holds this instance, recycling it would hand its state to a new operation")
 .with_help("drop producer handles and continuations that capture the source before reading the result");

// =============================================================================
// Predefined diagnostics (FT2xx - Runner and timing)
// =============================================================================

/// FT201: Operation scheduled on a timing that was never injected.
pub const FT201: Diagnostic = Diagnostic::error(
    "FT201",
    "loop timing is not injected"
).with_note("the runtime only creates runners for timings enabled in RuntimeConfig::inject_timings")
 .with_help("add the timing to RuntimeConfig::with_inject_timings, or schedule on an injected timing");

/// FT202: A runner or queue was re-entered while already running.
pub const FT202: Diagnostic = Diagnostic::error(
    "FT202",
    "loop phase re-entered while it was already running"
).with_note("a phase callback invoked its own phase recursively")
 .with_help("schedule follow-up work with add_action or yield_now instead of running the phase inline");

/// FT203: A loop item or continuation panicked.
pub const FT203: Diagnostic = Diagnostic::warning(
    "FT203",
    "loop item panicked during advance"
).with_note("the item was removed and the rest of the phase kept running")
 .with_help("return an error through the task instead of panicking inside predicates and continuations");

/// FT204: A host loop has no phase for an injected timing.
pub const FT204: Diagnostic = Diagnostic::error(
    "FT204",
    "host loop does not expose a phase for an injected timing"
).with_help("remove the timing from RuntimeConfig::inject_timings or add the phase to the host loop");

// =============================================================================
// Predefined diagnostics (FT3xx - Threading and unobserved faults)
// =============================================================================

/// FT301: A phase was driven off the main thread.
pub const FT301: Diagnostic = Diagnostic::warning(
    "FT301",
    "loop phase driven from a thread other than the runtime's main thread"
).with_note("operation bodies assume the single thread that created the runtime")
 .with_help("marshal work onto the main thread with post_to_main_thread or a continuation queue");

/// FT302: A faulted task was never observed.
pub const FT302: Diagnostic = Diagnostic::error(
    "FT302",
    "unobserved task fault"
).with_note("the task faulted and its result was never read")
 .with_help("await the task, or install a handler with FaultReporter::set_handler");

// =============================================================================
// Predefined diagnostics (FT9xx - Internal)
// =============================================================================

/// FT901: Internal runtime error.
pub const FT901: Diagnostic = Diagnostic::error(
    "FT901",
    "internal task runtime error"
).with_note("this indicates a bug in frametask")
 .with_help("please report this issue at the frametask repository");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_codes() {
        assert_eq!(FT001.kind, DiagnosticKind::Error);
        assert_eq!(FT101.kind, DiagnosticKind::Warning);
        assert!(FT201.help.is_some());
    }

    #[test]
    fn test_with_kind() {
        let diag = FT302.with_kind(DiagnosticKind::Note);
        assert_eq!(diag.kind, DiagnosticKind::Note);
        assert_eq!(diag.code, "FT302");
    }
}
