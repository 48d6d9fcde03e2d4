//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` crate, or a custom sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::{should_panic, should_panic_on_warning};
use crate::sync::mutex::Mutex;

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Global flag to enable verbose diagnostics.
static VERBOSE_DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Installed sink, if any. Receives every diagnostic that is not suppressed.
fn sink_slot() -> &'static Mutex<Option<Arc<dyn DiagnosticSink>>> {
    static SINK: OnceLock<Mutex<Option<Arc<dyn DiagnosticSink>>>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(None))
}

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Enable verbose diagnostic output.
pub fn set_verbose(verbose: bool) {
    VERBOSE_DIAGNOSTICS.store(verbose, Ordering::Relaxed);
}

/// Check if verbose output is on.
pub fn is_verbose() -> bool {
    VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed)
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Install a process-wide sink that receives every emitted diagnostic.
///
/// Returns the previously installed sink.
pub fn set_sink(sink: Option<Arc<dyn DiagnosticSink>>) -> Option<Arc<dyn DiagnosticSink>> {
    std::mem::replace(&mut *sink_slot().lock(), sink)
}

/// Emit a diagnostic.
///
/// In release builds without the `diagnostics` feature, only an installed
/// sink sees it. In debug builds it also goes to stderr, or to the `log`
/// crate when the `log` feature is enabled.
pub fn emit(diag: &Diagnostic) {
    emit_with_detail(diag, "");
}

/// Emit a diagnostic with an additional runtime detail line.
pub fn emit_with_detail(diag: &Diagnostic, detail: &str) {
    if is_suppressed() {
        return;
    }

    // Clone out so the sink runs without the slot locked.
    let sink = sink_slot().lock().clone();
    if let Some(sink) = sink {
        sink.emit(diag, detail);
    }

    #[cfg(all(feature = "log", any(debug_assertions, feature = "diagnostics")))]
    {
        emit_to_log(diag, detail);
    }

    #[cfg(all(not(feature = "log"), any(debug_assertions, feature = "diagnostics")))]
    {
        emit_to_stderr(diag, detail);
    }

    let fatal = match diag.kind {
        DiagnosticKind::Error => should_panic(),
        DiagnosticKind::Warning => should_panic_on_warning(),
        DiagnosticKind::Note | DiagnosticKind::Help => false,
    };
    if fatal {
        panic!(
            "[frametask][{}] {}\n{}\nStrict mode enabled - errors are fatal.",
            diag.code, diag.message, detail
        );
    }
}

/// Internal: emit to stderr.
#[cfg(all(not(feature = "log"), any(debug_assertions, feature = "diagnostics")))]
fn emit_to_stderr(diag: &Diagnostic, detail: &str) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    let verbose = VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed);

    let _ = writeln!(
        stderr,
        "[frametask][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );

    if !detail.is_empty() {
        let _ = writeln!(stderr, "  detail: {}", detail);
    }

    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }

    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }

    if verbose && diag.kind == DiagnosticKind::Error {
        let _ = writeln!(stderr, "  hint: set RUST_BACKTRACE=1 for a backtrace");
    }

    let _ = writeln!(stderr);
}

/// Emit a diagnostic using the log crate.
#[cfg(feature = "log")]
pub fn emit_to_log(diag: &Diagnostic, detail: &str) {
    match diag.kind {
        DiagnosticKind::Error => {
            log::error!("[{}] {} {}", diag.code, diag.message, detail);
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {} {}", diag.code, diag.message, detail);
        }
        DiagnosticKind::Note | DiagnosticKind::Help => {
            log::info!("[{}] {} {}", diag.code, diag.message, detail);
        }
    }

    if VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed) {
        if let Some(note) = diag.note {
            log::debug!("  note: {}", note);
        }
        if let Some(help) = diag.help {
            log::debug!("  help: {}", help);
        }
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic. `detail` is empty when none was attached.
    fn emit(&self, diag: &Diagnostic, detail: &str);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<(Diagnostic, String)>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    /// Details attached to collected diagnostics with the given code.
    pub fn details(&self, code: &str) -> Vec<String> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|(d, _)| d.code == code)
            .map(|(_, detail)| detail.clone())
            .collect()
    }

    /// Check whether a code was collected.
    pub fn contains(&self, code: &str) -> bool {
        self.diagnostics.lock().iter().any(|(d, _)| d.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|(d, _)| d.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, detail: &str) {
        self.diagnostics.lock().push((diag.clone(), detail.to_string()));
    }
}
