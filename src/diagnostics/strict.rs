//! Strict mode handling for diagnostics.
//!
//! Allows configuration of how diagnostics are treated:
//! - Warn: Just emit the diagnostic
//! - Panic: Emit and then panic (useful for CI)

use std::sync::atomic::{AtomicU8, Ordering};

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just warn, don't panic.
    Warn = 0,
    /// Panic on errors.
    PanicOnError = 1,
    /// Panic on errors and warnings.
    PanicOnWarning = 2,
}

impl From<u8> for StrictMode {
    fn from(val: u8) -> Self {
        match val {
            1 => StrictMode::PanicOnError,
            2 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

impl StrictMode {
    /// Parse a `FRAMETASK_STRICT` value. Unknown values fall back to `Warn`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "1" | "error" | "true" => StrictMode::PanicOnError,
            "2" | "warning" | "all" => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

static STRICT_MODE: AtomicU8 = AtomicU8::new(0);

/// Set the strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from(STRICT_MODE.load(Ordering::Relaxed))
}

/// Check if errors should panic.
pub fn should_panic() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnError | StrictMode::PanicOnWarning)
}

/// Check if warnings should panic.
pub fn should_panic_on_warning() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnWarning)
}

/// RAII guard for temporarily setting strict mode.
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Create a new guard that sets strict mode.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }

    /// Create a guard that enables panic-on-error.
    pub fn panic_on_error() -> Self {
        Self::new(StrictMode::PanicOnError)
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}

/// Initialize strict mode from the `FRAMETASK_STRICT` environment variable.
///
/// - "0" or "warn" -> Warn
/// - "1" or "error" -> PanicOnError
/// - "2" or "warning" -> PanicOnWarning
pub fn init_from_env() {
    if let Ok(val) = std::env::var("FRAMETASK_STRICT") {
        set_strict_mode(StrictMode::parse(&val));
    }
}
